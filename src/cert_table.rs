use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;

use arc_swap::ArcSwap;
use log::debug;
use rustls::sign::CertifiedKey;
use rustls::SignatureScheme;

use crate::hostname_matcher::CertName;
use crate::hostname_util::validate_sni_hostname;
use crate::pattern_index::{Conflict, HostKey, LookupKey, PatternIndex};

/// What the handshake layer does with a connection routed to a context.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum CertAction {
    /// Terminate TLS with the context's certificate.
    #[default]
    Terminate,
    /// Pass the connection through untouched.
    Tunnel,
}

/// Certificate material for one configuration line, shared by every key that
/// maps to it. A line may carry several certificates for the same names,
/// typically one RSA and one ECDSA.
pub struct CertContext {
    source: String,
    action: CertAction,
    certified_keys: Vec<Arc<CertifiedKey>>,
    names: Vec<CertName>,
}

impl CertContext {
    pub fn new(
        source: impl Into<String>,
        action: CertAction,
        certified_keys: Vec<Arc<CertifiedKey>>,
        names: Vec<CertName>,
    ) -> Self {
        Self {
            source: source.into(),
            action,
            certified_keys,
            names,
        }
    }

    /// Where the context came from, usually the certificate path.
    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn action(&self) -> CertAction {
        self.action
    }

    pub fn certified_keys(&self) -> &[Arc<CertifiedKey>] {
        &self.certified_keys
    }

    /// The first certificate whose key can sign with one of the `offered`
    /// schemes, or the first certificate when none can.
    pub fn select_key(&self, offered: &[SignatureScheme]) -> Option<&Arc<CertifiedKey>> {
        self.certified_keys
            .iter()
            .find(|certified_key| certified_key.key.choose_scheme(offered).is_some())
            .or_else(|| self.certified_keys.first())
    }

    /// Names read from the leaf certificates.
    pub fn names(&self) -> &[CertName] {
        &self.names
    }
}

impl fmt::Debug for CertContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CertContext")
            .field("source", &self.source)
            .field("action", &self.action)
            .field("keys", &self.certified_keys.len())
            .field("names", &self.names)
            .finish()
    }
}

/// A built certificate lookup table: the pattern index plus the context used
/// when nothing else matches.
#[derive(Debug, Default)]
pub struct CertTable {
    index: PatternIndex<CertContext>,
    default: Option<Arc<CertContext>>,
}

impl CertTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: HostKey, context: Arc<CertContext>) -> Result<(), Conflict> {
        debug!("Registering {} -> {}", key, context.source());
        self.index.insert(key, context)
    }

    /// Sets the fallback context. Setting the same handle again is a no-op;
    /// a different handle conflicts and the first one is kept.
    pub fn set_default(&mut self, context: Arc<CertContext>) -> Result<(), Conflict> {
        match &self.default {
            Some(existing) if Arc::ptr_eq(existing, &context) => Ok(()),
            Some(_) => Err(Conflict::new("*")),
            None => {
                debug!("Registering default -> {}", context.source());
                self.default = Some(context);
                Ok(())
            }
        }
    }

    pub fn default_context(&self) -> Option<&Arc<CertContext>> {
        self.default.as_ref()
    }

    pub fn find(&self, query: LookupKey<'_>) -> Option<Arc<CertContext>> {
        self.index.find(query)
    }

    /// Picks the context for an incoming handshake: the SNI hostname first,
    /// then the local address the connection arrived on, then the default.
    /// An SNI value that is not a valid hostname is treated as absent.
    pub fn resolve(
        &self,
        server_name: Option<&str>,
        local_addr: Option<SocketAddr>,
    ) -> Option<Arc<CertContext>> {
        let by_name = server_name
            .filter(|name| validate_sni_hostname(name).is_ok())
            .and_then(|name| self.index.find(LookupKey::Host(name)));
        if by_name.is_some() {
            return by_name;
        }
        let by_addr = local_addr
            .and_then(|addr| self.index.find(LookupKey::Address(addr.ip(), Some(addr.port()))));
        if by_addr.is_some() {
            return by_addr;
        }
        self.default.clone()
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty() && self.default.is_none()
    }
}

/// The published table. Readers take lock-free snapshots; a reload builds a
/// whole new table and swaps it in, so a snapshot is never partially built.
pub struct CertStore {
    table: ArcSwap<CertTable>,
}

impl CertStore {
    pub fn new(table: CertTable) -> Self {
        Self {
            table: ArcSwap::from_pointee(table),
        }
    }

    pub fn current(&self) -> Arc<CertTable> {
        self.table.load_full()
    }

    pub fn publish(&self, table: CertTable) {
        self.table.store(Arc::new(table));
    }
}

impl fmt::Debug for CertStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CertStore")
            .field("table", &*self.table.load())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{IpAddr, Ipv4Addr};

    fn ctx(source: &str) -> Arc<CertContext> {
        Arc::new(CertContext::new(source, CertAction::Terminate, vec![], vec![]))
    }

    fn host(name: &str) -> HostKey {
        HostKey::from_name(name).unwrap()
    }

    fn source(context: Option<Arc<CertContext>>) -> Option<String> {
        context.map(|c| c.source().to_string())
    }

    fn sample_table() -> CertTable {
        let mut table = CertTable::new();
        table.insert(host("www.example.com"), ctx("exact")).unwrap();
        table.insert(host("*.example.com"), ctx("wildcard")).unwrap();
        table
            .insert(
                HostKey::Address(IpAddr::V4(Ipv4Addr::new(192, 0, 2, 1)), None),
                ctx("address"),
            )
            .unwrap();
        table.set_default(ctx("default")).unwrap();
        table
    }

    mod resolve_tests {
        use super::*;

        fn addr(port: u16) -> Option<SocketAddr> {
            Some(SocketAddr::new(IpAddr::V4(Ipv4Addr::new(192, 0, 2, 1)), port))
        }

        #[test]
        fn sni_first() {
            let table = sample_table();
            assert_eq!(source(table.resolve(Some("www.example.com"), addr(443))).as_deref(), Some("exact"));
            assert_eq!(source(table.resolve(Some("api.example.com"), addr(443))).as_deref(), Some("wildcard"));
        }

        #[test]
        fn address_on_sni_miss() {
            let table = sample_table();
            assert_eq!(source(table.resolve(Some("other.net"), addr(443))).as_deref(), Some("address"));
            assert_eq!(source(table.resolve(None, addr(8443))).as_deref(), Some("address"));
        }

        #[test]
        fn default_last() {
            let table = sample_table();
            assert_eq!(source(table.resolve(Some("other.net"), None)).as_deref(), Some("default"));
            assert_eq!(source(table.resolve(None, None)).as_deref(), Some("default"));
            let other = Some(SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 443));
            assert_eq!(source(table.resolve(None, other)).as_deref(), Some("default"));
        }

        #[test]
        fn invalid_sni_is_absent() {
            let table = sample_table();
            assert_eq!(source(table.resolve(Some("*.example.com"), addr(443))).as_deref(), Some("address"));
            assert_eq!(source(table.resolve(Some("www.example.com."), None)).as_deref(), Some("default"));
            assert_eq!(source(table.resolve(Some(""), None)).as_deref(), Some("default"));
        }

        #[test]
        fn empty_table() {
            let table = CertTable::new();
            assert!(table.is_empty());
            assert!(table.resolve(Some("www.example.com"), addr(443)).is_none());
        }
    }

    #[test]
    fn default_conflicts() {
        let mut table = CertTable::new();
        let first = ctx("first");
        table.set_default(first.clone()).unwrap();
        table.set_default(first).unwrap();
        let err = table.set_default(ctx("second")).unwrap_err();
        assert_eq!(err.key(), "*");
        assert_eq!(table.default_context().map(|c| c.source()), Some("first"));
    }

    mod store_tests {
        use super::*;

        #[test]
        fn publish_swaps_table() {
            let store = CertStore::new(sample_table());
            let before = store.current();
            assert_eq!(source(before.find(LookupKey::Host("www.example.com"))).as_deref(), Some("exact"));

            let mut replacement = CertTable::new();
            replacement.insert(host("www.example.com"), ctx("replacement")).unwrap();
            store.publish(replacement);

            assert_eq!(
                source(store.current().find(LookupKey::Host("www.example.com"))).as_deref(),
                Some("replacement")
            );
            // An old snapshot stays usable.
            assert_eq!(source(before.find(LookupKey::Host("www.example.com"))).as_deref(), Some("exact"));
        }

        #[test]
        fn captured_context_outlives_swap() {
            let store = CertStore::new(sample_table());
            let captured = store.current().find(LookupKey::Host("www.example.com")).unwrap();
            store.publish(CertTable::new());
            assert_eq!(captured.source(), "exact");
            assert_eq!(Arc::strong_count(&captured), 1);
        }

        #[test]
        fn concurrent_readers() {
            let store = Arc::new(CertStore::new(sample_table()));
            let handles: Vec<_> = (0..4)
                .map(|_| {
                    let store = store.clone();
                    std::thread::spawn(move || {
                        for _ in 0..100 {
                            let table = store.current();
                            assert!(table.find(LookupKey::Host("api.example.com")).is_some());
                        }
                    })
                })
                .collect();
            for _ in 0..10 {
                store.publish(sample_table());
            }
            for handle in handles {
                handle.join().unwrap();
            }
        }
    }
}
