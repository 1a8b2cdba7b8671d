//! Certificate selection index.
//!
//! Maps exact hostnames, wildcard hostname patterns and IP/port keys to
//! shared context handles. Insertion rejects rebinding a key to a different
//! handle; lookup prefers exact hostnames over wildcards and `ip:port` over
//! the port-wildcard `ip` entry.

use std::collections::HashMap;
use std::fmt;
use std::net::IpAddr;
use std::sync::Arc;

use thiserror::Error;

use crate::domain_trie::DomainTrie;
use crate::hostname_util::{canonical_ip, normalize_hostname};
use crate::name_pattern::{NamePattern, NamePatternError};

/// A validated, lower-cased hostname without wildcard, obtained from
/// [`HostKey::from_name`].
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ExactName(String);

impl ExactName {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ExactName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A registration key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum HostKey {
    /// A hostname without wildcard.
    ExactHost(ExactName),
    /// A hostname pattern with exactly one wildcard label.
    WildcardHost(NamePattern),
    /// An address; `None` for the port matches any port.
    Address(IpAddr, Option<u16>),
}

impl HostKey {
    /// Builds a host key from a configuration or certificate name, choosing
    /// the exact or wildcard table by whether the name contains a wildcard.
    pub fn from_name(name: &str) -> Result<Self, NamePatternError> {
        let pattern = NamePattern::parse(name)?;
        if pattern.is_wildcard() {
            Ok(HostKey::WildcardHost(pattern))
        } else {
            Ok(HostKey::ExactHost(ExactName(pattern.as_str().to_string())))
        }
    }
}

impl fmt::Display for HostKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HostKey::ExactHost(host) => write!(f, "{}", host),
            HostKey::WildcardHost(pattern) => write!(f, "{}", pattern),
            HostKey::Address(IpAddr::V6(ip), Some(port)) => write!(f, "[{}]:{}", ip, port),
            HostKey::Address(ip, Some(port)) => write!(f, "{}:{}", ip, port),
            HostKey::Address(ip, None) => write!(f, "{}", ip),
        }
    }
}

/// A lookup query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LookupKey<'a> {
    Host(&'a str),
    Address(IpAddr, Option<u16>),
}

/// Returned by [`PatternIndex::insert`] when the key is already bound to a
/// different context.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("duplicate mapping for {key} with a different certificate context")]
pub struct Conflict {
    key: String,
}

impl Conflict {
    pub fn new(key: impl fmt::Display) -> Self {
        Self {
            key: key.to_string(),
        }
    }

    /// The normalized key that was already bound.
    pub fn key(&self) -> &str {
        &self.key
    }
}

struct WildcardEntry<T> {
    pattern: NamePattern,
    context: Arc<T>,
}

/// Multi-key registry from hostnames, wildcard patterns and addresses to
/// shared context handles.
///
/// Built on one thread at configuration load, then read concurrently through
/// a shared reference; `find` takes `&self` and never mutates.
pub struct PatternIndex<T> {
    exact: HashMap<String, Arc<T>>,
    wildcards: DomainTrie<WildcardEntry<T>>,
    addresses: HashMap<(IpAddr, Option<u16>), Arc<T>>,
}

impl<T> Default for PatternIndex<T> {
    fn default() -> Self {
        Self {
            exact: HashMap::new(),
            wildcards: DomainTrie::new(),
            addresses: HashMap::new(),
        }
    }
}

impl<T> PatternIndex<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `key` for `context`.
    ///
    /// Re-registering a key with the same handle (by identity) is a no-op.
    /// Registering it with a different handle fails and leaves the index
    /// unchanged.
    pub fn insert(&mut self, key: HostKey, context: Arc<T>) -> Result<(), Conflict> {
        match key {
            HostKey::ExactHost(ExactName(host)) => {
                match self.exact.get(&host) {
                    Some(existing) if Arc::ptr_eq(existing, &context) => Ok(()),
                    Some(_) => Err(Conflict::new(host)),
                    None => {
                        self.exact.insert(host, context);
                        Ok(())
                    }
                }
            }
            HostKey::WildcardHost(pattern) => {
                let suffix = pattern.suffix().to_string();
                if let Some(existing) = self
                    .wildcards
                    .get(&suffix)
                    .iter()
                    .find(|entry| entry.pattern == pattern)
                {
                    return if Arc::ptr_eq(&existing.context, &context) {
                        Ok(())
                    } else {
                        Err(Conflict::new(pattern))
                    };
                }
                self.wildcards
                    .push(&suffix, WildcardEntry { pattern, context });
                Ok(())
            }
            HostKey::Address(ip, port) => {
                let key = (canonical_ip(ip), port);
                match self.addresses.get(&key) {
                    Some(existing) if Arc::ptr_eq(existing, &context) => Ok(()),
                    Some(_) => Err(Conflict::new(HostKey::Address(key.0, key.1))),
                    None => {
                        self.addresses.insert(key, context);
                        Ok(())
                    }
                }
            }
        }
    }

    /// Finds the context for `query`.
    ///
    /// Hosts: an exact entry wins; otherwise the matching wildcard filed under
    /// the longest suffix of the host, first inserted on ties. A full-label
    /// wildcard stands for one or more leading labels, so `*.com` covers
    /// `www.bar.com`. A host containing `*` never matches.
    ///
    /// Addresses: `ip:port` first, then the port-wildcard entry.
    pub fn find(&self, query: LookupKey<'_>) -> Option<Arc<T>> {
        match query {
            LookupKey::Host(host) => self.find_host(host),
            LookupKey::Address(ip, port) => self.find_address(ip, port),
        }
    }

    fn find_host(&self, host: &str) -> Option<Arc<T>> {
        if host.is_empty() || host.contains('*') {
            return None;
        }
        let host = normalize_hostname(host);
        if let Some(context) = self.exact.get(&host) {
            return Some(context.clone());
        }

        let parent = match host.split_once('.') {
            Some((_, parent)) if !parent.is_empty() => parent,
            _ => return None,
        };
        for (suffix, entries) in self.wildcards.suffixes(parent) {
            // `covered` is what the wildcard label has to stand for.
            let covered = &host[..host.len() - suffix.len() - 1];
            if let Some(entry) = entries
                .iter()
                .find(|entry| wildcard_covers(&entry.pattern, &host, covered))
            {
                return Some(entry.context.clone());
            }
        }
        None
    }

    fn find_address(&self, ip: IpAddr, port: Option<u16>) -> Option<Arc<T>> {
        let ip = canonical_ip(ip);
        if port.is_some() {
            if let Some(context) = self.addresses.get(&(ip, port)) {
                return Some(context.clone());
            }
        }
        self.addresses.get(&(ip, None)).cloned()
    }

    pub fn exact_count(&self) -> usize {
        self.exact.len()
    }

    pub fn wildcard_count(&self) -> usize {
        self.wildcards.len()
    }

    pub fn address_count(&self) -> usize {
        self.addresses.len()
    }

    pub fn len(&self) -> usize {
        self.exact_count() + self.wildcard_count() + self.address_count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A full-label wildcard covers one or more labels; a partial one covers
/// exactly one label under the usual pattern rules.
fn wildcard_covers(pattern: &NamePattern, host: &str, covered: &str) -> bool {
    if covered.contains('.') {
        pattern.is_full_label_wildcard() && covered.split('.').all(|label| !label.is_empty())
    } else {
        pattern.matches(host)
    }
}

impl<T> fmt::Debug for PatternIndex<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PatternIndex")
            .field("exact", &self.exact.len())
            .field("wildcards", &self.wildcards.len())
            .field("addresses", &self.addresses.len())
            .finish()
    }
}
