use std::net::SocketAddr;
use std::sync::{Arc, OnceLock};

use log::{debug, warn};
use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::crypto::ring::sign::any_supported_type;
use rustls::crypto::CryptoProvider;
use rustls::pki_types::{CertificateDer, PrivateKeyDer, ServerName, UnixTime};
use rustls::server::{ClientHello, ParsedCertificate, ResolvesServerCert};
use rustls::sign::CertifiedKey;
use rustls::{
    CertificateError, ClientConfig, DigitallySignedStruct, RootCertStore, ServerConfig,
    SignatureScheme,
};

use crate::cert_names::cert_names;
use crate::cert_table::{CertAction, CertStore};
use crate::hostname_matcher;
use crate::verify::{VerifyError, VerifyServerPolicy, VerifyServerProperties};

fn get_crypto_provider() -> Arc<CryptoProvider> {
    static INSTANCE: OnceLock<Arc<CryptoProvider>> = OnceLock::new();
    INSTANCE
        .get_or_init(|| Arc::new(rustls::crypto::ring::default_provider()))
        .clone()
}

fn get_root_cert_store() -> Arc<RootCertStore> {
    static INSTANCE: OnceLock<Arc<RootCertStore>> = OnceLock::new();
    INSTANCE
        .get_or_init(|| {
            let mut root_store = RootCertStore::empty();
            root_store.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
            Arc::new(root_store)
        })
        .clone()
}

/// Reads every PEM certificate in `cert_bytes`, leaf first.
pub fn load_certs(cert_bytes: &[u8]) -> std::io::Result<Vec<CertificateDer<'static>>> {
    let mut reader = std::io::Cursor::new(cert_bytes);
    let certs = rustls_pemfile::certs(&mut reader).collect::<Result<Vec<_>, _>>()?;
    if certs.is_empty() {
        return Err(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            "no certificates found",
        ));
    }
    Ok(certs)
}

/// Reads the first PKCS#8, PKCS#1 or SEC1 private key in `key_bytes`.
pub fn load_private_key(key_bytes: &[u8]) -> std::io::Result<PrivateKeyDer<'static>> {
    let mut reader = std::io::Cursor::new(key_bytes);
    rustls_pemfile::private_key(&mut reader)?.ok_or_else(|| {
        std::io::Error::new(std::io::ErrorKind::InvalidData, "no private key found")
    })
}

pub fn create_certified_key(
    certs: Vec<CertificateDer<'static>>,
    private_key: &PrivateKeyDer<'_>,
) -> std::io::Result<CertifiedKey> {
    let signing_key = any_supported_type(private_key).map_err(|e| {
        std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            format!("unsupported private key: {}", e),
        )
    })?;
    Ok(CertifiedKey::new(certs, signing_key))
}

/// Picks the certificate for each handshake from the currently published
/// table. Connections routed to a tunnel context, or to a context without
/// key material, get no certificate.
#[derive(Debug)]
pub struct SniCertResolver {
    store: Arc<CertStore>,
    local_addr: Option<SocketAddr>,
}

impl SniCertResolver {
    /// `local_addr` is the listener address, used for `dest_ip` lookups when
    /// the SNI does not resolve.
    pub fn new(store: Arc<CertStore>, local_addr: Option<SocketAddr>) -> Self {
        Self { store, local_addr }
    }
}

impl ResolvesServerCert for SniCertResolver {
    fn resolve(&self, client_hello: ClientHello<'_>) -> Option<Arc<CertifiedKey>> {
        let server_name = client_hello.server_name();
        let context = self.store.current().resolve(server_name, self.local_addr)?;
        if context.action() == CertAction::Tunnel {
            debug!(
                "{:?} maps to tunnel context {}, not terminating",
                server_name,
                context.source()
            );
            return None;
        }
        context.select_key(client_hello.signature_schemes()).cloned()
    }
}

/// Checks `end_entity` against the host the connection was made to.
///
/// Returns the certificate name that matched.
pub fn check_server_name(
    end_entity: &CertificateDer<'_>,
    server_name: &ServerName<'_>,
) -> Result<String, VerifyError> {
    let (candidate, is_ip) = match server_name {
        ServerName::DnsName(name) => (name.as_ref().to_string(), false),
        ServerName::IpAddress(ip) => (std::net::IpAddr::from(ip.clone()).to_string(), true),
        _ => return Err(VerifyError::NameMismatch(format!("{:?}", server_name))),
    };
    let names = cert_names(end_entity.as_ref())
        .map_err(|e| VerifyError::UnreadableCertificate(e.to_string()))?;
    match hostname_matcher::validate(&names, &candidate, is_ip) {
        Some(matched) => Ok(matched.to_owned_string()),
        None => Err(VerifyError::NameMismatch(candidate)),
    }
}

/// Origin certificate verifier applying the configured policy: chain checks
/// against trust anchors for the signature property, and hostname checks
/// through [`hostname_matcher::validate`] for the name property.
#[derive(Debug)]
pub struct NameCheckingVerifier {
    policy: VerifyServerPolicy,
    properties: VerifyServerProperties,
    roots: Arc<RootCertStore>,
    provider: Arc<CryptoProvider>,
}

impl NameCheckingVerifier {
    /// Verifies chains against the bundled web PKI roots.
    pub fn new(policy: VerifyServerPolicy, properties: VerifyServerProperties) -> Self {
        Self::with_roots(policy, properties, get_root_cert_store())
    }

    pub fn with_roots(
        policy: VerifyServerPolicy,
        properties: VerifyServerProperties,
        roots: Arc<RootCertStore>,
    ) -> Self {
        Self {
            policy,
            properties,
            roots,
            provider: get_crypto_provider(),
        }
    }

    fn verify_chain(
        &self,
        end_entity: &CertificateDer<'_>,
        intermediates: &[CertificateDer<'_>],
        now: UnixTime,
    ) -> Result<(), rustls::Error> {
        let cert = ParsedCertificate::try_from(end_entity)?;
        rustls::client::verify_server_cert_signed_by_trust_anchor(
            &cert,
            &self.roots,
            intermediates,
            now,
            self.provider.signature_verification_algorithms.all,
        )
    }

    /// Applies the policy to a check result.
    fn enforce<T>(&self, result: Result<T, rustls::Error>, accept: T) -> Result<T, rustls::Error> {
        match result {
            Ok(value) => Ok(value),
            Err(e) if self.policy == VerifyServerPolicy::Permissive => {
                warn!("Origin certificate verification failed, continuing: {}", e);
                Ok(accept)
            }
            Err(e) => Err(e),
        }
    }
}

impl ServerCertVerifier for NameCheckingVerifier {
    fn verify_server_cert(
        &self,
        end_entity: &CertificateDer<'_>,
        intermediates: &[CertificateDer<'_>],
        server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        if self.policy == VerifyServerPolicy::Disabled {
            return Ok(ServerCertVerified::assertion());
        }

        let mut result = Ok(());
        if self.properties.check_signature() {
            result = self.verify_chain(end_entity, intermediates, now);
        }
        if result.is_ok() && self.properties.check_name() {
            result = match check_server_name(end_entity, server_name) {
                Ok(matched) => {
                    debug!("{:?} matched certificate name {}", server_name, matched);
                    Ok(())
                }
                Err(VerifyError::NameMismatch(_)) => Err(rustls::Error::InvalidCertificate(
                    CertificateError::NotValidForName,
                )),
                Err(VerifyError::UnreadableCertificate(_)) => {
                    Err(rustls::Error::InvalidCertificate(CertificateError::BadEncoding))
                }
            };
        }

        self.enforce(result, ())
            .map(|()| ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        if self.policy == VerifyServerPolicy::Disabled {
            return Ok(HandshakeSignatureValid::assertion());
        }
        self.enforce(
            rustls::crypto::verify_tls12_signature(
                message,
                cert,
                dss,
                &self.provider.signature_verification_algorithms,
            ),
            HandshakeSignatureValid::assertion(),
        )
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        if self.policy == VerifyServerPolicy::Disabled {
            return Ok(HandshakeSignatureValid::assertion());
        }
        self.enforce(
            rustls::crypto::verify_tls13_signature(
                message,
                cert,
                dss,
                &self.provider.signature_verification_algorithms,
            ),
            HandshakeSignatureValid::assertion(),
        )
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.provider
            .signature_verification_algorithms
            .supported_schemes()
    }
}

fn tls_error(e: rustls::Error) -> std::io::Error {
    std::io::Error::new(std::io::ErrorKind::InvalidInput, e)
}

pub fn create_server_config(
    store: Arc<CertStore>,
    local_addr: Option<SocketAddr>,
    alpn_protocols: Vec<Vec<u8>>,
) -> std::io::Result<ServerConfig> {
    let mut config = ServerConfig::builder_with_provider(get_crypto_provider())
        .with_safe_default_protocol_versions()
        .map_err(tls_error)?
        .with_no_client_auth()
        .with_cert_resolver(Arc::new(SniCertResolver::new(store, local_addr)));
    config.alpn_protocols = alpn_protocols;
    Ok(config)
}

pub fn create_client_config(verifier: NameCheckingVerifier) -> std::io::Result<ClientConfig> {
    Ok(ClientConfig::builder_with_provider(get_crypto_provider())
        .with_safe_default_protocol_versions()
        .map_err(tls_error)?
        .dangerous()
        .with_custom_certificate_verifier(Arc::new(verifier))
        .with_no_client_auth())
}

pub fn create_acceptor(
    store: Arc<CertStore>,
    local_addr: Option<SocketAddr>,
) -> std::io::Result<tokio_rustls::TlsAcceptor> {
    Ok(Arc::new(create_server_config(store, local_addr, vec![])?).into())
}

pub fn create_connector(
    policy: VerifyServerPolicy,
    properties: VerifyServerProperties,
) -> std::io::Result<tokio_rustls::TlsConnector> {
    let verifier = NameCheckingVerifier::new(policy, properties);
    Ok(Arc::new(create_client_config(verifier)?).into())
}
