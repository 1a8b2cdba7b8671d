//! Hostname and SNI to certificate matching for a TLS-terminating proxy.
//!
//! [`PatternIndex`] picks the certificate context for an incoming handshake
//! from exact hostnames, wildcard patterns and local addresses.
//! [`hostname_matcher::validate`] checks an origin certificate's names against
//! the host the proxy meant to reach. Both share the wildcard rules of
//! [`NamePattern`].

pub mod cert_names;
pub mod cert_table;
pub mod config;
mod domain_trie;
pub mod hostname_matcher;
pub mod hostname_util;
pub mod name_pattern;
pub mod pattern_index;
pub mod reload;
pub mod rustls_util;
pub mod verify;

pub use cert_table::{CertAction, CertContext, CertStore, CertTable};
pub use hostname_matcher::{validate, CertName, MatchedName};
pub use name_pattern::{NamePattern, NamePatternError};
pub use pattern_index::{Conflict, ExactName, HostKey, LookupKey, PatternIndex};
pub use verify::{VerifyError, VerifyServerPolicy, VerifyServerProperties};
