mod dest_ip;
mod loader;
mod option_util;

use std::path::PathBuf;

use log::warn;
use serde::Deserialize;
use thiserror::Error;

pub use dest_ip::DestIp;
pub use loader::{load_cert_table, load_into, LoadReport, SkippedEntry};
pub use option_util::NoneOrSome;

/// One line of a multicert configuration.
///
/// The file fields take comma-separated lists so one line can serve several
/// certificates for the same names (`rsa.pem,ecdsa.pem`). Key and CA lists,
/// when given, pair up with the certificates by position.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct MultiCertEntry {
    /// `*`, `IP`, or `IP:port`.
    #[serde(default)]
    pub dest_ip: Option<String>,
    #[serde(default, alias = "cert")]
    pub ssl_cert_name: Option<String>,
    /// Defaults to the certificate file itself.
    #[serde(default, alias = "key")]
    pub ssl_key_name: Option<String>,
    /// Intermediate certificates appended to the served chain.
    #[serde(default, alias = "ca")]
    pub ssl_ca_name: Option<String>,
    #[serde(default)]
    pub action: Option<String>,
    /// Extra names registered besides the certificate's own.
    #[serde(default, alias = "servernames")]
    pub servername: NoneOrSome<String>,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {}: {source}", .path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{0}")]
    DestIp(#[source] std::io::Error),

    #[error("bad certificate material in {}: {source}", .path.display())]
    Certificate {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("unrecognized action {0:?}, expected \"tunnel\"")]
    UnknownAction(String),

    #[error("no ssl_cert_name specified and no tunnel action set")]
    MissingCertificate,

    #[error("the number of certificates in ssl_cert_name ({certs}) and {field} ({count}) do not match")]
    CountMismatch {
        field: &'static str,
        certs: usize,
        count: usize,
    },
}

/// Parses a configuration file body as JSON or YAML, by extension or, failing
/// that, by content. A single JSON object is accepted as a one-entry list.
fn deserialize_entries(
    mut config_str: String,
    filename: &str,
) -> std::io::Result<Vec<MultiCertEntry>> {
    let path = std::path::Path::new(filename);
    let extension = path.extension().and_then(std::ffi::OsStr::to_str);

    let is_json = match extension {
        Some("json") => {
            let trimmed_str = config_str.trim();
            if trimmed_str.starts_with('{') && trimmed_str.ends_with('}') {
                config_str = format!("[\n{}\n]\n", config_str);
            }
            true
        }
        Some("yaml") | Some("yml") => false,
        _ => {
            let trimmed_str = config_str.trim();
            if trimmed_str.starts_with('{') && trimmed_str.ends_with('}') {
                config_str = format!("[\n{}\n]\n", config_str);
                true
            } else if trimmed_str.starts_with('[') {
                true
            } else if trimmed_str.starts_with('-') || trimmed_str.is_empty() {
                false
            } else {
                warn!("Could not detect config format, assuming YAML.");
                false
            }
        }
    };

    if is_json {
        serde_json::from_str(&config_str).map_err(|e| {
            std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                format!("failed to parse config JSON: {}", e),
            )
        })
    } else {
        // An empty YAML document is an empty list.
        let entries: Option<Vec<MultiCertEntry>> =
            serde_yaml::from_str(&config_str).map_err(|e| {
                std::io::Error::new(
                    std::io::ErrorKind::InvalidInput,
                    format!("failed to parse config YAML: {}", e),
                )
            })?;
        Ok(entries.unwrap_or_default())
    }
}
