use std::path::{Path, PathBuf};
use std::sync::Arc;

use log::{debug, info, warn};
use rustls::sign::CertifiedKey;

use super::{deserialize_entries, ConfigError, DestIp, MultiCertEntry};

use crate::cert_names::{cert_names, host_names};
use crate::cert_table::{CertAction, CertContext, CertTable};
use crate::hostname_matcher::CertName;
use crate::pattern_index::{Conflict, HostKey};
use crate::rustls_util::{create_certified_key, load_certs, load_private_key};

/// An entry that was not loaded. `line` is the 1-based position of the entry
/// in its file.
#[derive(Debug)]
pub struct SkippedEntry {
    pub path: PathBuf,
    pub line: usize,
    pub error: ConfigError,
}

/// Outcome of loading one or more configuration files into a table.
#[derive(Debug, Default)]
pub struct LoadReport {
    pub loaded: usize,
    pub conflicts: Vec<Conflict>,
    pub skipped: Vec<SkippedEntry>,
}

impl LoadReport {
    pub fn is_clean(&self) -> bool {
        self.conflicts.is_empty() && self.skipped.is_empty()
    }
}

struct LoadedEntry {
    context: Arc<CertContext>,
    dest_ip: Option<DestIp>,
    names: Vec<String>,
    /// Names carried by only some of the line's certificates, each group
    /// bound to a context holding just those certificates.
    partial: Vec<(Arc<CertContext>, Vec<String>)>,
}

struct LoadedCert {
    path: PathBuf,
    certified_key: Arc<CertifiedKey>,
    names: Vec<CertName>,
}

/// Loads a configuration file into a fresh table.
pub async fn load_cert_table(
    path: impl AsRef<Path>,
) -> Result<(CertTable, LoadReport), ConfigError> {
    let mut table = CertTable::new();
    let mut report = LoadReport::default();
    load_into(&mut table, path, &mut report).await?;
    Ok((table, report))
}

/// Loads a configuration file into `table`.
///
/// Fails only when the file cannot be read or parsed. Problems with single
/// entries are logged and collected in `report`; the rest of the file still
/// loads.
pub async fn load_into(
    table: &mut CertTable,
    path: impl AsRef<Path>,
    report: &mut LoadReport,
) -> Result<(), ConfigError> {
    let path = path.as_ref();
    let config_str = tokio::fs::read_to_string(path)
        .await
        .map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
    let entries = deserialize_entries(config_str, &path.to_string_lossy()).map_err(|source| {
        ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        }
    })?;
    let base_dir = path.parent().map(Path::to_path_buf).unwrap_or_default();

    info!("Loading {} certificate entries from {}", entries.len(), path.display());

    for (i, entry) in entries.into_iter().enumerate() {
        let line = i + 1;
        match load_entry(&base_dir, entry).await {
            Ok(loaded) => {
                register(table, loaded, path, line, report);
                report.loaded += 1;
            }
            Err(error) => {
                warn!("{}: discarding entry {}: {}", path.display(), line, error);
                report.skipped.push(SkippedEntry {
                    path: path.to_path_buf(),
                    line,
                    error,
                });
            }
        }
    }

    Ok(())
}

fn parse_action(action: Option<&str>) -> Result<CertAction, ConfigError> {
    match action {
        None => Ok(CertAction::Terminate),
        Some(action) if action.eq_ignore_ascii_case("tunnel") => Ok(CertAction::Tunnel),
        Some(action) => Err(ConfigError::UnknownAction(action.to_string())),
    }
}

async fn read_file(path: &Path) -> Result<Vec<u8>, ConfigError> {
    tokio::fs::read(path)
        .await
        .map_err(|source| ConfigError::Certificate {
            path: path.to_path_buf(),
            source,
        })
}

fn split_list(value: &str) -> Vec<&str> {
    value
        .split(',')
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .collect()
}

fn check_count(field: &'static str, certs: usize, count: usize) -> Result<(), ConfigError> {
    if certs == count {
        Ok(())
    } else {
        Err(ConfigError::CountMismatch {
            field,
            certs,
            count,
        })
    }
}

/// Loads one certificate chain and its key. Without `key_name` the key is
/// read from the certificate file.
async fn load_cert(
    base_dir: &Path,
    cert_name: &str,
    key_name: Option<&str>,
    ca_name: Option<&str>,
) -> Result<LoadedCert, ConfigError> {
    let certificate_error = |path: &Path| {
        let path = path.to_path_buf();
        move |source| ConfigError::Certificate { path, source }
    };

    let cert_path = base_dir.join(cert_name);
    let cert_bytes = read_file(&cert_path).await?;
    let mut certs = load_certs(&cert_bytes).map_err(certificate_error(&cert_path))?;
    if let Some(ca_name) = ca_name {
        let ca_path = base_dir.join(ca_name);
        let ca_bytes = read_file(&ca_path).await?;
        certs.extend(load_certs(&ca_bytes).map_err(certificate_error(&ca_path))?);
    }

    let (key_path, key) = match key_name {
        Some(key_name) => {
            let key_path = base_dir.join(key_name);
            let key_bytes = read_file(&key_path).await?;
            let key = load_private_key(&key_bytes);
            (key_path, key)
        }
        None => (cert_path.clone(), load_private_key(&cert_bytes)),
    };
    let key = key.map_err(certificate_error(&key_path))?;

    let names = cert_names(certs[0].as_ref()).map_err(certificate_error(&cert_path))?;
    let certified_key =
        create_certified_key(certs, &key).map_err(certificate_error(&key_path))?;

    Ok(LoadedCert {
        path: cert_path,
        certified_key: Arc::new(certified_key),
        names,
    })
}

async fn load_entry(base_dir: &Path, entry: MultiCertEntry) -> Result<LoadedEntry, ConfigError> {
    let action = parse_action(entry.action.as_deref())?;
    let dest_ip = entry
        .dest_ip
        .as_deref()
        .map(DestIp::try_from)
        .transpose()
        .map_err(ConfigError::DestIp)?;

    let cert_list = entry.ssl_cert_name.as_deref().map(split_list).unwrap_or_default();
    if cert_list.is_empty() {
        if action != CertAction::Tunnel {
            return Err(ConfigError::MissingCertificate);
        }
        let source = match dest_ip {
            Some(dest_ip) => format!("tunnel {}", dest_ip),
            None => "tunnel".to_string(),
        };
        return Ok(LoadedEntry {
            context: Arc::new(CertContext::new(source, action, vec![], vec![])),
            dest_ip,
            names: entry.servername.into_vec(),
            partial: vec![],
        });
    }

    let key_list = entry.ssl_key_name.as_deref().map(split_list);
    if let Some(key_list) = &key_list {
        check_count("ssl_key_name", cert_list.len(), key_list.len())?;
    }
    let ca_list = entry.ssl_ca_name.as_deref().map(split_list);
    if let Some(ca_list) = &ca_list {
        check_count("ssl_ca_name", cert_list.len(), ca_list.len())?;
    }

    let mut certs = Vec::with_capacity(cert_list.len());
    for (i, cert_name) in cert_list.iter().enumerate() {
        let key_name = key_list.as_ref().map(|list| list[i]);
        let ca_name = ca_list.as_ref().map(|list| list[i]);
        certs.push(load_cert(base_dir, cert_name, key_name, ca_name).await?);
    }

    // Host names per certificate, lower-cased and deduplicated.
    let cert_hosts: Vec<Vec<String>> = certs
        .iter()
        .map(|cert| {
            let mut hosts: Vec<String> = vec![];
            for name in host_names(&cert.names) {
                let name = name.to_ascii_lowercase();
                if !hosts.contains(&name) {
                    hosts.push(name);
                }
            }
            hosts
        })
        .collect();

    let mut shared: Vec<String> = vec![];
    let mut groups: Vec<(Vec<usize>, Vec<String>)> = vec![];
    for name in cert_hosts.iter().flatten() {
        let owners: Vec<usize> = cert_hosts
            .iter()
            .enumerate()
            .filter(|(_, hosts)| hosts.contains(name))
            .map(|(i, _)| i)
            .collect();
        if owners.len() == certs.len() {
            if !shared.contains(name) {
                shared.push(name.clone());
            }
            continue;
        }
        match groups.iter_mut().find(|(group, _)| *group == owners) {
            Some((_, names)) => {
                if !names.contains(name) {
                    names.push(name.clone());
                }
            }
            None => groups.push((owners, vec![name.clone()])),
        }
    }
    shared.extend(entry.servername.into_vec());

    let context_for = |owners: &[usize]| {
        let source = owners
            .iter()
            .map(|&i| certs[i].path.to_string_lossy())
            .collect::<Vec<_>>()
            .join(",");
        let keys = owners.iter().map(|&i| certs[i].certified_key.clone()).collect();
        let names = owners
            .iter()
            .flat_map(|&i| certs[i].names.iter().cloned())
            .collect();
        Arc::new(CertContext::new(source, action, keys, names))
    };

    let all: Vec<usize> = (0..certs.len()).collect();
    let context = context_for(all.as_slice());
    let partial = groups
        .iter()
        .map(|(owners, names)| (context_for(owners.as_slice()), names.clone()))
        .collect();

    debug!("Loaded {} with names {:?}", context.source(), shared);

    Ok(LoadedEntry {
        context,
        dest_ip,
        names: shared,
        partial,
    })
}

fn register(
    table: &mut CertTable,
    loaded: LoadedEntry,
    path: &Path,
    line: usize,
    report: &mut LoadReport,
) {
    let LoadedEntry {
        context,
        dest_ip,
        names,
        partial,
    } = loaded;

    let mut conflicts = vec![];
    match dest_ip {
        Some(DestIp::Default) => {
            if let Err(conflict) = table.set_default(context.clone()) {
                conflicts.push(conflict);
            }
        }
        Some(DestIp::Address(ip, port)) => {
            if let Err(conflict) = table.insert(HostKey::Address(ip, port), context.clone()) {
                conflicts.push(conflict);
            }
        }
        None => (),
    }

    let bindings = std::iter::once((context, names)).chain(partial);
    for (context, names) in bindings {
        for name in names {
            let key = match HostKey::from_name(&name) {
                Ok(key) => key,
                Err(e) => {
                    warn!(
                        "{}: entry {}: ignoring name {:?}: {}",
                        path.display(),
                        line,
                        name,
                        e
                    );
                    continue;
                }
            };
            if let Err(conflict) = table.insert(key, context.clone()) {
                conflicts.push(conflict);
            }
        }
    }

    for conflict in conflicts {
        warn!("{}: entry {}: {}", path.display(), line, conflict);
        report.conflicts.push(conflict);
    }
}
