//! Rebuilding and republishing the certificate table when its configuration
//! changes.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use log::{error, info, warn};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};

use crate::cert_table::CertStore;
use crate::config::{load_cert_table, ConfigError, LoadReport};

const DEBOUNCE: Duration = Duration::from_millis(100);

impl CertStore {
    /// Loads `path` into a new table and publishes it. When the file cannot be
    /// read or parsed the published table is left as it was.
    pub async fn reload(&self, path: impl AsRef<Path>) -> Result<LoadReport, ConfigError> {
        let path = path.as_ref();
        match load_cert_table(path).await {
            Ok((table, report)) => {
                info!(
                    "Reloaded {}: {} entries loaded, {} conflicts, {} skipped",
                    path.display(),
                    report.loaded,
                    report.conflicts.len(),
                    report.skipped.len()
                );
                self.publish(table);
                Ok(report)
            }
            Err(e) => {
                error!("Reload of {} failed, keeping current table: {}", path.display(), e);
                Err(e)
            }
        }
    }
}

/// Watches the configuration file and reloads `store` on every change.
///
/// The returned watcher must be kept alive; dropping it stops the reloads.
/// Must be called from within a tokio runtime.
pub fn watch_config(
    path: impl Into<PathBuf>,
    store: Arc<CertStore>,
) -> std::io::Result<RecommendedWatcher> {
    let path = path.into();
    let (tx, mut rx) = tokio::sync::mpsc::channel(10);

    let mut watcher = notify::recommended_watcher(move |event: Result<Event, notify::Error>| {
        match event {
            Ok(event) => {
                let _ = tx.blocking_send(event);
            }
            Err(e) => warn!("File watcher error: {}", e),
        }
    })
    .map_err(|e| std::io::Error::other(format!("failed to create file watcher: {}", e)))?;

    watcher
        .watch(&path, RecursiveMode::NonRecursive)
        .map_err(|e| {
            std::io::Error::other(format!("failed to watch {}: {}", path.display(), e))
        })?;

    info!("Watching {} for changes", path.display());

    tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            if !matches!(event.kind, EventKind::Modify(_) | EventKind::Create(_)) {
                continue;
            }
            tokio::time::sleep(DEBOUNCE).await;
            // Collapse the burst of events a single save produces.
            while rx.try_recv().is_ok() {}

            info!("{} changed, reloading", path.display());
            let _ = store.reload(&path).await;
        }
    });

    Ok(watcher)
}
