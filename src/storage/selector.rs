//! Startup choice between the relational and file-backed stores.

use super::{FileSessionStore, Result, SessionStore, SqlSessionStore};
use crate::config::Config;
use crate::error::StorageError;
use std::fmt;
use std::sync::Arc;

/// Which backend ended up serving requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageMode {
    Relational,
    File,
}

impl fmt::Display for StorageMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StorageMode::Relational => write!(f, "relational"),
            StorageMode::File => write!(f, "file"),
        }
    }
}

/// The store picked at startup. Callers hold `store` and never branch on
/// `mode`; it is only reported.
pub struct SelectedStorage {
    pub mode: StorageMode,
    pub store: Arc<dyn SessionStore>,
}

impl fmt::Debug for SelectedStorage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SelectedStorage")
            .field("mode", &self.mode)
            .finish_non_exhaustive()
    }
}

/// Probe the relational store when one is configured and fall back to the
/// file store when it is absent or unreachable within the probe timeout.
///
/// Only a failure to open the file store itself is returned as an error.
pub async fn select_storage(config: &Config) -> Result<SelectedStorage> {
    if !config.database.is_unconfigured() {
        match probe_relational(config).await {
            Ok(store) => {
                tracing::info!("Using relational storage");
                return Ok(SelectedStorage {
                    mode: StorageMode::Relational,
                    store: Arc::new(store),
                });
            }
            Err(e) => {
                tracing::warn!("Relational storage unavailable: {}", e);
                tracing::warn!(
                    "Check DB_HOST, DB_PORT, DB_USER, DB_PASSWORD and DB_NAME, and that the \
                     database server is running. Falling back to local file storage."
                );
            }
        }
    } else {
        tracing::info!("No relational database configured");
    }

    let store = FileSessionStore::open(&config.storage.data_dir).await?;
    tracing::info!(
        "Using local file storage in {}",
        config.storage.data_dir.display()
    );
    Ok(SelectedStorage {
        mode: StorageMode::File,
        store: Arc::new(store),
    })
}

async fn probe_relational(config: &Config) -> Result<SqlSessionStore> {
    let timeout = config.database.probe_timeout();
    let url = config.database.connection_url();
    tokio::time::timeout(
        timeout,
        SqlSessionStore::connect(&url, config.database.connection_limit),
    )
    .await
    .map_err(|_| StorageError::ProbeTimeout(timeout))?
}
