//! Session Service
//!
//! Facade used by the HTTP routes and the CLI. Combines the connection
//! manager with the store chosen at startup and records every batch against
//! one fixed session.

use crate::channels::{self, ChannelDriver};
use crate::config::Config;
use crate::connection::{ConnectionManager, ConnectionSettings, InitOutcome, StatusSnapshot};
use crate::error::ServiceError;
use crate::storage::models::tally;
use crate::storage::{
    MessageRecord, MessageStats, NewMessage, SelectedStorage, SendResult, SessionStore,
    StorageMode, select_storage,
};
use anyhow::Context;
use std::sync::Arc;
use tokio::sync::OnceCell;

/// Identifier of the single session the service writes to.
pub const DEFAULT_SESSION_ID: &str = "default";

const DEFAULT_SESSION_NAME: &str = "Default Session";

pub type Result<T> = std::result::Result<T, ServiceError>;

pub struct SessionService {
    connection: ConnectionManager,
    store: Arc<dyn SessionStore>,
    mode: StorageMode,
    session_ready: OnceCell<()>,
    connection_started: OnceCell<()>,
}

impl SessionService {
    pub fn new(connection: ConnectionManager, storage: SelectedStorage) -> Self {
        Self {
            connection,
            store: storage.store,
            mode: storage.mode,
            session_ready: OnceCell::new(),
            connection_started: OnceCell::new(),
        }
    }

    /// Select storage and spawn the connection manager with the configured
    /// channel driver. Nothing connects until the first status or send call.
    pub async fn from_config(config: &Config) -> anyhow::Result<Self> {
        let storage = select_storage(config)
            .await
            .context("Failed to open session storage")?;
        let driver = channels::default_driver(config);
        Ok(Self::with_driver(driver, config, storage))
    }

    pub fn with_driver(
        driver: Arc<dyn ChannelDriver>,
        config: &Config,
        storage: SelectedStorage,
    ) -> Self {
        let settings = ConnectionSettings::from(&config.messaging);
        Self::new(ConnectionManager::spawn(driver, settings), storage)
    }

    /// Create the default session unless it already exists. Runs once.
    async fn ensure_session(&self) -> Result<()> {
        self.session_ready
            .get_or_try_init(|| async {
                if self.store.find_by_id(DEFAULT_SESSION_ID).await?.is_none() {
                    self.store
                        .create(DEFAULT_SESSION_NAME, Some(DEFAULT_SESSION_ID))
                        .await?;
                    tracing::info!("Created session '{}'", DEFAULT_SESSION_ID);
                }
                Ok::<_, ServiceError>(())
            })
            .await?;
        Ok(())
    }

    /// First call kicks off the channel connection; later calls leave
    /// retries to the connection manager.
    async fn ensure_started(&self) -> Result<()> {
        self.ensure_session().await?;
        self.connection_started
            .get_or_try_init(|| async {
                match self.connection.initialize().await? {
                    InitOutcome::Started => tracing::debug!("Channel connection started"),
                    outcome => tracing::debug!("Channel connection already running: {:?}", outcome),
                }
                Ok::<_, ServiceError>(())
            })
            .await?;
        Ok(())
    }

    pub async fn get_status(&self) -> Result<StatusSnapshot> {
        self.ensure_started().await?;
        Ok(self.connection.status())
    }

    /// Send `body` to every target, then record the batch. The raw
    /// per-target results are returned even when some targets failed.
    pub async fn send_message(&self, targets: &[String], body: &str) -> Result<Vec<SendResult>> {
        self.ensure_started().await?;

        let results = self.connection.send_message(targets, body).await?;
        let (sent, failed) = tally(&results);
        tracing::info!(
            "Batch finished: {} sent, {} failed of {} target(s)",
            sent,
            failed,
            targets.len()
        );

        let message = NewMessage::new(body, targets.to_vec(), results.clone());
        let record = self.store.add_message(DEFAULT_SESSION_ID, message).await?;
        tracing::debug!("Recorded message {} for session '{}'", record.id, DEFAULT_SESSION_ID);

        Ok(results)
    }

    /// Recorded batches, most recent first.
    pub async fn get_message_history(&self) -> Result<Vec<MessageRecord>> {
        Ok(self.store.get_messages(DEFAULT_SESSION_ID).await?)
    }

    pub async fn message_stats(&self) -> Result<MessageStats> {
        let messages = self.get_message_history().await?;
        Ok(MessageStats::from_messages(&messages))
    }

    /// Returns false when an initialization is already running.
    pub async fn reconnect(&self) -> Result<bool> {
        self.ensure_session().await?;
        let started = self.connection.reconnect().await?;
        if started {
            // A manual reconnect counts as the first start.
            let _ = self.connection_started.set(());
        }
        Ok(started)
    }

    pub fn storage_mode(&self) -> StorageMode {
        self.mode
    }

    pub fn connection(&self) -> &ConnectionManager {
        &self.connection
    }

    /// Tear down the channel client and close the store. Both steps are
    /// best-effort.
    pub async fn shutdown(&self) {
        tracing::info!("Shutting down session service");
        self.connection.destroy().await;
        if let Err(e) = self.store.close().await {
            tracing::warn!("Failed to close storage cleanly: {}", e);
        }
    }
}
