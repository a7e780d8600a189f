//! Error types
//!
//! One enum per subsystem. Lookups report absence through `Option`/`bool`;
//! the `NotFound` variants are only raised for mutation targets.

use std::path::PathBuf;
use thiserror::Error;

/// Errors from either storage backend.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Session not found: {0}")]
    NotFound(String),

    #[error("Failed to access storage file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to encode or decode stored JSON: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Relational store probe timed out after {0:?}")]
    ProbeTimeout(std::time::Duration),

    #[error("Stored {table} row holds an invalid {column}: {value}")]
    Corrupt {
        table: &'static str,
        column: &'static str,
        value: String,
    },
}

impl StorageError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

/// Errors reported by a messaging channel client.
///
/// A `Send` failure is scoped to one recipient and ends up inside that
/// recipient's send result rather than failing the batch.
#[derive(Debug, Clone, Error)]
pub enum ChannelError {
    #[error("Failed to create channel client: {0}")]
    Create(String),

    #[error("Channel connection sequence failed: {0}")]
    Start(String),

    #[error("Invalid recipient '{0}'")]
    InvalidRecipient(String),

    #[error("{0}")]
    Send(String),
}

/// Errors from the connection lifecycle manager.
#[derive(Debug, Error)]
pub enum ConnectionError {
    #[error("WhatsApp client is not connected")]
    NotConnected,

    #[error("Connection manager has stopped")]
    ManagerStopped,
}

/// Request validation failure, raised before anything reaches the core.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{0}")]
pub struct ValidationError(pub String);

/// Errors surfaced by the service facade.
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error(transparent)]
    Connection(#[from] ConnectionError),

    #[error(transparent)]
    Storage(#[from] StorageError),
}

impl ServiceError {
    /// True when the call failed because the channel is not ready.
    pub fn is_not_connected(&self) -> bool {
        matches!(self, Self::Connection(ConnectionError::NotConnected))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_connected_message() {
        let err = ServiceError::from(ConnectionError::NotConnected);
        assert!(err.is_not_connected());
        assert_eq!(err.to_string(), "WhatsApp client is not connected");
    }

    #[test]
    fn test_storage_error_is_not_not_connected() {
        let err = ServiceError::from(StorageError::NotFound("default".into()));
        assert!(!err.is_not_connected());
        assert_eq!(err.to_string(), "Session not found: default");
    }
}
