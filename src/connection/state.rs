//! Connection phases, settings and the published status snapshot.

use super::log_buffer::{LogBuffer, SNAPSHOT_LOG_LINES};
use crate::config::MessagingConfig;
use serde::Serialize;
use std::time::Duration;

/// Where the channel connection currently stands.
///
/// `Idle -> Initializing -> AwaitingPairing -> Connected -> Disconnected ->
/// Initializing ...`, ending in `Failed` once automatic retries run out.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    #[default]
    Idle,
    Initializing,
    AwaitingPairing,
    Connected,
    Disconnected,
    Failed,
}

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Idle => "idle",
            Phase::Initializing => "initializing",
            Phase::AwaitingPairing => "awaiting_pairing",
            Phase::Connected => "connected",
            Phase::Disconnected => "disconnected",
            Phase::Failed => "failed",
        }
    }
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Immutable copy of the manager state handed to readers.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusSnapshot {
    pub connected: bool,
    pub initializing: bool,
    /// Pairing code as an image data URL while pairing is pending
    pub qr: Option<String>,
    /// Most recent log lines, newest first
    pub logs: Vec<String>,
    pub reconnect_attempts: u32,
    pub phase: Phase,
}

/// Pacing and retry knobs for the connection manager.
#[derive(Debug, Clone)]
pub struct ConnectionSettings {
    pub message_delay: Duration,
    pub max_reconnect_attempts: u32,
    pub reconnect_delay: Duration,
    pub init_timeout: Duration,
    pub default_country_code: String,
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        Self::from(&MessagingConfig::default())
    }
}

impl From<&MessagingConfig> for ConnectionSettings {
    fn from(config: &MessagingConfig) -> Self {
        Self {
            message_delay: Duration::from_millis(config.message_delay_ms),
            max_reconnect_attempts: config.max_reconnect_attempts,
            reconnect_delay: Duration::from_millis(config.reconnect_delay_ms),
            init_timeout: Duration::from_millis(config.init_timeout_ms),
            default_country_code: config.default_country_code.clone(),
        }
    }
}

/// Mutable state owned by the manager task.
#[derive(Debug, Default)]
pub(super) struct ConnectionState {
    pub phase: Phase,
    pub qr: Option<String>,
    pub reconnect_attempts: u32,
    pub logs: LogBuffer,
}

impl ConnectionState {
    pub fn is_connected(&self) -> bool {
        self.phase == Phase::Connected
    }

    pub fn is_initializing(&self) -> bool {
        self.phase == Phase::Initializing
    }

    pub fn snapshot(&self) -> StatusSnapshot {
        StatusSnapshot {
            connected: self.is_connected(),
            initializing: self.is_initializing(),
            qr: self.qr.clone(),
            logs: self.logs.recent(SNAPSHOT_LOG_LINES),
            reconnect_attempts: self.reconnect_attempts,
            phase: self.phase,
        }
    }
}
