//! Configuration section types and their defaults.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// HTTP server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Relational database connection settings
    #[serde(default)]
    pub database: DatabaseConfig,

    /// Messaging channel tuning
    #[serde(default)]
    pub messaging: MessagingConfig,

    /// Local storage locations
    #[serde(default)]
    pub storage: StorageConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// HTTP server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Port (default: 3000)
    #[serde(default = "default_port")]
    pub port: u16,

    /// Bind address (default: "127.0.0.1")
    #[serde(default = "default_host")]
    pub host: String,
}

fn default_port() -> u16 {
    3000
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            host: default_host(),
        }
    }
}

/// Relational store settings. Host, name and user are optional so the
/// storage selector can tell "not configured" apart from "configured but
/// unreachable".
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Full connection URL; takes precedence over the individual fields
    #[serde(default)]
    pub url: Option<String>,

    #[serde(default)]
    pub host: Option<String>,

    #[serde(default = "default_db_port")]
    pub port: u16,

    #[serde(default)]
    pub name: Option<String>,

    #[serde(default)]
    pub user: Option<String>,

    #[serde(default, skip_serializing)]
    pub password: Option<String>,

    /// Pool size (default: 10)
    #[serde(default = "default_connection_limit")]
    pub connection_limit: u32,

    /// Startup probe timeout in milliseconds (default: 5000)
    #[serde(default = "default_probe_timeout_ms")]
    pub probe_timeout_ms: u64,
}

fn default_db_port() -> u16 {
    3306
}

fn default_connection_limit() -> u32 {
    10
}

fn default_probe_timeout_ms() -> u64 {
    5_000
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: None,
            host: None,
            port: default_db_port(),
            name: None,
            user: None,
            password: None,
            connection_limit: default_connection_limit(),
            probe_timeout_ms: default_probe_timeout_ms(),
        }
    }
}

impl DatabaseConfig {
    /// True when none of the relational connection settings are present.
    pub fn is_unconfigured(&self) -> bool {
        self.url.is_none() && self.host.is_none() && self.name.is_none() && self.user.is_none()
    }

    /// Connection URL for the relational store. Missing MySQL fields fall
    /// back to `localhost`, `root` and `whatsapp_sender`.
    pub fn connection_url(&self) -> String {
        if let Some(url) = &self.url {
            return url.clone();
        }
        let host = self.host.as_deref().unwrap_or("localhost");
        let user = self.user.as_deref().unwrap_or("root");
        let name = self.name.as_deref().unwrap_or("whatsapp_sender");
        let user = urlencoding::encode(user);
        match self.password.as_deref() {
            Some(password) if !password.is_empty() => format!(
                "mysql://{}:{}@{}:{}/{}",
                user,
                urlencoding::encode(password),
                host,
                self.port,
                name
            ),
            _ => format!("mysql://{}@{}:{}/{}", user, host, self.port, name),
        }
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }
}

/// Messaging channel tuning. None of these affect correctness, only pacing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessagingConfig {
    /// Pause after every recipient in a batch, in milliseconds (default: 1000)
    #[serde(default = "default_message_delay_ms")]
    pub message_delay_ms: u64,

    /// Automatic reconnect attempts after a disconnect (default: 5)
    #[serde(default = "default_max_reconnect_attempts")]
    pub max_reconnect_attempts: u32,

    /// Delay before an automatic reconnect, in milliseconds (default: 5000)
    #[serde(default = "default_reconnect_delay_ms")]
    pub reconnect_delay_ms: u64,

    /// Initialization watchdog, in milliseconds (default: 30000)
    #[serde(default = "default_init_timeout_ms")]
    pub init_timeout_ms: u64,

    /// Prefix for 10-digit local numbers (default: "91")
    #[serde(default = "default_country_code")]
    pub default_country_code: String,
}

fn default_message_delay_ms() -> u64 {
    1_000
}

fn default_max_reconnect_attempts() -> u32 {
    5
}

fn default_reconnect_delay_ms() -> u64 {
    5_000
}

fn default_init_timeout_ms() -> u64 {
    30_000
}

fn default_country_code() -> String {
    "91".to_string()
}

impl Default for MessagingConfig {
    fn default() -> Self {
        Self {
            message_delay_ms: default_message_delay_ms(),
            max_reconnect_attempts: default_max_reconnect_attempts(),
            reconnect_delay_ms: default_reconnect_delay_ms(),
            init_timeout_ms: default_init_timeout_ms(),
            default_country_code: default_country_code(),
        }
    }
}

/// Local directories for the file-backed store and channel credentials.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// JSON documents for file-backed mode (default: ./data)
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// Channel pairing credentials (default: ./sessions)
    #[serde(default = "default_session_dir")]
    pub session_dir: PathBuf,
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("data")
}

fn default_session_dir() -> PathBuf {
    PathBuf::from("sessions")
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            session_dir: default_session_dir(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Directory for rolling log files
    #[serde(default)]
    pub dir: Option<PathBuf>,

    /// Emit JSON lines to the log file
    #[serde(default)]
    pub json: bool,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            dir: None,
            json: false,
        }
    }
}

impl LoggingConfig {
    /// Where rolled log files live: the configured directory, else `./logs`.
    pub fn effective_dir(&self) -> PathBuf {
        self.dir.clone().unwrap_or_else(crate::logging::default_log_dir)
    }
}
