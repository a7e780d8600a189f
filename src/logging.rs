//! Logging setup
//!
//! Console logging always goes to stderr. File logging (daily rotation) is
//! enabled with `--debug` or when a log file is configured.

use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer, fmt};

const LOG_FILE_PREFIX: &str = "wasender.log";

/// Logging options collected from the CLI and config.
#[derive(Debug, Clone)]
pub struct LogConfig {
    pub level: String,
    pub debug_mode: bool,
    pub log_dir: Option<PathBuf>,
    pub json: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl LogConfig {
    pub fn new() -> Self {
        Self {
            level: "info".to_string(),
            debug_mode: false,
            log_dir: None,
            json: false,
        }
    }

    pub fn with_level(mut self, level: impl Into<String>) -> Self {
        self.level = level.into();
        self
    }

    pub fn with_debug_mode(mut self, debug: bool) -> Self {
        self.debug_mode = debug;
        self
    }

    pub fn with_log_dir(mut self, dir: PathBuf) -> Self {
        self.log_dir = Some(dir);
        self
    }

    pub fn with_json(mut self, json: bool) -> Self {
        self.json = json;
        self
    }

    fn effective_level(&self) -> &str {
        if self.debug_mode { "debug" } else { &self.level }
    }

    /// Directory for rolling log files, if file logging is on.
    pub fn file_dir(&self) -> Option<PathBuf> {
        match (&self.log_dir, self.debug_mode) {
            (Some(dir), _) => Some(dir.clone()),
            (None, true) => Some(default_log_dir()),
            (None, false) => None,
        }
    }
}

/// Default log directory: `./logs`.
pub fn default_log_dir() -> PathBuf {
    PathBuf::from("logs")
}

/// Install the global subscriber. Keep the returned guard alive for the
/// lifetime of the process, otherwise buffered file output is lost.
pub fn init_logging(config: LogConfig) -> anyhow::Result<Option<WorkerGuard>> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(config.effective_level()))?;

    let console = fmt::layer().with_writer(std::io::stderr).with_target(false);

    let (file_layer, guard) = match config.file_dir() {
        Some(dir) => {
            std::fs::create_dir_all(&dir)?;
            let appender = tracing_appender::rolling::daily(&dir, LOG_FILE_PREFIX);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = if config.json {
                fmt::layer().json().with_writer(writer).boxed()
            } else {
                fmt::layer().with_ansi(false).with_writer(writer).boxed()
            };
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(console)
        .with(file_layer)
        .try_init()?;

    Ok(guard)
}

/// Remove rolled log files in `dir` older than `max_age_days`. Returns how
/// many were deleted.
pub fn cleanup_old_logs(dir: &Path, max_age_days: u64) -> std::io::Result<usize> {
    if !dir.exists() {
        return Ok(0);
    }
    let max_age = Duration::from_secs(max_age_days * 24 * 60 * 60);
    let now = SystemTime::now();
    let mut removed = 0;

    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let name = entry.file_name();
        if !name.to_string_lossy().starts_with(LOG_FILE_PREFIX) {
            continue;
        }
        let modified = entry.metadata()?.modified()?;
        if now.duration_since(modified).unwrap_or_default() > max_age {
            std::fs::remove_file(entry.path())?;
            removed += 1;
        }
    }
    Ok(removed)
}
