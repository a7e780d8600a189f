//! CLI subcommands: serve, history, stats, storage and logs.

use anyhow::{Context, Result};
use std::sync::Arc;

use super::{LogCommands, OutputFormat};
use crate::config::Config;
use crate::server;
use crate::services::{DEFAULT_SESSION_ID, SessionService};
use crate::storage::{MessageRecord, MessageStats, SessionStore, select_storage};
use crate::utils::truncate_str;

/// Start the HTTP server. CLI flags win over config and environment.
pub(crate) async fn cmd_serve(
    config: Config,
    host: Option<String>,
    port: Option<u16>,
) -> Result<()> {
    let host = host.unwrap_or_else(|| config.server.host.clone());
    let port = port.unwrap_or(config.server.port);

    let service = SessionService::from_config(&config).await?;
    server::serve(Arc::new(service), &host, port).await
}

async fn load_messages(config: &Config) -> Result<Vec<MessageRecord>> {
    let storage = select_storage(config)
        .await
        .context("Failed to open session storage")?;
    let messages = storage
        .store
        .get_messages(DEFAULT_SESSION_ID)
        .await
        .context("Failed to read message history")?;
    storage.store.close().await?;
    Ok(messages)
}

pub(crate) async fn cmd_history(
    config: &Config,
    limit: Option<usize>,
    format: OutputFormat,
) -> Result<()> {
    let mut messages = load_messages(config).await?;
    if let Some(limit) = limit {
        messages.truncate(limit);
    }

    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&messages)?),
        OutputFormat::Text => {
            if messages.is_empty() {
                println!("No messages recorded yet");
                return Ok(());
            }
            for message in &messages {
                println!(
                    "#{} {}  sent {}  failed {}  to {} number(s)",
                    message.id,
                    message.timestamp.format("%Y-%m-%d %H:%M:%S"),
                    message.total_sent,
                    message.total_failed,
                    message.phone_numbers.len()
                );
                println!("    {}", truncate_str(&message.body, 72));
                for result in message.results.iter().filter(|r| !r.is_success()) {
                    println!(
                        "    ✗ {}: {}",
                        result.phone_number,
                        result.error.as_deref().unwrap_or("unknown error")
                    );
                }
            }
        }
    }
    Ok(())
}

pub(crate) async fn cmd_stats(config: &Config, format: OutputFormat) -> Result<()> {
    let messages = load_messages(config).await?;
    let stats = MessageStats::from_messages(&messages);

    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&stats)?),
        OutputFormat::Text => {
            println!("Messages:     {}", stats.total_messages);
            println!("Sent:         {}", stats.total_sent);
            println!("Failed:       {}", stats.total_failed);
            println!("Success rate: {:.2}%", stats.success_rate);
        }
    }
    Ok(())
}

pub(crate) async fn cmd_storage(config: &Config) -> Result<()> {
    let storage = select_storage(config)
        .await
        .context("Failed to open session storage")?;
    println!("Storage mode: {}", storage.mode);
    if config.database.is_unconfigured() {
        println!("No relational database configured (set DB_HOST, DB_NAME and DB_USER, or DB_URL)");
    }
    println!("Data directory: {}", config.storage.data_dir.display());
    println!("Session directory: {}", config.storage.session_dir.display());
    storage.store.close().await?;
    Ok(())
}

pub(crate) fn cmd_logs(config: &Config, operation: LogCommands) -> Result<()> {
    match operation {
        LogCommands::Clean { days } => {
            let dir = config.logging.effective_dir();
            println!(
                "Cleaning up log files older than {} days in {}...",
                days,
                dir.display()
            );
            let removed = crate::logging::cleanup_old_logs(&dir, days)
                .context("Failed to clean log directory")?;
            if removed > 0 {
                println!("Removed {} old log file(s)", removed);
            } else {
                println!("No old log files to remove");
            }
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{Duration, SystemTime};

    #[test]
    fn test_logs_clean_uses_configured_dir() {
        let dir = tempfile::tempdir().unwrap();
        let stale = dir.path().join("wasender.log.2026-01-01");
        std::fs::write(&stale, "old").unwrap();
        std::fs::File::options()
            .write(true)
            .open(&stale)
            .unwrap()
            .set_modified(SystemTime::now() - Duration::from_secs(10 * 24 * 60 * 60))
            .unwrap();

        let mut config = Config::default();
        config.logging.dir = Some(dir.path().to_path_buf());
        cmd_logs(&config, LogCommands::Clean { days: 7 }).unwrap();
        assert!(!stale.exists());
    }
}
