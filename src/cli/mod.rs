//! CLI Module
//!
//! Command-line interface for wasender using Clap v4.

mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand};

use crate::config::Config;

/// wasender - WhatsApp bulk message sender
#[derive(Parser, Debug)]
#[command(name = "wasender")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Enable debug mode (debug level, log files in ./logs)
    #[arg(short, long, global = true)]
    pub debug: bool,

    /// Configuration file path
    #[arg(short, long, global = true)]
    pub config: Option<String>,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Start the HTTP server (default)
    Serve {
        /// Bind address, overrides HOST
        #[arg(long)]
        host: Option<String>,

        /// Port, overrides PORT
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Print the recorded message history, newest first
    History {
        /// Show at most this many messages
        #[arg(short, long)]
        limit: Option<usize>,

        /// Output format
        #[arg(short, long, default_value = "text")]
        format: OutputFormat,
    },

    /// Print aggregate delivery statistics
    Stats {
        /// Output format
        #[arg(short, long, default_value = "text")]
        format: OutputFormat,
    },

    /// Show which storage backend would be used
    Storage,

    /// Log management operations
    Logs {
        #[command(subcommand)]
        operation: LogCommands,
    },
}

#[derive(Subcommand, Debug)]
pub enum LogCommands {
    /// Clean up old log files
    Clean {
        /// Maximum age in days (default: 7)
        #[arg(short = 'a', long, default_value = "7")]
        days: u64,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

/// Load configuration from the given path or the default locations, then
/// validate it.
pub fn load_config(config_path: Option<&str>) -> Result<Config> {
    let config = match config_path {
        Some(path) => Config::load_from_path(path)?,
        None => Config::load()?,
    };
    config.validate()?;
    Ok(config)
}

/// Main CLI entry point
pub async fn run(cli: Cli, config: Config) -> Result<()> {
    if cli.debug {
        tracing::info!("Debug mode enabled");
    }

    match cli.command {
        None => commands::cmd_serve(config, None, None).await,
        Some(Commands::Serve { host, port }) => commands::cmd_serve(config, host, port).await,
        Some(Commands::History { limit, format }) => {
            commands::cmd_history(&config, limit, format).await
        }
        Some(Commands::Stats { format }) => commands::cmd_stats(&config, format).await,
        Some(Commands::Storage) => commands::cmd_storage(&config).await,
        Some(Commands::Logs { operation }) => commands::cmd_logs(&config, operation),
    }
}
