//! wasender - WhatsApp Bulk Message Sender
//!
//! A small web backend that sends one message to a list of phone numbers
//! through a paired WhatsApp Web session and records every batch.
//!
//! ## Features
//!
//! - **QR Pairing:** Pairing code rendered for the browser and the terminal
//! - **Bounded Reconnects:** Automatic retries with an operator reset
//! - **Paced Bulk Send:** Strictly sequential, one delay per recipient
//! - **Dual Storage:** MySQL when configured and reachable, JSON files otherwise
//!
//! ## Quick Start
//!
//! ```bash
//! # Serve the operator page on http://127.0.0.1:3000
//! wasender
//!
//! # Show recorded batches
//! wasender history --limit 10
//! ```

pub mod channels;
pub mod cli;
pub mod config;
pub mod connection;
pub mod error;
pub mod logging;
pub mod server;
pub mod services;
pub mod storage;
pub mod utils;

// Re-export commonly used types
pub use error::{ChannelError, ConnectionError, ServiceError, StorageError, ValidationError};

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const AUTHORS: &str = env!("CARGO_PKG_AUTHORS");
pub const DESCRIPTION: &str = env!("CARGO_PKG_DESCRIPTION");
