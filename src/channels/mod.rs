//! Channel Integrations
//!
//! The messaging channel seen by the connection manager: a driver that builds
//! clients, a client that connects and sends text, and the typed events a
//! client reports back. The WhatsApp Web implementation sits behind the
//! `whatsapp` feature.

pub mod pairing;

#[cfg(feature = "whatsapp")]
pub mod whatsapp;

use crate::config::Config;
use crate::error::ChannelError;
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Lifecycle notifications raised by a channel client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelEvent {
    /// Raw pairing payload to be rendered as a scannable code
    PairingCode(String),
    Ready,
    Authenticated,
    AuthFailure(String),
    Disconnected(String),
    LoadingProgress { percent: u8, label: String },
}

/// A [`ChannelEvent`] tagged with the generation of the client that raised
/// it, so the manager can drop events from clients it already replaced.
#[derive(Debug, Clone)]
pub struct ChannelSignal {
    pub generation: u64,
    pub event: ChannelEvent,
}

/// Handed to a client at creation; the only way a client reports events.
#[derive(Debug, Clone)]
pub struct EventSink {
    generation: u64,
    tx: mpsc::UnboundedSender<ChannelSignal>,
}

impl EventSink {
    pub fn new(generation: u64, tx: mpsc::UnboundedSender<ChannelSignal>) -> Self {
        Self { generation, tx }
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Returns false once the receiving manager has gone away.
    pub fn emit(&self, event: ChannelEvent) -> bool {
        self.tx
            .send(ChannelSignal {
                generation: self.generation,
                event,
            })
            .is_ok()
    }
}

/// Builds channel clients. One driver lives for the whole process; each
/// (re)initialization asks it for a fresh client.
#[async_trait]
pub trait ChannelDriver: Send + Sync {
    fn name(&self) -> &str;

    async fn create_client(&self, events: EventSink) -> Result<Arc<dyn ChannelClient>, ChannelError>;
}

/// A single connection to the messaging network.
#[async_trait]
pub trait ChannelClient: Send + Sync {
    /// Run the connection sequence. Returns once the client is running;
    /// readiness and pairing are reported through the event sink.
    async fn start(&self) -> Result<(), ChannelError>;

    /// Send a text message to an already-formatted number (digits only,
    /// country code included).
    async fn send_text(&self, number: &str, body: &str) -> Result<(), ChannelError>;

    async fn destroy(&self) -> Result<(), ChannelError>;
}

/// The driver this build ships with.
pub fn default_driver(config: &Config) -> Arc<dyn ChannelDriver> {
    #[cfg(feature = "whatsapp")]
    {
        Arc::new(whatsapp::WhatsAppDriver::new(config.storage.session_dir.clone()))
    }
    #[cfg(not(feature = "whatsapp"))]
    {
        let _ = config;
        Arc::new(UnavailableDriver)
    }
}

/// Stand-in for builds without a channel backend; every client creation
/// fails, so the manager stays idle and sends report "not connected".
#[cfg(not(feature = "whatsapp"))]
struct UnavailableDriver;

#[cfg(not(feature = "whatsapp"))]
#[async_trait]
impl ChannelDriver for UnavailableDriver {
    fn name(&self) -> &str {
        "unavailable"
    }

    async fn create_client(&self, _events: EventSink) -> Result<Arc<dyn ChannelClient>, ChannelError> {
        Err(ChannelError::Create(
            "built without the `whatsapp` feature".to_string(),
        ))
    }
}
