//! WhatsApp Integration
//!
//! Drives a WhatsApp Web client through `whatsapp-rust`. Pairing credentials
//! persist in `<session dir>/whatsapp.db`; once paired, later starts reconnect
//! without a new QR scan.

mod credential_store;

pub use credential_store::CredentialStore;

use super::{ChannelClient, ChannelDriver, ChannelEvent, EventSink};
use crate::error::ChannelError;
use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::task::AbortHandle;

use wacore::types::events::Event;
use wacore_binary::jid::Jid;
use whatsapp_rust::bot::Bot;
use whatsapp_rust::client::Client;
use whatsapp_rust_tokio_transport::TokioWebSocketTransportFactory;
use whatsapp_rust_ureq_http_client::UreqHttpClient;

const CREDENTIALS_FILE: &str = "whatsapp.db";

/// Builds WhatsApp Web clients backed by a shared credential directory.
pub struct WhatsAppDriver {
    session_dir: PathBuf,
}

impl WhatsAppDriver {
    pub fn new(session_dir: impl Into<PathBuf>) -> Self {
        Self {
            session_dir: session_dir.into(),
        }
    }

    fn credentials_path(&self) -> PathBuf {
        self.session_dir.join(CREDENTIALS_FILE)
    }
}

/// Translate a library event into a channel event. `None` for events the
/// connection manager has no use for.
fn map_event(event: &Event) -> Option<ChannelEvent> {
    match event {
        Event::PairingQrCode { code, .. } => Some(ChannelEvent::PairingCode(code.clone())),
        Event::PairSuccess(_) => Some(ChannelEvent::Authenticated),
        Event::Connected(_) => Some(ChannelEvent::Ready),
        Event::LoggedOut(_) => Some(ChannelEvent::AuthFailure(
            "logged out from the phone".to_string(),
        )),
        Event::Disconnected(_) => Some(ChannelEvent::Disconnected(
            "connection closed".to_string(),
        )),
        _ => None,
    }
}

#[async_trait]
impl ChannelDriver for WhatsAppDriver {
    fn name(&self) -> &str {
        "whatsapp"
    }

    async fn create_client(&self, events: EventSink) -> Result<Arc<dyn ChannelClient>, ChannelError> {
        tokio::fs::create_dir_all(&self.session_dir)
            .await
            .map_err(|e| {
                ChannelError::Create(format!(
                    "cannot create session directory {}: {}",
                    self.session_dir.display(),
                    e
                ))
            })?;

        let path = self.credentials_path();
        let backend = CredentialStore::open(&path)
            .await
            .map_err(|e| ChannelError::Create(format!("failed to open credential store: {}", e)))?;

        match backend.device_exists().await {
            Ok(true) => tracing::info!("WhatsApp: paired session found, reconnecting"),
            Ok(false) => tracing::info!("WhatsApp: no paired session, a QR code will be issued"),
            Err(e) => tracing::warn!("WhatsApp: couldn't check device state: {}", e),
        }

        let bot = Bot::builder()
            .with_backend(Arc::new(backend))
            .with_transport_factory(TokioWebSocketTransportFactory::new())
            .with_http_client(UreqHttpClient::new())
            .on_event(move |event, _client| {
                let events = events.clone();
                async move {
                    match map_event(&event) {
                        Some(mapped) => {
                            if !events.emit(mapped) {
                                tracing::debug!(
                                    "WhatsApp: event from retired client {} dropped",
                                    events.generation()
                                );
                            }
                        }
                        None => tracing::trace!("WhatsApp: unhandled event: {:?}", event),
                    }
                }
            })
            .build()
            .await
            .map_err(|e| ChannelError::Create(format!("failed to build WhatsApp client: {}", e)))?;

        let client = bot.client();
        Ok(Arc::new(WhatsAppClient {
            client,
            bot: Mutex::new(bot),
            task: Mutex::new(None),
        }))
    }
}

/// One WhatsApp Web connection.
pub struct WhatsAppClient {
    client: Arc<Client>,
    bot: Mutex<Bot>,
    /// Set once `start` has launched the connection loop
    task: Mutex<Option<AbortHandle>>,
}

fn jid_for(number: &str) -> Result<Jid, ChannelError> {
    format!("{}@s.whatsapp.net", number)
        .parse()
        .map_err(|e| ChannelError::InvalidRecipient(format!("{}: {}", number, e)))
}

#[async_trait]
impl ChannelClient for WhatsAppClient {
    async fn start(&self) -> Result<(), ChannelError> {
        let mut task = self.task.lock().await;
        if task.is_some() {
            return Err(ChannelError::Start("client already started".to_string()));
        }

        let handle = self
            .bot
            .lock()
            .await
            .run()
            .await
            .map_err(|e| ChannelError::Start(e.to_string()))?;
        *task = Some(handle.abort_handle());

        tokio::spawn(async move {
            if let Err(e) = handle.await
                && !e.is_cancelled()
            {
                tracing::error!("WhatsApp client task error: {:?}", e);
            }
        });
        Ok(())
    }

    async fn send_text(&self, number: &str, body: &str) -> Result<(), ChannelError> {
        let jid = jid_for(number)?;
        let message = waproto::whatsapp::Message {
            conversation: Some(body.to_string()),
            ..Default::default()
        };
        self.client
            .send_message(jid, message)
            .await
            .map(|_| ())
            .map_err(|e| ChannelError::Send(e.to_string()))
    }

    async fn destroy(&self) -> Result<(), ChannelError> {
        self.client.disconnect().await;
        if let Some(task) = self.task.lock().await.take() {
            task.abort();
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_jid_for_formatted_number() {
        let jid = jid_for("919876543210").unwrap();
        assert_eq!(jid.to_string(), "919876543210@s.whatsapp.net");
    }

    #[test]
    fn test_credentials_live_in_session_dir() {
        let driver = WhatsAppDriver::new("/var/lib/wasender/sessions");
        assert_eq!(
            driver.credentials_path(),
            PathBuf::from("/var/lib/wasender/sessions/whatsapp.db")
        );
        assert_eq!(driver.name(), "whatsapp");
    }
}
