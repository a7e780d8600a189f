//! End-to-end flows through the session service with a scripted channel.

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;

use wasender::channels::{ChannelClient, ChannelDriver, ChannelEvent, EventSink};
use wasender::config::Config;
use wasender::connection::{Phase, StatusSnapshot};
use wasender::services::{DEFAULT_SESSION_ID, SessionService};
use wasender::storage::{
    FileSessionStore, SendStatus, SessionStore, StorageMode, select_storage,
};
use wasender::ChannelError;

/// Each created client replays the next script on start. Numbers listed in
/// `rejected` fail to send.
#[derive(Default)]
struct ScriptedDriver {
    scripts: Mutex<VecDeque<Vec<ChannelEvent>>>,
    sinks: Mutex<Vec<EventSink>>,
    rejected: Vec<String>,
}

impl ScriptedDriver {
    fn new(scripts: Vec<Vec<ChannelEvent>>, rejected: &[&str]) -> Arc<Self> {
        Arc::new(Self {
            scripts: Mutex::new(scripts.into()),
            sinks: Mutex::new(Vec::new()),
            rejected: rejected.iter().map(|s| s.to_string()).collect(),
        })
    }

    fn latest_sink(&self) -> EventSink {
        self.sinks.lock().unwrap().last().cloned().unwrap()
    }

    fn created(&self) -> usize {
        self.sinks.lock().unwrap().len()
    }
}

struct ScriptedClient {
    sink: EventSink,
    on_start: Vec<ChannelEvent>,
    rejected: Vec<String>,
}

#[async_trait]
impl ChannelDriver for ScriptedDriver {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn create_client(&self, events: EventSink) -> Result<Arc<dyn ChannelClient>, ChannelError> {
        self.sinks.lock().unwrap().push(events.clone());
        let on_start = self.scripts.lock().unwrap().pop_front().unwrap_or_default();
        Ok(Arc::new(ScriptedClient {
            sink: events,
            on_start,
            rejected: self.rejected.clone(),
        }))
    }
}

#[async_trait]
impl ChannelClient for ScriptedClient {
    async fn start(&self) -> Result<(), ChannelError> {
        for event in &self.on_start {
            self.sink.emit(event.clone());
        }
        Ok(())
    }

    async fn send_text(&self, number: &str, _body: &str) -> Result<(), ChannelError> {
        if self.rejected.iter().any(|r| r == number) {
            Err(ChannelError::Send(format!("{} is not on WhatsApp", number)))
        } else {
            Ok(())
        }
    }

    async fn destroy(&self) -> Result<(), ChannelError> {
        Ok(())
    }
}

fn test_config(data_dir: &TempDir) -> Config {
    let mut config = Config::default();
    config.messaging.message_delay_ms = 0;
    config.messaging.reconnect_delay_ms = 10;
    config.storage.data_dir = data_dir.path().to_path_buf();
    config
}

async fn wait_for(
    service: &SessionService,
    condition: impl FnMut(&StatusSnapshot) -> bool,
) -> StatusSnapshot {
    let mut rx = service.connection().subscribe();
    let snapshot = tokio::time::timeout(Duration::from_secs(5), rx.wait_for(condition))
        .await
        .expect("connection did not reach the expected state")
        .unwrap();
    snapshot.clone()
}

fn numbers(raw: &[&str]) -> Vec<String> {
    raw.iter().map(|s| s.to_string()).collect()
}

#[tokio::test]
async fn test_pair_send_and_persist_to_files() {
    let dir = TempDir::new().unwrap();
    let config = test_config(&dir);
    let driver = ScriptedDriver::new(
        vec![vec![ChannelEvent::PairingCode("2@pairing,payload".into())]],
        &["919999999999"],
    );

    let storage = select_storage(&config).await.unwrap();
    assert_eq!(storage.mode, StorageMode::File);
    let service = SessionService::with_driver(driver.clone(), &config, storage);

    service.get_status().await.unwrap();
    let status = wait_for(&service, |s| s.phase == Phase::AwaitingPairing).await;
    assert!(status.qr.is_some());

    // Not paired yet: sending is refused and nothing is recorded.
    let err = service
        .send_message(&numbers(&["9876543210"]), "Hello")
        .await
        .unwrap_err();
    assert!(err.is_not_connected());
    assert!(service.get_message_history().await.unwrap().is_empty());

    driver.latest_sink().emit(ChannelEvent::Authenticated);
    driver.latest_sink().emit(ChannelEvent::Ready);
    let status = wait_for(&service, |s| s.connected).await;
    assert!(status.qr.is_none());

    let targets = numbers(&["9876543210", "9999999999", "09123456789"]);
    let results = service.send_message(&targets, "Festival offer").await.unwrap();
    let statuses: Vec<_> = results.iter().map(|r| r.status).collect();
    assert_eq!(
        statuses,
        vec![SendStatus::Success, SendStatus::Error, SendStatus::Success]
    );
    assert_eq!(results[1].phone_number, "9999999999");

    service.shutdown().await;

    // A fresh store over the same directory sees the recorded batch.
    let reopened = FileSessionStore::open(dir.path()).await.unwrap();
    let messages = reopened.get_messages(DEFAULT_SESSION_ID).await.unwrap();
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].body, "Festival offer");
    assert_eq!(messages[0].phone_numbers, targets);
    assert_eq!((messages[0].total_sent, messages[0].total_failed), (2, 1));
    assert!(reopened.find_by_id(DEFAULT_SESSION_ID).await.unwrap().is_some());
}

#[tokio::test]
async fn test_relational_backend_records_history() {
    let dir = TempDir::new().unwrap();
    let mut config = test_config(&dir);
    config.database.url = Some("sqlite::memory:".into());

    let storage = select_storage(&config).await.unwrap();
    assert_eq!(storage.mode, StorageMode::Relational);

    let driver = ScriptedDriver::new(vec![vec![ChannelEvent::Ready]], &[]);
    let service = SessionService::with_driver(driver, &config, storage);
    service.get_status().await.unwrap();
    wait_for(&service, |s| s.connected).await;

    service
        .send_message(&numbers(&["9876543210"]), "First")
        .await
        .unwrap();
    service
        .send_message(&numbers(&["9876543210", "9123456789"]), "Second")
        .await
        .unwrap();

    let history = service.get_message_history().await.unwrap();
    let bodies: Vec<_> = history.iter().map(|m| m.body.as_str()).collect();
    assert_eq!(bodies, vec!["Second", "First"]);

    let stats = service.message_stats().await.unwrap();
    assert_eq!(stats.total_messages, 2);
    assert_eq!(stats.total_sent, 3);
    assert_eq!(stats.success_rate, 100.0);
    assert_eq!(service.storage_mode(), StorageMode::Relational);
}

#[tokio::test]
async fn test_dropped_connection_recovers() {
    let dir = TempDir::new().unwrap();
    let config = test_config(&dir);
    let driver = ScriptedDriver::new(
        vec![vec![ChannelEvent::Ready], vec![ChannelEvent::Ready]],
        &[],
    );
    let storage = select_storage(&config).await.unwrap();
    let service = SessionService::with_driver(driver.clone(), &config, storage);

    service.get_status().await.unwrap();
    wait_for(&service, |s| s.connected).await;

    driver
        .latest_sink()
        .emit(ChannelEvent::Disconnected("stream replaced".into()));

    let status = wait_for(&service, |s| s.connected && driver.created() == 2).await;
    assert_eq!(status.reconnect_attempts, 0);
    assert_eq!(driver.created(), 2);

    let results = service
        .send_message(&numbers(&["9876543210"]), "Back online")
        .await
        .unwrap();
    assert_eq!(results[0].status, SendStatus::Success);
}

#[tokio::test]
async fn test_operator_reconnect_after_retries_exhausted() {
    let dir = TempDir::new().unwrap();
    let mut config = test_config(&dir);
    config.messaging.max_reconnect_attempts = 1;
    let lost = || ChannelEvent::Disconnected("connection refused".into());
    let driver = ScriptedDriver::new(
        vec![vec![lost()], vec![lost()], vec![ChannelEvent::Ready]],
        &[],
    );
    let storage = select_storage(&config).await.unwrap();
    let service = SessionService::with_driver(driver.clone(), &config, storage);

    service.get_status().await.unwrap();
    let status = wait_for(&service, |s| s.phase == Phase::Failed).await;
    assert_eq!(status.reconnect_attempts, 1);
    assert_eq!(driver.created(), 2);

    assert!(service.reconnect().await.unwrap());
    let status = wait_for(&service, |s| s.connected).await;
    assert_eq!(status.reconnect_attempts, 0);
    assert_eq!(driver.created(), 3);
}
