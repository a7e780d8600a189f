//! Connection Lifecycle Manager
//!
//! A single task owns the channel client and every piece of connection
//! state. Callers talk to it through [`ConnectionManager`], which queues
//! commands, and read state from a snapshot the task republishes after each
//! step. Channel callbacks arrive on a second queue tagged with the
//! generation of the client that raised them; anything from a client that
//! has since been replaced is dropped.

mod log_buffer;
mod state;

pub use log_buffer::{LOG_CAPACITY, LogBuffer, LogLevel, SNAPSHOT_LOG_LINES};
pub use state::{ConnectionSettings, Phase, StatusSnapshot};

use crate::channels::{ChannelClient, ChannelDriver, ChannelEvent, ChannelSignal, EventSink, pairing};
use crate::error::{ChannelError, ConnectionError};
use crate::storage::SendResult;
use crate::utils::{format_phone_number, truncate_str};
use state::ConnectionState;
use std::ops::ControlFlow;
use std::sync::Arc;
use tokio::sync::{Mutex, mpsc, oneshot, watch};

/// What an `initialize` request ended up doing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InitOutcome {
    Started,
    AlreadyInitializing,
    AlreadyConnected,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Trigger {
    Request,
    AutoRetry,
}

enum Command {
    Initialize {
        trigger: Trigger,
        reply: Option<oneshot::Sender<InitOutcome>>,
    },
    Reconnect {
        reply: oneshot::Sender<bool>,
    },
    ClientCreated {
        generation: u64,
        client: Arc<dyn ChannelClient>,
    },
    InitSettled {
        generation: u64,
        result: Result<(), ChannelError>,
    },
    InitTimeout {
        generation: u64,
    },
    AcquireClient {
        reply: oneshot::Sender<Option<Arc<dyn ChannelClient>>>,
    },
    Log {
        level: LogLevel,
        message: String,
    },
    Destroy {
        reply: oneshot::Sender<()>,
    },
}

/// Handle to the connection task. Cheap to clone.
#[derive(Clone)]
pub struct ConnectionManager {
    commands: mpsc::UnboundedSender<Command>,
    status: watch::Receiver<StatusSnapshot>,
    settings: Arc<ConnectionSettings>,
    /// Serializes batches: the channel takes one send at a time
    send_lock: Arc<Mutex<()>>,
}

impl ConnectionManager {
    /// Start the connection task. Nothing connects until [`initialize`]
    /// is called.
    ///
    /// [`initialize`]: ConnectionManager::initialize
    pub fn spawn(driver: Arc<dyn ChannelDriver>, settings: ConnectionSettings) -> Self {
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (signal_tx, signal_rx) = mpsc::unbounded_channel();
        let (status_tx, status_rx) = watch::channel(StatusSnapshot::default());
        let settings = Arc::new(settings);

        let actor = Actor {
            driver,
            settings: settings.clone(),
            state: ConnectionState::default(),
            client: None,
            generation: 0,
            commands: command_tx.clone(),
            signals: signal_tx,
            status: status_tx,
        };
        tokio::spawn(actor.run(command_rx, signal_rx));

        Self {
            commands: command_tx,
            status: status_rx,
            settings,
            send_lock: Arc::new(Mutex::new(())),
        }
    }

    /// Create and start a channel client unless one is already starting or
    /// connected.
    pub async fn initialize(&self) -> Result<InitOutcome, ConnectionError> {
        let (reply, rx) = oneshot::channel();
        self.request(Command::Initialize {
            trigger: Trigger::Request,
            reply: Some(reply),
        })?;
        rx.await.map_err(|_| ConnectionError::ManagerStopped)
    }

    /// Operator-requested reconnect. Resets the retry budget. Returns false
    /// when skipped because an initialization is already running.
    pub async fn reconnect(&self) -> Result<bool, ConnectionError> {
        let (reply, rx) = oneshot::channel();
        self.request(Command::Reconnect { reply })?;
        rx.await.map_err(|_| ConnectionError::ManagerStopped)
    }

    pub fn status(&self) -> StatusSnapshot {
        self.status.borrow().clone()
    }

    /// Watch the snapshot as it changes.
    pub fn subscribe(&self) -> watch::Receiver<StatusSnapshot> {
        self.status.clone()
    }

    /// Send `body` to every target in order, one at a time, pausing for the
    /// configured delay after each attempt. A failed target is recorded and
    /// the batch moves on; only a missing connection fails the call.
    pub async fn send_message(
        &self,
        targets: &[String],
        body: &str,
    ) -> Result<Vec<SendResult>, ConnectionError> {
        let _batch = self.send_lock.lock().await;

        let (reply, rx) = oneshot::channel();
        self.request(Command::AcquireClient { reply })?;
        let client = rx
            .await
            .map_err(|_| ConnectionError::ManagerStopped)?
            .ok_or(ConnectionError::NotConnected)?;

        tracing::debug!(
            "Sending {:?} to {} recipient(s)",
            truncate_str(body, 64),
            targets.len()
        );

        let mut results = Vec::with_capacity(targets.len());
        for target in targets {
            let number = format_phone_number(target, &self.settings.default_country_code);
            self.log(LogLevel::Info, format!("Sending message to {}", number));

            match client.send_text(&number, body).await {
                Ok(()) => {
                    self.log(
                        LogLevel::Info,
                        format!("Message sent successfully to {}", number),
                    );
                    results.push(SendResult::success(target.clone()));
                }
                Err(e) => {
                    self.log(
                        LogLevel::Error,
                        format!("Failed to send message to {}: {}", number, e),
                    );
                    results.push(SendResult::failure(target.clone(), e.to_string()));
                }
            }

            tokio::time::sleep(self.settings.message_delay).await;
        }
        Ok(results)
    }

    /// Tear down the client and stop the connection task. Teardown errors
    /// are logged, never returned.
    pub async fn destroy(&self) {
        let (reply, rx) = oneshot::channel();
        if self.request(Command::Destroy { reply }).is_ok() {
            let _ = rx.await;
        }
    }

    fn log(&self, level: LogLevel, message: String) {
        let _ = self.commands.send(Command::Log { level, message });
    }

    fn request(&self, command: Command) -> Result<(), ConnectionError> {
        self.commands
            .send(command)
            .map_err(|_| ConnectionError::ManagerStopped)
    }
}

struct Actor {
    driver: Arc<dyn ChannelDriver>,
    settings: Arc<ConnectionSettings>,
    state: ConnectionState,
    client: Option<Arc<dyn ChannelClient>>,
    /// Bumped for every client created and on destroy
    generation: u64,
    commands: mpsc::UnboundedSender<Command>,
    signals: mpsc::UnboundedSender<ChannelSignal>,
    status: watch::Sender<StatusSnapshot>,
}

impl Actor {
    async fn run(
        mut self,
        mut commands: mpsc::UnboundedReceiver<Command>,
        mut signals: mpsc::UnboundedReceiver<ChannelSignal>,
    ) {
        loop {
            tokio::select! {
                biased;
                Some(command) = commands.recv() => {
                    if self.handle_command(command).await.is_break() {
                        break;
                    }
                }
                Some(signal) = signals.recv() => self.handle_signal(signal),
                else => break,
            }
            self.publish();
        }
        tracing::debug!("Connection manager stopped");
    }

    fn publish(&self) {
        self.status.send_replace(self.state.snapshot());
    }

    fn log(&mut self, level: LogLevel, message: &str) {
        match level {
            LogLevel::Info => tracing::info!("{}", message),
            LogLevel::Warn => tracing::warn!("{}", message),
            LogLevel::Error => tracing::error!("{}", message),
        }
        self.state.logs.push(message);
    }

    async fn handle_command(&mut self, command: Command) -> ControlFlow<()> {
        match command {
            Command::Initialize { trigger, reply } => {
                let outcome = self.initialize(trigger);
                if let Some(reply) = reply {
                    self.publish();
                    let _ = reply.send(outcome);
                }
            }
            Command::Reconnect { reply } => {
                let started = self.reconnect();
                self.publish();
                let _ = reply.send(started);
            }
            Command::ClientCreated { generation, client } => {
                if generation == self.generation {
                    self.client = Some(client);
                } else {
                    tracing::debug!("Discarding client from retired generation {}", generation);
                    tokio::spawn(async move {
                        if let Err(e) = client.destroy().await {
                            tracing::warn!("Failed to tear down retired client: {}", e);
                        }
                    });
                }
            }
            Command::InitSettled { generation, result } => {
                self.on_init_settled(generation, result);
            }
            Command::InitTimeout { generation } => {
                if generation == self.generation && self.state.is_initializing() {
                    let message = format!(
                        "Initialization timed out after {}s, clearing initializing flag",
                        self.settings.init_timeout.as_secs()
                    );
                    self.log(LogLevel::Warn, &message);
                    self.state.phase = Phase::Idle;
                }
            }
            Command::AcquireClient { reply } => {
                let client = if self.state.is_connected() {
                    self.client.clone()
                } else {
                    None
                };
                let _ = reply.send(client);
            }
            Command::Log { level, message } => self.log(level, &message),
            Command::Destroy { reply } => {
                self.destroy().await;
                self.publish();
                let _ = reply.send(());
                return ControlFlow::Break(());
            }
        }
        ControlFlow::Continue(())
    }

    fn initialize(&mut self, trigger: Trigger) -> InitOutcome {
        if self.state.is_initializing() {
            self.log(LogLevel::Warn, "Initialization already in progress, skipping");
            return InitOutcome::AlreadyInitializing;
        }
        if self.state.is_connected() {
            self.log(LogLevel::Warn, "Client already connected, skipping initialization");
            return InitOutcome::AlreadyConnected;
        }

        self.generation += 1;
        let generation = self.generation;
        self.state.phase = Phase::Initializing;
        let message = match trigger {
            Trigger::Request => format!("Initializing {} client...", self.driver.name()),
            Trigger::AutoRetry => format!("Reconnecting {} client...", self.driver.name()),
        };
        self.log(LogLevel::Info, &message);

        let previous = self.client.take();
        let driver = self.driver.clone();
        let commands = self.commands.clone();
        let sink = EventSink::new(generation, self.signals.clone());
        tokio::spawn(async move {
            if let Some(previous) = previous
                && let Err(e) = previous.destroy().await
            {
                let _ = commands.send(Command::Log {
                    level: LogLevel::Warn,
                    message: format!("Failed to tear down previous client: {}", e),
                });
            }

            let result = match driver.create_client(sink).await {
                Ok(client) => {
                    let _ = commands.send(Command::ClientCreated {
                        generation,
                        client: client.clone(),
                    });
                    client.start().await
                }
                Err(e) => Err(e),
            };
            let _ = commands.send(Command::InitSettled { generation, result });
        });

        let commands = self.commands.clone();
        let timeout = self.settings.init_timeout;
        tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            let _ = commands.send(Command::InitTimeout { generation });
        });

        InitOutcome::Started
    }

    fn reconnect(&mut self) -> bool {
        if self.state.is_initializing() {
            self.log(
                LogLevel::Warn,
                "Reconnect skipped: initialization already in progress",
            );
            return false;
        }

        self.log(LogLevel::Info, "Manual reconnect requested");
        self.state.reconnect_attempts = 0;
        self.state.qr = None;
        self.state.phase = Phase::Idle;
        self.initialize(Trigger::Request);
        true
    }

    fn on_init_settled(&mut self, generation: u64, result: Result<(), ChannelError>) {
        if generation != self.generation {
            return;
        }
        match result {
            Ok(()) => tracing::debug!("Client {} connection sequence running", generation),
            Err(e) => {
                self.log(LogLevel::Error, &format!("Failed to initialize client: {}", e));
                if self.state.is_initializing() {
                    self.state.phase = Phase::Idle;
                }
                if let Some(client) = self.client.take() {
                    tokio::spawn(async move {
                        if let Err(e) = client.destroy().await {
                            tracing::warn!("Failed to tear down client after init error: {}", e);
                        }
                    });
                }
            }
        }
    }

    fn handle_signal(&mut self, signal: ChannelSignal) {
        if signal.generation != self.generation {
            tracing::debug!(
                "Ignoring {:?} from retired client {}",
                signal.event,
                signal.generation
            );
            return;
        }

        match signal.event {
            ChannelEvent::PairingCode(code) => match pairing::render_data_url(&code) {
                Ok(url) => {
                    if let Some(art) = pairing::render_terminal(&code) {
                        tracing::info!("Scan this QR code with WhatsApp:\n{}", art);
                    }
                    self.state.qr = Some(url);
                    self.state.phase = Phase::AwaitingPairing;
                    self.log(
                        LogLevel::Info,
                        "QR code received, scan it with WhatsApp on your phone",
                    );
                }
                Err(e) => {
                    // The channel is still waiting for a scan either way.
                    self.state.qr = None;
                    self.state.phase = Phase::AwaitingPairing;
                    self.log(LogLevel::Error, &format!("Failed to render QR code: {}", e));
                }
            },
            ChannelEvent::Ready => {
                self.state.phase = Phase::Connected;
                self.state.qr = None;
                self.state.reconnect_attempts = 0;
                self.log(LogLevel::Info, "WhatsApp client is ready");
            }
            ChannelEvent::Authenticated => {
                self.log(LogLevel::Info, "WhatsApp client authenticated");
            }
            ChannelEvent::AuthFailure(reason) => {
                self.state.phase = Phase::Idle;
                self.log(LogLevel::Error, &format!("Authentication failed: {}", reason));
            }
            ChannelEvent::Disconnected(reason) => {
                self.log(
                    LogLevel::Warn,
                    &format!("WhatsApp client disconnected: {}", reason),
                );
                self.on_disconnected();
            }
            ChannelEvent::LoadingProgress { percent, label } => {
                self.log(LogLevel::Info, &format!("Loading: {}% {}", percent, label));
            }
        }
    }

    fn on_disconnected(&mut self) {
        self.state.phase = Phase::Disconnected;
        let max = self.settings.max_reconnect_attempts;

        if self.state.reconnect_attempts < max {
            self.state.reconnect_attempts += 1;
            let message = format!(
                "Attempting to reconnect ({}/{})...",
                self.state.reconnect_attempts, max
            );
            self.log(LogLevel::Info, &message);

            let commands = self.commands.clone();
            let delay = self.settings.reconnect_delay;
            tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                let _ = commands.send(Command::Initialize {
                    trigger: Trigger::AutoRetry,
                    reply: None,
                });
            });
        } else {
            self.state.phase = Phase::Failed;
            let message = format!(
                "Max reconnection attempts ({}) reached. Request a reconnect to try again.",
                max
            );
            self.log(LogLevel::Error, &message);
        }
    }

    async fn destroy(&mut self) {
        self.generation += 1;
        if let Some(client) = self.client.take() {
            match client.destroy().await {
                Ok(()) => self.log(LogLevel::Info, "WhatsApp client destroyed"),
                Err(e) => self.log(LogLevel::Warn, &format!("Error destroying client: {}", e)),
            }
        }
        self.state.phase = Phase::Idle;
        self.state.qr = None;
    }
}
