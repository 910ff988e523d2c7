//! Async broker client with automatic reconnection.
//!
//! [`BrokerClient`] is a thin handle that communicates with a background
//! transport loop task via an unbounded MPSC channel. Connection lifecycle
//! events are emitted on a bounded channel
//! ([`tokio::sync::mpsc::Receiver<ConnectionEvent>`]) returned from
//! [`BrokerClient::start`].
//!
//! Subscriptions and publishes issued before the broker connection is up are
//! not errors: subscription intent is recorded immediately and replayed on
//! every (re)connect, and publishes queue FIFO and flush right after the
//! replay, before [`ConnectionEvent::Connected`] is emitted. A lost
//! connection is retried forever (every [`BrokerConfig::reconnect_delay`])
//! until [`BrokerClient::shutdown`] is called.
//!
//! # Example
//!
//! ```rust,ignore
//! let connector = WsConnector::new("wss://game.example/ws");
//! let (client, mut events) = BrokerClient::start(connector, BrokerConfig::new());
//!
//! client.subscribe(topics::GAME_STATE_UPDATES, |payload| {
//!     println!("phase push: {payload}");
//! })?;
//!
//! while let Some(event) = events.recv().await {
//!     match event {
//!         ConnectionEvent::Connected => { /* … */ }
//!         ConnectionEvent::Disconnected { .. } => { /* reconnecting */ }
//!         ConnectionEvent::ConnectFailed { .. } => { /* … */ }
//!     }
//! }
//! ```

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use serde::Serialize;
use serde_json::Value;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::error::{Result, SyncError};
use crate::mux::{Multiplexer, Observer, SubscriptionToken};
use crate::transport::{Connector, Transport};

/// Default capacity of the bounded connection-event channel.
const DEFAULT_EVENT_CHANNEL_CAPACITY: usize = 64;

/// Default delay between reconnection attempts.
const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_secs(5);

/// Default timeout for the graceful shutdown.
const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(1);

// ── Configuration ───────────────────────────────────────────────────

/// Configuration for a [`BrokerClient`].
///
/// All fields have defaults; construct with [`BrokerConfig::new`] and tune
/// with the `with_*` methods.
///
/// ```
/// use std::time::Duration;
/// use treasure_hunt_client::client::BrokerConfig;
///
/// let config = BrokerConfig::new()
///     .with_reconnect_delay(Duration::from_secs(2))
///     .with_event_channel_capacity(128);
/// ```
#[derive(Debug, Clone)]
pub struct BrokerConfig {
    /// Delay between a lost (or failed) connection and the next attempt.
    /// The first attempt is immediate. Defaults to **5 seconds**.
    pub reconnect_delay: Duration,
    /// Capacity of the bounded connection-event channel.
    ///
    /// `Connected` and `ConnectFailed` are dropped (with a warning logged)
    /// when the consumer cannot keep up; `Disconnected` is always delivered.
    ///
    /// Defaults to **64**. Values below 1 are clamped to 1.
    pub event_channel_capacity: usize,
    /// Timeout for the graceful shutdown.
    ///
    /// When [`BrokerClient::shutdown`] is called, the background loop is
    /// given this much time to close the transport and emit a final
    /// `Disconnected` event. If the timeout expires the task is aborted.
    ///
    /// Defaults to **1 second**.
    pub shutdown_timeout: Duration,
}

impl BrokerConfig {
    /// Create a configuration with default values.
    pub fn new() -> Self {
        Self {
            reconnect_delay: DEFAULT_RECONNECT_DELAY,
            event_channel_capacity: DEFAULT_EVENT_CHANNEL_CAPACITY,
            shutdown_timeout: DEFAULT_SHUTDOWN_TIMEOUT,
        }
    }

    /// Set the delay between reconnection attempts.
    #[must_use]
    pub fn with_reconnect_delay(mut self, delay: Duration) -> Self {
        self.reconnect_delay = delay;
        self
    }

    /// Set the capacity of the bounded connection-event channel.
    #[must_use]
    pub fn with_event_channel_capacity(mut self, capacity: usize) -> Self {
        self.event_channel_capacity = capacity;
        self
    }

    /// Set the graceful shutdown timeout.
    #[must_use]
    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self::new()
    }
}

// ── Events and commands ─────────────────────────────────────────────

/// Connection lifecycle notifications emitted by the background loop.
///
/// `Connected` is emitted only after subscription replay and the pending
/// publish queue have been flushed, so observers never see a connection
/// that is missing their subscriptions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionEvent {
    /// The broker session is up and all subscriptions are in place.
    Connected,
    /// A connection attempt failed; the client retries after the
    /// reconnect delay.
    ConnectFailed {
        /// Human-readable failure description.
        reason: String,
    },
    /// An established session ended. `None` means a clean close (server
    /// close or client shutdown).
    Disconnected {
        /// Transport error text, if the session ended abnormally.
        reason: Option<String>,
    },
}

enum Command {
    Subscribe {
        topic: String,
        token: SubscriptionToken,
        observer: Observer,
    },
    RemoveObserver {
        token: SubscriptionToken,
    },
    Unsubscribe {
        topic: String,
    },
    Publish {
        topic: String,
        payload: String,
    },
}

// ── Handle ──────────────────────────────────────────────────────────

/// Handle to the background broker loop.
///
/// All methods except [`shutdown`](BrokerClient::shutdown) are synchronous
/// and non-blocking; they enqueue work for the loop. They only fail with
/// [`SyncError::NotConnected`] once the loop has terminated (after
/// shutdown), never merely because the broker is temporarily unreachable.
///
/// Dropping the handle aborts the background task.
pub struct BrokerClient {
    cmd_tx: mpsc::UnboundedSender<Command>,
    shutdown_tx: Mutex<Option<oneshot::Sender<()>>>,
    task: Mutex<Option<JoinHandle<()>>>,
    connected: Arc<AtomicBool>,
    shutdown_timeout: Duration,
}

fn lock_unpoisoned<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

impl BrokerClient {
    /// Spawn the background loop and return the handle plus the
    /// connection-event receiver.
    ///
    /// The first connection attempt starts immediately.
    pub fn start(
        connector: impl Connector,
        config: BrokerConfig,
    ) -> (Self, mpsc::Receiver<ConnectionEvent>) {
        let capacity = config.event_channel_capacity.max(1);
        let (event_tx, event_rx) = mpsc::channel(capacity);
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let connected = Arc::new(AtomicBool::new(false));

        let mut broker_loop = BrokerLoop {
            connector: Box::new(connector),
            mux: Multiplexer::new(),
            pending: VecDeque::new(),
            cmd_rx,
            event_tx,
            connected: Arc::clone(&connected),
            reconnect_delay: config.reconnect_delay,
        };
        let task = tokio::spawn(async move { broker_loop.run(shutdown_rx).await });

        let client = Self {
            cmd_tx,
            shutdown_tx: Mutex::new(Some(shutdown_tx)),
            task: Mutex::new(Some(task)),
            connected,
            shutdown_timeout: config.shutdown_timeout,
        };
        (client, event_rx)
    }

    /// Register `observer` for payloads published on `topic`.
    ///
    /// The first observer for a topic triggers a broker subscription (sent
    /// immediately when connected, otherwise on the next connect). Further
    /// observers share that single subscription and are called in
    /// registration order.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::NotConnected`] if the client has shut down.
    pub fn subscribe(
        &self,
        topic: impl Into<String>,
        observer: impl FnMut(&Value) + Send + Sync + 'static,
    ) -> Result<SubscriptionToken> {
        let token = SubscriptionToken::new();
        self.send(Command::Subscribe {
            topic: topic.into(),
            token,
            observer: Box::new(observer),
        })?;
        Ok(token)
    }

    /// Remove one observer. The topic's broker subscription stays open even
    /// when this was its last observer; use
    /// [`unsubscribe`](BrokerClient::unsubscribe) to tear it down.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::NotConnected`] if the client has shut down.
    pub fn remove_observer(&self, token: SubscriptionToken) -> Result<()> {
        self.send(Command::RemoveObserver { token })
    }

    /// Drop every observer for `topic` and close its broker subscription.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::NotConnected`] if the client has shut down.
    pub fn unsubscribe(&self, topic: impl Into<String>) -> Result<()> {
        self.send(Command::Unsubscribe {
            topic: topic.into(),
        })
    }

    /// Publish a payload to a broker destination.
    ///
    /// While disconnected the publish queues and is flushed, in order, on
    /// the next successful connect.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::Serialization`] if the payload cannot be
    /// serialized, or [`SyncError::NotConnected`] if the client has shut
    /// down.
    pub fn publish<T: Serialize + ?Sized>(
        &self,
        topic: impl Into<String>,
        payload: &T,
    ) -> Result<()> {
        let payload = serde_json::to_string(payload)?;
        self.send(Command::Publish {
            topic: topic.into(),
            payload,
        })
    }

    /// Whether the background loop is still running. `false` only after
    /// shutdown, not during reconnection.
    pub fn is_running(&self) -> bool {
        !self.cmd_tx.is_closed()
    }

    /// Whether a broker session is currently established.
    ///
    /// `false` while the loop is waiting to reconnect and after shutdown.
    /// The flag flips to `true` together with [`ConnectionEvent::Connected`]
    /// (after subscription replay and queue flush) and back to `false` with
    /// every [`ConnectionEvent::Disconnected`].
    pub fn is_connected(&self) -> bool {
        self.is_running() && self.connected.load(Ordering::Relaxed)
    }

    /// Stop the background loop, closing the transport gracefully.
    ///
    /// A final [`ConnectionEvent::Disconnected`] is emitted before the loop
    /// exits. Safe to call more than once; later calls are no-ops.
    ///
    /// # Errors
    ///
    /// Currently infallible; the `Result` reserves room for close-handshake
    /// reporting.
    pub async fn shutdown(&self) -> Result<()> {
        let shutdown_tx = lock_unpoisoned(&self.shutdown_tx).take();
        let task = lock_unpoisoned(&self.task).take();

        if let Some(tx) = shutdown_tx {
            let _ = tx.send(());
        }
        if let Some(mut task) = task {
            if tokio::time::timeout(self.shutdown_timeout, &mut task)
                .await
                .is_err()
            {
                warn!("graceful shutdown timed out, aborting broker loop");
                task.abort();
            }
        }
        Ok(())
    }

    fn send(&self, cmd: Command) -> Result<()> {
        self.cmd_tx.send(cmd).map_err(|_| SyncError::NotConnected)
    }
}

impl Drop for BrokerClient {
    fn drop(&mut self) {
        if let Some(task) = lock_unpoisoned(&self.task).take() {
            task.abort();
        }
    }
}

// ── Background loop ─────────────────────────────────────────────────

enum LoopExit {
    Shutdown,
    ConnectionLost { reason: Option<String> },
}

struct PendingPublish {
    topic: String,
    payload: String,
}

struct BrokerLoop {
    connector: Box<dyn Connector>,
    mux: Multiplexer,
    pending: VecDeque<PendingPublish>,
    cmd_rx: mpsc::UnboundedReceiver<Command>,
    event_tx: mpsc::Sender<ConnectionEvent>,
    connected: Arc<AtomicBool>,
    reconnect_delay: Duration,
}

impl BrokerLoop {
    async fn run(&mut self, mut shutdown_rx: oneshot::Receiver<()>) {
        let mut first_attempt = true;
        loop {
            if !first_attempt && !self.wait_before_reconnect(&mut shutdown_rx).await {
                return;
            }
            first_attempt = false;

            let mut transport = match self.connector.connect().await {
                Ok(transport) => transport,
                Err(e) => {
                    debug!("broker connect failed: {e}");
                    self.emit(ConnectionEvent::ConnectFailed {
                        reason: e.to_string(),
                    });
                    continue;
                }
            };

            if let Err(e) = self.replay_and_flush(transport.as_mut()).await {
                warn!("connection lost before it became usable: {e}");
                let _ = transport.close().await;
                self.emit_disconnected(Some(e.to_string())).await;
                continue;
            }

            debug!("broker connected, subscriptions replayed and queue flushed");
            self.connected.store(true, Ordering::Relaxed);
            self.emit(ConnectionEvent::Connected);

            match self.drive(transport.as_mut(), &mut shutdown_rx).await {
                LoopExit::Shutdown => {
                    let _ = transport.close().await;
                    self.emit_disconnected(None).await;
                    return;
                }
                LoopExit::ConnectionLost { reason } => {
                    let _ = transport.close().await;
                    self.emit_disconnected(reason).await;
                }
            }
        }
    }

    /// Sleep out the reconnect delay while staying responsive to commands
    /// and shutdown. Returns `false` when the loop should exit.
    async fn wait_before_reconnect(&mut self, shutdown_rx: &mut oneshot::Receiver<()>) -> bool {
        let sleep = tokio::time::sleep(self.reconnect_delay);
        tokio::pin!(sleep);
        loop {
            tokio::select! {
                _ = &mut *shutdown_rx => return false,
                () = &mut sleep => return true,
                cmd = self.cmd_rx.recv() => match cmd {
                    Some(cmd) => self.apply_offline(cmd),
                    None => return false,
                },
            }
        }
    }

    /// Re-issue every recorded subscription, then flush the pending publish
    /// queue in FIFO order. Runs before `Connected` is emitted.
    async fn replay_and_flush(&mut self, transport: &mut dyn Transport) -> Result<()> {
        for topic in self.mux.topics() {
            transport.subscribe(topic).await?;
        }
        while let Some(op) = self.pending.pop_front() {
            if let Err(e) = transport.publish(&op.topic, op.payload.clone()).await {
                // Keep the operation for the next connection.
                self.pending.push_front(op);
                return Err(e);
            }
        }
        Ok(())
    }

    /// Serve an established session until shutdown or connection loss.
    async fn drive(
        &mut self,
        transport: &mut dyn Transport,
        shutdown_rx: &mut oneshot::Receiver<()>,
    ) -> LoopExit {
        loop {
            tokio::select! {
                _ = &mut *shutdown_rx => return LoopExit::Shutdown,
                cmd = self.cmd_rx.recv() => {
                    let Some(cmd) = cmd else { return LoopExit::Shutdown };
                    if let Err(e) = self.apply_online(cmd, transport).await {
                        return LoopExit::ConnectionLost {
                            reason: Some(e.to_string()),
                        };
                    }
                }
                inbound = transport.recv() => match inbound {
                    Some(Ok(message)) => self.mux.dispatch(&message),
                    Some(Err(e)) => return LoopExit::ConnectionLost {
                        reason: Some(e.to_string()),
                    },
                    None => return LoopExit::ConnectionLost { reason: None },
                },
            }
        }
    }

    /// Apply a command while no session is up. Publishes queue; everything
    /// else only touches local state and is replayed on connect.
    fn apply_offline(&mut self, cmd: Command) {
        match cmd {
            Command::Subscribe {
                topic,
                token,
                observer,
            } => {
                self.mux.add(&topic, token, observer);
            }
            Command::RemoveObserver { token } => {
                if !self.mux.remove(token) {
                    debug!("ignoring unknown subscription token");
                }
            }
            Command::Unsubscribe { topic } => {
                self.mux.unsubscribe(&topic);
            }
            Command::Publish { topic, payload } => {
                debug!(%topic, "queueing publish until broker connects");
                self.pending.push_back(PendingPublish { topic, payload });
            }
        }
    }

    /// Apply a command against the live session. A transport error means
    /// the connection is gone; a failed publish re-queues for the next one.
    async fn apply_online(&mut self, cmd: Command, transport: &mut dyn Transport) -> Result<()> {
        match cmd {
            Command::Subscribe {
                topic,
                token,
                observer,
            } => {
                if self.mux.add(&topic, token, observer) {
                    transport.subscribe(&topic).await?;
                }
            }
            Command::RemoveObserver { token } => {
                if !self.mux.remove(token) {
                    debug!("ignoring unknown subscription token");
                }
            }
            Command::Unsubscribe { topic } => {
                if self.mux.unsubscribe(&topic) {
                    transport.unsubscribe(&topic).await?;
                }
            }
            Command::Publish { topic, payload } => {
                if let Err(e) = transport.publish(&topic, payload.clone()).await {
                    self.pending.push_back(PendingPublish { topic, payload });
                    return Err(e);
                }
            }
        }
        Ok(())
    }

    /// Lossy emit for `Connected` / `ConnectFailed`.
    fn emit(&self, event: ConnectionEvent) {
        match self.event_tx.try_send(event) {
            Ok(()) => {}
            Err(TrySendError::Full(event)) => {
                warn!(?event, "event channel full, dropping connection event");
            }
            Err(TrySendError::Closed(_)) => {
                debug!("event channel closed, dropping connection event");
            }
        }
    }

    /// `Disconnected` is always delivered, waiting for channel capacity if
    /// necessary. Clears the connected flag before notifying.
    async fn emit_disconnected(&self, reason: Option<String>) {
        self.connected.store(false, Ordering::Relaxed);
        if self
            .event_tx
            .send(ConnectionEvent::Disconnected { reason })
            .await
            .is_err()
        {
            debug!("event channel closed, dropping disconnect notice");
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;

    #[test]
    fn config_defaults() {
        let config = BrokerConfig::new();
        assert_eq!(config.reconnect_delay, Duration::from_secs(5));
        assert_eq!(config.event_channel_capacity, 64);
        assert_eq!(config.shutdown_timeout, Duration::from_secs(1));
    }

    #[test]
    fn config_builders_override_defaults() {
        let config = BrokerConfig::new()
            .with_reconnect_delay(Duration::from_millis(10))
            .with_event_channel_capacity(2)
            .with_shutdown_timeout(Duration::from_millis(50));
        assert_eq!(config.reconnect_delay, Duration::from_millis(10));
        assert_eq!(config.event_channel_capacity, 2);
        assert_eq!(config.shutdown_timeout, Duration::from_millis(50));
    }
}
