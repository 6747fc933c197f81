//! Live state broadcaster: one shared upstream connection, raw event fan-out to
//! local callbacks, and interpreted game-state updates for a separate set of
//! subscribers.
//!
//! Callbacks run synchronously on the connection task that received the frame,
//! after the registry lock has been released, so a callback may subscribe or
//! unsubscribe without deadlocking.

use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Duration;

use serde_json::Value;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::TransportConfig;
use crate::models::event::{names, Envelope, ServerEvent};
use crate::models::game_state::GameStateUpdate;
use crate::transport::{Connector, Transport};

/// Callback for a raw named event; receives the event payload.
pub type EventCallback = Arc<dyn Fn(&Value) + Send + Sync>;

/// Callback for interpreted game-state updates.
pub type GameStateCallback = Arc<dyn Fn(&GameStateUpdate) + Send + Sync>;

const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(1);

/// Handle to the shared upstream connection.
#[derive(Clone)]
pub struct Connection {
    inner: Arc<ConnectionInner>,
}

struct ConnectionInner {
    outbound: mpsc::UnboundedSender<Envelope>,
    status: watch::Receiver<bool>,
}

impl Connection {
    /// Whether a transport is currently open. False while reconnecting and
    /// once the connection loop has ended for any reason.
    pub fn is_connected(&self) -> bool {
        let status = &self.inner.status;
        status.has_changed().is_ok() && *status.borrow()
    }

    /// Wait until the transport is open. Returns false if the connection loop has ended.
    pub async fn wait_connected(&self) -> bool {
        let mut status = self.inner.status.clone();
        let connected = status.wait_for(|connected| *connected).await.is_ok();
        connected
    }

    /// Queue a message upstream. Messages queued while reconnecting go out after the next connect.
    pub fn emit(&self, event: &str, data: Option<Value>) {
        let envelope = Envelope::new(event, data.unwrap_or(Value::Null));
        if self.inner.outbound.send(envelope).is_err() {
            debug!(event = %event, "connection loop ended, dropping emit");
        }
    }

    pub fn ptr_eq(a: &Connection, b: &Connection) -> bool {
        Arc::ptr_eq(&a.inner, &b.inner)
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("connected", &self.is_connected())
            .finish()
    }
}

/// Raw event callbacks (duplicates allowed) and game-state callbacks (a set).
#[derive(Default)]
struct Registry {
    events: RwLock<HashMap<String, Vec<EventCallback>>>,
    game_state: RwLock<Vec<GameStateCallback>>,
}

impl Registry {
    fn dispatch_event(&self, event: &str, data: &Value) {
        let callbacks: Vec<EventCallback> = self
            .events
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(event)
            .cloned()
            .unwrap_or_default();
        for callback in &callbacks {
            if catch_unwind(AssertUnwindSafe(|| callback(data))).is_err() {
                error!(event = %event, "event callback panicked");
            }
        }
    }

    fn dispatch_game_state(&self, update: &GameStateUpdate) {
        let callbacks: Vec<GameStateCallback> = self
            .game_state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        for callback in &callbacks {
            if catch_unwind(AssertUnwindSafe(|| callback(update))).is_err() {
                error!(?update, "game-state callback panicked");
            }
        }
    }

    /// Fan out one incoming frame: raw passthrough first, then the interpreted update.
    fn handle_frame(&self, text: &str) {
        let envelope: Envelope = match serde_json::from_str(text) {
            Ok(envelope) => envelope,
            Err(e) => {
                warn!(error = %e, "dropping malformed frame");
                return;
            }
        };
        self.dispatch_event(&envelope.event, &envelope.data);

        match ServerEvent::decode(&envelope) {
            Ok(Some(event)) => self.dispatch_game_state(&GameStateUpdate::from(event)),
            Ok(None) => {}
            Err(e) => warn!(event = %envelope.event, error = %e, "ignoring malformed payload"),
        }
    }
}

struct ActiveConnection {
    handle: Connection,
    shutdown: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<()>>,
}

struct Shared {
    connector: Arc<dyn Connector>,
    config: TransportConfig,
    registry: Arc<Registry>,
    active: Mutex<Option<ActiveConnection>>,
}

impl Drop for Shared {
    fn drop(&mut self) {
        let active = self.active.get_mut().unwrap_or_else(PoisonError::into_inner);
        if let Some(task) = active.as_mut().and_then(|a| a.task.take()) {
            task.abort();
        }
    }
}

/// Owns the single upstream connection and the local subscriber registries.
///
/// Constructed explicitly by the composition root; cloning shares the same
/// connection and registries.
#[derive(Clone)]
pub struct LiveState {
    shared: Arc<Shared>,
}

impl LiveState {
    pub fn new(connector: Arc<dyn Connector>, config: TransportConfig) -> Self {
        Self {
            shared: Arc::new(Shared {
                connector,
                config,
                registry: Arc::new(Registry::default()),
                active: Mutex::new(None),
            }),
        }
    }

    /// Start the connection loop on first call; later calls return the same handle.
    /// Must be called from within a tokio runtime.
    pub fn open(&self) -> Connection {
        let mut active = self
            .shared
            .active
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if let Some(existing) = active.as_ref() {
            return existing.handle.clone();
        }

        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let (status_tx, status_rx) = watch::channel(false);
        let (shutdown_tx, shutdown_rx) = oneshot::channel();

        let handle = Connection {
            inner: Arc::new(ConnectionInner {
                outbound: outbound_tx,
                status: status_rx,
            }),
        };

        let task = tokio::spawn(run_connection(
            Arc::clone(&self.shared.connector),
            self.shared.config.clone(),
            Arc::clone(&self.shared.registry),
            outbound_rx,
            status_tx,
            shutdown_rx,
        ));

        *active = Some(ActiveConnection {
            handle: handle.clone(),
            shutdown: Some(shutdown_tx),
            task: Some(task),
        });
        info!(url = %self.shared.config.url, "live state connection opened");
        handle
    }

    /// Stop the connection loop and close the transport. Idempotent.
    pub async fn close(&self) {
        let taken = self
            .shared
            .active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let Some(mut active) = taken else {
            return;
        };

        if let Some(tx) = active.shutdown.take() {
            let _ = tx.send(());
        }
        if let Some(mut task) = active.task.take() {
            match tokio::time::timeout(SHUTDOWN_TIMEOUT, &mut task).await {
                Ok(Ok(())) => {}
                Ok(Err(join_err)) => warn!("connection loop terminated with join error: {join_err}"),
                Err(_) => {
                    warn!("connection loop did not exit within timeout; aborting task");
                    task.abort();
                }
            }
        }
        info!("live state connection closed");
    }

    /// The current connection handle, if `open` has been called.
    pub fn connection(&self) -> Option<Connection> {
        self.shared
            .active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .map(|a| a.handle.clone())
    }

    /// Send a message upstream. No-op when the connection has not been opened.
    pub fn emit(&self, event: &str, data: Option<Value>) {
        match self.connection() {
            Some(conn) => conn.emit(event, data),
            None => debug!(event = %event, "no connection, emit ignored"),
        }
    }

    /// Register a callback for a named event. Registering the same callback twice
    /// makes it fire twice.
    pub fn subscribe(&self, event: &str, callback: EventCallback) {
        self.shared
            .registry
            .events
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(event.to_string())
            .or_default()
            .push(callback);
    }

    /// Remove one registration of `callback` for `event`.
    pub fn unsubscribe(&self, event: &str, callback: &EventCallback) {
        let mut events = self
            .shared
            .registry
            .events
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        if let Some(callbacks) = events.get_mut(event) {
            if let Some(pos) = callbacks.iter().position(|c| Arc::ptr_eq(c, callback)) {
                callbacks.remove(pos);
            }
            if callbacks.is_empty() {
                events.remove(event);
            }
        }
    }

    /// Add a game-state callback. Adding the same callback again has no effect.
    pub fn subscribe_to_game_state(&self, callback: GameStateCallback) {
        let mut subs = self
            .shared
            .registry
            .game_state
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        if !subs.iter().any(|c| Arc::ptr_eq(c, &callback)) {
            subs.push(callback);
        }
    }

    pub fn unsubscribe_from_game_state(&self, callback: &GameStateCallback) {
        self.shared
            .registry
            .game_state
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .retain(|c| !Arc::ptr_eq(c, callback));
    }

    /// Number of raw callbacks registered for `event`.
    pub fn subscriber_count(&self, event: &str) -> usize {
        self.shared
            .registry
            .events
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(event)
            .map_or(0, |c| c.len())
    }

    pub fn game_state_subscriber_count(&self) -> usize {
        self.shared
            .registry
            .game_state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_connected(&self) -> bool {
        self.connection().is_some_and(|c| c.is_connected())
    }
}

enum SessionEnd {
    Shutdown,
    Dropped(String),
}

/// Connect, run a session until it drops, then retry after a fixed delay.
/// Gives up after `reconnect_attempts` consecutive failed retries; the count
/// resets on every successful connect.
async fn run_connection(
    connector: Arc<dyn Connector>,
    config: TransportConfig,
    registry: Arc<Registry>,
    mut outbound_rx: mpsc::UnboundedReceiver<Envelope>,
    status_tx: watch::Sender<bool>,
    mut shutdown_rx: oneshot::Receiver<()>,
) {
    let mut failures: u32 = 0;

    loop {
        let attempt = tokio::select! {
            res = connector.connect() => res,
            _ = &mut shutdown_rx => break,
        };

        match attempt {
            Ok(mut transport) => {
                failures = 0;
                let connection_id = Uuid::new_v4();
                info!(%connection_id, url = %config.url, "connected");
                status_tx.send_replace(true);
                registry.dispatch_event(names::CONNECT, &Value::Null);

                let end = run_session(
                    transport.as_mut(),
                    &registry,
                    &mut outbound_rx,
                    &mut shutdown_rx,
                )
                .await;
                status_tx.send_replace(false);

                match end {
                    SessionEnd::Shutdown => {
                        if let Err(e) = transport.close().await {
                            debug!(%connection_id, error = %e, "close failed");
                        }
                        registry.dispatch_event(
                            names::DISCONNECT,
                            &Value::String("client shut down".to_string()),
                        );
                        info!(%connection_id, "disconnected by client");
                        break;
                    }
                    SessionEnd::Dropped(reason) => {
                        warn!(%connection_id, reason = %reason, "connection lost");
                        registry.dispatch_event(names::DISCONNECT, &Value::String(reason));
                    }
                }
            }
            Err(e) => {
                failures += 1;
                warn!(
                    attempt = failures,
                    max_attempts = config.reconnect_attempts,
                    error = %e,
                    "connect failed"
                );
                if failures > config.reconnect_attempts {
                    error!(url = %config.url, "reconnection attempts exhausted, giving up");
                    break;
                }
            }
        }

        tokio::select! {
            _ = tokio::time::sleep(config.reconnect_delay) => {}
            _ = &mut shutdown_rx => break,
        }
    }

    status_tx.send_replace(false);
    debug!("connection loop exited");
}

async fn run_session(
    transport: &mut dyn Transport,
    registry: &Registry,
    outbound_rx: &mut mpsc::UnboundedReceiver<Envelope>,
    shutdown_rx: &mut oneshot::Receiver<()>,
) -> SessionEnd {
    if let Err(e) = send_envelope(transport, &Envelope::signal(names::REQUEST_GAME_STATE)).await {
        return SessionEnd::Dropped(format!("send failed: {}", e));
    }

    loop {
        tokio::select! {
            _ = &mut *shutdown_rx => return SessionEnd::Shutdown,

            outgoing = outbound_rx.recv() => match outgoing {
                Some(envelope) => {
                    if let Err(e) = send_envelope(transport, &envelope).await {
                        return SessionEnd::Dropped(format!("send failed: {}", e));
                    }
                }
                None => return SessionEnd::Shutdown,
            },

            incoming = transport.recv() => match incoming {
                Some(Ok(text)) => registry.handle_frame(&text),
                Some(Err(e)) => return SessionEnd::Dropped(format!("receive failed: {}", e)),
                None => return SessionEnd::Dropped("closed by server".to_string()),
            },
        }
    }
}

async fn send_envelope(transport: &mut dyn Transport, envelope: &Envelope) -> crate::error::AppResult<()> {
    let text = serde_json::to_string(envelope)?;
    debug!(event = %envelope.event, "sending");
    transport.send(text).await
}
