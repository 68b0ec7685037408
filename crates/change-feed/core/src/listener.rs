//! # ChangeListener
//!
//! Holds one long-lived LISTEN connection, decodes every notification into a
//! [`ChangeEvent`] and fans it out to the handlers registered under `*`,
//! `<table>` and `<table>:<OPERATION>`.
//!
//! When the connection drops, the listener reconnects on its own with
//! full-jitter exponential backoff (see [`BackoffConfig`]). Registrations live
//! in the listener, not in the connection, so they survive reconnection.
//!
//! ```text
//!  connect() ──► Connecting ──► Connected ──(stream ends / error)──► Disconnected
//!                                   ▲                                     │
//!                                   │ success                             ▼
//!                                   └──────────── Reconnecting ◄── timer(delay)
//!                                                     │ failure: attempt += 1
//!                                                     └──► next timer, or GivingUp
//! ```

use futures::FutureExt;
use parking_lot::Mutex;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Weak};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use crate::config::ListenerConfig;
use crate::error::ListenerError;
use crate::event::{ChangeEvent, ChangeOperation};
use crate::health::ListenerHealth;
use crate::metrics::{ListenerStats, ListenerStatsSnapshot};
use crate::port::{ChannelMessage, NotificationConnection, NotificationConnector};
use crate::state::{ListenerSnapshot, ListenerState, ReconnectDecision};
use crate::subscription::{ChangeHandler, Subscription, SubscriptionKey, SubscriptionRegistry};

/// Callback invoked for every listener error.
pub type ErrorHandler = Arc<dyn Fn(&ListenerError) + Send + Sync>;

/// Change-notification listener.
///
/// Not `Clone`; wrap it in an `Arc` to share it.
pub struct ChangeListener<C: NotificationConnector> {
    inner: Arc<ListenerInner<C>>,
}

struct ListenerInner<C: NotificationConnector> {
    connector: C,
    config: ListenerConfig,
    stats: ListenerStats,
    core: Mutex<ListenerCore>,
    /// Serialises `connect()` calls
    connect_lock: tokio::sync::Mutex<()>,
}

#[derive(Default)]
struct ListenerCore {
    state: ListenerState,
    registry: SubscriptionRegistry,
    error_handlers: Vec<(u64, ErrorHandler)>,
    next_error_handler_id: u64,
    pump: Option<PumpHandle>,
    reconnect_timer: Option<JoinHandle<()>>,
    /// Bumped for every installed connection; stale pumps compare against it
    generation: u64,
    last_error: Option<String>,
}

struct PumpHandle {
    shutdown: CancellationToken,
    task: JoinHandle<()>,
}

impl<C: NotificationConnector> ChangeListener<C> {
    /// Create a listener; nothing connects until [`connect`](Self::connect).
    pub fn new(connector: C, config: ListenerConfig) -> Self {
        Self {
            inner: Arc::new(ListenerInner {
                connector,
                config,
                stats: ListenerStats::new(),
                core: Mutex::new(ListenerCore::default()),
                connect_lock: tokio::sync::Mutex::new(()),
            }),
        }
    }

    /// Configuration the listener was built with.
    pub fn config(&self) -> &ListenerConfig {
        &self.inner.config
    }

    /// Open the connection and start receiving.
    ///
    /// Returns immediately when already connected or reconnecting. A failure
    /// here is returned to the caller and does not start the reconnect loop.
    pub async fn connect(&self) -> Result<(), ListenerError> {
        let inner = &self.inner;
        let _guard = inner.connect_lock.lock().await;

        {
            let mut core = inner.core.lock();
            if core.state.is_connected() || core.state.is_reconnecting() {
                debug!(phase = %core.state.phase(), "Change listener already active");
                return Ok(());
            }
            if let Some(timer) = core.reconnect_timer.take() {
                timer.abort();
            }
            core.state.begin_connect();
        }

        info!(channel = %inner.config.channel, "Connecting change listener");

        match inner.open().await {
            Ok(connection) => match inner.install(connection) {
                Ok(()) => {
                    info!(channel = %inner.config.channel, "Change listener connected");
                    Ok(())
                }
                Err(connection) => {
                    close_quietly(connection, &inner.config.channel).await;
                    Err(ListenerError::connection(
                        "listener was disconnected while connecting",
                    ))
                }
            },
            Err(e) => {
                inner.core.lock().state.connect_failed();
                error!(channel = %inner.config.channel, error = %e, "Change listener failed to connect");
                Err(e)
            }
        }
    }

    /// Stop listening for good.
    ///
    /// Cancels any pending reconnect, unlistens and closes the connection,
    /// and drops every registered change and error handler.
    pub async fn disconnect(&self) {
        let inner = &self.inner;
        let (timer, pump) = {
            let mut core = inner.core.lock();
            core.state.mark_disconnected();
            core.registry.clear();
            core.error_handlers.clear();
            (core.reconnect_timer.take(), core.pump.take())
        };

        if let Some(timer) = timer {
            timer.abort();
        }

        if let Some(pump) = pump {
            pump.shutdown.cancel();
            if tokio::time::timeout(inner.config.shutdown_timeout(), pump.task)
                .await
                .is_err()
            {
                warn!(
                    timeout_ms = inner.config.shutdown_timeout_ms,
                    "Change listener connection did not close in time"
                );
            }
        }

        info!(channel = %inner.config.channel, "Change listener disconnected");
    }

    /// Register `handler` for every change.
    pub fn on_change(&self, handler: Arc<dyn ChangeHandler>) -> Subscription {
        self.subscribe(SubscriptionKey::All, handler)
    }

    /// Register `handler` for every change on `table`.
    pub fn on_table(&self, table: impl Into<String>, handler: Arc<dyn ChangeHandler>) -> Subscription {
        self.subscribe(SubscriptionKey::Table(table.into()), handler)
    }

    /// Register `handler` for one operation on `table`.
    pub fn on_operation(
        &self,
        table: impl Into<String>,
        operation: ChangeOperation,
        handler: Arc<dyn ChangeHandler>,
    ) -> Subscription {
        self.subscribe(SubscriptionKey::TableOperation(table.into(), operation), handler)
    }

    /// Register `handler` under an already-parsed key.
    pub fn subscribe(&self, key: SubscriptionKey, handler: Arc<dyn ChangeHandler>) -> Subscription {
        let id = self.inner.core.lock().registry.insert(key.clone(), handler);
        debug!(key = %key, "Change handler registered");

        let weak = Arc::downgrade(&self.inner);
        Subscription::new(move || {
            if let Some(inner) = weak.upgrade() {
                inner.core.lock().registry.remove(&key, id);
                debug!(key = %key, "Change handler removed");
            }
        })
    }

    /// Register a callback for connection, decode and handler errors.
    pub fn on_error<F>(&self, handler: F) -> Subscription
    where
        F: Fn(&ListenerError) + Send + Sync + 'static,
    {
        let id = {
            let mut core = self.inner.core.lock();
            core.next_error_handler_id += 1;
            let id = core.next_error_handler_id;
            core.error_handlers.push((id, Arc::new(handler)));
            id
        };

        let weak: Weak<ListenerInner<C>> = Arc::downgrade(&self.inner);
        Subscription::new(move || {
            if let Some(inner) = weak.upgrade() {
                inner.core.lock().error_handlers.retain(|(h, _)| *h != id);
            }
        })
    }

    /// Whether a connection is live and listening.
    pub fn is_connected(&self) -> bool {
        self.inner.core.lock().state.is_connected()
    }

    /// Whether a reconnection attempt is scheduled or in flight.
    pub fn is_reconnecting(&self) -> bool {
        self.inner.core.lock().state.is_reconnecting()
    }

    /// Failed reconnection attempts since the last successful connection.
    pub fn consecutive_failures(&self) -> u32 {
        self.inner.core.lock().state.reconnect_attempt()
    }

    /// Point-in-time view of the connection state.
    pub fn snapshot(&self) -> ListenerSnapshot {
        self.inner.core.lock().state.snapshot()
    }

    /// Health derived from the connection state and the last error.
    pub fn health(&self) -> ListenerHealth {
        let core = self.inner.core.lock();
        ListenerHealth::evaluate(
            &core.state.snapshot(),
            self.inner.config.unhealthy_after_failures,
            core.last_error.clone(),
        )
    }

    /// Counters since the listener was created.
    pub fn stats(&self) -> ListenerStatsSnapshot {
        self.inner.stats.snapshot()
    }
}

impl<C: NotificationConnector> Drop for ChangeListener<C> {
    fn drop(&mut self) {
        let mut core = self.inner.core.lock();
        core.state.mark_disconnected();
        if let Some(timer) = core.reconnect_timer.take() {
            timer.abort();
        }
        if let Some(pump) = core.pump.take() {
            pump.shutdown.cancel();
        }
    }
}

impl<C: NotificationConnector> std::fmt::Debug for ChangeListener<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let core = self.inner.core.lock();
        f.debug_struct("ChangeListener")
            .field("channel", &self.inner.config.channel)
            .field("state", &core.state)
            .field("registry", &core.registry)
            .field("error_handlers", &core.error_handlers.len())
            .finish()
    }
}

impl<C: NotificationConnector> ListenerInner<C> {
    /// Open a connection and LISTEN on the configured channel.
    async fn open(&self) -> Result<C::Connection, ListenerError> {
        let mut connection = self.connector.connect().await?;
        if let Err(e) = connection.listen(&self.config.channel).await {
            close_quietly(connection, &self.config.channel).await;
            return Err(e);
        }
        Ok(connection)
    }

    /// Make `connection` the live one. Hands it back if the listener was
    /// disconnected in the meantime.
    fn install(self: &Arc<Self>, connection: C::Connection) -> Result<(), C::Connection> {
        let mut core = self.core.lock();
        if core.state.intentional_disconnect() {
            return Err(connection);
        }

        core.state.mark_connected();
        core.generation += 1;
        let pump = self.spawn_pump(connection, core.generation);
        core.reconnect_timer = None;
        if let Some(stale) = core.pump.replace(pump) {
            stale.shutdown.cancel();
        }
        Ok(())
    }

    fn spawn_pump(self: &Arc<Self>, mut connection: C::Connection, generation: u64) -> PumpHandle {
        let shutdown = CancellationToken::new();
        let cancelled = shutdown.clone();
        let weak = Arc::downgrade(self);
        let channel = self.config.channel.clone();

        let task = tokio::spawn(async move {
            loop {
                let received = tokio::select! {
                    biased;
                    _ = cancelled.cancelled() => None,
                    received = connection.recv() => Some(received),
                };

                let Some(received) = received else {
                    close_quietly(connection, &channel).await;
                    return;
                };
                let Some(inner) = weak.upgrade() else {
                    close_quietly(connection, &channel).await;
                    return;
                };

                let lost = match received {
                    Ok(Some(message)) => {
                        inner.dispatch(message);
                        continue;
                    }
                    Ok(None) => ListenerError::connection("notification stream ended"),
                    Err(e) => e,
                };
                inner.connection_lost(generation, lost);
                drop(inner);
                close_quietly(connection, &channel).await;
                return;
            }
        });

        PumpHandle { shutdown, task }
    }

    fn dispatch(self: &Arc<Self>, message: ChannelMessage) {
        if message.channel != self.config.channel {
            trace!(channel = %message.channel, "Ignoring notification on foreign channel");
            return;
        }
        if message.payload.is_empty() {
            trace!("Ignoring notification without payload");
            return;
        }

        self.stats.record_notification();

        let event = match ChangeEvent::decode(&message.payload) {
            Ok(event) => event,
            Err(e) => {
                self.stats.record_decode_failure();
                self.emit_error(e.into());
                return;
            }
        };

        let handlers = self.core.lock().registry.matching(&event);
        if handlers.is_empty() {
            trace!(event = %event, "No handlers for change");
            return;
        }

        debug!(event = %event, handlers = handlers.len(), "Dispatching change");
        self.stats.record_dispatch(handlers.len() as u64);

        for (key, handler) in handlers {
            let weak = Arc::downgrade(self);
            let event = event.clone();
            tokio::spawn(async move {
                let message = match AssertUnwindSafe(handler.handle(event)).catch_unwind().await {
                    Ok(Ok(())) => return,
                    Ok(Err(e)) => e.to_string(),
                    Err(panic) => panic_message(&*panic),
                };
                if let Some(inner) = weak.upgrade() {
                    inner.stats.record_handler_failure();
                    inner.emit_error(ListenerError::Handler {
                        key: key.to_string(),
                        message,
                    });
                }
            });
        }
    }

    fn connection_lost(self: &Arc<Self>, generation: u64, error: ListenerError) {
        let exhausted = {
            let mut core = self.core.lock();
            if core.generation != generation || core.state.intentional_disconnect() {
                trace!(generation, "Ignoring loss of retired connection");
                return;
            }
            core.state.connection_lost();
            core.pump = None;
            self.plan_reconnect(&mut core)
        };

        warn!(channel = %self.config.channel, error = %error, "Change listener connection lost");
        self.emit_error(error);
        if let Some(e) = exhausted {
            self.emit_error(e);
        }
    }

    /// Decide on and arm the next reconnect. Returns the error to emit once
    /// the lock is released when retries are exhausted.
    fn plan_reconnect(self: &Arc<Self>, core: &mut ListenerCore) -> Option<ListenerError> {
        match core.state.begin_reconnect(&self.config.backoff) {
            ReconnectDecision::Schedule { attempt } => {
                let delay = self.config.backoff.delay_for_attempt(attempt);
                info!(
                    attempt = attempt + 1,
                    delay_ms = delay.as_millis() as u64,
                    "Scheduling change listener reconnect"
                );

                let weak = Arc::downgrade(self);
                if let Some(previous) = core.reconnect_timer.replace(tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    if let Some(inner) = weak.upgrade() {
                        inner.attempt_reconnect().await;
                    }
                })) {
                    previous.abort();
                }
                None
            }
            ReconnectDecision::AlreadyReconnecting => {
                debug!("Reconnect already in progress");
                None
            }
            ReconnectDecision::Stopped => {
                debug!("Listener disconnected; not reconnecting");
                None
            }
            ReconnectDecision::Exhausted { attempts } => {
                Some(ListenerError::ReconnectExhausted { attempts })
            }
        }
    }

    async fn attempt_reconnect(self: &Arc<Self>) {
        let (attempt, stale) = {
            let mut core = self.core.lock();
            (core.state.reconnect_attempt() + 1, core.pump.take())
        };
        if let Some(stale) = stale {
            stale.shutdown.cancel();
        }

        info!(attempt, channel = %self.config.channel, "Attempting change listener reconnect");

        match self.open().await {
            Ok(connection) => match self.install(connection) {
                Ok(()) => {
                    self.stats.record_reconnect();
                    info!(attempt, "Change listener reconnected");
                }
                Err(connection) => {
                    debug!("Discarding connection opened after disconnect");
                    close_quietly(connection, &self.config.channel).await;
                }
            },
            Err(e) => {
                warn!(attempt, error = %e, "Change listener reconnect failed");
                self.emit_error(e);

                let exhausted = {
                    let mut core = self.core.lock();
                    // This task is the current timer; forget it without aborting.
                    core.reconnect_timer = None;
                    core.state.reconnect_failed();
                    self.plan_reconnect(&mut core)
                };
                if let Some(e) = exhausted {
                    self.emit_error(e);
                }
            }
        }
    }

    /// Log `error`, remember it for health, and hand it to every error handler.
    fn emit_error(&self, error: ListenerError) {
        match &error {
            ListenerError::ReconnectExhausted { .. } => error!(error = %error, "Change listener gave up"),
            _ => warn!(error = %error, "Change listener error"),
        }

        let handlers: Vec<ErrorHandler> = {
            let mut core = self.core.lock();
            core.last_error = Some(error.to_string());
            core.error_handlers.iter().map(|(_, h)| Arc::clone(h)).collect()
        };

        for handler in handlers {
            if std::panic::catch_unwind(AssertUnwindSafe(|| handler(&error))).is_err() {
                error!("Change listener error handler panicked");
            }
        }
    }
}

async fn close_quietly<T: NotificationConnection>(mut connection: T, channel: &str) {
    if let Err(e) = connection.unlisten(channel).await {
        debug!(error = %e, "UNLISTEN failed during close");
    }
    if let Err(e) = connection.close().await {
        debug!(error = %e, "Closing notification connection failed");
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        format!("handler panicked: {s}")
    } else if let Some(s) = panic.downcast_ref::<String>() {
        format!("handler panicked: {s}")
    } else {
        "handler panicked".to_string()
    }
}
