//! Scriptable [`NotificationConnector`].
//!
//! Each successful `connect` replaces the live connection. Notifications are
//! pushed into whichever connection is live; dropping it ends that
//! connection's stream the way a lost socket would.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::mpsc;

use change_feed_core::{
    ChangeEvent, ChannelMessage, ListenerError, NotificationConnection, NotificationConnector,
};

type Frame = Result<ChannelMessage, ListenerError>;

#[derive(Default)]
struct ConnectorState {
    connect_attempts: usize,
    failures_remaining: u32,
    refuse_all: bool,
    next_connection_id: u64,
    live: Option<(u64, mpsc::UnboundedSender<Frame>)>,
    listens: Vec<String>,
    unlistens: Vec<String>,
    closes: usize,
}

/// In-memory connector. Clones share state.
#[derive(Clone, Default)]
pub struct MemoryConnector {
    state: Arc<Mutex<ConnectorState>>,
}

impl MemoryConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Refuse the next `count` connects.
    pub fn fail_next_connects(&self, count: u32) {
        self.state.lock().failures_remaining = count;
    }

    /// Refuse every connect until called again with `false`.
    pub fn refuse_connections(&self, refuse: bool) {
        self.state.lock().refuse_all = refuse;
    }

    /// Push a raw notification into the live connection.
    /// Returns `false` when no connection is live.
    pub fn notify(&self, channel: &str, payload: &str) -> bool {
        self.push(Ok(ChannelMessage::new(channel, payload)))
    }

    /// Push an encoded event into the live connection.
    pub fn notify_event(&self, channel: &str, event: &ChangeEvent) -> bool {
        self.notify(channel, &event.encode())
    }

    /// End the live connection's stream, as if the socket closed.
    pub fn drop_connection(&self) -> bool {
        self.state.lock().live.take().is_some()
    }

    /// Make the live connection's next receive fail with `error`.
    pub fn fail_connection(&self, error: ListenerError) -> bool {
        let pushed = self.push(Err(error));
        self.state.lock().live = None;
        pushed
    }

    pub fn connect_attempts(&self) -> usize {
        self.state.lock().connect_attempts
    }

    pub fn is_live(&self) -> bool {
        self.state
            .lock()
            .live
            .as_ref()
            .is_some_and(|(_, tx)| !tx.is_closed())
    }

    /// Channels passed to `listen`, across all connections.
    pub fn listens(&self) -> Vec<String> {
        self.state.lock().listens.clone()
    }

    pub fn unlistens(&self) -> Vec<String> {
        self.state.lock().unlistens.clone()
    }

    pub fn closes(&self) -> usize {
        self.state.lock().closes
    }

    fn push(&self, frame: Frame) -> bool {
        let state = self.state.lock();
        match &state.live {
            Some((_, tx)) => tx.send(frame).is_ok(),
            None => false,
        }
    }
}

impl std::fmt::Debug for MemoryConnector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("MemoryConnector")
            .field("connect_attempts", &state.connect_attempts)
            .field("live", &state.live.as_ref().map(|(id, _)| *id))
            .finish()
    }
}

#[async_trait]
impl NotificationConnector for MemoryConnector {
    type Connection = MemoryConnection;

    async fn connect(&self) -> Result<MemoryConnection, ListenerError> {
        let mut state = self.state.lock();
        state.connect_attempts += 1;

        if state.refuse_all {
            return Err(ListenerError::connection("connection refused"));
        }
        if state.failures_remaining > 0 {
            state.failures_remaining -= 1;
            return Err(ListenerError::connection("connection refused"));
        }

        state.next_connection_id += 1;
        let id = state.next_connection_id;
        let (tx, rx) = mpsc::unbounded_channel();
        state.live = Some((id, tx));

        Ok(MemoryConnection {
            id,
            rx,
            state: Arc::clone(&self.state),
        })
    }
}

/// Connection handed out by [`MemoryConnector`].
pub struct MemoryConnection {
    id: u64,
    rx: mpsc::UnboundedReceiver<Frame>,
    state: Arc<Mutex<ConnectorState>>,
}

impl MemoryConnection {
    pub fn id(&self) -> u64 {
        self.id
    }
}

#[async_trait]
impl NotificationConnection for MemoryConnection {
    async fn listen(&mut self, channel: &str) -> Result<(), ListenerError> {
        self.state.lock().listens.push(channel.to_string());
        Ok(())
    }

    async fn unlisten(&mut self, channel: &str) -> Result<(), ListenerError> {
        self.state.lock().unlistens.push(channel.to_string());
        Ok(())
    }

    async fn recv(&mut self) -> Result<Option<ChannelMessage>, ListenerError> {
        match self.rx.recv().await {
            Some(Ok(message)) => Ok(Some(message)),
            Some(Err(e)) => Err(e),
            None => Ok(None),
        }
    }

    async fn close(self) -> Result<(), ListenerError> {
        let mut state = self.state.lock();
        state.closes += 1;
        if state.live.as_ref().is_some_and(|(id, _)| *id == self.id) {
            state.live = None;
        }
        Ok(())
    }
}
