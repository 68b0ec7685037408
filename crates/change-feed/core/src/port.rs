//! # Ports
//!
//! Capabilities the core needs from the outside world. The PostgreSQL
//! adapters live in `change-feed-pg`; in-memory doubles live in
//! `change-feed-testing`.

use async_trait::async_trait;

use crate::error::ListenerError;

/// A notification received on a channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelMessage {
    pub channel: String,
    pub payload: String,
}

impl ChannelMessage {
    pub fn new(channel: impl Into<String>, payload: impl Into<String>) -> Self {
        Self {
            channel: channel.into(),
            payload: payload.into(),
        }
    }
}

/// Opens dedicated publish/subscribe connections.
///
/// Each call must produce a fresh connection that is never shared with a pool.
#[async_trait]
pub trait NotificationConnector: Send + Sync + 'static {
    type Connection: NotificationConnection;

    async fn connect(&self) -> Result<Self::Connection, ListenerError>;
}

/// One live publish/subscribe connection.
#[async_trait]
pub trait NotificationConnection: Send + 'static {
    /// Subscribe to `channel`. Issuing it twice on one connection must succeed.
    async fn listen(&mut self, channel: &str) -> Result<(), ListenerError>;

    async fn unlisten(&mut self, channel: &str) -> Result<(), ListenerError>;

    /// Next message.
    ///
    /// `Ok(None)` means the server closed the connection; `Err` means the
    /// connection failed. Either way the connection is not used again.
    async fn recv(&mut self) -> Result<Option<ChannelMessage>, ListenerError>;

    async fn close(self) -> Result<(), ListenerError>
    where
        Self: Sized;
}
