//! Listener error types.
//!
//! Everything reported through the listener's error channel is a
//! [`ListenerError`]. Transaction errors live in [`crate::transaction`]
//! because they are returned to the caller instead.

use thiserror::Error;

use crate::event::DecodeError;

/// Errors routed to `on_error` handlers.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ListenerError {
    /// A notification payload could not be decoded; the notification is dropped
    #[error(transparent)]
    Decode(#[from] DecodeError),

    /// The dedicated connection failed to open, listen, or stay up
    #[error("Connection error: {0}")]
    Connection(String),

    /// Reconnection gave up after the configured number of failed attempts
    #[error("Reconnection abandoned after {attempts} failed attempts")]
    ReconnectExhausted { attempts: u32 },

    /// A change handler returned an error or panicked
    #[error("Handler for '{key}' failed: {message}")]
    Handler { key: String, message: String },
}

impl ListenerError {
    pub fn connection(err: impl std::fmt::Display) -> Self {
        Self::Connection(err.to_string())
    }

    /// Whether the listener recovers from this error on its own.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Connection(_))
    }
}
