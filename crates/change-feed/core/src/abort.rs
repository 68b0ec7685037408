//! # Abort Signals
//!
//! An [`AbortController`] owns the right to fire; any number of cloned
//! [`AbortSignal`]s observe it. [`race_abort`] runs a future against a
//! signal and turns a fired signal into a [`TransactionAbortedError`].
//!
//! The first reason recorded wins; later `abort` calls are ignored.

use std::fmt;
use std::future::Future;
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio_util::sync::{CancellationToken, DropGuard};

/// Why a signal fired.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AbortReason {
    /// Free-form text, passed through verbatim
    Message(String),
    /// Message of the error that caused the abort, passed through verbatim
    Error(String),
    /// Any other value, stringified with `Debug`
    Value(String),
}

impl AbortReason {
    pub fn from_error(err: &(dyn std::error::Error + 'static)) -> Self {
        Self::Error(err.to_string())
    }

    pub fn from_value(value: &impl fmt::Debug) -> Self {
        Self::Value(format!("{:?}", value))
    }

    pub fn message(&self) -> &str {
        match self {
            Self::Message(m) | Self::Error(m) | Self::Value(m) => m,
        }
    }
}

impl From<&str> for AbortReason {
    fn from(value: &str) -> Self {
        Self::Message(value.to_string())
    }
}

impl From<String> for AbortReason {
    fn from(value: String) -> Self {
        Self::Message(value)
    }
}

impl fmt::Display for AbortReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.message())
    }
}

/// A transaction was rolled back because its signal fired.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Transaction aborted{}", .reason.as_ref().map(|r| format!(": {}", r)).unwrap_or_default())]
pub struct TransactionAbortedError {
    reason: Option<String>,
}

impl TransactionAbortedError {
    pub fn new(reason: Option<String>) -> Self {
        Self { reason }
    }

    pub fn reason(&self) -> Option<&str> {
        self.reason.as_deref()
    }
}

/// Observing side of a cancellation signal.
#[derive(Clone, Default)]
pub struct AbortSignal {
    token: CancellationToken,
    reason: Arc<OnceLock<Option<AbortReason>>>,
    // Stops the deadline task of a `timeout` signal once the last clone drops.
    deadline: Option<Arc<DropGuard>>,
}

impl fmt::Debug for AbortSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AbortSignal")
            .field("aborted", &self.is_aborted())
            .field("reason", &self.reason())
            .finish()
    }
}

impl AbortSignal {
    /// A signal that never fires unless its controller is used.
    pub fn new() -> Self {
        Self::default()
    }

    /// A signal that fires by itself after `duration`. Needs a Tokio runtime.
    ///
    /// The timer task exits early once every clone of the signal is dropped.
    pub fn timeout(duration: Duration) -> Self {
        Self::spawn_deadline(duration).0
    }

    fn spawn_deadline(duration: Duration) -> (Self, JoinHandle<()>) {
        let controller = AbortController::new();
        let released = CancellationToken::new();
        let mut signal = controller.signal();
        signal.deadline = Some(Arc::new(released.clone().drop_guard()));

        let task = tokio::spawn(async move {
            tokio::select! {
                _ = released.cancelled() => {}
                _ = tokio::time::sleep(duration) => {
                    controller.abort_with(format!("timed out after {}ms", duration.as_millis()));
                }
            }
        });
        (signal, task)
    }

    /// A signal that is already fired.
    pub fn aborted_with(reason: impl Into<AbortReason>) -> Self {
        let controller = AbortController::new();
        controller.abort_with(reason);
        controller.signal()
    }

    pub fn is_aborted(&self) -> bool {
        self.token.is_cancelled()
    }

    pub fn reason(&self) -> Option<&AbortReason> {
        self.reason.get().and_then(Option::as_ref)
    }

    /// Completes once the signal fires.
    pub async fn aborted(&self) {
        self.token.cancelled().await
    }

    /// `Err` if the signal has already fired.
    pub fn check(&self) -> Result<(), TransactionAbortedError> {
        if self.is_aborted() {
            Err(self.to_error())
        } else {
            Ok(())
        }
    }

    pub fn to_error(&self) -> TransactionAbortedError {
        TransactionAbortedError::new(self.reason().map(|r| r.message().to_string()))
    }

    fn fire(&self, reason: Option<AbortReason>) {
        if self.reason.set(reason).is_ok() {
            self.token.cancel();
        }
    }
}

/// Firing side of a cancellation signal.
#[derive(Debug, Clone, Default)]
pub struct AbortController {
    signal: AbortSignal,
}

impl AbortController {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn signal(&self) -> AbortSignal {
        self.signal.clone()
    }

    /// Fire without a reason.
    pub fn abort(&self) {
        self.signal.fire(None);
    }

    pub fn abort_with(&self, reason: impl Into<AbortReason>) {
        self.signal.fire(Some(reason.into()));
    }

    pub fn is_aborted(&self) -> bool {
        self.signal.is_aborted()
    }
}

/// Run `operation` until it completes or `signal` fires, whichever is first.
///
/// An already-fired signal returns immediately without polling `operation`.
/// The wait on the signal is dropped together with this future on both paths.
pub async fn race_abort<F>(operation: F, signal: &AbortSignal) -> Result<F::Output, TransactionAbortedError>
where
    F: Future,
{
    signal.check()?;

    tokio::select! {
        biased;
        _ = signal.aborted() => Err(signal.to_error()),
        output = operation => Ok(output),
    }
}
