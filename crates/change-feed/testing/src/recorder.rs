//! Handlers that capture what they receive, plus a polling helper.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;

use change_feed_core::{ChangeEvent, ChangeHandler, HandlerError, ListenerError};

/// Change handler that stores every event it is given.
///
/// Use [`EventRecorder::handler`] to register it; every call returns the
/// same `Arc`, so registering it twice under one key is deduplicated.
#[derive(Clone)]
pub struct EventRecorder {
    inner: Arc<RecorderInner>,
}

struct RecorderInner {
    events: Mutex<Vec<ChangeEvent>>,
    fail_with: Option<String>,
}

#[async_trait]
impl ChangeHandler for RecorderInner {
    async fn handle(&self, event: ChangeEvent) -> Result<(), HandlerError> {
        self.events.lock().push(event);
        match &self.fail_with {
            Some(message) => Err(message.clone().into()),
            None => Ok(()),
        }
    }
}

impl EventRecorder {
    pub fn new() -> Self {
        Self::build(None)
    }

    /// A recorder that records and then fails every call with `message`.
    pub fn failing(message: impl Into<String>) -> Self {
        Self::build(Some(message.into()))
    }

    fn build(fail_with: Option<String>) -> Self {
        Self {
            inner: Arc::new(RecorderInner {
                events: Mutex::new(Vec::new()),
                fail_with,
            }),
        }
    }

    pub fn handler(&self) -> Arc<dyn ChangeHandler> {
        self.inner.clone()
    }

    pub fn events(&self) -> Vec<ChangeEvent> {
        self.inner.events.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.inner.events.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for EventRecorder {
    fn default() -> Self {
        Self::new()
    }
}

/// Collects errors passed to a listener's error handlers.
#[derive(Clone, Default)]
pub struct ErrorRecorder {
    errors: Arc<Mutex<Vec<ListenerError>>>,
}

impl ErrorRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Callback suitable for `ChangeListener::on_error`.
    pub fn callback(&self) -> impl Fn(&ListenerError) + Send + Sync + 'static {
        let errors = Arc::clone(&self.errors);
        move |error: &ListenerError| errors.lock().push(error.clone())
    }

    pub fn errors(&self) -> Vec<ListenerError> {
        self.errors.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.errors.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn count_matching(&self, predicate: impl Fn(&ListenerError) -> bool) -> usize {
        self.errors.lock().iter().filter(|e| predicate(e)).count()
    }
}

/// Poll `condition` every few milliseconds until it holds or `timeout` passes.
/// Returns whether it held.
pub async fn eventually<F>(timeout: Duration, mut condition: F) -> bool
where
    F: FnMut() -> bool,
{
    let polling = async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    };
    tokio::time::timeout(timeout, polling).await.is_ok()
}
