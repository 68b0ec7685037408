//! # Subscription Registry
//!
//! Maps a [`SubscriptionKey`] to the set of handlers registered under it.
//! Every [`ChangeEvent`] is looked up under exactly three keys, in order:
//! `*`, `<table>` and `<table>:<OPERATION>`.
//!
//! Handlers are held by `Arc` and compared by pointer identity, so
//! registering the same handler twice under one key keeps a single entry.

use async_trait::async_trait;
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::str::FromStr;
use std::sync::Arc;

use crate::event::{ChangeEvent, ChangeOperation, DecodeError};
use parking_lot::Mutex;

/// Error type returned by change handlers.
pub type HandlerError = Box<dyn std::error::Error + Send + Sync>;

/// Receives decoded change events.
#[async_trait]
pub trait ChangeHandler: Send + Sync {
    async fn handle(&self, event: ChangeEvent) -> Result<(), HandlerError>;
}

#[async_trait]
impl<F, Fut> ChangeHandler for F
where
    F: Fn(ChangeEvent) -> Fut + Send + Sync,
    Fut: Future<Output = Result<(), HandlerError>> + Send + 'static,
{
    async fn handle(&self, event: ChangeEvent) -> Result<(), HandlerError> {
        (self)(event).await
    }
}

/// Discriminator a handler is registered under.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum SubscriptionKey {
    /// Every event (`*`)
    All,
    /// Every operation on one table (`<table>`)
    Table(String),
    /// One operation on one table (`<table>:<OPERATION>`)
    TableOperation(String, ChangeOperation),
}

impl SubscriptionKey {
    /// The three keys an event is dispatched under, in dispatch order.
    pub fn for_event(event: &ChangeEvent) -> [SubscriptionKey; 3] {
        [
            SubscriptionKey::All,
            SubscriptionKey::Table(event.table.clone()),
            SubscriptionKey::TableOperation(event.table.clone(), event.operation),
        ]
    }
}

impl fmt::Display for SubscriptionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::All => f.write_str("*"),
            Self::Table(table) => f.write_str(table),
            Self::TableOperation(table, op) => write!(f, "{}:{}", table, op),
        }
    }
}

impl FromStr for SubscriptionKey {
    type Err = DecodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s == "*" {
            return Ok(Self::All);
        }
        match s.rsplit_once(':') {
            Some((table, op)) => Ok(Self::TableOperation(table.to_string(), op.parse()?)),
            None => Ok(Self::Table(s.to_string())),
        }
    }
}

/// Identifier of one registry entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(pub u64);

#[derive(Clone)]
struct Entry {
    id: SubscriptionId,
    handler: Arc<dyn ChangeHandler>,
}

fn same_handler(a: &Arc<dyn ChangeHandler>, b: &Arc<dyn ChangeHandler>) -> bool {
    std::ptr::eq(
        Arc::as_ptr(a) as *const (),
        Arc::as_ptr(b) as *const (),
    )
}

/// Key -> handler-set table. Not synchronised; the listener guards it.
#[derive(Default)]
pub struct SubscriptionRegistry {
    entries: HashMap<SubscriptionKey, Vec<Entry>>,
    next_id: u64,
}

impl fmt::Debug for SubscriptionRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let counts: HashMap<String, usize> = self
            .entries
            .iter()
            .map(|(key, entries)| (key.to_string(), entries.len()))
            .collect();
        f.debug_struct("SubscriptionRegistry")
            .field("entries", &counts)
            .finish()
    }
}

impl SubscriptionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` under `key`.
    ///
    /// Returns the id of the entry; re-registering a handler already present
    /// under the same key returns the existing id.
    pub fn insert(&mut self, key: SubscriptionKey, handler: Arc<dyn ChangeHandler>) -> SubscriptionId {
        let entries = self.entries.entry(key).or_default();
        if let Some(existing) = entries.iter().find(|e| same_handler(&e.handler, &handler)) {
            return existing.id;
        }

        self.next_id += 1;
        let id = SubscriptionId(self.next_id);
        entries.push(Entry { id, handler });
        id
    }

    /// Remove one entry. Returns `false` if it was already gone.
    pub fn remove(&mut self, key: &SubscriptionKey, id: SubscriptionId) -> bool {
        let Some(entries) = self.entries.get_mut(key) else {
            return false;
        };
        let before = entries.len();
        entries.retain(|e| e.id != id);
        let removed = entries.len() != before;
        if entries.is_empty() {
            self.entries.remove(key);
        }
        removed
    }

    /// Handlers matching `event`, paired with the key they matched under.
    pub fn matching(&self, event: &ChangeEvent) -> Vec<(SubscriptionKey, Arc<dyn ChangeHandler>)> {
        SubscriptionKey::for_event(event)
            .into_iter()
            .filter_map(|key| self.entries.get(&key).map(|entries| (key, entries)))
            .flat_map(|(key, entries)| {
                entries
                    .iter()
                    .map(move |e| (key.clone(), Arc::clone(&e.handler)))
            })
            .collect()
    }

    pub fn handler_count(&self, key: &SubscriptionKey) -> usize {
        self.entries.get(key).map_or(0, Vec::len)
    }

    pub fn key_count(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

/// Handle returned by every registration.
///
/// [`Subscription::unsubscribe`] removes the registration; calling it again
/// does nothing. Dropping the handle does not unsubscribe.
pub struct Subscription {
    cancel: Mutex<Option<Box<dyn FnOnce() + Send>>>,
}

impl Subscription {
    pub(crate) fn new(cancel: impl FnOnce() + Send + 'static) -> Self {
        Self {
            cancel: Mutex::new(Some(Box::new(cancel))),
        }
    }

    pub fn unsubscribe(&self) {
        let cancel = self.cancel.lock().take();
        if let Some(cancel) = cancel {
            cancel();
        }
    }

    pub fn is_active(&self) -> bool {
        self.cancel.lock().is_some()
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.is_active())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn event(table: &str, operation: ChangeOperation) -> ChangeEvent {
        ChangeEvent {
            table: table.to_string(),
            schema: "public".to_string(),
            operation,
            id: "1".to_string(),
            timestamp: 1,
        }
    }

    fn noop() -> Arc<dyn ChangeHandler> {
        Arc::new(|_event: ChangeEvent| async { Ok::<(), HandlerError>(()) })
    }

    #[test]
    fn key_display_and_parse() {
        let key = SubscriptionKey::TableOperation("User".to_string(), ChangeOperation::Delete);
        assert_eq!(key.to_string(), "User:DELETE");
        assert_eq!("User:DELETE".parse::<SubscriptionKey>().unwrap(), key);
        assert_eq!("*".parse::<SubscriptionKey>().unwrap(), SubscriptionKey::All);
        assert_eq!(
            "Post".parse::<SubscriptionKey>().unwrap(),
            SubscriptionKey::Table("Post".to_string())
        );
        assert!("Post:UPSERT".parse::<SubscriptionKey>().is_err());
    }

    #[test]
    fn event_maps_to_three_keys_in_order() {
        let keys = SubscriptionKey::for_event(&event("User", ChangeOperation::Update));
        let rendered: Vec<String> = keys.iter().map(ToString::to_string).collect();
        assert_eq!(rendered, vec!["*", "User", "User:UPDATE"]);
    }

    #[test]
    fn same_handler_twice_is_one_entry() {
        let mut registry = SubscriptionRegistry::new();
        let handler = noop();

        let first = registry.insert(SubscriptionKey::All, Arc::clone(&handler));
        let second = registry.insert(SubscriptionKey::All, Arc::clone(&handler));

        assert_eq!(first, second);
        assert_eq!(registry.handler_count(&SubscriptionKey::All), 1);
    }

    #[test]
    fn distinct_handlers_coexist_under_one_key() {
        let mut registry = SubscriptionRegistry::new();
        registry.insert(SubscriptionKey::All, noop());
        registry.insert(SubscriptionKey::All, noop());
        assert_eq!(registry.handler_count(&SubscriptionKey::All), 2);
    }

    #[test]
    fn removing_last_handler_drops_the_key() {
        let mut registry = SubscriptionRegistry::new();
        let key = SubscriptionKey::Table("User".to_string());
        let id = registry.insert(key.clone(), noop());

        assert!(registry.remove(&key, id));
        assert!(!registry.remove(&key, id));
        assert!(registry.is_empty());
    }

    #[test]
    fn matching_only_returns_applicable_keys() {
        let mut registry = SubscriptionRegistry::new();
        registry.insert(SubscriptionKey::All, noop());
        registry.insert(SubscriptionKey::Table("User".to_string()), noop());
        registry.insert(
            SubscriptionKey::TableOperation("User".to_string(), ChangeOperation::Update),
            noop(),
        );
        registry.insert(
            SubscriptionKey::TableOperation("User".to_string(), ChangeOperation::Delete),
            noop(),
        );
        registry.insert(SubscriptionKey::Table("Post".to_string()), noop());

        let matched: Vec<String> = registry
            .matching(&event("User", ChangeOperation::Update))
            .into_iter()
            .map(|(key, _)| key.to_string())
            .collect();

        assert_eq!(matched, vec!["*", "User", "User:UPDATE"]);
    }

    #[test]
    fn subscription_unsubscribe_runs_once() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let subscription = Subscription::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        assert!(subscription.is_active());
        subscription.unsubscribe();
        subscription.unsubscribe();

        assert!(!subscription.is_active());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
