//! # change-feed-core
//!
//! Database change notifications and actor-aware transactions, with no
//! dependency on a concrete database driver.
//!
//! ## Modules
//!
//! - [`event`]: [`ChangeEvent`] and its wire codec
//! - [`subscription`]: [`SubscriptionRegistry`], [`ChangeHandler`], [`Subscription`]
//! - [`listener`]: [`ChangeListener`], the reconnecting LISTEN consumer
//! - [`backoff`]: full-jitter exponential [`BackoffConfig`]
//! - [`state`]: connection state machine behind the listener
//! - [`port`]: [`NotificationConnector`] / [`NotificationConnection`] adapters implement
//! - [`abort`]: [`AbortController`], [`AbortSignal`] and [`race_abort`]
//! - [`transaction`]: [`with_actor`] and [`abortable`] over a [`TransactionalClient`]
//! - [`health`] / [`metrics`]: listener health and counters
//! - [`config`]: environment-driven configuration
//!
//! ## Usage
//!
//! ```rust,ignore
//! use change_feed_core::{ChangeEvent, ChangeListener, ListenerConfig};
//! use std::sync::Arc;
//!
//! let listener = ChangeListener::new(connector, ListenerConfig::default());
//! let subscription = listener.on_table(
//!     "User",
//!     Arc::new(|event: ChangeEvent| async move {
//!         println!("{event}");
//!         Ok(())
//!     }),
//! );
//! listener.connect().await?;
//! ```

pub mod abort;
pub mod backoff;
pub mod config;
pub mod error;
pub mod event;
pub mod health;
pub mod listener;
pub mod metrics;
pub mod port;
pub mod state;
pub mod subscription;
pub mod transaction;

pub use abort::{AbortController, AbortReason, AbortSignal, TransactionAbortedError, race_abort};
pub use backoff::BackoffConfig;
pub use config::{ChangeFeedConfig, ConfigError, ConfigLoader, DatabaseConfig, ListenerConfig};
pub use error::ListenerError;
pub use event::{ChangeEvent, ChangeOperation, DecodeError};
pub use health::{HealthStatus, ListenerHealth};
pub use listener::{ChangeListener, ErrorHandler};
pub use metrics::{ListenerStats, ListenerStatsSnapshot};
pub use port::{ChannelMessage, NotificationConnection, NotificationConnector};
pub use state::{ConnectionPhase, ListenerSnapshot};
pub use subscription::{
    ChangeHandler, HandlerError, Subscription, SubscriptionId, SubscriptionKey,
    SubscriptionRegistry,
};
pub use transaction::{
    ACTOR_SETTING, DbHandle, SET_ACTOR_STATEMENT, TransactionError, TransactionHandle,
    TransactionResult, TransactionalClient, abortable, with_actor,
};
