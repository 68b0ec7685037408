//! # change-feed-pg
//!
//! PostgreSQL adapters for change-feed, built on sqlx.
//!
//! - [`PgNotifyConnector`]: LISTEN/NOTIFY connections for [`ChangeListener`]
//! - [`PgDatabase`] / [`PgTx`]: pool-backed transactions for
//!   [`with_actor`](change_feed_core::with_actor) and
//!   [`abortable`](change_feed_core::abortable)
//! - [`connect_pool`]: pool construction from [`DatabaseConfig`]
//!
//! The listener opens its own dedicated connection and never borrows one
//! from the pool.

pub mod connector;
pub mod pool;
pub mod transaction;

use change_feed_core::{ChangeListener, ListenerConfig};

pub use connector::{PgNotifyConnection, PgNotifyConnector};
pub use pool::connect_pool;
pub use transaction::{PgDatabase, PgHandle, PgTx};

#[doc(no_inline)]
pub use change_feed_core::config::DatabaseConfig;

/// Change listener over a real PostgreSQL connection.
pub type PgChangeListener = ChangeListener<PgNotifyConnector>;

/// Build a listener for `database_url`. Nothing connects until
/// [`ChangeListener::connect`] is called.
pub fn change_listener(database_url: impl Into<String>, config: ListenerConfig) -> PgChangeListener {
    ChangeListener::new(PgNotifyConnector::new(database_url), config)
}
