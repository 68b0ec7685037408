//! # change-feed-testing
//!
//! In-memory doubles for the change-feed ports, so listener and transaction
//! behaviour can be exercised without PostgreSQL.
//!
//! - [`MemoryConnector`]: scriptable notification connections (push
//!   notifications, drop the link, refuse connects)
//! - [`MemoryDatabase`]: transactional key/value store that only applies
//!   writes on commit and records every statement
//! - [`EventRecorder`] / [`ErrorRecorder`]: handlers that capture what they see
//! - [`eventually`]: poll a condition with a deadline

pub mod connector;
pub mod database;
pub mod recorder;

pub use connector::{MemoryConnection, MemoryConnector};
pub use database::{MemoryDatabase, MemoryTransaction, RecordedStatement};
pub use recorder::{ErrorRecorder, EventRecorder, eventually};
