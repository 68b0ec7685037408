//! Configuration module for change-feed
//!
//! Configuration is loaded once at startup, validated, and passed by value
//! into the listener and pool constructors.
//!
//! # Usage
//!
//! ```ignore
//! use change_feed_core::config::ConfigLoader;
//! use std::path::PathBuf;
//!
//! let loader = ConfigLoader::new(Some(PathBuf::from(".env")));
//! let config = loader.load()?;
//! println!("Listening on channel: {}", config.listener.channel);
//! ```
//!
//! # Environment Variables
//!
//! ## Required Variables
//!
//! - `CHANGE_FEED_DATABASE_URL`: PostgreSQL connection string
//!
//! ## Optional Variables
//!
//! - `CHANGE_FEED_DB_POOL_SIZE`: Pool size for transactional work (default: 5)
//! - `CHANGE_FEED_DB_CONNECT_TIMEOUT_SECS`: Pool acquire timeout (default: 10)
//! - `CHANGE_FEED_CHANNEL`: Notification channel (default: "table_changes")
//! - `CHANGE_FEED_RECONNECT_BASE_DELAY_MS`: Backoff base (default: 1000)
//! - `CHANGE_FEED_RECONNECT_MAX_DELAY_MS`: Backoff cap (default: 30000)
//! - `CHANGE_FEED_RECONNECT_MAX_ATTEMPTS`: Give up after this many failures (default: unbounded)
//! - `CHANGE_FEED_UNHEALTHY_AFTER_FAILURES`: Health threshold (default: 5)
//! - `CHANGE_FEED_SHUTDOWN_TIMEOUT_MS`: Disconnect grace period (default: 5000)
//! - `CHANGE_FEED_LOG_LEVEL`: Log level when `RUST_LOG` is unset (default: "info")

pub mod dto;
pub mod error;
pub mod loader;

pub use dto::{ChangeFeedConfig, DatabaseConfig, ListenerConfig, LoggingConfig, DEFAULT_CHANNEL};
pub use error::{ConfigError, Result};
pub use loader::ConfigLoader;
