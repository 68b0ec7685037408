//! Connection pool for transactional work.

use sqlx::postgres::{PgPool, PgPoolOptions};
use std::time::Duration;
use tracing::info;

use change_feed_core::config::DatabaseConfig;

/// Connect a pool sized and timed from `config`.
pub async fn connect_pool(config: &DatabaseConfig) -> Result<PgPool, sqlx::Error> {
    let pool = PgPoolOptions::new()
        .max_connections(config.pool_size)
        .acquire_timeout(Duration::from_secs(config.connect_timeout_secs))
        .connect(&config.url)
        .await?;

    info!(max_connections = config.pool_size, "PostgreSQL pool connected");
    Ok(pool)
}
