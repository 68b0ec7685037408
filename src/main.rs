//! change-feed-tail
//!
//! Connects to the configured notification channel and logs every change
//! event until interrupted.
//!
//! Run: CHANGE_FEED_DATABASE_URL=postgres://... cargo run --bin change-feed-tail

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use change_feed_core::{ChangeEvent, ConfigLoader, HandlerError};
use change_feed_pg::change_listener;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

const HEALTH_LOG_INTERVAL: Duration = Duration::from_secs(30);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let env_file = PathBuf::from(".env");
    let loader = ConfigLoader::new(env_file.exists().then_some(env_file));
    let config = loader.load()?;

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.logging.level))?;
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(true)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    info!(
        channel = %config.listener.channel,
        backoff = %config.listener.backoff,
        "Starting change-feed-tail"
    );

    let listener = change_listener(config.database.url.clone(), config.listener.clone());

    let _changes = listener.on_change(Arc::new(|event: ChangeEvent| async move {
        info!(
            table = %event.table,
            operation = %event.operation,
            id = %event.id,
            payload = %serde_json::to_string(&event)?,
            "Change"
        );
        Ok::<(), HandlerError>(())
    }));
    let _errors = listener.on_error(|error| warn!(error = %error, "Listener error"));

    listener.connect().await?;

    let mut health_tick = tokio::time::interval(HEALTH_LOG_INTERVAL);
    health_tick.tick().await;

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Shutdown signal received");
                break;
            }
            _ = health_tick.tick() => {
                let health = listener.health();
                let stats = listener.stats();
                info!(
                    status = ?health.status,
                    phase = %health.phase,
                    consecutive_failures = health.consecutive_failures,
                    notifications = stats.notifications_received,
                    dispatched = stats.events_dispatched,
                    reconnects = stats.reconnects,
                    "Listener health"
                );
            }
        }
    }

    listener.disconnect().await;
    info!("change-feed-tail stopped");
    Ok(())
}
