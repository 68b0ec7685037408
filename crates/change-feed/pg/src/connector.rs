//! LISTEN/NOTIFY connections backed by [`sqlx::postgres::PgListener`].

use async_trait::async_trait;
use sqlx::postgres::PgListener;
use tracing::{debug, info};

use change_feed_core::{ChannelMessage, ListenerError, NotificationConnection, NotificationConnector};

/// Opens one dedicated PostgreSQL connection per [`connect`](NotificationConnector::connect).
#[derive(Clone)]
pub struct PgNotifyConnector {
    database_url: String,
}

impl PgNotifyConnector {
    pub fn new(database_url: impl Into<String>) -> Self {
        Self {
            database_url: database_url.into(),
        }
    }
}

impl std::fmt::Debug for PgNotifyConnector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // The URL may carry credentials.
        f.debug_struct("PgNotifyConnector").finish_non_exhaustive()
    }
}

#[async_trait]
impl NotificationConnector for PgNotifyConnector {
    type Connection = PgNotifyConnection;

    async fn connect(&self) -> Result<PgNotifyConnection, ListenerError> {
        debug!("Opening PostgreSQL notification connection");
        let listener = PgListener::connect(&self.database_url)
            .await
            .map_err(ListenerError::connection)?;
        info!("PostgreSQL notification connection established");
        Ok(PgNotifyConnection { listener })
    }
}

/// One live LISTEN connection.
///
/// `PgListener` would silently reconnect on its own after a drop; this
/// wrapper reports the drop instead so the change listener's backoff applies.
pub struct PgNotifyConnection {
    listener: PgListener,
}

impl std::fmt::Debug for PgNotifyConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PgNotifyConnection").finish_non_exhaustive()
    }
}

#[async_trait]
impl NotificationConnection for PgNotifyConnection {
    async fn listen(&mut self, channel: &str) -> Result<(), ListenerError> {
        self.listener
            .listen(channel)
            .await
            .map_err(ListenerError::connection)?;
        info!(channel = %channel, "LISTEN on channel");
        Ok(())
    }

    async fn unlisten(&mut self, channel: &str) -> Result<(), ListenerError> {
        self.listener
            .unlisten(channel)
            .await
            .map_err(ListenerError::connection)?;
        debug!(channel = %channel, "UNLISTEN on channel");
        Ok(())
    }

    async fn recv(&mut self) -> Result<Option<ChannelMessage>, ListenerError> {
        // `Ok(None)` from try_recv means the connection was lost.
        match self.listener.try_recv().await {
            Ok(Some(notification)) => Ok(Some(ChannelMessage::new(
                notification.channel(),
                notification.payload(),
            ))),
            Ok(None) => Ok(None),
            Err(e) => Err(ListenerError::connection(e)),
        }
    }

    async fn close(self) -> Result<(), ListenerError> {
        drop(self.listener);
        debug!("PostgreSQL notification connection closed");
        Ok(())
    }
}
