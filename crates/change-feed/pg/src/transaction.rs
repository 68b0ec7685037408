//! sqlx-backed [`TransactionalClient`].
//!
//! Callbacks receive a [`PgTx`], which dereferences to [`PgConnection`] so
//! ordinary sqlx queries run inside the transaction:
//!
//! ```rust,ignore
//! let db = PgDatabase::new(pool);
//! with_actor(DbHandle::Client(&db), Some("user-42"), None, |tx| {
//!     Box::pin(async move {
//!         sqlx::query("UPDATE \"User\" SET name = $1 WHERE id = $2")
//!             .bind("Ada")
//!             .bind("u1")
//!             .execute(&mut **tx)
//!             .await
//!             .map_err(TransactionError::database)?;
//!         Ok::<_, TransactionError>(())
//!     })
//! })
//! .await?;
//! ```

use async_trait::async_trait;
use sqlx::postgres::{PgConnection, PgPool};
use sqlx::{Postgres, Transaction};
use std::ops::{Deref, DerefMut};
use tracing::debug;

use change_feed_core::{DbHandle, TransactionError, TransactionHandle, TransactionResult, TransactionalClient};

/// Pool-backed client that opens transactions.
#[derive(Debug, Clone)]
pub struct PgDatabase {
    pool: PgPool,
}

impl PgDatabase {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Shorthand for `DbHandle::Client(self)`.
    pub fn handle(&self) -> PgHandle<'_> {
        DbHandle::Client(self)
    }
}

#[async_trait]
impl TransactionalClient for PgDatabase {
    type Transaction = PgTx;

    async fn begin_transaction(&self) -> TransactionResult<PgTx> {
        let tx = self.pool.begin().await.map_err(TransactionError::database)?;
        debug!("Transaction started");
        Ok(PgTx(tx))
    }
}

/// An open PostgreSQL transaction.
pub struct PgTx(Transaction<'static, Postgres>);

impl std::fmt::Debug for PgTx {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("PgTx").finish()
    }
}

impl PgTx {
    pub fn into_inner(self) -> Transaction<'static, Postgres> {
        self.0
    }
}

impl Deref for PgTx {
    type Target = PgConnection;

    fn deref(&self) -> &PgConnection {
        &self.0
    }
}

impl DerefMut for PgTx {
    fn deref_mut(&mut self) -> &mut PgConnection {
        &mut self.0
    }
}

#[async_trait]
impl TransactionHandle for PgTx {
    async fn execute_parameterized(&mut self, sql: &str, params: &[&str]) -> TransactionResult<u64> {
        let mut query = sqlx::query(sql);
        for param in params {
            query = query.bind(*param);
        }
        let result = query
            .execute(&mut *self.0)
            .await
            .map_err(TransactionError::database)?;
        Ok(result.rows_affected())
    }

    async fn commit(self) -> TransactionResult<()> {
        self.0.commit().await.map_err(TransactionError::database)?;
        debug!("Transaction committed");
        Ok(())
    }

    async fn rollback(self) -> TransactionResult<()> {
        self.0.rollback().await.map_err(TransactionError::database)?;
        debug!("Transaction rolled back");
        Ok(())
    }
}

/// Client-or-transaction handle over PostgreSQL.
pub type PgHandle<'a> = DbHandle<'a, PgDatabase>;
