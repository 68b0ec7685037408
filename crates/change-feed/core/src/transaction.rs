//! Transaction Coordinator - actor stamping and cancellation
//!
//! Wraps a transactional engine so that
//!
//! 1. every write made inside the transaction can be attributed to an actor
//!    by database triggers reading a transaction-local setting, and
//! 2. the callback is raced against an [`AbortSignal`]; a fired signal rolls
//!    the transaction back even if the callback never looks at the signal.
//!
//! ```sql
//! BEGIN;
//! SELECT set_config('app.current_actor_id', $1, true);  -- cleared at COMMIT/ROLLBACK
//! -- callback statements
//! COMMIT;  -- or ROLLBACK on error / abort
//! ```
//!
//! Calls nest: handing [`DbHandle::Transaction`] to [`with_actor`] reuses the
//! outer transaction and its actor instead of opening a new one.

use async_trait::async_trait;
use futures::future::BoxFuture;
use thiserror::Error;
use tracing::{debug, warn};

use crate::abort::{AbortSignal, TransactionAbortedError, race_abort};

/// Transaction-local setting read by the change triggers
pub const ACTOR_SETTING: &str = "app.current_actor_id";

/// Parameterised statement that stamps the actor for the current transaction only
pub const SET_ACTOR_STATEMENT: &str = "SELECT set_config($1, $2, true)";

/// Error type for transaction operations
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransactionError {
    #[error("Database error: {0}")]
    Database(String),

    #[error(transparent)]
    Aborted(#[from] TransactionAbortedError),
}

impl TransactionError {
    pub fn database(err: impl std::fmt::Display) -> Self {
        Self::Database(err.to_string())
    }

    pub fn is_aborted(&self) -> bool {
        matches!(self, Self::Aborted(_))
    }
}

/// Result type for transaction operations
pub type TransactionResult<T> = Result<T, TransactionError>;

/// An open transaction.
#[async_trait]
pub trait TransactionHandle: Send {
    /// Execute `sql` with positional text parameters. Returns rows affected.
    async fn execute_parameterized(&mut self, sql: &str, params: &[&str]) -> TransactionResult<u64>;

    async fn commit(self) -> TransactionResult<()>
    where
        Self: Sized;

    async fn rollback(self) -> TransactionResult<()>
    where
        Self: Sized;
}

/// Something that can open transactions (typically a connection pool).
#[async_trait]
pub trait TransactionalClient: Send + Sync {
    type Transaction: TransactionHandle;

    async fn begin_transaction(&self) -> TransactionResult<Self::Transaction>;
}

/// Either a client that can open transactions or a transaction already open.
pub enum DbHandle<'a, C: TransactionalClient> {
    Client(&'a C),
    Transaction(&'a mut C::Transaction),
}

impl<C: TransactionalClient> DbHandle<'_, C> {
    pub fn is_transaction(&self) -> bool {
        matches!(self, Self::Transaction(_))
    }
}

impl<C: TransactionalClient> std::fmt::Debug for DbHandle<'_, C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Client(_) => f.write_str("DbHandle::Client"),
            Self::Transaction(_) => f.write_str("DbHandle::Transaction"),
        }
    }
}

/// Run `operation` inside a transaction stamped with `actor_id`.
///
/// - `DbHandle::Transaction`: no new transaction; `operation` runs on the
///   given one (raced against `signal` if present).
/// - `DbHandle::Client`: a new transaction is opened, the actor is stamped
///   when given, `operation` runs raced against `signal`, then the
///   transaction commits on `Ok` and rolls back on any `Err`, including
///   the abort produced by the race.
///
/// `operation`'s own errors come back unchanged.
pub async fn with_actor<C, T, E, F>(
    handle: DbHandle<'_, C>,
    actor_id: Option<&str>,
    signal: Option<&AbortSignal>,
    operation: F,
) -> Result<T, E>
where
    C: TransactionalClient,
    F: for<'t> FnOnce(&'t mut C::Transaction) -> BoxFuture<'t, Result<T, E>>,
    E: From<TransactionError>,
{
    match handle {
        DbHandle::Transaction(tx) => {
            debug!("Reusing enclosing transaction");
            run_raced(operation(tx), signal).await
        }
        DbHandle::Client(client) => run_in_transaction(client, actor_id, signal, operation).await,
    }
}

/// Run `operation` in a fresh transaction that rolls back when `signal` fires.
///
/// Unlike [`with_actor`] this always opens a new transaction and never stamps
/// an actor.
pub async fn abortable<C, T, E, F>(client: &C, signal: &AbortSignal, operation: F) -> Result<T, E>
where
    C: TransactionalClient,
    F: for<'t> FnOnce(&'t mut C::Transaction) -> BoxFuture<'t, Result<T, E>>,
    E: From<TransactionError>,
{
    run_in_transaction(client, None, Some(signal), operation).await
}

async fn run_in_transaction<C, T, E, F>(
    client: &C,
    actor_id: Option<&str>,
    signal: Option<&AbortSignal>,
    operation: F,
) -> Result<T, E>
where
    C: TransactionalClient,
    F: for<'t> FnOnce(&'t mut C::Transaction) -> BoxFuture<'t, Result<T, E>>,
    E: From<TransactionError>,
{
    if let Some(signal) = signal {
        signal.check().map_err(TransactionError::from)?;
    }

    let mut tx = client.begin_transaction().await?;

    let outcome = match stamp_actor(&mut tx, actor_id, signal).await {
        Ok(()) => run_raced(operation(&mut tx), signal).await,
        Err(e) => Err(E::from(e)),
    };

    match outcome {
        Ok(value) => {
            tx.commit().await?;
            Ok(value)
        }
        Err(e) => {
            if let Err(rollback_err) = tx.rollback().await {
                warn!(error = %rollback_err, "Rollback failed; connection drop will discard the transaction");
            }
            Err(e)
        }
    }
}

async fn stamp_actor<X: TransactionHandle>(
    tx: &mut X,
    actor_id: Option<&str>,
    signal: Option<&AbortSignal>,
) -> TransactionResult<()> {
    let Some(actor_id) = actor_id else {
        return Ok(());
    };

    tx.execute_parameterized(SET_ACTOR_STATEMENT, &[ACTOR_SETTING, actor_id])
        .await?;
    debug!(actor_id = %actor_id, "Actor stamped on transaction");

    // The signal may have fired during the round-trip.
    if let Some(signal) = signal {
        signal.check()?;
    }
    Ok(())
}

async fn run_raced<T, E>(
    operation: BoxFuture<'_, Result<T, E>>,
    signal: Option<&AbortSignal>,
) -> Result<T, E>
where
    E: From<TransactionError>,
{
    match signal {
        None => operation.await,
        Some(signal) => match race_abort(operation, signal).await {
            Ok(result) => result,
            Err(aborted) => {
                debug!(reason = ?aborted.reason(), "Transaction callback aborted");
                Err(E::from(TransactionError::Aborted(aborted)))
            }
        },
    }
}
