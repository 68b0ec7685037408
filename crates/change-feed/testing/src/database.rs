//! In-memory [`TransactionalClient`].
//!
//! Rows are plain key/value pairs. A transaction stages its writes and only
//! applies them on commit. `SET_ACTOR_STATEMENT` is interpreted so the actor
//! is visible through [`MemoryTransaction::session_var`] for the lifetime of
//! the transaction, like a transaction-local setting.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use change_feed_core::{
    ACTOR_SETTING, AbortController, SET_ACTOR_STATEMENT, TransactionError, TransactionHandle, TransactionResult,
    TransactionalClient,
};

/// One statement seen by a transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedStatement {
    pub sql: String,
    pub params: Vec<String>,
}

#[derive(Default)]
struct DatabaseState {
    rows: BTreeMap<String, String>,
    /// Actor in effect when each committed row was written
    row_actors: BTreeMap<String, Option<String>>,
    begun: usize,
    committed: usize,
    rolled_back: usize,
    fail_next_begin: bool,
    fail_next_execute: bool,
    /// Fired while the next statement is in flight
    abort_during_execute: Option<AbortController>,
    statements: Vec<RecordedStatement>,
}

/// In-memory database. Clones share state.
#[derive(Clone, Default)]
pub struct MemoryDatabase {
    state: Arc<Mutex<DatabaseState>>,
}

impl MemoryDatabase {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_next_begin(&self) {
        self.state.lock().fail_next_begin = true;
    }

    /// Make the next statement fail with a database error.
    pub fn fail_next_execute(&self) {
        self.state.lock().fail_next_execute = true;
    }

    /// Fire `controller` while the next statement runs; the statement still succeeds.
    pub fn abort_during_next_execute(&self, controller: AbortController) {
        self.state.lock().abort_during_execute = Some(controller);
    }

    pub fn get(&self, key: &str) -> Option<String> {
        self.state.lock().rows.get(key).cloned()
    }

    /// Actor recorded for a committed row; `None` when the row does not exist.
    pub fn actor_of(&self, key: &str) -> Option<Option<String>> {
        self.state.lock().row_actors.get(key).cloned()
    }

    pub fn row_count(&self) -> usize {
        self.state.lock().rows.len()
    }

    pub fn begin_count(&self) -> usize {
        self.state.lock().begun
    }

    pub fn commit_count(&self) -> usize {
        self.state.lock().committed
    }

    pub fn rollback_count(&self) -> usize {
        self.state.lock().rolled_back
    }

    pub fn statements(&self) -> Vec<RecordedStatement> {
        self.state.lock().statements.clone()
    }
}

impl std::fmt::Debug for MemoryDatabase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("MemoryDatabase")
            .field("rows", &state.rows.len())
            .field("begun", &state.begun)
            .field("committed", &state.committed)
            .field("rolled_back", &state.rolled_back)
            .finish()
    }
}

#[async_trait]
impl TransactionalClient for MemoryDatabase {
    type Transaction = MemoryTransaction;

    async fn begin_transaction(&self) -> TransactionResult<MemoryTransaction> {
        let mut state = self.state.lock();
        if std::mem::take(&mut state.fail_next_begin) {
            return Err(TransactionError::database("connection pool exhausted"));
        }
        state.begun += 1;

        Ok(MemoryTransaction {
            state: Arc::clone(&self.state),
            staged: Vec::new(),
            session: HashMap::new(),
        })
    }
}

/// Open transaction on a [`MemoryDatabase`].
pub struct MemoryTransaction {
    state: Arc<Mutex<DatabaseState>>,
    staged: Vec<(String, String, Option<String>)>,
    session: HashMap<String, String>,
}

impl MemoryTransaction {
    /// Stage a write; visible to others only after commit.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let actor = self.actor().map(str::to_string);
        self.staged.push((key.into(), value.into(), actor));
    }

    /// Transaction-local setting, as `current_setting(name, true)` would return it.
    pub fn session_var(&self, name: &str) -> Option<&str> {
        self.session.get(name).map(String::as_str)
    }

    pub fn actor(&self) -> Option<&str> {
        self.session_var(ACTOR_SETTING)
    }
}

#[async_trait]
impl TransactionHandle for MemoryTransaction {
    async fn execute_parameterized(&mut self, sql: &str, params: &[&str]) -> TransactionResult<u64> {
        {
            let mut state = self.state.lock();
            state.statements.push(RecordedStatement {
                sql: sql.to_string(),
                params: params.iter().map(|p| p.to_string()).collect(),
            });
            if let Some(controller) = state.abort_during_execute.take() {
                controller.abort_with("cancelled mid-statement");
            }
            if std::mem::take(&mut state.fail_next_execute) {
                return Err(TransactionError::database("statement timeout"));
            }
        }

        if sql == SET_ACTOR_STATEMENT {
            let [name, value] = params else {
                return Err(TransactionError::database(format!(
                    "set_config expects 2 parameters, got {}",
                    params.len()
                )));
            };
            self.session.insert(name.to_string(), value.to_string());
        }
        Ok(1)
    }

    async fn commit(self) -> TransactionResult<()> {
        let mut state = self.state.lock();
        for (key, value, actor) in self.staged {
            state.row_actors.insert(key.clone(), actor);
            state.rows.insert(key, value);
        }
        state.committed += 1;
        Ok(())
    }

    async fn rollback(self) -> TransactionResult<()> {
        self.state.lock().rolled_back += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_writes_apply_only_on_commit() {
        let db = MemoryDatabase::new();

        let mut tx = db.begin_transaction().await.unwrap();
        tx.insert("a", "1");
        assert_eq!(db.get("a"), None);
        tx.commit().await.unwrap();
        assert_eq!(db.get("a").as_deref(), Some("1"));

        let mut tx = db.begin_transaction().await.unwrap();
        tx.insert("b", "2");
        tx.rollback().await.unwrap();
        assert_eq!(db.get("b"), None);
        assert_eq!(db.rollback_count(), 1);
    }

    #[tokio::test]
    async fn test_set_config_is_transaction_local() {
        let db = MemoryDatabase::new();

        let mut tx = db.begin_transaction().await.unwrap();
        tx.execute_parameterized(SET_ACTOR_STATEMENT, &[ACTOR_SETTING, "user-1"])
            .await
            .unwrap();
        assert_eq!(tx.actor(), Some("user-1"));
        tx.commit().await.unwrap();

        let tx = db.begin_transaction().await.unwrap();
        assert_eq!(tx.actor(), None);
    }

    #[tokio::test]
    async fn test_execute_failure_is_one_shot() {
        let db = MemoryDatabase::new();
        db.fail_next_execute();

        let mut tx = db.begin_transaction().await.unwrap();
        assert!(tx.execute_parameterized("SELECT 1", &[]).await.is_err());
        assert!(tx.execute_parameterized("SELECT 1", &[]).await.is_ok());
        assert_eq!(db.statements().len(), 2);
    }

    #[tokio::test]
    async fn test_begin_failure_is_one_shot() {
        let db = MemoryDatabase::new();
        db.fail_next_begin();

        assert!(db.begin_transaction().await.is_err());
        assert!(db.begin_transaction().await.is_ok());
        assert_eq!(db.begin_count(), 1);
    }
}
