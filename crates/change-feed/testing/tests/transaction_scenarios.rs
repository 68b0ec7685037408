//! Actor-stamped and abortable transactions against the in-memory database.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use change_feed_core::{
    ACTOR_SETTING, AbortController, AbortSignal, DbHandle, SET_ACTOR_STATEMENT,
    TransactionAbortedError, TransactionError, abortable, with_actor,
};
use change_feed_testing::{MemoryDatabase, MemoryTransaction};
use rstest::rstest;

#[derive(Debug, PartialEq)]
enum AppError {
    Transaction(TransactionError),
    Rejected(String),
}

impl From<TransactionError> for AppError {
    fn from(err: TransactionError) -> Self {
        AppError::Transaction(err)
    }
}

#[tokio::test]
async fn actor_is_visible_for_the_whole_transaction() {
    let db = MemoryDatabase::new();

    let seen = with_actor(DbHandle::Client(&db), Some("user-42"), None, |tx: &mut MemoryTransaction| {
        Box::pin(async move {
            tx.insert("post:1", "hello");
            Ok::<_, AppError>(tx.session_var(ACTOR_SETTING).map(str::to_string))
        })
    })
    .await
    .unwrap();

    assert_eq!(seen.as_deref(), Some("user-42"));
    assert_eq!(db.get("post:1").as_deref(), Some("hello"));
    assert_eq!(db.actor_of("post:1"), Some(Some("user-42".to_string())));
    assert_eq!(db.commit_count(), 1);

    let statements = db.statements();
    assert_eq!(statements[0].sql, SET_ACTOR_STATEMENT);
    assert_eq!(statements[0].params, vec![ACTOR_SETTING.to_string(), "user-42".to_string()]);
}

#[tokio::test]
async fn missing_actor_writes_without_stamp() {
    let db = MemoryDatabase::new();

    with_actor(DbHandle::Client(&db), None, None, |tx: &mut MemoryTransaction| {
        Box::pin(async move {
            tx.insert("post:2", "anon");
            Ok::<_, AppError>(())
        })
    })
    .await
    .unwrap();

    assert_eq!(db.actor_of("post:2"), Some(None));
    assert!(db.statements().is_empty());
}

#[tokio::test]
async fn callback_error_rolls_back_and_is_returned_unchanged() {
    let db = MemoryDatabase::new();

    let result: Result<(), AppError> =
        with_actor(DbHandle::Client(&db), Some("user-1"), None, |tx: &mut MemoryTransaction| {
            Box::pin(async move {
                tx.insert("post:3", "draft");
                Err(AppError::Rejected("boom".to_string()))
            })
        })
        .await;

    assert_eq!(result, Err(AppError::Rejected("boom".to_string())));
    assert_eq!(db.get("post:3"), None);
    assert_eq!(db.rollback_count(), 1);
    assert_eq!(db.commit_count(), 0);
}

#[tokio::test]
async fn signal_firing_mid_callback_aborts_and_rolls_back() {
    let db = MemoryDatabase::new();
    let signal = AbortSignal::timeout(Duration::from_millis(10));

    let result: Result<(), AppError> =
        with_actor(DbHandle::Client(&db), Some("user-1"), Some(&signal), |tx: &mut MemoryTransaction| {
            Box::pin(async move {
                tx.insert("post:4", "slow");
                tokio::time::sleep(Duration::from_millis(100)).await;
                Ok(())
            })
        })
        .await;

    match result {
        Err(AppError::Transaction(TransactionError::Aborted(err))) => {
            assert!(err.to_string().starts_with("Transaction aborted"));
        }
        other => panic!("expected abort, got {other:?}"),
    }
    assert_eq!(db.get("post:4"), None);
    assert_eq!(db.rollback_count(), 1);
}

#[tokio::test]
async fn already_fired_signal_never_begins() {
    let db = MemoryDatabase::new();
    let controller = AbortController::new();
    controller.abort_with("request cancelled");

    let result: Result<(), AppError> = with_actor(
        DbHandle::Client(&db),
        Some("user-1"),
        Some(&controller.signal()),
        |_tx: &mut MemoryTransaction| Box::pin(async { Ok(()) }),
    )
    .await;

    assert_eq!(
        result,
        Err(AppError::Transaction(TransactionError::Aborted(
            TransactionAbortedError::new(Some("request cancelled".to_string()))
        )))
    );
    assert_eq!(db.begin_count(), 0);
}

#[tokio::test]
async fn signal_firing_during_actor_stamp_skips_callback() {
    let db = MemoryDatabase::new();
    let controller = AbortController::new();
    db.abort_during_next_execute(controller.clone());
    let ran = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&ran);

    let result: Result<(), AppError> = with_actor(
        DbHandle::Client(&db),
        Some("user-1"),
        Some(&controller.signal()),
        |tx: &mut MemoryTransaction| {
            Box::pin(async move {
                flag.store(true, Ordering::SeqCst);
                tx.insert("post:7", "never");
                Ok(())
            })
        },
    )
    .await;

    assert_eq!(
        result,
        Err(AppError::Transaction(TransactionError::Aborted(
            TransactionAbortedError::new(Some("cancelled mid-statement".to_string()))
        )))
    );
    assert!(!ran.load(Ordering::SeqCst));
    assert_eq!(db.statements().len(), 1);
    assert_eq!(db.rollback_count(), 1);
    assert_eq!(db.commit_count(), 0);
}

#[tokio::test]
async fn failed_actor_stamp_rolls_back_without_running_callback() {
    let db = MemoryDatabase::new();
    db.fail_next_execute();
    let ran = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&ran);

    let result: Result<(), AppError> =
        with_actor(DbHandle::Client(&db), Some("user-1"), None, |_tx: &mut MemoryTransaction| {
            Box::pin(async move {
                flag.store(true, Ordering::SeqCst);
                Ok(())
            })
        })
        .await;

    assert!(matches!(
        result,
        Err(AppError::Transaction(TransactionError::Database(_)))
    ));
    assert!(!ran.load(Ordering::SeqCst));
    assert_eq!(db.rollback_count(), 1);
    assert_eq!(db.commit_count(), 0);
}

#[tokio::test]
async fn nested_call_joins_the_outer_transaction() {
    let db = MemoryDatabase::new();

    let result: Result<(), AppError> =
        with_actor(DbHandle::Client(&db), Some("outer"), None, |tx: &mut MemoryTransaction| {
            Box::pin(async move {
                with_actor::<MemoryDatabase, _, AppError, _>(
                    DbHandle::Transaction(tx),
                    Some("inner"),
                    None,
                    |inner| {
                        Box::pin(async move {
                            // The enclosing actor is still in effect.
                            assert_eq!(inner.actor(), Some("outer"));
                            inner.insert("post:5", "nested");
                            Ok(())
                        })
                    },
                )
                .await
            })
        })
        .await;

    assert!(result.is_ok());
    assert_eq!(db.begin_count(), 1);
    assert_eq!(db.commit_count(), 1);
    assert_eq!(db.actor_of("post:5"), Some(Some("outer".to_string())));
}

#[tokio::test]
async fn nested_failure_rolls_back_outer_writes() {
    let db = MemoryDatabase::new();

    let result: Result<(), AppError> =
        with_actor(DbHandle::Client(&db), Some("outer"), None, |tx: &mut MemoryTransaction| {
            Box::pin(async move {
                tx.insert("post:6", "outer write");
                with_actor::<MemoryDatabase, (), AppError, _>(DbHandle::Transaction(tx), None, None, |_inner| {
                    Box::pin(async { Err(AppError::Rejected("inner".to_string())) })
                })
                .await
            })
        })
        .await;

    assert_eq!(result, Err(AppError::Rejected("inner".to_string())));
    assert_eq!(db.get("post:6"), None);
    assert_eq!(db.begin_count(), 1);
    assert_eq!(db.rollback_count(), 1);
}

#[tokio::test]
async fn begin_failure_surfaces_as_database_error() {
    let db = MemoryDatabase::new();
    db.fail_next_begin();

    let result: Result<(), AppError> =
        with_actor(DbHandle::Client(&db), Some("user-1"), None, |_tx: &mut MemoryTransaction| {
            Box::pin(async { Ok(()) })
        })
        .await;

    assert!(matches!(
        result,
        Err(AppError::Transaction(TransactionError::Database(_)))
    ));
    assert_eq!(db.rollback_count(), 0);
}

#[tokio::test]
async fn abortable_opens_a_fresh_unstamped_transaction() {
    let db = MemoryDatabase::new();
    let signal = AbortSignal::new();

    let value: Result<u32, TransactionError> = abortable(&db, &signal, |tx: &mut MemoryTransaction| {
        Box::pin(async move {
            assert_eq!(tx.actor(), None);
            tx.insert("job:1", "queued");
            Ok(7)
        })
    })
    .await;

    assert_eq!(value, Ok(7));
    assert_eq!(db.begin_count(), 1);
    assert_eq!(db.commit_count(), 1);
    assert!(db.statements().is_empty());
}

#[tokio::test]
async fn abortable_rolls_back_when_controller_fires() {
    let db = MemoryDatabase::new();
    let controller = AbortController::new();
    let signal = controller.signal();

    let trigger = tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(10)).await;
        controller.abort_with("shutdown");
    });

    let result: Result<(), TransactionError> = abortable(&db, &signal, |tx: &mut MemoryTransaction| {
        Box::pin(async move {
            tx.insert("job:2", "running");
            std::future::pending::<()>().await;
            Ok(())
        })
    })
    .await;
    trigger.await.unwrap();

    assert_eq!(
        result,
        Err(TransactionError::Aborted(TransactionAbortedError::new(Some(
            "shutdown".to_string()
        ))))
    );
    assert_eq!(
        result.unwrap_err().to_string(),
        "Transaction aborted: shutdown"
    );
    assert_eq!(db.get("job:2"), None);
    assert_eq!(db.rollback_count(), 1);
}

#[rstest]
#[case::fast_callback(1, 200, true)]
#[case::slow_callback(200, 10, false)]
#[tokio::test]
async fn race_between_callback_and_timeout(
    #[case] work_ms: u64,
    #[case] timeout_ms: u64,
    #[case] commits: bool,
) {
    let db = MemoryDatabase::new();
    let signal = AbortSignal::timeout(Duration::from_millis(timeout_ms));

    let result: Result<(), TransactionError> = abortable(&db, &signal, |tx: &mut MemoryTransaction| {
        Box::pin(async move {
            tokio::time::sleep(Duration::from_millis(work_ms)).await;
            tx.insert("race", "done");
            Ok(())
        })
    })
    .await;

    assert_eq!(result.is_ok(), commits);
    assert_eq!(db.get("race").is_some(), commits);
}
