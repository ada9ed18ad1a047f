//! Integration tests for nested transactions (savepoints)

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use txnest::client::{QueryEvent, QueryEventKind, RecordingClient};
use txnest::transaction::{TransactionConfig, Transactor};
use txnest::{Database, TxError};

/// Helper to create a database over a fresh recording client
fn setup() -> (Arc<RecordingClient>, Database) {
    let client = Arc::new(RecordingClient::new());
    let db = Database::new(client.clone());
    (client, db)
}

#[tokio::test]
async fn test_grandchildren_nest_savepoints() {
    let (client, db) = setup();
    let ids = Arc::new(Mutex::new(Vec::new()));

    let recorded = ids.clone();
    let trx = db.transaction(
        move |trx: Transactor<()>| async move {
            let child = trx.savepoint(
                move |child: Transactor<()>| async move {
                    recorded.lock().push(child.id().to_string());
                    let grandchild = child.savepoint(
                        |grandchild: Transactor<()>| async move {
                            assert!(grandchild.is_nested());
                            grandchild.query("SELECT 'deep'").await?;
                            Ok::<(), TxError>(())
                        },
                        TransactionConfig::new(),
                    );
                    recorded.lock().push(grandchild.id().to_string());
                    assert_eq!(grandchild.parent_id(), Some(child.id()));
                    grandchild.await
                },
                TransactionConfig::new(),
            );
            child.await
        },
        TransactionConfig::new(),
    );
    trx.clone().await.unwrap();
    trx.finished().await;

    let ids = ids.lock().clone();
    assert_ne!(ids[0], ids[1]);
    assert_eq!(
        client.statements(),
        vec![
            "BEGIN;".to_string(),
            format!("SAVEPOINT {};", ids[0]),
            format!("SAVEPOINT {};", ids[1]),
            "SELECT 'deep'".to_string(),
            format!("RELEASE SAVEPOINT {};", ids[1]),
            format!("RELEASE SAVEPOINT {};", ids[0]),
            "COMMIT;".to_string(),
        ]
    );
    assert_eq!(client.acquired().len(), 1);
    assert_eq!(client.released().len(), 1);
}

#[tokio::test]
async fn test_parent_survives_a_handled_child_failure() {
    let (client, db) = setup();
    client.fail_on("INSERT INTO audit", "audit table locked");

    let trx = db.transaction(
        |trx: Transactor<bool>| async move {
            let audit = trx.savepoint(
                |sp: Transactor<()>| async move {
                    sp.query("INSERT INTO audit VALUES (1)").await?;
                    Ok::<(), TxError>(())
                },
                TransactionConfig::new(),
            );
            let audited = audit.await.is_ok();
            trx.query("INSERT INTO accounts VALUES (1)").await?;
            Ok::<bool, TxError>(audited)
        },
        TransactionConfig::new(),
    );
    assert!(!trx.await.unwrap());

    let statements = client.statements();
    assert_eq!(statements.len(), 6);
    assert!(statements[3].starts_with("ROLLBACK TO SAVEPOINT "));
    assert_eq!(statements[4], "INSERT INTO accounts VALUES (1)");
    assert_eq!(statements[5], "COMMIT;");
}

#[tokio::test]
async fn test_child_failure_propagates_with_question_mark() {
    let (client, db) = setup();

    let trx = db.transaction(
        |trx: Transactor<()>| async move {
            trx.savepoint(
                |_sp: Transactor<()>| async move {
                    Err::<(), TxError>(TxError::user("invalid payload"))
                },
                TransactionConfig::new(),
            )
            .await?;
            Ok::<(), TxError>(())
        },
        TransactionConfig::new(),
    );
    assert_eq!(trx.await.unwrap_err(), TxError::user("invalid payload"));

    let statements = client.statements();
    assert_eq!(statements.len(), 4);
    assert!(statements[2].starts_with("ROLLBACK TO SAVEPOINT "));
    assert_eq!(statements[3], "ROLLBACK;");
}

#[tokio::test]
async fn test_nesting_follows_the_client() {
    let (client, db) = setup();

    let trx = db.transaction(
        |trx: Transactor<bool>| async move {
            // Any database built over the scoped client nests
            let scoped = Database::new(trx.client().clone());
            assert!(scoped.is_transacting());
            let child = scoped.transaction(
                |sp: Transactor<bool>| async move { Ok::<bool, TxError>(sp.is_nested()) },
                TransactionConfig::new(),
            );
            child.await
        },
        TransactionConfig::new(),
    );
    assert!(trx.await.unwrap());
    assert!(client.statements()[1].starts_with("SAVEPOINT "));
}

#[tokio::test]
async fn test_nested_begin_rolls_back_to_savepoint() {
    let (client, db) = setup();

    let trx = db.transaction(
        |trx: Transactor<()>| async move {
            let sp = trx.begin::<()>(TransactionConfig::new()).await?;
            assert!(sp.is_nested());
            sp.query("UPDATE t SET n = 0").await?;
            sp.rollback(None).await?;
            assert_eq!(sp.completion().await.unwrap_err(), TxError::Rejected);
            Ok::<(), TxError>(())
        },
        TransactionConfig::new(),
    );
    trx.await.unwrap();

    let statements = client.statements();
    assert_eq!(statements.len(), 5);
    assert!(statements[1].starts_with("SAVEPOINT "));
    assert!(statements[3].starts_with("ROLLBACK TO SAVEPOINT "));
    assert_eq!(statements[4], "COMMIT;");
}

#[tokio::test]
async fn test_transactor_observer_sees_child_errors() {
    let (client, db) = setup();
    client.fail_on("SELECT broken", "no such column");
    let seen = Arc::new(Mutex::new(Vec::new()));

    let sink = seen.clone();
    let trx = db.transaction(
        move |trx: Transactor<String>| async move {
            trx.on_query(move |event: &QueryEvent| {
                if let QueryEventKind::Error(message) = &event.kind {
                    sink.lock().push((event.transaction.clone(), message.clone()));
                }
            });
            let child = trx.savepoint(
                |sp: Transactor<()>| async move {
                    sp.query("SELECT broken").await?;
                    Ok::<(), TxError>(())
                },
                TransactionConfig::new(),
            );
            let child_id = child.id().to_string();
            assert!(child.await.is_err());
            Ok::<String, TxError>(child_id)
        },
        TransactionConfig::new(),
    );
    let child_id = trx.await.unwrap();

    let seen = seen.lock().clone();
    assert_eq!(seen, vec![(child_id, "no such column".to_string())]);
}

#[tokio::test]
async fn test_children_created_concurrently_stay_serialized() {
    let client = Arc::new(RecordingClient::new().with_latency(Duration::from_millis(1)));
    let db = Database::new(client.clone());

    let trx = db.transaction(
        |trx: Transactor<Vec<String>>| async move {
            let children: Vec<_> = (0..5)
                .map(|n| {
                    trx.savepoint(
                        move |sp: Transactor<String>| async move {
                            sp.query(format!("INSERT INTO t VALUES ({})", n)).await?;
                            Ok::<String, TxError>(sp.id().to_string())
                        },
                        TransactionConfig::new(),
                    )
                })
                .collect();
            assert_eq!(trx.completion().pending_children(), 5);

            let mut ids = Vec::new();
            for child in children {
                ids.push(child.await?);
            }
            Ok::<Vec<String>, TxError>(ids)
        },
        TransactionConfig::new(),
    );
    let ids = trx.await.unwrap();

    assert_eq!(client.overlapping_statements(), 0);
    let statements = client.statements();
    for (n, id) in ids.iter().enumerate() {
        let start = 1 + n * 3;
        assert_eq!(statements[start], format!("SAVEPOINT {};", id));
        assert_eq!(statements[start + 1], format!("INSERT INTO t VALUES ({})", n));
        assert_eq!(statements[start + 2], format!("RELEASE SAVEPOINT {};", id));
    }
}
