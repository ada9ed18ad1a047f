//! txnest demo - runs a nested transaction tree against the recording client
//!
//! ```text
//! BEGIN;
//!   SAVEPOINT trx2;  INSERT ...  RELEASE SAVEPOINT trx2;
//!   SAVEPOINT trx3;  INSERT ...  ROLLBACK TO SAVEPOINT trx3;   (--fail-child 2)
//!   SAVEPOINT trx4;  INSERT ...  RELEASE SAVEPOINT trx4;
//! COMMIT;
//! ```
//!
//! Children are all created up front and only then awaited, so the printed
//! statement log shows them serialized on the single connection.

use std::sync::Arc;

use log::info;

use txnest::client::RecordingClient;
use txnest::transaction::{TransactionConfig, Transactor};
use txnest::types::IsolationLevel;
use txnest::{Config, Database, TxError};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or("info")
    ).init();

    let args: Vec<String> = std::env::args().collect();

    let mut config = Config::from_env()?;
    let mut children: usize = 3;
    let mut fail_child: Option<usize> = None;
    let mut isolation: Option<IsolationLevel> = None;

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--config" | "-c" => {
                if i + 1 < args.len() {
                    config = Config::from_json_file(&args[i + 1])?;
                    i += 1;
                }
            }
            "--children" | "-n" => {
                if i + 1 < args.len() {
                    children = args[i + 1].parse()?;
                    i += 1;
                }
            }
            "--fail-child" | "-f" => {
                if i + 1 < args.len() {
                    fail_child = Some(args[i + 1].parse()?);
                    i += 1;
                }
            }
            "--isolation" | "-i" => {
                if i + 1 < args.len() {
                    isolation = Some(args[i + 1].parse()?);
                    i += 1;
                }
            }
            "--debug" => {
                config.debug = true;
            }
            "--help" | "-h" => {
                println!("txnest - nested SQL transactions on one connection");
                println!();
                println!("Usage: txnest [OPTIONS]");
                println!();
                println!("Options:");
                println!("  -c, --config FILE       JSON client config (debug, rollback_timeout_ms)");
                println!("  -n, --children N        Nested transactions to open (default: 3)");
                println!("  -f, --fail-child K      Make the K-th child (1-based) fail");
                println!("  -i, --isolation LEVEL   Isolation level, e.g. serializable");
                println!("      --debug             Log transaction lifecycles at info");
                println!("  -h, --help              Show this help");
                return Ok(());
            }
            other => {
                eprintln!("Unknown option: {}", other);
            }
        }
        i += 1;
    }

    let client = Arc::new(RecordingClient::new());
    let db = Database::with_config(client.clone(), config);

    let mut trx_config = TransactionConfig::new();
    if let Some(level) = isolation {
        trx_config = trx_config.isolation_level(level);
    }

    info!("Running {} nested transactions", children);
    let trx = db.transaction(
        move |trx: Transactor<usize>| async move {
            let handles: Vec<_> = (1..=children)
                .map(|n| {
                    trx.savepoint(
                        move |sp: Transactor<usize>| async move {
                            sp.query(format!("INSERT INTO items (id) VALUES ({})", n)).await?;
                            if fail_child == Some(n) {
                                return Err(TxError::user(format!("child {} refused", n)));
                            }
                            Ok::<usize, TxError>(n)
                        },
                        TransactionConfig::new(),
                    )
                })
                .collect();

            let mut committed = 0;
            for handle in handles {
                match handle.await {
                    Ok(_) => committed += 1,
                    Err(e) => info!("Nested transaction rolled back: {}", e),
                }
            }
            Ok::<usize, TxError>(committed)
        },
        trx_config,
    );

    let outcome = trx.clone().await;
    trx.finished().await;

    for statement in client.executed() {
        println!("{}  {}", statement.connection, statement.sql);
    }
    match outcome {
        Ok(committed) => info!("Committed with {} of {} children", committed, children),
        Err(e) => info!("Transaction rolled back: {}", e),
    }

    Ok(())
}
