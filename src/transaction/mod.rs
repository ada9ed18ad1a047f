//! Transaction coordination for txnest
//!
//! A transaction tree runs on exactly one connection. The top-level
//! transaction leases it and issues `BEGIN;`; every transaction opened inside
//! it becomes a savepoint on the same connection.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                        Transactor                           │
//! │   (Database over the scoped client + commit/rollback/nest)  │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                   Transaction (TxCore)                      │
//! │  BEGIN/SAVEPOINT, COMMIT/RELEASE, ROLLBACK/ROLLBACK TO,     │
//! │  completion, child queue                                    │
//! └─────────────────────────────────────────────────────────────┘
//!                    │                   │
//!                    ▼                   ▼
//! ┌──────────────────────────┐ ┌────────────────────────────────┐
//! │      Scoped client       │ │        Connection lease        │
//! │ (connection + completion │ │ (acquire once, release once    │
//! │  checks on every query)  │ │  after the outcome settles)    │
//! └──────────────────────────┘ └────────────────────────────────┘
//! ```
//!
//! # Ordering
//!
//! Children of one transaction run strictly in creation order: a child's
//! SAVEPOINT is only issued once the previously created sibling settled,
//! whichever way it settled. A parent does not wait for its children. If the
//! parent completes while children are still queued, those children are
//! rejected with [`TxError::ParentCompleted`](crate::TxError::ParentCompleted)
//! and never touch the connection. A child that is already running has its
//! later statements refused, but a statement it sent before the parent's
//! COMMIT or ROLLBACK may still be in flight alongside it. Await children
//! before returning from the parent's container to keep them serialized.
//!
//! # Usage
//!
//! ```no_run
//! use std::sync::Arc;
//! use txnest::{Database, TxError};
//! use txnest::client::RecordingClient;
//! use txnest::transaction::{TransactionConfig, Transactor};
//!
//! # async fn example() -> Result<(), TxError> {
//! let db = Database::new(Arc::new(RecordingClient::new()));
//! let total = db
//!     .transaction(
//!         |trx: Transactor<i32>| async move {
//!             trx.query("INSERT INTO accounts (id) VALUES (1)").await?;
//!             let audit = trx.savepoint(
//!                 |sp: Transactor<()>| async move {
//!                     sp.query("INSERT INTO audit (id) VALUES (1)").await?;
//!                     Ok::<_, TxError>(())
//!                 },
//!                 TransactionConfig::new(),
//!             );
//!             audit.await?;
//!             Ok::<_, TxError>(1)
//!         },
//!         TransactionConfig::new(),
//!     )
//!     .await?;
//! assert_eq!(total, 1);
//! # Ok(())
//! # }
//! ```

mod config;
mod machine;
pub(crate) mod handle;
mod lease;
mod scoped;
mod state;
mod transactor;


pub use config::TransactionConfig;
pub use handle::Transaction;
pub use state::{TransactionScope, TransactionStatus};
pub use transactor::Transactor;
