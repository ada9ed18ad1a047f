//! Client seam for txnest
//!
//! The coordinator never talks to a database directly. Everything it needs
//! from the outside world goes through the [`Client`] trait: acquiring and
//! releasing connections, running statements, and streaming rows. Pools and
//! wire-protocol drivers implement it; the transaction-scoped client
//! implements it too, which is how a transactor can be handed to code that
//! expects an ordinary client.
//!
//! ## Query events
//!
//! Clients report statements through [`Client::emit`]. The scoped client
//! fans every event out to the observers registered on its transaction and
//! then forwards it upstream, so observers on an outer transaction see the
//! statements of every transaction nested inside it.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::Result;
use crate::transaction::TransactionScope;
use crate::types::{Connection, ConnectionId, QueryResponse, Row, Statement, StreamOptions};

pub mod recording;

pub use recording::{ExecutedStatement, RecordingClient};

/// What happened to a statement
#[derive(Debug, Clone, PartialEq)]
pub enum QueryEventKind {
    /// The statement is about to be sent to the driver
    Start,
    /// The driver answered
    Response { rows: usize, rows_affected: u64 },
    /// The driver failed
    Error(String),
}

/// A statement observed on a transaction
#[derive(Debug, Clone, PartialEq)]
pub struct QueryEvent {
    /// Id of the transaction that issued the statement
    pub transaction: String,
    pub connection: ConnectionId,
    pub sql: String,
    pub kind: QueryEventKind,
}

/// Receives query events for a transaction tree
pub trait QueryObserver: Send + Sync {
    fn on_query(&self, event: &QueryEvent);
}

impl<F> QueryObserver for F
where
    F: Fn(&QueryEvent) + Send + Sync,
{
    fn on_query(&self, event: &QueryEvent) {
        self(event)
    }
}

/// Low-level database client
///
/// Implementations own connection handling and statement execution. The
/// coordinator only ever calls these methods; it never inspects connections.
#[async_trait]
pub trait Client: Send + Sync {
    /// Obtain a connection for exclusive use
    async fn acquire_connection(&self) -> Result<Connection>;

    /// Give a connection back
    async fn release_connection(&self, connection: Connection) -> Result<()>;

    /// Run a single statement on a connection
    async fn query(&self, connection: &Connection, statement: &Statement) -> Result<QueryResponse>;

    /// Run a statement and push its rows into `sink`, returning the number
    /// of rows delivered.
    ///
    /// The default runs [`Client::query`] and forwards the buffered rows,
    /// for drivers without server-side cursors. Delivery stops early if the
    /// receiving side is dropped.
    async fn stream(
        &self,
        connection: &Connection,
        statement: &Statement,
        sink: mpsc::Sender<Row>,
        _options: StreamOptions,
    ) -> Result<u64> {
        let response = self.query(connection, statement).await?;
        let mut delivered = 0;
        for row in response.rows {
            if sink.send(row).await.is_err() {
                break;
            }
            delivered += 1;
        }
        Ok(delivered)
    }

    /// True when this client is already scoped to an open transaction, in
    /// which case new transactions opened through it become savepoints.
    fn is_transacting(&self) -> bool {
        false
    }

    /// The transaction this client is scoped to, if any
    fn scope(&self) -> Option<TransactionScope> {
        None
    }

    /// The client that actually executes statements, when this one only
    /// wraps another. `None` means this client is the driver.
    fn driver(&self) -> Option<Arc<dyn Client>> {
        None
    }

    /// Query-event channel. Drivers may record or ignore events.
    fn emit(&self, _event: &QueryEvent) {}
}
