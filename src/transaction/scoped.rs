//! Transaction-scoped client
//!
//! A [`Client`] bound to one connection and one transaction. Every statement
//! is checked before it reaches the driver:
//!
//! 1. completion is read at call time,
//! 2. the connection must be the transaction's own connection,
//! 3. the transaction (and every ancestor) must not have completed.
//!
//! Acquiring a connection from this client waits for the transaction's turn
//! among its siblings and then yields the fixed connection; releasing is a
//! no-op, since the lease owns the connection.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::client::{Client, QueryEvent, QueryEventKind};
use crate::error::{Result, TxError};
use crate::transaction::state::{TransactionScope, TxState};
use crate::types::{Connection, QueryResponse, Row, Statement, StreamOptions};

/// Fixed settings of a scoped client
#[derive(Clone)]
pub(crate) struct ScopedClientConfig {
    pub(crate) connection: Connection,
    pub(crate) transacting: bool,
    /// Client that executes statements
    pub(crate) driver: Arc<dyn Client>,
}

pub(crate) struct ScopedClient {
    state: Arc<TxState>,
    config: ScopedClientConfig,
    /// Client the transaction was opened through; receives forwarded events
    upstream: Arc<dyn Client>,
}

impl ScopedClient {
    pub(crate) fn new(
        state: Arc<TxState>,
        config: ScopedClientConfig,
        upstream: Arc<dyn Client>,
    ) -> Self {
        Self { state, config, upstream }
    }

    pub(crate) fn connection(&self) -> &Connection {
        &self.config.connection
    }

    /// Reject statements that must not reach the driver
    pub(crate) fn guard(&self, connection: &Connection, statement: &Statement) -> Result<()> {
        let completed = self.state.is_completed();
        if *connection != self.config.connection {
            return Err(TxError::InvalidConnection {
                transaction: self.state.id().to_string(),
            });
        }
        if completed {
            log::log!(
                self.state.log_level(),
                "{}: transaction completed, rejecting: {}",
                self.state.id(),
                statement.sql
            );
            return Err(TxError::Completed {
                transaction: self.state.id().to_string(),
                sql: statement.sql.clone(),
            });
        }
        Ok(())
    }

    /// Send an already guarded statement to the driver
    pub(crate) async fn forward(
        &self,
        connection: &Connection,
        statement: &Statement,
    ) -> Result<QueryResponse> {
        self.emit(&self.event(statement, QueryEventKind::Start));
        match self.config.driver.query(connection, statement).await {
            Ok(response) => {
                self.emit(&self.event(
                    statement,
                    QueryEventKind::Response {
                        rows: response.rows.len(),
                        rows_affected: response.rows_affected,
                    },
                ));
                Ok(response)
            }
            Err(e) => {
                self.emit(&self.event(statement, QueryEventKind::Error(e.to_string())));
                Err(e)
            }
        }
    }

    fn event(&self, statement: &Statement, kind: QueryEventKind) -> QueryEvent {
        QueryEvent {
            transaction: self.state.id().to_string(),
            connection: self.config.connection.id(),
            sql: statement.sql.clone(),
            kind,
        }
    }
}

#[async_trait]
impl Client for ScopedClient {
    async fn acquire_connection(&self) -> Result<Connection> {
        self.state.wait_for_turn().await;
        Ok(self.config.connection.clone())
    }

    async fn release_connection(&self, _connection: Connection) -> Result<()> {
        Ok(())
    }

    async fn query(&self, connection: &Connection, statement: &Statement) -> Result<QueryResponse> {
        self.guard(connection, statement)?;
        self.forward(connection, statement).await
    }

    async fn stream(
        &self,
        connection: &Connection,
        statement: &Statement,
        sink: mpsc::Sender<Row>,
        options: StreamOptions,
    ) -> Result<u64> {
        self.guard(connection, statement)?;
        self.emit(&self.event(statement, QueryEventKind::Start));
        match self.config.driver.stream(connection, statement, sink, options).await {
            Ok(delivered) => {
                self.emit(&self.event(
                    statement,
                    QueryEventKind::Response {
                        rows: delivered as usize,
                        rows_affected: 0,
                    },
                ));
                Ok(delivered)
            }
            Err(e) => {
                self.emit(&self.event(statement, QueryEventKind::Error(e.to_string())));
                Err(e)
            }
        }
    }

    fn is_transacting(&self) -> bool {
        self.config.transacting
    }

    fn scope(&self) -> Option<TransactionScope> {
        Some(TransactionScope::new(Arc::clone(&self.state)))
    }

    fn driver(&self) -> Option<Arc<dyn Client>> {
        Some(Arc::clone(&self.config.driver))
    }

    fn emit(&self, event: &QueryEvent) {
        self.state.notify(event);
        self.upstream.emit(event);
    }
}
