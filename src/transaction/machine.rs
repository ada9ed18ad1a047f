//! Transaction state machine
//!
//! Issues the lifecycle statements of one transaction and settles its
//! outcome. Terminal statements mark the transaction completed before they
//! are sent, so anything racing in from the container is rejected by the
//! scoped client from that moment on.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;

use crate::error::{Result, TxError};
use crate::transaction::scoped::ScopedClient;
use crate::transaction::state::{TransactionStatus, TxState};
use crate::types::{Connection, QueryResponse, Statement};

/// The typed outcome of a transaction, settled at most once
pub(crate) struct Completion<T> {
    state: Arc<TxState>,
    outcome: watch::Sender<Option<Result<T>>>,
}

impl<T: Clone + Send + Sync + 'static> Completion<T> {
    pub(crate) fn new(state: Arc<TxState>) -> Arc<Self> {
        let (outcome, _) = watch::channel(None);
        Arc::new(Self { state, outcome })
    }

    /// Returns false if the outcome was already settled
    pub(crate) fn settle(&self, outcome: Result<T>) -> bool {
        let committed = outcome.is_ok();
        let settled = self.outcome.send_if_modified(|slot| {
            if slot.is_some() {
                return false;
            }
            *slot = Some(outcome);
            true
        });
        if settled {
            self.state.mark_completed();
            self.state.mark_settled();
            log::log!(
                self.state.log_level(),
                "{}: {}",
                self.state.id(),
                if committed { "committed" } else { "rolled back" }
            );
        }
        settled
    }

    pub(crate) fn subscribe(&self) -> watch::Receiver<Option<Result<T>>> {
        self.outcome.subscribe()
    }
}

/// How a statement ends the transaction
pub(crate) enum Terminal<T> {
    Commit(T),
    Rollback(Option<TxError>),
}

pub(crate) struct TxCore<T> {
    pub(crate) state: Arc<TxState>,
    pub(crate) client: Arc<ScopedClient>,
    pub(crate) completion: Arc<Completion<T>>,
    pub(crate) nested: bool,
    pub(crate) rollback_timeout: Duration,
    /// `SET TRANSACTION` clause issued before BEGIN
    mode: Option<String>,
}

impl<T: Clone + Send + Sync + 'static> TxCore<T> {
    pub(crate) fn new(
        state: Arc<TxState>,
        client: Arc<ScopedClient>,
        completion: Arc<Completion<T>>,
        nested: bool,
        rollback_timeout: Duration,
        mode: Option<String>,
    ) -> Self {
        Self {
            state,
            client,
            completion,
            nested,
            rollback_timeout,
            mode,
        }
    }

    pub(crate) fn connection(&self) -> &Connection {
        self.client.connection()
    }

    pub(crate) async fn begin(&self) -> Result<QueryResponse> {
        if let Some(mode) = &self.mode {
            self.query(format!("SET TRANSACTION {};", mode), None).await?;
        }
        self.query("BEGIN;".to_string(), None).await
    }

    pub(crate) async fn savepoint(&self) -> Result<QueryResponse> {
        if self.mode.is_some() {
            log::warn!(
                "{}: transaction mode is ignored for nested transactions",
                self.state.id()
            );
        }
        self.query(format!("SAVEPOINT {};", self.state.id()), None).await
    }

    pub(crate) async fn commit(&self, value: T) -> Result<QueryResponse> {
        self.query("COMMIT;".to_string(), Some(Terminal::Commit(value))).await
    }

    pub(crate) async fn release(&self, value: T) -> Result<QueryResponse> {
        let sql = format!("RELEASE SAVEPOINT {};", self.state.id());
        self.query(sql, Some(Terminal::Commit(value))).await
    }

    pub(crate) async fn rollback(&self, error: Option<TxError>) -> Result<QueryResponse> {
        self.rollback_with("ROLLBACK;".to_string(), error).await
    }

    pub(crate) async fn rollback_to(&self, error: Option<TxError>) -> Result<QueryResponse> {
        let sql = format!("ROLLBACK TO SAVEPOINT {};", self.state.id());
        self.rollback_with(sql, error).await
    }

    async fn rollback_with(&self, sql: String, error: Option<TxError>) -> Result<QueryResponse> {
        let terminal = Terminal::Rollback(error.clone());
        match tokio::time::timeout(self.rollback_timeout, self.query(sql, Some(terminal))).await {
            Ok(result) => result,
            Err(_) => {
                log::warn!(
                    "{}: rollback did not finish within {:?}",
                    self.state.id(),
                    self.rollback_timeout
                );
                self.completion.settle(Err(error.unwrap_or(TxError::Rejected)));
                Err(TxError::Timeout {
                    transaction: self.state.id().to_string(),
                    millis: self.rollback_timeout.as_millis() as u64,
                })
            }
        }
    }

    /// Run a lifecycle statement. Terminal statements settle the outcome; a
    /// failing statement settles it as a rollback with the failure.
    pub(crate) async fn query(
        &self,
        sql: String,
        terminal: Option<Terminal<T>>,
    ) -> Result<QueryResponse> {
        let statement = Statement::new(sql);
        let guarded = self.client.guard(self.connection(), &statement);
        if terminal.is_some() {
            self.state.mark_completed();
            self.state.set_status(TransactionStatus::Completing);
        }
        log::log!(self.state.log_level(), "{}: {}", self.state.id(), statement.sql);

        let result = match guarded {
            Ok(()) => self.client.forward(self.connection(), &statement).await,
            Err(e) => Err(e),
        };

        match result {
            Ok(response) => {
                match terminal {
                    Some(Terminal::Commit(value)) => {
                        self.completion.settle(Ok(value));
                    }
                    Some(Terminal::Rollback(error)) => {
                        self.completion.settle(Err(error.unwrap_or(TxError::Rejected)));
                    }
                    None => {}
                }
                Ok(response)
            }
            Err(e) => {
                log::log!(
                    self.state.log_level(),
                    "{}: error running transaction query: {}",
                    self.state.id(),
                    e
                );
                self.state.mark_completed();
                self.completion.settle(Err(e.clone()));
                Err(e)
            }
        }
    }
}
