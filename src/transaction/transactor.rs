//! Transactor: the client handed to a transaction's container
//!
//! A full [`Database`] over the transaction-scoped client (so every query
//! runs on the transaction's connection and is refused once the transaction
//! completed), plus the operations that end the transaction or nest new ones
//! inside it. `commit` and `rollback` pick the savepoint forms automatically
//! for nested transactions.

use std::future::Future;
use std::ops::Deref;
use std::sync::Arc;

use serde_json::{Map, Value};

use crate::client::{Client, QueryObserver};
use crate::database::Database;
use crate::error::{Result, TxError};
use crate::transaction::config::TransactionConfig;
use crate::transaction::handle::Transaction;
use crate::transaction::machine::TxCore;
use crate::types::Connection;
use crate::Config;

pub struct Transactor<T> {
    database: Database,
    core: Arc<TxCore<T>>,
}

impl<T> Clone for Transactor<T> {
    fn clone(&self) -> Self {
        Self {
            database: self.database.clone(),
            core: Arc::clone(&self.core),
        }
    }
}

impl<T> Deref for Transactor<T> {
    type Target = Database;

    fn deref(&self) -> &Database {
        &self.database
    }
}

impl<T: Clone + Send + Sync + 'static> Transactor<T> {
    pub(crate) fn new(core: Arc<TxCore<T>>) -> Self {
        let config = Config {
            debug: core.state.is_debug(),
            rollback_timeout_ms: core.rollback_timeout.as_millis() as u64,
        };
        let client: Arc<dyn Client> = core.client.clone();
        Self {
            database: Database::with_config(client, config),
            core,
        }
    }

    pub fn id(&self) -> &str {
        self.core.state.id()
    }

    /// The connection every statement of this transaction runs on
    pub fn connection(&self) -> &Connection {
        self.core.connection()
    }

    /// True for savepoint-backed transactions
    pub fn is_nested(&self) -> bool {
        self.core.nested
    }

    /// True once this transaction or any enclosing transaction completed
    pub fn is_completed(&self) -> bool {
        self.core.state.is_completed()
    }

    pub(crate) fn is_own_completed(&self) -> bool {
        self.core.state.is_own_completed()
    }

    pub(crate) fn log_level(&self) -> log::Level {
        self.core.state.log_level()
    }

    pub fn user_params(&self) -> &Map<String, Value> {
        self.core.state.user_params()
    }

    /// Commit with `value` (RELEASE SAVEPOINT when nested)
    ///
    /// The returned error mirrors the settled outcome: if the statement
    /// fails, the transaction is rolled back with that error.
    pub async fn commit(&self, value: T) -> Result<()> {
        let result = if self.core.nested {
            self.core.release(value).await
        } else {
            self.core.commit(value).await
        };
        result.map(|_| ())
    }

    /// Roll back with `error` (ROLLBACK TO SAVEPOINT when nested). Without an
    /// error the outcome is [`TxError::Rejected`].
    pub async fn rollback(&self, error: Option<TxError>) -> Result<()> {
        let result = if self.core.nested {
            self.core.rollback_to(error).await
        } else {
            self.core.rollback(error).await
        };
        result.map(|_| ())
    }

    /// Open a nested transaction. Siblings run one after another in creation order.
    pub fn transaction<U, F, Fut>(&self, container: F, config: TransactionConfig) -> Transaction<U>
    where
        U: Clone + Send + Sync + 'static,
        F: FnOnce(Transactor<U>) -> Fut + Send + 'static,
        Fut: Future<Output = Result<U>> + Send + 'static,
    {
        self.database.transaction(container, config)
    }

    /// Alias for [`Transactor::transaction`]
    pub fn savepoint<U, F, Fut>(&self, container: F, config: TransactionConfig) -> Transaction<U>
    where
        U: Clone + Send + Sync + 'static,
        F: FnOnce(Transactor<U>) -> Fut + Send + 'static,
        Fut: Future<Output = Result<U>> + Send + 'static,
    {
        self.transaction(container, config)
    }

    /// Watch every statement issued by this transaction and the ones nested in it
    pub fn on_query(&self, observer: impl QueryObserver + 'static) {
        self.core.state.add_observer(Arc::new(observer));
    }

    /// Handle on this transaction's outcome
    pub fn completion(&self) -> Transaction<T> {
        Transaction::from_parts(Arc::clone(&self.core.state), &self.core.completion)
    }
}

impl<T> std::fmt::Debug for Transactor<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transactor")
            .field("state", &self.core.state)
            .field("nested", &self.core.nested)
            .finish()
    }
}
