//! Database facade
//!
//! [`Database`] turns any [`Client`] into a full client: single statements
//! borrow a connection for their own duration, transactions keep one for
//! theirs. Built over a transaction-scoped client it becomes the body of a
//! [`Transactor`], and transactions opened through it nest automatically.

use std::future::Future;
use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};

use crate::client::Client;
use crate::error::{Result, TxError};
use crate::transaction::handle::{chained, Body, BoxFuture};
use crate::transaction::{Transaction, TransactionConfig, Transactor};
use crate::types::{QueryResponse, Row, Statement, StreamOptions};
use crate::Config;

#[derive(Clone)]
pub struct Database {
    client: Arc<dyn Client>,
    config: Config,
}

impl Database {
    pub fn new(client: Arc<dyn Client>) -> Self {
        Self::with_config(client, Config::default())
    }

    pub fn with_config(client: Arc<dyn Client>, config: Config) -> Self {
        Self { client, config }
    }

    pub fn client(&self) -> &Arc<dyn Client> {
        &self.client
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// True when this database is scoped to an open transaction
    pub fn is_transacting(&self) -> bool {
        self.client.is_transacting()
    }

    /// Run one statement on a connection held only for its duration
    pub async fn query(&self, statement: impl Into<Statement>) -> Result<QueryResponse> {
        let statement = statement.into();
        let connection = self.client.acquire_connection().await?;
        let result = self.client.query(&connection, &statement).await;
        self.release(connection).await;
        result
    }

    /// Run one statement and push its rows into `sink`
    pub async fn stream(
        &self,
        statement: impl Into<Statement>,
        sink: mpsc::Sender<Row>,
        options: StreamOptions,
    ) -> Result<u64> {
        let statement = statement.into();
        let connection = self.client.acquire_connection().await?;
        let result = self.client.stream(&connection, &statement, sink, options).await;
        self.release(connection).await;
        result
    }

    async fn release(&self, connection: crate::types::Connection) {
        let id = connection.id();
        if let Err(e) = self.client.release_connection(connection).await {
            log::error!("Failed to release connection {}: {}", id, e);
        }
    }

    /// Run `container` in a transaction
    ///
    /// `Ok` from the container commits, `Err` (or a panic) rolls back. Await
    /// the returned [`Transaction`] for the outcome.
    pub fn transaction<T, F, Fut>(&self, container: F, config: TransactionConfig) -> Transaction<T>
    where
        T: Clone + Send + Sync + 'static,
        F: FnOnce(Transactor<T>) -> Fut + Send + 'static,
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        Transaction::start(Arc::clone(&self.client), chained(container), config, &self.config)
    }

    /// Alias for [`Database::transaction`]
    pub fn savepoint<T, F, Fut>(&self, container: F, config: TransactionConfig) -> Transaction<T>
    where
        T: Clone + Send + Sync + 'static,
        F: FnOnce(Transactor<T>) -> Fut + Send + 'static,
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        self.transaction(container, config)
    }

    /// Open a transaction without a container
    ///
    /// Resolves once BEGIN (or SAVEPOINT) has run. The caller must call
    /// [`Transactor::commit`] or [`Transactor::rollback`]; until then the
    /// connection stays leased.
    pub async fn begin<T>(&self, config: TransactionConfig) -> Result<Transactor<T>>
    where
        T: Clone + Send + Sync + 'static,
    {
        let (ready, started) = oneshot::channel();
        let body: Body<T> = Box::new(move |transactor: Transactor<T>| -> BoxFuture<Option<Result<T>>> {
            Box::pin(async move {
                // Nobody is left to settle the transaction, so roll it back
                match ready.send(transactor) {
                    Ok(()) => None,
                    Err(_) => Some(Err(TxError::Rejected)),
                }
            })
        });
        let handle = Transaction::start(Arc::clone(&self.client), body, config, &self.config);
        match started.await {
            Ok(transactor) => Ok(transactor),
            // The body never ran, so the transaction failed to start
            Err(_) => match handle.completion().await {
                Err(e) => Err(e),
                Ok(_) => Err(TxError::Rejected),
            },
        }
    }
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database")
            .field("transacting", &self.is_transacting())
            .field("config", &self.config)
            .finish()
    }
}
