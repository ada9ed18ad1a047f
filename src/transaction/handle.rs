//! Transaction handle and the task that drives it
//!
//! Opening a transaction spawns one tokio task that waits for the
//! transaction's turn, leases a connection, issues BEGIN or SAVEPOINT, runs
//! the container in its own task and finally gives the connection back once
//! the outcome has settled. The [`Transaction`] returned to the caller only
//! observes that task.

use std::future::{Future, IntoFuture};
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Map;
use tokio::sync::watch;
use tokio::task::JoinError;

use crate::client::{Client, QueryObserver};
use crate::error::{Result, TxError};
use crate::transaction::config::TransactionConfig;
use crate::transaction::lease::ConnectionLease;
use crate::transaction::machine::{Completion, TxCore};
use crate::transaction::scoped::{ScopedClient, ScopedClientConfig};
use crate::transaction::state::{TransactionStatus, TxState};
use crate::transaction::transactor::Transactor;
use crate::Config;

pub(crate) type BoxFuture<O> = Pin<Box<dyn Future<Output = O> + Send>>;

/// Container as run by the driver task. `None` means the container does not
/// produce an outcome and the caller settles the transaction explicitly.
pub(crate) type Body<T> = Box<dyn FnOnce(Transactor<T>) -> BoxFuture<Option<Result<T>>> + Send>;

/// Wrap a user container so its result commits or rolls back the transaction
pub(crate) fn chained<T, F, Fut>(container: F) -> Body<T>
where
    T: Clone + Send + Sync + 'static,
    F: FnOnce(Transactor<T>) -> Fut + Send + 'static,
    Fut: Future<Output = Result<T>> + Send + 'static,
{
    Box::new(move |transactor: Transactor<T>| -> BoxFuture<Option<Result<T>>> {
        Box::pin(async move { Some(container(transactor).await) })
    })
}

/// A running or finished transaction
///
/// Await it (or call [`Transaction::completion`]) for the committed value or
/// the rollback error. Handles are cheap to clone; every clone observes the
/// same outcome.
pub struct Transaction<T> {
    state: Arc<TxState>,
    outcome: watch::Receiver<Option<Result<T>>>,
}

impl<T> Clone for Transaction<T> {
    fn clone(&self) -> Self {
        Self {
            state: Arc::clone(&self.state),
            outcome: self.outcome.clone(),
        }
    }
}

impl<T: Clone + Send + Sync + 'static> Transaction<T> {
    /// Open a transaction through `client` and run `container` inside it
    ///
    /// If `client` is itself scoped to a transaction, the new transaction is
    /// a savepoint nested in it and waits for its earlier siblings. The
    /// container's `Ok` value commits, its `Err` rolls back.
    ///
    /// Must be called from within a tokio runtime.
    pub fn open<F, Fut>(client: Arc<dyn Client>, container: F, config: TransactionConfig) -> Self
    where
        F: FnOnce(Transactor<T>) -> Fut + Send + 'static,
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        Self::start(client, chained(container), config, &Config::default())
    }

    pub(crate) fn start(
        client: Arc<dyn Client>,
        body: Body<T>,
        config: TransactionConfig,
        defaults: &Config,
    ) -> Self {
        let parent = client.scope().map(|scope| scope.state);
        let debug = config
            .debug
            .or_else(|| parent.as_ref().map(|p| p.is_debug()))
            .unwrap_or(defaults.debug);
        let user_params = config
            .user_params
            .clone()
            .or_else(|| parent.as_ref().map(|p| p.user_params().clone()))
            .unwrap_or_else(Map::new);
        let rollback_timeout = config
            .rollback_timeout
            .unwrap_or_else(|| defaults.rollback_timeout());

        let state = TxState::new(parent, debug, user_params);
        let completion = Completion::new(Arc::clone(&state));
        log::log!(
            state.log_level(),
            "{}: starting {} transaction",
            state.id(),
            if client.is_transacting() { "nested" } else { "top level" }
        );

        let handle = Self {
            state: Arc::clone(&state),
            outcome: completion.subscribe(),
        };
        tokio::spawn(drive(client, body, config, rollback_timeout, state, completion));
        handle
    }

    pub(crate) fn from_parts(state: Arc<TxState>, completion: &Completion<T>) -> Self {
        Self {
            state,
            outcome: completion.subscribe(),
        }
    }

    pub fn id(&self) -> &str {
        self.state.id()
    }

    /// Id of the enclosing transaction, for nested transactions
    pub fn parent_id(&self) -> Option<&str> {
        self.state.parent().map(|parent| parent.id())
    }

    pub fn is_nested(&self) -> bool {
        self.state.parent().is_some()
    }

    /// True once this transaction or any enclosing transaction completed
    pub fn is_completed(&self) -> bool {
        self.state.is_completed()
    }

    pub fn status(&self) -> TransactionStatus {
        self.state.status()
    }

    /// Nested transactions created under this one that have not settled yet
    pub fn pending_children(&self) -> usize {
        self.state.pending_children()
    }

    /// Watch every statement issued by this transaction and the transactions
    /// nested in it
    pub fn on_query(&self, observer: impl QueryObserver + 'static) -> &Self {
        self.state.add_observer(Arc::new(observer));
        self
    }

    pub fn is_debug(&self) -> bool {
        self.state.is_debug()
    }

    pub fn set_debug(&self, enabled: bool) -> &Self {
        self.state.set_debug(enabled);
        self
    }

    /// Wait until the transaction let go of its connection. This happens
    /// after the outcome settles.
    pub async fn finished(&self) {
        self.state.wait_finished().await;
    }

    /// The outcome, if it has settled
    pub fn try_outcome(&self) -> Option<Result<T>> {
        self.outcome.borrow().clone()
    }

    /// Wait for the committed value or the rollback error
    pub async fn completion(&self) -> Result<T> {
        let mut outcome = self.outcome.clone();
        let settled = match outcome.wait_for(|slot| slot.is_some()).await {
            Ok(slot) => (*slot).clone(),
            Err(_) => None,
        };
        settled.unwrap_or_else(|| {
            Err(TxError::Panicked(format!(
                "transaction {} ended without an outcome",
                self.state.id()
            )))
        })
    }
}

impl<T: Clone + Send + Sync + 'static> IntoFuture for Transaction<T> {
    type Output = Result<T>;
    type IntoFuture = BoxFuture<Result<T>>;

    fn into_future(self) -> Self::IntoFuture {
        Box::pin(async move { self.completion().await })
    }
}

impl<T> std::fmt::Debug for Transaction<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transaction").field("state", &self.state).finish()
    }
}

async fn drive<T: Clone + Send + Sync + 'static>(
    client: Arc<dyn Client>,
    body: Body<T>,
    config: TransactionConfig,
    rollback_timeout: Duration,
    state: Arc<TxState>,
    completion: Arc<Completion<T>>,
) {
    run(client, body, config, rollback_timeout, &state, completion).await;
    state.mark_finished();
}

async fn run<T: Clone + Send + Sync + 'static>(
    client: Arc<dyn Client>,
    body: Body<T>,
    config: TransactionConfig,
    rollback_timeout: Duration,
    state: &Arc<TxState>,
    completion: Arc<Completion<T>>,
) {
    state.wait_for_turn().await;
    if let Err(e) = state.ensure_parent_active() {
        log::warn!("{}", e);
        completion.settle(Err(e));
        return;
    }

    // A nested transaction always runs on its parent's connection
    let nested = client.is_transacting();
    let supplied = match &config.connection {
        Some(connection) if nested => {
            log::warn!(
                "{}: ignoring connection {} for nested transaction",
                state.id(),
                connection
            );
            None
        }
        supplied => supplied.clone(),
    };

    let lease = match ConnectionLease::acquire(client.as_ref(), supplied, state).await {
        Ok(lease) => lease,
        Err(e) => {
            log::error!("{}: {}", state.id(), e);
            completion.settle(Err(e));
            return;
        }
    };

    let driver = client.driver().unwrap_or_else(|| Arc::clone(&client));
    let scoped = Arc::new(ScopedClient::new(
        Arc::clone(state),
        ScopedClientConfig {
            connection: lease.connection().clone(),
            transacting: true,
            driver,
        },
        Arc::clone(&client),
    ));
    let core = Arc::new(TxCore::new(
        Arc::clone(state),
        scoped,
        Arc::clone(&completion),
        nested,
        rollback_timeout,
        config.transaction_mode(),
    ));

    let init = if nested { core.savepoint().await } else { core.begin().await };
    if init.is_ok() {
        state.set_status(TransactionStatus::Active);
        run_container(body, Transactor::new(core)).await;
    }

    state.wait_settled().await;
    lease.release(client.as_ref(), state).await;
}

async fn run_container<T: Clone + Send + Sync + 'static>(body: Body<T>, transactor: Transactor<T>) {
    let task = tokio::spawn({
        let transactor = transactor.clone();
        async move { body(transactor).await }
    });
    let result = match task.await {
        Ok(Some(result)) => result,
        Ok(None) => return,
        Err(e) => Err(TxError::Panicked(panic_message(e))),
    };

    if transactor.is_own_completed() {
        log::log!(
            transactor.log_level(),
            "{}: already completed by the container",
            transactor.id()
        );
        return;
    }
    // Errors are reflected in the settled outcome
    let _ = match result {
        Ok(value) => transactor.commit(value).await,
        Err(e) => transactor.rollback(Some(e)).await,
    };
}

fn panic_message(error: JoinError) -> String {
    if error.is_cancelled() {
        return "container task was cancelled".to_string();
    }
    let payload = error.into_panic();
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
