//! Shared, untyped transaction state
//!
//! Everything a transaction tree needs to know about its members regardless
//! of what value each member commits: ids, parent links, the completion flag,
//! the child queue and the query observers.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::{Map, Value};
use tokio::sync::watch;

use crate::client::{QueryEvent, QueryObserver};
use crate::error::{Result, TxError};

/// Savepoint names must be unique across every open transaction tree in the process
static NEXT_TRANSACTION_ID: AtomicU64 = AtomicU64::new(1);

fn next_transaction_id() -> String {
    format!("trx{}", NEXT_TRANSACTION_ID.fetch_add(1, Ordering::Relaxed))
}

/// Lifecycle of a transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionStatus {
    /// Waiting for its turn or for a connection
    Connecting,
    /// BEGIN/SAVEPOINT issued, container running
    Active,
    /// COMMIT/ROLLBACK (or their savepoint forms) issued
    Completing,
    /// Outcome settled
    Completed,
}

pub(crate) struct TxState {
    id: String,
    parent: Option<Arc<TxState>>,
    completed: AtomicBool,
    status: Mutex<TransactionStatus>,
    debug: AtomicBool,
    /// Settled-signals of children, in creation order
    child_queue: Mutex<Vec<watch::Receiver<bool>>>,
    /// Settled-signal of the sibling queued just before this transaction
    turn: Option<watch::Receiver<bool>>,
    settled: watch::Sender<bool>,
    /// Set once the driver task is done with the connection
    finished: watch::Sender<bool>,
    observers: Mutex<Vec<Arc<dyn QueryObserver>>>,
    user_params: Map<String, Value>,
}

impl TxState {
    /// Create the state for a new transaction and, when nested, enqueue it
    /// behind its earlier siblings
    pub(crate) fn new(
        parent: Option<Arc<TxState>>,
        debug: bool,
        user_params: Map<String, Value>,
    ) -> Arc<Self> {
        let (settled, settled_rx) = watch::channel(false);
        let turn = parent
            .as_ref()
            .and_then(|parent| parent.enqueue_child(settled_rx));
        Arc::new(Self {
            id: next_transaction_id(),
            parent,
            completed: AtomicBool::new(false),
            status: Mutex::new(TransactionStatus::Connecting),
            debug: AtomicBool::new(debug),
            child_queue: Mutex::new(Vec::new()),
            turn,
            settled,
            finished: watch::channel(false).0,
            observers: Mutex::new(Vec::new()),
            user_params,
        })
    }

    pub(crate) fn id(&self) -> &str {
        &self.id
    }

    pub(crate) fn parent(&self) -> Option<&Arc<TxState>> {
        self.parent.as_ref()
    }

    pub(crate) fn user_params(&self) -> &Map<String, Value> {
        &self.user_params
    }

    /// Append a child's settled-signal, returning the one it must wait for
    fn enqueue_child(&self, settled: watch::Receiver<bool>) -> Option<watch::Receiver<bool>> {
        let mut queue = self.child_queue.lock();
        queue.retain(|child| !*child.borrow());
        let previous = queue.last().cloned();
        queue.push(settled);
        previous
    }

    /// Children created but not yet settled
    pub(crate) fn pending_children(&self) -> usize {
        self.child_queue
            .lock()
            .iter()
            .filter(|child| !*child.borrow())
            .count()
    }

    /// Wait until the previous sibling settled. Returns early if the parent
    /// settles first, since the previous sibling may then never get to run.
    pub(crate) async fn wait_for_turn(&self) {
        let Some(turn) = &self.turn else {
            return;
        };
        let mut turn = turn.clone();
        match &self.parent {
            Some(parent) => {
                let mut parent_settled = parent.settled.subscribe();
                tokio::select! {
                    _ = turn.wait_for(|done| *done) => {}
                    _ = parent_settled.wait_for(|done| *done) => {}
                }
            }
            None => {
                let _ = turn.wait_for(|done| *done).await;
            }
        }
    }

    /// Refuse to start under a parent that already completed
    pub(crate) fn ensure_parent_active(&self) -> Result<()> {
        match &self.parent {
            Some(parent) if parent.is_completed() => Err(TxError::ParentCompleted {
                transaction: self.id.clone(),
                parent: parent.id.clone(),
            }),
            _ => Ok(()),
        }
    }

    /// True once this transaction or any ancestor completed
    pub(crate) fn is_completed(&self) -> bool {
        self.completed.load(Ordering::SeqCst)
            || self.parent.as_ref().map_or(false, |parent| parent.is_completed())
    }

    /// True once this transaction itself completed
    pub(crate) fn is_own_completed(&self) -> bool {
        self.completed.load(Ordering::SeqCst)
    }

    /// Returns false if it was already marked
    pub(crate) fn mark_completed(&self) -> bool {
        !self.completed.swap(true, Ordering::SeqCst)
    }

    pub(crate) fn mark_settled(&self) {
        self.set_status(TransactionStatus::Completed);
        self.settled.send_replace(true);
    }

    pub(crate) async fn wait_settled(&self) {
        let mut settled = self.settled.subscribe();
        let _ = settled.wait_for(|done| *done).await;
    }

    pub(crate) fn mark_finished(&self) {
        self.finished.send_replace(true);
    }

    pub(crate) async fn wait_finished(&self) {
        let mut finished = self.finished.subscribe();
        let _ = finished.wait_for(|done| *done).await;
    }

    pub(crate) fn status(&self) -> TransactionStatus {
        *self.status.lock()
    }

    pub(crate) fn set_status(&self, status: TransactionStatus) {
        *self.status.lock() = status;
    }

    pub(crate) fn is_debug(&self) -> bool {
        self.debug.load(Ordering::Relaxed)
    }

    pub(crate) fn set_debug(&self, enabled: bool) {
        self.debug.store(enabled, Ordering::Relaxed);
    }

    /// Lifecycle messages go to `info` for transactions in debug mode
    pub(crate) fn log_level(&self) -> log::Level {
        if self.is_debug() {
            log::Level::Info
        } else {
            log::Level::Debug
        }
    }

    pub(crate) fn add_observer(&self, observer: Arc<dyn QueryObserver>) {
        self.observers.lock().push(observer);
    }

    pub(crate) fn notify(&self, event: &QueryEvent) {
        // Observers may register more observers
        let observers = self.observers.lock().clone();
        for observer in observers {
            observer.on_query(event);
        }
    }
}

impl fmt::Debug for TxState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TxState")
            .field("id", &self.id)
            .field("parent", &self.parent.as_ref().map(|p| p.id.clone()))
            .field("completed", &self.is_own_completed())
            .field("status", &self.status())
            .finish()
    }
}

/// Opaque handle to the transaction a client is scoped to
#[derive(Clone, Debug)]
pub struct TransactionScope {
    pub(crate) state: Arc<TxState>,
}

impl TransactionScope {
    pub(crate) fn new(state: Arc<TxState>) -> Self {
        Self { state }
    }

    pub fn id(&self) -> &str {
        self.state.id()
    }

    pub fn is_completed(&self) -> bool {
        self.state.is_completed()
    }
}
