//! Error types for txnest
//!
//! Defines a unified error type for the coordinator, the scoped client and
//! the drivers plugged in behind it. Errors are `Clone` because a single
//! transaction outcome can be observed by several awaiters at once.

use std::fmt;
use std::io;

/// Broad classification of a [`TxError`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// The caller misused a transaction (wrong connection, completed transaction)
    Usage,
    /// A SQL statement failed in the driver
    Driver,
    /// A connection could not be acquired or released
    Resource,
    /// Raised by user code inside a container, or by the surrounding application
    Application,
}

/// Unified error type for txnest operations
#[derive(Debug, Clone, PartialEq)]
pub enum TxError {
    /// Query issued with a connection that is not the transaction's connection
    InvalidConnection { transaction: String },
    /// Query issued after the transaction (or an ancestor) completed
    Completed { transaction: String, sql: String },
    /// Child transaction whose parent completed before its turn came
    ParentCompleted { transaction: String, parent: String },
    /// SQL statement failed in the driver
    Driver(String),
    /// Connection acquisition failed
    Acquire(String),
    /// Connection release failed
    Release(String),
    /// Transaction rolled back without a reason
    Rejected,
    /// ROLLBACK did not finish before the deadline
    Timeout { transaction: String, millis: u64 },
    /// Error raised by user code
    User(String),
    /// Container task panicked
    Panicked(String),
    /// Invalid configuration value
    Config(String),
    /// I/O error (config files)
    Io(String),
}

impl TxError {
    /// Create an application error from any message
    pub fn user(message: impl Into<String>) -> Self {
        TxError::User(message.into())
    }

    /// Create a driver error from any message
    pub fn driver(message: impl Into<String>) -> Self {
        TxError::Driver(message.into())
    }

    /// Classify this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            TxError::InvalidConnection { .. }
            | TxError::Completed { .. }
            | TxError::ParentCompleted { .. } => ErrorKind::Usage,
            TxError::Driver(_) | TxError::Timeout { .. } => ErrorKind::Driver,
            TxError::Acquire(_) | TxError::Release(_) => ErrorKind::Resource,
            TxError::Rejected
            | TxError::User(_)
            | TxError::Panicked(_)
            | TxError::Config(_)
            | TxError::Io(_) => ErrorKind::Application,
        }
    }

    pub fn is_usage_error(&self) -> bool {
        self.kind() == ErrorKind::Usage
    }

    pub fn is_driver_error(&self) -> bool {
        self.kind() == ErrorKind::Driver
    }

    pub fn is_resource_error(&self) -> bool {
        self.kind() == ErrorKind::Resource
    }
}

impl fmt::Display for TxError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TxError::InvalidConnection { transaction } => {
                write!(f, "Invalid connection for transaction query ({})", transaction)
            }
            TxError::Completed { transaction, sql } => write!(
                f,
                "Transaction {} already completed, refusing to run: {}",
                transaction, sql
            ),
            TxError::ParentCompleted { transaction, parent } => write!(
                f,
                "Transaction {} not started: parent transaction {} already completed",
                transaction, parent
            ),
            TxError::Driver(msg) => write!(f, "{}", msg),
            TxError::Acquire(msg) => write!(f, "Failed to acquire connection: {}", msg),
            TxError::Release(msg) => write!(f, "Failed to release connection: {}", msg),
            TxError::Rejected => write!(f, "Transaction rejected with non-error"),
            TxError::Timeout { transaction, millis } => write!(
                f,
                "Rollback of transaction {} timed out after {} ms",
                transaction, millis
            ),
            TxError::User(msg) => write!(f, "{}", msg),
            TxError::Panicked(msg) => write!(f, "Transaction container panicked: {}", msg),
            TxError::Config(msg) => write!(f, "Invalid configuration: {}", msg),
            TxError::Io(msg) => write!(f, "{}", msg),
        }
    }
}

impl std::error::Error for TxError {}

impl From<io::Error> for TxError {
    fn from(e: io::Error) -> Self {
        TxError::Io(e.to_string())
    }
}

impl From<serde_json::Error> for TxError {
    fn from(e: serde_json::Error) -> Self {
        TxError::Config(e.to_string())
    }
}

/// Result type alias for txnest operations
pub type Result<T> = std::result::Result<T, TxError>;
