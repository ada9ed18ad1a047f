//! Per-transaction configuration

use std::time::Duration;

use serde_json::{Map, Value};

use crate::types::{Connection, IsolationLevel};

/// Options for opening a transaction
///
/// Unset options fall back to the parent transaction (for nested
/// transactions) and then to the [`Config`](crate::Config) of the database
/// the transaction was opened from.
#[derive(Debug, Clone, Default)]
pub struct TransactionConfig {
    pub(crate) connection: Option<Connection>,
    pub(crate) debug: Option<bool>,
    pub(crate) isolation_level: Option<IsolationLevel>,
    pub(crate) read_only: bool,
    pub(crate) user_params: Option<Map<String, Value>>,
    pub(crate) rollback_timeout: Option<Duration>,
}

impl TransactionConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run on a connection owned by the caller. It is never released by the
    /// transaction. Nested transactions ignore it and stay on their parent's
    /// connection.
    pub fn connection(mut self, connection: Connection) -> Self {
        self.connection = Some(connection);
        self
    }

    pub fn debug(mut self, enabled: bool) -> Self {
        self.debug = Some(enabled);
        self
    }

    /// Isolation level for top-level transactions
    pub fn isolation_level(mut self, level: IsolationLevel) -> Self {
        self.isolation_level = Some(level);
        self
    }

    /// Open top-level transactions as READ ONLY
    pub fn read_only(mut self, read_only: bool) -> Self {
        self.read_only = read_only;
        self
    }

    /// Arbitrary parameters made available to the container
    pub fn user_params(mut self, params: Map<String, Value>) -> Self {
        self.user_params = Some(params);
        self
    }

    /// How long ROLLBACK may take before the outcome is settled without it
    pub fn rollback_timeout(mut self, timeout: Duration) -> Self {
        self.rollback_timeout = Some(timeout);
        self
    }

    pub fn external_connection(&self) -> Option<&Connection> {
        self.connection.as_ref()
    }

    /// The `SET TRANSACTION` mode clause, if any mode was requested
    pub(crate) fn transaction_mode(&self) -> Option<String> {
        let mut parts = Vec::new();
        if let Some(level) = self.isolation_level {
            parts.push(format!("ISOLATION LEVEL {}", level.as_sql()));
        }
        if self.read_only {
            parts.push("READ ONLY".to_string());
        }
        if parts.is_empty() {
            None
        } else {
            Some(parts.join(" "))
        }
    }
}
