//! Core types for txnest
//!
//! Defines connections, statements, query responses and transaction modes
//! shared by the coordinator and the clients plugged in behind it.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;

use crate::error::TxError;

/// Identifier of a physical connection handed out by a client
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ConnectionId(pub u64);

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn#{}", self.0)
    }
}

/// Handle to a physical connection
///
/// Handles are cheap to clone. Two handles compare equal when they refer to
/// the same physical connection, which is what the scoped client checks on
/// every query.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Connection {
    id: ConnectionId,
}

impl Connection {
    pub fn new(id: u64) -> Self {
        Self { id: ConnectionId(id) }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }
}

impl fmt::Display for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.id)
    }
}

/// A result row, keyed by column name
pub type Row = Map<String, Value>;

/// A compiled SQL statement with its positional bindings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Statement {
    pub sql: String,
    #[serde(default)]
    pub bindings: Vec<Value>,
}

impl Statement {
    pub fn new(sql: impl Into<String>) -> Self {
        Self {
            sql: sql.into(),
            bindings: Vec::new(),
        }
    }

    /// Append a positional binding
    pub fn bind(mut self, value: impl Into<Value>) -> Self {
        self.bindings.push(value.into());
        self
    }

    pub fn sql(&self) -> &str {
        &self.sql
    }
}

impl From<&str> for Statement {
    fn from(sql: &str) -> Self {
        Statement::new(sql)
    }
}

impl From<String> for Statement {
    fn from(sql: String) -> Self {
        Statement::new(sql)
    }
}

impl fmt::Display for Statement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.sql)
    }
}

/// Result of a single query
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueryResponse {
    pub rows: Vec<Row>,
    pub rows_affected: u64,
}

impl QueryResponse {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn with_rows(rows: Vec<Row>) -> Self {
        Self { rows, rows_affected: 0 }
    }

    pub fn affected(rows_affected: u64) -> Self {
        Self { rows: Vec::new(), rows_affected }
    }

    /// First row, if any
    pub fn first(&self) -> Option<&Row> {
        self.rows.first()
    }
}

/// Options for streaming queries
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamOptions {
    /// Rows buffered by the driver before it waits on the sink
    pub high_water_mark: usize,
}

impl Default for StreamOptions {
    fn default() -> Self {
        Self { high_water_mark: 16 }
    }
}

/// SQL isolation levels accepted by `SET TRANSACTION`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IsolationLevel {
    ReadUncommitted,
    ReadCommitted,
    Snapshot,
    RepeatableRead,
    Serializable,
}

impl IsolationLevel {
    pub fn as_sql(&self) -> &'static str {
        match self {
            IsolationLevel::ReadUncommitted => "READ UNCOMMITTED",
            IsolationLevel::ReadCommitted => "READ COMMITTED",
            IsolationLevel::Snapshot => "SNAPSHOT",
            IsolationLevel::RepeatableRead => "REPEATABLE READ",
            IsolationLevel::Serializable => "SERIALIZABLE",
        }
    }
}

impl fmt::Display for IsolationLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_sql())
    }
}

impl FromStr for IsolationLevel {
    type Err = TxError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase().replace(['-', '_'], " ");
        match normalized.as_str() {
            "read uncommitted" => Ok(IsolationLevel::ReadUncommitted),
            "read committed" => Ok(IsolationLevel::ReadCommitted),
            "snapshot" => Ok(IsolationLevel::Snapshot),
            "repeatable read" => Ok(IsolationLevel::RepeatableRead),
            "serializable" => Ok(IsolationLevel::Serializable),
            _ => Err(TxError::Config(format!("unknown isolation level '{}'", s))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_identity() {
        let a = Connection::new(1);
        let b = a.clone();
        assert_eq!(a, b);
        assert_ne!(a, Connection::new(2));
        assert_eq!(a.to_string(), "conn#1");
    }

    #[test]
    fn test_statement_bindings() {
        let stmt = Statement::new("INSERT INTO users (id, name) VALUES (?, ?)")
            .bind(1)
            .bind("alice");
        assert_eq!(stmt.bindings.len(), 2);
        assert_eq!(stmt.bindings[1], Value::String("alice".to_string()));
    }

    #[test]
    fn test_isolation_level_parse() {
        assert_eq!("serializable".parse::<IsolationLevel>().unwrap(), IsolationLevel::Serializable);
        assert_eq!(
            "repeatable-read".parse::<IsolationLevel>().unwrap(),
            IsolationLevel::RepeatableRead
        );
        assert_eq!(
            "READ_COMMITTED".parse::<IsolationLevel>().unwrap(),
            IsolationLevel::ReadCommitted
        );
        assert!("chaos".parse::<IsolationLevel>().is_err());
    }
}
