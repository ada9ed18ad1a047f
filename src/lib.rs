//! txnest - client-side SQL transaction coordinator
//!
//! Runs a logical transaction, and any transactions nested inside it, on a
//! single connection. Nested transactions become savepoints, siblings are
//! serialized so the connection never sees two of them at once, and the
//! client handed to user code refuses to run anything once its transaction
//! is over.
//!
//! ```text
//! Database::transaction(container, config)
//!   → lease connection (pool or caller-supplied)
//!   → BEGIN; / SAVEPOINT trxN;
//!   → container(Transactor)
//!   → COMMIT; / RELEASE SAVEPOINT trxN;   on Ok
//!     ROLLBACK; / ROLLBACK TO SAVEPOINT trxN;   on Err or panic
//!   → settle outcome → release connection
//! ```
//!
//! The crate does not build SQL, pool connections or speak any wire
//! protocol. Those live behind the [`client::Client`] trait.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

pub mod client;
pub mod database;
pub mod error;
pub mod transaction;
pub mod types;

pub use database::Database;
pub use error::{ErrorKind, Result, TxError};

/// Environment variable enabling debug logging of transaction lifecycles
pub const DEBUG_ENV: &str = "TXNEST_DEBUG";
/// Environment variable overriding the rollback deadline, in milliseconds
pub const ROLLBACK_TIMEOUT_ENV: &str = "TXNEST_ROLLBACK_TIMEOUT_MS";

/// Client-wide defaults for transactions
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Log transaction lifecycles at `info` instead of `debug`
    pub debug: bool,
    /// How long ROLLBACK may take before the outcome is settled without it
    pub rollback_timeout_ms: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            debug: false,
            rollback_timeout_ms: 5000,
        }
    }
}

impl Config {
    /// Defaults overridden by `TXNEST_DEBUG` and `TXNEST_ROLLBACK_TIMEOUT_MS`
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();
        if let Ok(value) = std::env::var(DEBUG_ENV) {
            config.debug = matches!(value.trim(), "1" | "true" | "yes" | "on");
        }
        if let Ok(value) = std::env::var(ROLLBACK_TIMEOUT_ENV) {
            config.rollback_timeout_ms = value.trim().parse().map_err(|_| {
                TxError::Config(format!("{} must be a number of milliseconds, got '{}'", ROLLBACK_TIMEOUT_ENV, value))
            })?;
        }
        Ok(config)
    }

    /// Load from a JSON file; missing fields keep their defaults
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&text)?)
    }

    pub fn rollback_timeout(&self) -> Duration {
        Duration::from_millis(self.rollback_timeout_ms)
    }
}
