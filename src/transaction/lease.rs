//! Connection lease
//!
//! Holds the connection a transaction runs on. A lease is consumed by
//! [`ConnectionLease::release`], so it can be given back at most once.
//! Connections supplied by the caller are never given back.

use crate::client::Client;
use crate::error::{Result, TxError};
use crate::transaction::state::TxState;
use crate::types::Connection;

pub(crate) struct ConnectionLease {
    connection: Connection,
    owned: bool,
}

impl ConnectionLease {
    /// Use `supplied` if given, otherwise take a connection from `client`
    pub(crate) async fn acquire(
        client: &dyn Client,
        supplied: Option<Connection>,
        state: &TxState,
    ) -> Result<Self> {
        if let Some(connection) = supplied {
            log::log!(
                state.log_level(),
                "{}: using external connection {}",
                state.id(),
                connection
            );
            return Ok(Self { connection, owned: false });
        }

        let connection = client.acquire_connection().await.map_err(|e| match e {
            TxError::Acquire(_) => e,
            other => TxError::Acquire(other.to_string()),
        })?;
        log::log!(state.log_level(), "{}: acquired connection {}", state.id(), connection);
        Ok(Self { connection, owned: true })
    }

    pub(crate) fn connection(&self) -> &Connection {
        &self.connection
    }

    /// Give the connection back. Failures are logged, never returned: the
    /// transaction outcome has already been settled at this point.
    pub(crate) async fn release(self, client: &dyn Client, state: &TxState) {
        if !self.owned {
            log::log!(
                state.log_level(),
                "{}: not releasing external connection {}",
                state.id(),
                self.connection
            );
            return;
        }

        log::log!(state.log_level(), "{}: releasing connection {}", state.id(), self.connection);
        let id = self.connection.id();
        if let Err(e) = client.release_connection(self.connection).await {
            log::error!("{}: failed to release connection {}: {}", state.id(), id, e);
        }
    }
}
