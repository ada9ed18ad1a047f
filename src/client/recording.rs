//! In-memory recording client
//!
//! A [`Client`] that executes nothing. It hands out numbered connections,
//! records every statement in arrival order, and can be told to fail
//! specific statements, acquisitions or releases. It also counts statements
//! that arrive on a connection while another statement on the same
//! connection is still in flight, which should never happen under the
//! coordinator.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::client::{Client, QueryEvent};
use crate::error::{Result, TxError};
use crate::types::{Connection, ConnectionId, QueryResponse, Statement};

/// A statement as seen by the driver
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutedStatement {
    pub connection: ConnectionId,
    pub sql: String,
}

#[derive(Default)]
struct RecordingState {
    executed: Vec<ExecutedStatement>,
    acquired: Vec<ConnectionId>,
    released: Vec<ConnectionId>,
    in_flight: HashMap<ConnectionId, usize>,
    overlapping: usize,
    /// (sql prefix, driver error message)
    failures: Vec<(String, String)>,
    /// (sql prefix, canned response)
    responses: Vec<(String, QueryResponse)>,
    acquire_error: Option<String>,
    release_error: Option<String>,
    events: Vec<QueryEvent>,
}

/// In-memory client that records statements
pub struct RecordingClient {
    next_connection: AtomicU64,
    latency: Option<Duration>,
    state: Mutex<RecordingState>,
}

impl RecordingClient {
    pub fn new() -> Self {
        Self {
            next_connection: AtomicU64::new(1),
            latency: None,
            state: Mutex::new(RecordingState::default()),
        }
    }

    /// Suspend for `latency` inside every statement, so concurrent callers
    /// get a chance to interleave
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Fail every statement starting with `sql_prefix`
    pub fn fail_on(&self, sql_prefix: impl Into<String>, message: impl Into<String>) {
        self.state.lock().failures.push((sql_prefix.into(), message.into()));
    }

    /// Answer statements starting with `sql_prefix` with `response`
    pub fn respond(&self, sql_prefix: impl Into<String>, response: QueryResponse) {
        self.state.lock().responses.push((sql_prefix.into(), response));
    }

    pub fn fail_acquire(&self, message: impl Into<String>) {
        self.state.lock().acquire_error = Some(message.into());
    }

    pub fn fail_release(&self, message: impl Into<String>) {
        self.state.lock().release_error = Some(message.into());
    }

    /// SQL of every statement that reached the driver, in order
    pub fn statements(&self) -> Vec<String> {
        self.state.lock().executed.iter().map(|s| s.sql.clone()).collect()
    }

    pub fn executed(&self) -> Vec<ExecutedStatement> {
        self.state.lock().executed.clone()
    }

    pub fn acquired(&self) -> Vec<ConnectionId> {
        self.state.lock().acquired.clone()
    }

    pub fn released(&self) -> Vec<ConnectionId> {
        self.state.lock().released.clone()
    }

    /// Statements that started while another one was running on the same connection
    pub fn overlapping_statements(&self) -> usize {
        self.state.lock().overlapping
    }

    /// Events forwarded to this client from transaction-scoped clients
    pub fn events(&self) -> Vec<QueryEvent> {
        self.state.lock().events.clone()
    }
}

impl Default for RecordingClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Client for RecordingClient {
    async fn acquire_connection(&self) -> Result<Connection> {
        let mut state = self.state.lock();
        if let Some(message) = &state.acquire_error {
            return Err(TxError::Acquire(message.clone()));
        }
        let connection = Connection::new(self.next_connection.fetch_add(1, Ordering::SeqCst));
        state.acquired.push(connection.id());
        log::trace!("Acquired {}", connection);
        Ok(connection)
    }

    async fn release_connection(&self, connection: Connection) -> Result<()> {
        let mut state = self.state.lock();
        state.released.push(connection.id());
        match &state.release_error {
            Some(message) => Err(TxError::Release(message.clone())),
            None => Ok(()),
        }
    }

    async fn query(&self, connection: &Connection, statement: &Statement) -> Result<QueryResponse> {
        let id = connection.id();
        let (failure, response) = {
            let mut state = self.state.lock();
            let running = state.in_flight.entry(id).or_insert(0);
            *running += 1;
            if *running > 1 {
                state.overlapping += 1;
            }
            state.executed.push(ExecutedStatement {
                connection: id,
                sql: statement.sql.clone(),
            });
            let failure = state
                .failures
                .iter()
                .find(|(prefix, _)| statement.sql.starts_with(prefix.as_str()))
                .map(|(_, message)| message.clone());
            let response = state
                .responses
                .iter()
                .find(|(prefix, _)| statement.sql.starts_with(prefix.as_str()))
                .map(|(_, response)| response.clone());
            (failure, response)
        };

        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }

        if let Some(running) = self.state.lock().in_flight.get_mut(&id) {
            *running -= 1;
        }

        match failure {
            Some(message) => Err(TxError::Driver(message)),
            None => Ok(response.unwrap_or_default()),
        }
    }

    fn emit(&self, event: &QueryEvent) {
        self.state.lock().events.push(event.clone());
    }
}
