//! The per-query state machine.
//!
//! A [`Query`] is driven in two alternating phases. The background phase
//! ([`Query::process_background`]) makes the blocking driver calls and may only run on a
//! worker thread. The foreground phase ([`Query::process_foreground`]) never blocks; it writes
//! output slots and resolves the caller. Pulling streamed payloads may block, so it is a separate
//! step ([`Query::supply_stream_data`]) the scheduler runs on a blocking thread. No two phases
//! ever run concurrently for one query: the scheduler moves the query between them.

mod background;
mod foreground;
pub mod state;

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tokio::sync::oneshot;
use tokio::sync::oneshot::error::TryRecvError;

pub use state::{ForegroundResult, QueryState};

use crate::binding::ParameterBinding;
use crate::driver::StatementHandle;
use crate::error::OdbcMiddlewareError;
use crate::pool::{ConnectionPool, PooledConnection};
use crate::results::{QueryOutcome, ResultSet};
use crate::types::FetchMode;

static NEXT_QUERY_ID: AtomicU64 = AtomicU64::new(1);

type Resolution = Result<QueryOutcome, OdbcMiddlewareError>;

/// Per-query options chosen by the caller.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QuerySettings {
    pub fetch_mode: FetchMode,
    /// Bind a procedure return code ahead of the declared parameters.
    pub return_value: bool,
    /// Report column descriptions with the result.
    pub metadata: bool,
    /// Forwarded to the driver. The only way a running statement is cut short.
    pub timeout: Option<Duration>,
}

/// Caller side of a query: resolves once the query reaches its end.
#[derive(Debug)]
pub struct QueryHandle {
    id: u64,
    receiver: oneshot::Receiver<Resolution>,
}

impl QueryHandle {
    #[must_use]
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Wait for the query to resolve.
    ///
    /// # Errors
    /// Returns the error the query failed with, or `ConnectionError` if the query was dropped
    /// before resolving (e.g. the scheduler shut down).
    pub async fn outcome(self) -> Resolution {
        self.receiver.await.unwrap_or_else(|_| Err(dropped()))
    }

    /// Non-blocking check; `None` while the query is still running.
    pub fn try_outcome(&mut self) -> Option<Resolution> {
        match self.receiver.try_recv() {
            Ok(resolution) => Some(resolution),
            Err(TryRecvError::Empty) => None,
            Err(TryRecvError::Closed) => Some(Err(dropped())),
        }
    }
}

fn dropped() -> OdbcMiddlewareError {
    OdbcMiddlewareError::ConnectionError("query was dropped before it resolved".into())
}

/// One statement execution, from leased connection to resolved caller.
pub struct Query {
    id: u64,
    sql: String,
    params: Vec<ParameterBinding>,
    return_value: Option<ParameterBinding>,
    state: QueryState,
    timeout: Option<Duration>,
    error: Option<OdbcMiddlewareError>,
    no_data: bool,
    /// Index into `params` of the stream the driver is waiting on.
    active_stream: Option<usize>,
    pool: ConnectionPool,
    connection: Option<PooledConnection>,
    statement: Option<Box<dyn StatementHandle>>,
    result_set: Option<ResultSet>,
    resolver: Option<oneshot::Sender<Resolution>>,
    background_runs: usize,
    data_requests: usize,
}

impl fmt::Debug for Query {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Query")
            .field("id", &self.id)
            .field("sql", &self.sql)
            .field("state", &self.state)
            .field("params", &self.params.len())
            .field("has_connection", &self.connection.is_some())
            .field("error", &self.error)
            .finish_non_exhaustive()
    }
}

impl Query {
    /// Create a query in [`QueryState::ExecuteStatement`] on an already leased connection.
    pub fn new(
        pool: ConnectionPool,
        connection: PooledConnection,
        sql: impl Into<String>,
        params: Vec<ParameterBinding>,
        settings: QuerySettings,
    ) -> (Self, QueryHandle) {
        let id = NEXT_QUERY_ID.fetch_add(1, Ordering::Relaxed);
        let (resolver, receiver) = oneshot::channel();
        pool.register_query();
        let query = Self {
            id,
            sql: sql.into(),
            params,
            return_value: settings.return_value.then(ParameterBinding::return_value),
            state: QueryState::ExecuteStatement,
            timeout: settings.timeout,
            error: None,
            no_data: false,
            active_stream: None,
            pool,
            connection: Some(connection),
            statement: None,
            result_set: Some(ResultSet::new(settings.fetch_mode, settings.metadata)),
            resolver: Some(resolver),
            background_runs: 0,
            data_requests: 0,
        };
        tracing::debug!(query = id, sql = %query.sql, "created query");
        (query, QueryHandle { id, receiver })
    }

    #[must_use]
    pub fn id(&self) -> u64 {
        self.id
    }

    #[must_use]
    pub fn sql(&self) -> &str {
        &self.sql
    }

    #[must_use]
    pub fn state(&self) -> QueryState {
        self.state
    }

    /// Failure recorded by the background phase, until the foreground phase reports it.
    #[must_use]
    pub fn error(&self) -> Option<&OdbcMiddlewareError> {
        self.error.as_ref()
    }

    /// Execution reported that the statement produced no data.
    #[must_use]
    pub fn no_data(&self) -> bool {
        self.no_data
    }

    #[must_use]
    pub fn has_connection(&self) -> bool {
        self.connection.is_some()
    }

    #[must_use]
    pub fn active_stream(&self) -> Option<usize> {
        self.active_stream
    }

    #[must_use]
    pub fn params(&self) -> &[ParameterBinding] {
        &self.params
    }

    #[must_use]
    pub fn background_runs(&self) -> usize {
        self.background_runs
    }

    /// Number of foreground steps that pulled streamed parameter data.
    #[must_use]
    pub fn data_requests(&self) -> usize {
        self.data_requests
    }

    fn transition(&mut self, next: QueryState) {
        tracing::debug!(query = self.id, from = %self.state, to = %next, "query state transition");
        self.state = next;
    }

    fn fail(&mut self, err: OdbcMiddlewareError) {
        tracing::warn!(query = self.id, state = %self.state, error = %err, "query failed");
        self.error = Some(err);
        self.transition(QueryState::End);
    }

    fn release_statement(&mut self) {
        if let Some(mut statement) = self.statement.take() {
            statement.free_handle();
        }
    }
}

impl Drop for Query {
    fn drop(&mut self) {
        self.release_statement();
        if let Some(connection) = self.connection.take() {
            tracing::warn!(query = self.id, state = %self.state, "query dropped while holding a connection");
            self.pool.return_connection(connection);
        }
        if let Some(binding) = self.return_value.as_mut() {
            binding.dispose();
        }
        for binding in &mut self.params {
            binding.dispose();
        }
        self.pool.finalize_query();
    }
}
