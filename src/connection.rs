use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::binding::{ParameterBinding, SqlArg};
use crate::config::{OdbcOptions, OdbcOptionsBuilder};
use crate::driver::{ConnectionInfo, Driver};
use crate::error::OdbcMiddlewareError;
use crate::pool::ConnectionPool;
use crate::query::{Query, QueryHandle, QuerySettings};
use crate::results::QueryOutcome;
use crate::types::FetchMode;
use crate::worker::QueryScheduler;

/// Entry point for callers: a connection pool plus the scheduler that runs queries on it.
///
/// Cheap to clone; clones share the pool and the worker threads, which stop when the last
/// clone is dropped.
#[derive(Clone)]
pub struct OdbcConnection {
    pool: ConnectionPool,
    scheduler: Arc<QueryScheduler>,
    options: Arc<OdbcOptions>,
}

impl fmt::Debug for OdbcConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OdbcConnection")
            .field("pool", &self.pool)
            .field("scheduler", &self.scheduler)
            .finish_non_exhaustive()
    }
}

impl OdbcConnection {
    #[must_use]
    pub fn builder(connection_string: String) -> OdbcOptionsBuilder {
        OdbcOptionsBuilder::new(connection_string)
    }

    /// Build the pool, open one connection as a smoke test, and start the workers.
    ///
    /// # Errors
    /// Returns `ConfigError` for invalid options, or the driver diagnostic if the first
    /// connection cannot be opened.
    pub async fn connect(
        driver: Arc<dyn Driver>,
        options: OdbcOptions,
    ) -> Result<Self, OdbcMiddlewareError> {
        options.validate()?;
        let pool = ConnectionPool::new(
            driver,
            options.connection_string.clone(),
            options.login_timeout,
            options.pool_size,
        )?;
        {
            let connection = pool.lease_connection().await?;
            pool.return_connection(connection);
        }
        let scheduler = QueryScheduler::start(options.worker_threads)?;
        tracing::debug!(
            pool_size = options.pool_size,
            workers = options.worker_threads,
            "ODBC connection ready"
        );
        Ok(Self {
            pool,
            scheduler: Arc::new(scheduler),
            options: Arc::new(options),
        })
    }

    /// Start building a query. Arguments bind in order, after the return value if enabled.
    #[must_use]
    pub fn prepare_query(&self, sql: impl Into<String>, args: Vec<SqlArg>) -> QueryBuilder {
        QueryBuilder {
            connection: self.clone(),
            sql: sql.into(),
            args,
            settings: QuerySettings {
                fetch_mode: self.options.fetch_mode,
                return_value: false,
                metadata: false,
                timeout: self.options.query_timeout,
            },
        }
    }

    /// Run a query and wait for its result.
    ///
    /// # Errors
    /// Returns a validation error for bad arguments before anything reaches the driver, or the
    /// error the query failed with.
    pub async fn execute_query(
        &self,
        fetch_mode: FetchMode,
        sql: impl Into<String>,
        args: Vec<SqlArg>,
    ) -> Result<QueryOutcome, OdbcMiddlewareError> {
        self.prepare_query(sql, args).execute(fetch_mode).await
    }

    /// Driver and DBMS details, read from a leased connection on a blocking thread.
    ///
    /// # Errors
    /// Returns a pool error if no connection can be leased, or the driver diagnostic if the
    /// driver cannot answer.
    pub async fn get_info(&self) -> Result<ConnectionInfo, OdbcMiddlewareError> {
        let connection = self.pool.lease_connection().await?;
        let (connection, info) = tokio::task::spawn_blocking(move || {
            let info = connection.info();
            (connection, info)
        })
        .await
        .map_err(|err| {
            OdbcMiddlewareError::ExecutionError(format!("ODBC spawn_blocking join error: {err}"))
        })?;
        self.pool.return_connection(connection);
        let mut info = info?;
        info.odbc_connection_string
            .clone_from(&self.options.connection_string);
        Ok(info)
    }

    #[must_use]
    pub fn pool(&self) -> &ConnectionPool {
        &self.pool
    }

    #[must_use]
    pub fn options(&self) -> &OdbcOptions {
        &self.options
    }

    /// Stop handing out connections. Queries already running finish normally.
    pub fn close(&self) {
        self.pool.close();
    }
}

/// A query being configured; nothing runs until [`QueryBuilder::to_single`],
/// [`QueryBuilder::to_array`] or [`QueryBuilder::submit`].
#[derive(Debug)]
pub struct QueryBuilder {
    connection: OdbcConnection,
    sql: String,
    args: Vec<SqlArg>,
    settings: QuerySettings,
}

impl QueryBuilder {
    /// Bind the procedure return code; it comes back in [`QueryOutcome::return_value`].
    #[must_use]
    pub fn enable_return_value(mut self) -> Self {
        self.settings.return_value = true;
        self
    }

    /// Report column descriptions in [`QueryOutcome::metadata`].
    #[must_use]
    pub fn enable_metadata(mut self) -> Self {
        self.settings.metadata = true;
        self
    }

    /// Timeout enforced by the driver. A statement that is already running cannot be cancelled
    /// any other way.
    #[must_use]
    pub fn set_query_timeout(mut self, timeout: Duration) -> Self {
        self.settings.timeout = Some(timeout);
        self
    }

    /// Run and resolve with the first row only.
    ///
    /// # Errors
    /// See [`OdbcConnection::execute_query`].
    pub async fn to_single(self) -> Result<QueryOutcome, OdbcMiddlewareError> {
        self.execute(FetchMode::Single).await
    }

    /// Run and resolve with every row.
    ///
    /// # Errors
    /// See [`OdbcConnection::execute_query`].
    pub async fn to_array(self) -> Result<QueryOutcome, OdbcMiddlewareError> {
        self.execute(FetchMode::Array).await
    }

    async fn execute(mut self, fetch_mode: FetchMode) -> Result<QueryOutcome, OdbcMiddlewareError> {
        self.settings.fetch_mode = fetch_mode;
        self.submit().await?.outcome().await
    }

    /// Validate the arguments, lease a connection and hand the query to the workers without
    /// waiting for it.
    ///
    /// # Errors
    /// Returns a validation error for bad arguments (no connection is leased in that case), or
    /// a pool error if no connection can be leased.
    pub async fn submit(self) -> Result<QueryHandle, OdbcMiddlewareError> {
        let params = self
            .args
            .into_iter()
            .map(ParameterBinding::from_arg)
            .collect::<Result<Vec<_>, _>>()?;
        let pool = self.connection.pool.clone();
        let leased = pool.lease_connection().await?;
        let (query, handle) = Query::new(pool, leased, self.sql, params, self.settings);
        self.connection.scheduler.submit(query)?;
        Ok(handle)
    }
}
