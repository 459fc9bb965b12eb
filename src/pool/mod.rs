pub mod manager;

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use deadpool::managed::{Object, Pool};

pub use manager::OdbcManager;

use crate::driver::Driver;
use crate::error::OdbcMiddlewareError;

/// A connection leased from the pool. Dropping it hands the connection back.
pub type PooledConnection = Object<OdbcManager>;

/// Point-in-time view of pool usage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PoolStats {
    pub max_size: usize,
    /// Connections currently open, leased or idle.
    pub size: usize,
    pub available: usize,
    /// Leases handed out and not yet returned.
    pub leased: usize,
    pub total_leases: usize,
    pub total_returns: usize,
    /// Queries created and not yet finalized.
    pub active_queries: usize,
    pub finalized_queries: usize,
}

#[derive(Debug, Default)]
struct Counters {
    leases: AtomicUsize,
    returns: AtomicUsize,
    registered: AtomicUsize,
    finalized: AtomicUsize,
}

/// Pool of driver connections shared by every query of one [`crate::OdbcConnection`].
#[derive(Clone)]
pub struct ConnectionPool {
    inner: Pool<OdbcManager>,
    counters: Arc<Counters>,
}

impl fmt::Debug for ConnectionPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionPool")
            .field("stats", &self.status())
            .finish()
    }
}

impl ConnectionPool {
    /// Build a pool of at most `max_size` connections. Connections are opened lazily.
    ///
    /// # Errors
    /// Returns [`OdbcMiddlewareError::ConfigError`] if the pool cannot be built.
    pub fn new(
        driver: Arc<dyn Driver>,
        connection_string: String,
        login_timeout: Option<Duration>,
        max_size: usize,
    ) -> Result<Self, OdbcMiddlewareError> {
        if max_size == 0 {
            return Err(OdbcMiddlewareError::ConfigError(
                "pool size must be at least 1".into(),
            ));
        }
        let manager = OdbcManager::new(driver, connection_string, login_timeout);
        let inner = Pool::builder(manager).max_size(max_size).build()?;
        Ok(Self {
            inner,
            counters: Arc::new(Counters::default()),
        })
    }

    /// Lease a connection for the exclusive use of one query.
    ///
    /// # Errors
    /// Returns the driver diagnostic if a new connection cannot be opened, or a pool error if
    /// the pool is closed.
    pub async fn lease_connection(&self) -> Result<PooledConnection, OdbcMiddlewareError> {
        let connection = self.inner.get().await?;
        self.counters.leases.fetch_add(1, Ordering::AcqRel);
        tracing::trace!(handle = connection.handle().0, "leased connection");
        Ok(connection)
    }

    /// Hand a leased connection back. The pool does not reissue it before this call.
    pub fn return_connection(&self, connection: PooledConnection) {
        tracing::trace!(handle = connection.handle().0, "returned connection");
        drop(connection);
        self.counters.returns.fetch_add(1, Ordering::AcqRel);
    }

    pub(crate) fn register_query(&self) {
        self.counters.registered.fetch_add(1, Ordering::AcqRel);
    }

    /// Bookkeeping hook run once per query when it is destroyed, independent of connection
    /// return.
    pub fn finalize_query(&self) {
        self.counters.finalized.fetch_add(1, Ordering::AcqRel);
    }

    #[must_use]
    pub fn status(&self) -> PoolStats {
        let status = self.inner.status();
        let leases = self.counters.leases.load(Ordering::Acquire);
        let returns = self.counters.returns.load(Ordering::Acquire);
        let registered = self.counters.registered.load(Ordering::Acquire);
        let finalized = self.counters.finalized.load(Ordering::Acquire);
        PoolStats {
            max_size: status.max_size,
            size: status.size,
            available: status.available,
            leased: leases.saturating_sub(returns),
            total_leases: leases,
            total_returns: returns,
            active_queries: registered.saturating_sub(finalized),
            finalized_queries: finalized,
        }
    }

    /// Close the pool. Idle connections are dropped; leased ones are dropped when returned.
    pub fn close(&self) {
        tracing::debug!("closing ODBC connection pool");
        self.inner.close();
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.inner.is_closed()
    }
}

#[cfg(all(test, feature = "test-utils"))]
mod tests {
    use super::*;
    use crate::test_utils::MockDriver;

    #[tokio::test]
    async fn lease_and_return_are_counted() {
        let driver = Arc::new(MockDriver::default());
        let pool = ConnectionPool::new(driver.clone(), "DSN=mock".into(), None, 2).unwrap();
        let conn = pool.lease_connection().await.unwrap();
        assert_eq!(pool.status().leased, 1);
        pool.return_connection(conn);
        let stats = pool.status();
        assert_eq!((stats.leased, stats.total_returns), (0, 1));
        assert_eq!(stats.available, 1);
    }

    #[tokio::test]
    async fn failed_connect_surfaces_driver_error() {
        let driver = Arc::new(MockDriver::default());
        driver.fail_connect(crate::error::SqlError::new("login failed", "28000", 18456));
        let pool = ConnectionPool::new(driver, "DSN=mock".into(), None, 1).unwrap();
        let err = pool.lease_connection().await.err().unwrap();
        assert_eq!(err.sql_error().map(|e| e.code), Some(18456));
    }

    #[test]
    fn zero_sized_pool_is_rejected() {
        let driver = Arc::new(MockDriver::default());
        assert!(ConnectionPool::new(driver, String::new(), None, 0).is_err());
    }
}
