use std::sync::Arc;
use std::time::Duration;

use crate::connection::OdbcConnection;
use crate::driver::Driver;
use crate::error::OdbcMiddlewareError;
use crate::types::FetchMode;

pub const DEFAULT_POOL_SIZE: usize = 10;
pub const DEFAULT_WORKER_THREADS: usize = 4;

/// Options for opening an [`OdbcConnection`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OdbcOptions {
    pub connection_string: String,
    /// Maximum number of pooled driver connections.
    pub pool_size: usize,
    /// Blocking threads that run driver calls.
    pub worker_threads: usize,
    pub login_timeout: Option<Duration>,
    /// Applied to queries that do not set their own timeout.
    pub query_timeout: Option<Duration>,
    pub fetch_mode: FetchMode,
}

impl OdbcOptions {
    #[must_use]
    pub fn new(connection_string: String) -> Self {
        Self {
            connection_string,
            pool_size: DEFAULT_POOL_SIZE,
            worker_threads: DEFAULT_WORKER_THREADS,
            login_timeout: None,
            query_timeout: None,
            fetch_mode: FetchMode::default(),
        }
    }

    #[must_use]
    pub fn with_pool_size(mut self, pool_size: usize) -> Self {
        self.pool_size = pool_size;
        self
    }

    /// # Errors
    /// Returns `ConfigError` for an empty connection string, a zero pool size or zero workers.
    pub fn validate(&self) -> Result<(), OdbcMiddlewareError> {
        if self.connection_string.trim().is_empty() {
            return Err(OdbcMiddlewareError::ConfigError(
                "connection string must not be empty".into(),
            ));
        }
        if self.pool_size == 0 {
            return Err(OdbcMiddlewareError::ConfigError(
                "pool size must be at least 1".into(),
            ));
        }
        if self.worker_threads == 0 {
            return Err(OdbcMiddlewareError::ConfigError(
                "at least one worker thread is required".into(),
            ));
        }
        Ok(())
    }
}

/// Fluent builder for ODBC options.
#[derive(Debug, Clone)]
pub struct OdbcOptionsBuilder {
    opts: OdbcOptions,
}

impl OdbcOptionsBuilder {
    #[must_use]
    pub fn new(connection_string: String) -> Self {
        Self {
            opts: OdbcOptions::new(connection_string),
        }
    }

    #[must_use]
    pub fn pool_size(mut self, pool_size: usize) -> Self {
        self.opts.pool_size = pool_size;
        self
    }

    #[must_use]
    pub fn worker_threads(mut self, worker_threads: usize) -> Self {
        self.opts.worker_threads = worker_threads;
        self
    }

    #[must_use]
    pub fn login_timeout(mut self, timeout: Duration) -> Self {
        self.opts.login_timeout = Some(timeout);
        self
    }

    #[must_use]
    pub fn query_timeout(mut self, timeout: Duration) -> Self {
        self.opts.query_timeout = Some(timeout);
        self
    }

    #[must_use]
    pub fn fetch_mode(mut self, fetch_mode: FetchMode) -> Self {
        self.opts.fetch_mode = fetch_mode;
        self
    }

    #[must_use]
    pub fn finish(self) -> OdbcOptions {
        self.opts
    }

    /// Open an [`OdbcConnection`] with these options.
    ///
    /// # Errors
    /// Returns `OdbcMiddlewareError` if the options are invalid or the initial connection fails.
    pub async fn build(self, driver: Arc<dyn Driver>) -> Result<OdbcConnection, OdbcMiddlewareError> {
        OdbcConnection::connect(driver, self.finish()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_sets_every_option() {
        let opts = OdbcOptionsBuilder::new("DSN=warehouse".into())
            .pool_size(3)
            .worker_threads(2)
            .login_timeout(Duration::from_secs(5))
            .query_timeout(Duration::from_millis(1500))
            .fetch_mode(FetchMode::Single)
            .finish();
        assert_eq!(opts.pool_size, 3);
        assert_eq!(opts.worker_threads, 2);
        assert_eq!(opts.login_timeout, Some(Duration::from_secs(5)));
        assert_eq!(opts.query_timeout, Some(Duration::from_millis(1500)));
        assert_eq!(opts.fetch_mode, FetchMode::Single);
        assert!(opts.validate().is_ok());
    }

    #[test]
    fn invalid_options_are_rejected() {
        assert!(OdbcOptions::new("  ".into()).validate().is_err());
        assert!(OdbcOptions::new("DSN=x".into()).with_pool_size(0).validate().is_err());
        let mut opts = OdbcOptions::new("DSN=x".into());
        opts.worker_threads = 0;
        assert!(opts.validate().is_err());
    }
}
