use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use deadpool::managed::{Manager, Metrics, RecycleError, RecycleResult};

use crate::driver::{Driver, DriverConnection};
use crate::error::SqlError;

/// deadpool manager that opens driver connections off the async runtime.
pub struct OdbcManager {
    driver: Arc<dyn Driver>,
    connection_string: String,
    login_timeout: Option<Duration>,
}

impl OdbcManager {
    #[must_use]
    pub fn new(
        driver: Arc<dyn Driver>,
        connection_string: String,
        login_timeout: Option<Duration>,
    ) -> Self {
        Self {
            driver,
            connection_string,
            login_timeout,
        }
    }
}

impl fmt::Debug for OdbcManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Connection strings usually carry credentials.
        f.debug_struct("OdbcManager")
            .field("connection_string", &"<redacted>")
            .field("login_timeout", &self.login_timeout)
            .finish_non_exhaustive()
    }
}

impl Manager for OdbcManager {
    type Type = Box<dyn DriverConnection>;
    type Error = SqlError;

    async fn create(&self) -> Result<Self::Type, Self::Error> {
        let driver = Arc::clone(&self.driver);
        let connection_string = self.connection_string.clone();
        let login_timeout = self.login_timeout;
        let connection =
            tokio::task::spawn_blocking(move || driver.connect(&connection_string, login_timeout))
                .await
                .map_err(|err| {
                    SqlError::new(format!("connect task failed: {err}"), "08001", 0)
                })??;
        tracing::debug!(handle = connection.handle().0, "opened ODBC connection");
        Ok(connection)
    }

    async fn recycle(&self, conn: &mut Self::Type, _metrics: &Metrics) -> RecycleResult<Self::Error> {
        if conn.is_dead() {
            tracing::debug!(handle = conn.handle().0, "discarding dead ODBC connection");
            return Err(RecycleError::Backend(SqlError::new(
                "connection is no longer usable",
                "08S01",
                0,
            )));
        }
        Ok(())
    }
}
