use serde::Serialize;
use thiserror::Error;

/// Diagnostic record reported by the driver for a failed call.
///
/// Mirrors the fields a caller gets from `SQLGetDiagRec`: the human readable message, the
/// five-character SQLSTATE, and the native error code.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Error)]
#[error("[{sql_state}] {message} (native code {code})")]
pub struct SqlError {
    pub message: String,
    #[serde(rename = "sqlState")]
    pub sql_state: String,
    pub code: i32,
}

impl SqlError {
    #[must_use]
    pub fn new(message: impl Into<String>, sql_state: impl Into<String>, code: i32) -> Self {
        Self {
            message: message.into(),
            sql_state: sql_state.into(),
            code,
        }
    }

    /// Diagnostic used when the driver reports failure without leaving a record behind.
    #[must_use]
    pub fn unknown() -> Self {
        Self::new("unknown driver error", "HY000", 0)
    }
}

#[derive(Debug, Error)]
pub enum OdbcMiddlewareError {
    #[error(transparent)]
    DriverError(#[from] SqlError),

    #[error("Parameter validation error: {0}")]
    ValidationError(String),

    #[error("Unsupported operation: {0}")]
    Unsupported(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Connection error: {0}")]
    ConnectionError(String),

    #[error("Pool error: {0}")]
    PoolError(String),

    #[error("SQL execution error: {0}")]
    ExecutionError(String),

    #[error("Parameter stream error: {0}")]
    StreamError(String),
}

impl OdbcMiddlewareError {
    /// The driver diagnostic carried by this error, if it came from the driver.
    #[must_use]
    pub fn sql_error(&self) -> Option<&SqlError> {
        match self {
            OdbcMiddlewareError::DriverError(err) => Some(err),
            _ => None,
        }
    }

    pub(crate) fn validation(message: impl Into<String>) -> Self {
        OdbcMiddlewareError::ValidationError(message.into())
    }
}

impl From<deadpool::managed::PoolError<SqlError>> for OdbcMiddlewareError {
    fn from(err: deadpool::managed::PoolError<SqlError>) -> Self {
        match err {
            deadpool::managed::PoolError::Backend(sql_err) => OdbcMiddlewareError::DriverError(sql_err),
            other => OdbcMiddlewareError::PoolError(format!("ODBC pool error: {other}")),
        }
    }
}

impl From<deadpool::managed::BuildError> for OdbcMiddlewareError {
    fn from(err: deadpool::managed::BuildError) -> Self {
        OdbcMiddlewareError::ConfigError(format!("Failed to create ODBC pool: {err}"))
    }
}
