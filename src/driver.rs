//! Interfaces to the blocking driver layer.
//!
//! A real binding implements these traits over an ODBC driver manager. Every method may block;
//! the engine only calls them from background workers. Buffers bound with
//! [`StatementHandle::bind_parameter`] are lent back to the driver for each call that may read
//! or write them through [`BoundParameters`], instead of the driver retaining raw pointers.

use std::time::Duration;

use serde::Serialize;

use crate::binding::BoundParameters;
use crate::codec::NativeBuffer;
use crate::error::{OdbcMiddlewareError, SqlError};
use crate::native::{CDataType, ParamDirection, SqlDataType};

/// Status returned by a driver call (`SQLRETURN`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SqlReturn {
    Success,
    SuccessWithInfo,
    NeedData,
    NoData,
    StillExecuting,
    Error,
    InvalidHandle,
}

impl SqlReturn {
    #[must_use]
    pub fn from_code(code: i16) -> Self {
        match code {
            0 => SqlReturn::Success,
            1 => SqlReturn::SuccessWithInfo,
            2 => SqlReturn::StillExecuting,
            99 => SqlReturn::NeedData,
            100 => SqlReturn::NoData,
            -2 => SqlReturn::InvalidHandle,
            _ => SqlReturn::Error,
        }
    }

    #[must_use]
    pub fn code(self) -> i16 {
        match self {
            SqlReturn::Success => 0,
            SqlReturn::SuccessWithInfo => 1,
            SqlReturn::StillExecuting => 2,
            SqlReturn::NeedData => 99,
            SqlReturn::NoData => 100,
            SqlReturn::Error => -1,
            SqlReturn::InvalidHandle => -2,
        }
    }

    /// `SQL_SUCCEEDED`: success, with or without diagnostics.
    #[must_use]
    pub fn succeeded(self) -> bool {
        matches!(self, SqlReturn::Success | SqlReturn::SuccessWithInfo)
    }
}

/// Everything `SQLBindParameter` receives for one ordinal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BindDescriptor {
    pub ordinal: u16,
    pub direction: ParamDirection,
    pub c_type: CDataType,
    pub sql_type: SqlDataType,
    pub column_size: usize,
    pub decimal_digits: i16,
    pub buffer_length: usize,
    /// Initial length-or-indicator value.
    pub indicator: isize,
    /// Token handed back by `param_data` when this parameter is supplied at execution time.
    pub data_at_exec_token: Option<u16>,
}

/// Result column description (`SQLDescribeCol`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnDescription {
    pub name: String,
    pub sql_type: SqlDataType,
    pub column_size: usize,
    pub decimal_digits: i16,
    pub nullable: bool,
}

/// Driver and DBMS details of an open connection (`SQLGetInfo`).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionInfo {
    pub driver_name: String,
    pub driver_version: String,
    pub database_name: String,
    /// ODBC version the driver manager speaks, e.g. `03.80`.
    pub odbc_version: String,
    pub dbms_name: String,
    /// Filled in by the engine from its own options, not by the driver.
    pub odbc_connection_string: String,
}

/// Opaque connection handle a statement is allocated on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionHandle(pub u64);

/// Entry point of a driver binding: opens connections.
pub trait Driver: Send + Sync {
    /// Open a connection. Blocks.
    ///
    /// # Errors
    /// Returns the driver diagnostic when the connection cannot be established.
    fn connect(
        &self,
        connection_string: &str,
        login_timeout: Option<Duration>,
    ) -> Result<Box<dyn DriverConnection>, SqlError>;
}

/// An open driver connection, owned by the pool between leases.
pub trait DriverConnection: Send {
    fn handle(&self) -> ConnectionHandle;

    /// Create an unallocated statement wrapper for this connection.
    fn new_statement(&self) -> Box<dyn StatementHandle>;

    /// Read driver and DBMS details. Blocks. `odbc_connection_string` may be left empty.
    ///
    /// # Errors
    /// Returns the driver diagnostic when an info request fails.
    fn info(&self) -> Result<ConnectionInfo, SqlError>;

    /// Cached liveness flag. Must not block; called from the pool on the async runtime.
    fn is_dead(&self) -> bool {
        false
    }
}

/// Statement-level driver calls in the order the query engine issues them.
pub trait StatementHandle: Send {
    fn alloc_handle(&mut self, connection: ConnectionHandle) -> SqlReturn;

    fn bind_parameter(&mut self, descriptor: &BindDescriptor) -> SqlReturn;

    fn set_statement_attribute(&mut self, attribute: i32, value: usize) -> SqlReturn;

    fn exec_direct(&mut self, sql: &str, params: &mut BoundParameters<'_>) -> SqlReturn;

    /// `SQLParamData`. On `NeedData` the second element is the token of the parameter whose
    /// payload is wanted next.
    fn param_data(&mut self, params: &mut BoundParameters<'_>) -> (SqlReturn, Option<u16>);

    fn put_data(&mut self, chunk: &[u8]) -> SqlReturn;

    /// # Errors
    /// Returns the failing status; the diagnostic is available from [`Self::last_error`].
    fn num_result_cols(&mut self) -> Result<u16, SqlReturn>;

    /// # Errors
    /// Returns the failing status; the diagnostic is available from [`Self::last_error`].
    fn describe_column(&mut self, column: u16) -> Result<ColumnDescription, SqlReturn>;

    fn fetch(&mut self) -> SqlReturn;

    /// Read column `column` of the current row into `target`, returning the length-or-indicator.
    ///
    /// # Errors
    /// Returns the failing status; the diagnostic is available from [`Self::last_error`].
    fn get_data(&mut self, column: u16, target: &mut NativeBuffer) -> Result<isize, SqlReturn>;

    /// # Errors
    /// Returns the failing status; the diagnostic is available from [`Self::last_error`].
    fn row_count(&mut self) -> Result<i64, SqlReturn>;

    fn free_handle(&mut self);

    /// Diagnostic record for the most recent failed call.
    fn last_error(&mut self) -> SqlError;
}

/// Capture the statement's current diagnostic as an engine error.
pub(crate) fn driver_error(statement: &mut dyn StatementHandle) -> OdbcMiddlewareError {
    OdbcMiddlewareError::DriverError(statement.last_error())
}
