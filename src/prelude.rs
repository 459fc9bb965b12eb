//! Convenient imports for common functionality.
//!
//! This module re-exports the types most callers need to open a connection, pass
//! parameters and read results.

pub use crate::binding::{
    BytesSource, OutputSlot, ReaderSource, SqlArg, SqlOutput, StreamSource, make_input_stream,
};
pub use crate::config::{OdbcOptions, OdbcOptionsBuilder};
pub use crate::connection::{OdbcConnection, QueryBuilder};
pub use crate::driver::{ConnectionInfo, Driver, DriverConnection, StatementHandle};
pub use crate::error::{OdbcMiddlewareError, SqlError};
pub use crate::results::{ColumnMetadata, CustomDbRow, QueryOutcome, QueryResult};
pub use crate::types::{FetchMode, NumericValue, SqlType, SqlValue, make_numeric, make_timestamp};
