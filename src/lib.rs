//! Asynchronous query engine over a blocking, handle-based ODBC-style driver.
//!
//! Driver calls block, so they run on dedicated worker threads; everything a caller can
//! observe (streamed parameter payloads, output parameters, the final result) happens on a
//! single foreground task. Each [`query::Query`] moves between the two as a state machine.
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use odbc_middleware::prelude::*;
//!
//! # async fn run(driver: Arc<dyn Driver>) -> Result<(), OdbcMiddlewareError> {
//! let conn = OdbcConnection::builder("DSN=warehouse".into())
//!     .pool_size(4)
//!     .build(driver)
//!     .await?;
//!
//! let total = OutputSlot::default();
//! let outcome = conn
//!     .prepare_query(
//!         "{ ? = call order_total(?, ?) }",
//!         vec![SqlValue::Int(42).into(), SqlOutput::as_int(&total)],
//!     )
//!     .enable_return_value()
//!     .to_single()
//!     .await?;
//! println!("rc={:?} total={:?}", outcome.return_value, total.get());
//! # Ok(())
//! # }
//! ```

pub mod binding;
pub mod codec;
pub mod config;
pub mod connection;
pub mod driver;
pub mod error;
pub mod native;
pub mod pool;
pub mod prelude;
pub mod query;
pub mod results;
pub mod types;
pub mod worker;

#[cfg(feature = "test-utils")]
pub mod test_utils;

pub use binding::{
    BytesSource, OutputSlot, ParameterBinding, ReaderSource, SqlArg, SqlOutput, StreamSource,
    make_input_stream,
};
pub use config::{OdbcOptions, OdbcOptionsBuilder};
pub use connection::{OdbcConnection, QueryBuilder};
pub use driver::ConnectionInfo;
pub use error::{OdbcMiddlewareError, SqlError};
pub use pool::{ConnectionPool, PoolStats};
pub use query::{Query, QueryHandle, QuerySettings, QueryState};
pub use results::{ColumnMetadata, CustomDbRow, QueryOutcome, QueryResult, ResultSet};
pub use types::{FetchMode, NumericValue, SqlType, SqlValue, make_numeric, make_timestamp};
