pub mod result_set;
pub mod row;

pub use result_set::{ColumnMetadata, QueryOutcome, QueryResult, ResultSet};
pub use row::CustomDbRow;
