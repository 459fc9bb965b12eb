use std::collections::HashMap;
use std::sync::Arc;

use serde::Serialize;

use super::row::{CustomDbRow, index_columns};
use crate::codec::NativeBuffer;
use crate::driver::{ColumnDescription, SqlReturn, StatementHandle, driver_error};
use crate::error::OdbcMiddlewareError;
use crate::types::FetchMode;

/// Description of one result column, as reported to callers that enable metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ColumnMetadata {
    pub name: String,
    pub size: usize,
    pub data_type: String,
    pub digits: i16,
    pub nullable: bool,
}

impl From<&ColumnDescription> for ColumnMetadata {
    fn from(desc: &ColumnDescription) -> Self {
        Self {
            name: desc.name.clone(),
            size: desc.column_size,
            data_type: desc.sql_type.name().to_string(),
            digits: desc.decimal_digits,
            nullable: desc.nullable,
        }
    }
}

/// Rows in the shape the caller asked for.
#[derive(Debug, Clone)]
pub enum QueryResult {
    /// First row, if any.
    Single(Option<CustomDbRow>),
    Array(Vec<CustomDbRow>),
}

impl QueryResult {
    /// All rows, whatever the fetch mode.
    #[must_use]
    pub fn rows(&self) -> &[CustomDbRow] {
        match self {
            QueryResult::Single(row) => row.as_slice(),
            QueryResult::Array(rows) => rows,
        }
    }

    #[must_use]
    pub fn into_rows(self) -> Vec<CustomDbRow> {
        match self {
            QueryResult::Single(row) => row.into_iter().collect(),
            QueryResult::Array(rows) => rows,
        }
    }
}

/// What a successful query resolves with.
#[derive(Debug, Clone)]
pub struct QueryOutcome {
    pub result: QueryResult,
    /// Driver row count for statements without a result set, rows fetched otherwise.
    pub rows_affected: i64,
    /// Procedure return code, when the query enabled it.
    pub return_value: Option<i32>,
    /// Column descriptions, when the query enabled them.
    pub metadata: Option<Vec<ColumnMetadata>>,
}

/// Rows fetched from one executed statement, before they are handed to the caller.
#[derive(Debug, Clone)]
pub struct ResultSet {
    fetch_mode: FetchMode,
    with_metadata: bool,
    columns: Vec<ColumnDescription>,
    column_names: Arc<Vec<String>>,
    column_index: Arc<HashMap<String, usize>>,
    rows: Vec<CustomDbRow>,
    rows_affected: i64,
}

impl ResultSet {
    #[must_use]
    pub fn new(fetch_mode: FetchMode, with_metadata: bool) -> Self {
        Self {
            fetch_mode,
            with_metadata,
            columns: Vec::new(),
            column_names: Arc::new(Vec::new()),
            column_index: Arc::new(HashMap::new()),
            rows: Vec::new(),
            rows_affected: 0,
        }
    }

    #[must_use]
    pub fn fetch_mode(&self) -> FetchMode {
        self.fetch_mode
    }

    #[must_use]
    pub fn rows(&self) -> &[CustomDbRow] {
        &self.rows
    }

    #[must_use]
    pub fn columns(&self) -> &[ColumnDescription] {
        &self.columns
    }

    /// Pull every row (or the first, in [`FetchMode::Single`]) off an executed statement.
    ///
    /// `no_data` is set when execution itself reported that nothing was produced; the result
    /// is then empty without asking the driver.
    ///
    /// # Errors
    /// Returns the driver diagnostic of the first failing call, or a decode error.
    pub fn fetch_results(
        &mut self,
        statement: &mut dyn StatementHandle,
        no_data: bool,
    ) -> Result<(), OdbcMiddlewareError> {
        if no_data {
            tracing::trace!("statement produced no data");
            return Ok(());
        }

        let column_count = statement
            .num_result_cols()
            .map_err(|_| driver_error(statement))?;
        if column_count == 0 {
            self.rows_affected = statement.row_count().map_err(|_| driver_error(statement))?;
            return Ok(());
        }

        let mut columns = Vec::with_capacity(usize::from(column_count));
        for column in 1..=column_count {
            let desc = statement
                .describe_column(column)
                .map_err(|_| driver_error(statement))?;
            columns.push(desc);
        }
        let names: Vec<String> = columns.iter().map(|c| c.name.clone()).collect();
        self.column_index = Arc::new(index_columns(&names));
        self.column_names = Arc::new(names);
        self.columns = columns;

        loop {
            match statement.fetch() {
                SqlReturn::NoData => break,
                status if status.succeeded() => {}
                _ => return Err(driver_error(statement)),
            }
            let row = self.read_row(statement)?;
            self.rows.push(row);
            if self.fetch_mode == FetchMode::Single {
                break;
            }
        }
        self.rows_affected = i64::try_from(self.rows.len()).unwrap_or(i64::MAX);
        tracing::trace!(rows = self.rows.len(), columns = column_count, "fetched result set");
        Ok(())
    }

    fn read_row(
        &self,
        statement: &mut dyn StatementHandle,
    ) -> Result<CustomDbRow, OdbcMiddlewareError> {
        let mut values = Vec::with_capacity(self.columns.len());
        for (idx, desc) in self.columns.iter().enumerate() {
            let column = u16::try_from(idx + 1).unwrap_or(u16::MAX);
            let mut buffer = NativeBuffer::for_column(desc.sql_type, desc.column_size);
            let indicator = statement
                .get_data(column, &mut buffer)
                .map_err(|_| driver_error(statement))?;
            values.push(buffer.decode(indicator)?);
        }
        Ok(CustomDbRow::with_cache(
            Arc::clone(&self.column_names),
            Arc::clone(&self.column_index),
            values,
        ))
    }

    /// Build the value the caller is resolved with.
    #[must_use]
    pub fn construct_result(self, return_value: Option<i32>) -> QueryOutcome {
        let metadata = self
            .with_metadata
            .then(|| self.columns.iter().map(ColumnMetadata::from).collect());
        let result = match self.fetch_mode {
            FetchMode::Single => QueryResult::Single(self.rows.into_iter().next()),
            FetchMode::Array => QueryResult::Array(self.rows),
        };
        QueryOutcome {
            result,
            rows_affected: self.rows_affected,
            return_value,
            metadata,
        }
    }
}
