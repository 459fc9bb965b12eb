use std::collections::HashMap;
use std::sync::Arc;

use crate::types::SqlValue;

/// A row from a query result
///
/// Column names and the name lookup table are shared by every row of one result.
#[derive(Debug, Clone)]
pub struct CustomDbRow {
    /// The column names for this row (shared across all rows in a result set)
    pub column_names: Arc<Vec<String>>,
    /// The values for this row, in column order
    pub values: Vec<SqlValue>,
    #[doc(hidden)]
    pub(crate) column_index_cache: Arc<HashMap<String, usize>>,
}

impl CustomDbRow {
    #[must_use]
    pub fn new(column_names: Arc<Vec<String>>, values: Vec<SqlValue>) -> Self {
        let cache = Arc::new(index_columns(&column_names));
        Self::with_cache(column_names, cache, values)
    }

    pub(crate) fn with_cache(
        column_names: Arc<Vec<String>>,
        column_index_cache: Arc<HashMap<String, usize>>,
        values: Vec<SqlValue>,
    ) -> Self {
        Self {
            column_names,
            values,
            column_index_cache,
        }
    }

    /// Get the index of a column by name
    #[must_use]
    pub fn get_column_index(&self, column_name: &str) -> Option<usize> {
        if let Some(&idx) = self.column_index_cache.get(column_name) {
            return Some(idx);
        }
        self.column_names.iter().position(|col| col == column_name)
    }

    /// Get a value from the row by column name
    #[must_use]
    pub fn get(&self, column_name: &str) -> Option<&SqlValue> {
        self.get_column_index(column_name)
            .and_then(|idx| self.values.get(idx))
    }

    #[must_use]
    pub fn get_by_index(&self, index: usize) -> Option<&SqlValue> {
        self.values.get(index)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// First occurrence wins for duplicate column names.
pub(crate) fn index_columns(column_names: &[String]) -> HashMap<String, usize> {
    let mut cache = HashMap::with_capacity(column_names.len());
    for (idx, name) in column_names.iter().enumerate() {
        cache.entry(name.clone()).or_insert(idx);
    }
    cache
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_by_name_and_index() {
        let names = Arc::new(vec!["id".to_string(), "name".to_string(), "id".to_string()]);
        let row = CustomDbRow::new(
            names,
            vec![
                SqlValue::Int(1),
                SqlValue::Text("a".into()),
                SqlValue::Int(2),
            ],
        );
        assert_eq!(row.get("id"), Some(&SqlValue::Int(1)));
        assert_eq!(row.get("name").and_then(SqlValue::as_text), Some("a"));
        assert_eq!(row.get_by_index(2), Some(&SqlValue::Int(2)));
        assert!(row.get("missing").is_none());
    }
}
