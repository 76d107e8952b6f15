//! FILENAME: core/engine/src/query.rs
//! PURPOSE: The sub-query contract a transform uses to run auxiliary queries.
//! CONTEXT: A transform hands query text to a `QueryExecutor` together with a
//! visitor. The visitor sees the result schema plus a lazy stream of rows that
//! the backend produces on demand; the result is closed when the visitor returns.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};

use thiserror::Error;

use crate::row::Row;
use crate::schema::Schema;

#[derive(Error, Debug)]
pub enum QueryError {
    #[error("no result registered for query: {0}")]
    UnknownQuery(String),

    #[error("result row has {actual} values but the result schema has {expected} columns")]
    RowWidth { expected: usize, actual: usize },

    #[error("column '{column}' has unsupported declared type '{declared}'")]
    UnsupportedColumnType { column: String, declared: String },

    #[cfg(feature = "sqlite")]
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
}

/// Lazy, fallible row stream of a query result.
pub type RowStream<'a> = Box<dyn Iterator<Item = Result<Row, QueryError>> + 'a>;

/// An open query result: its shape plus the rows still to be fetched.
pub struct QueryResult<'a> {
    schema: Schema,
    rows: RowStream<'a>,
}

impl<'a> QueryResult<'a> {
    pub fn new(schema: Schema, rows: RowStream<'a>) -> Self {
        QueryResult { schema, rows }
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    /// Fetches the next row, `Ok(None)` once the result is drained.
    pub fn fetch(&mut self) -> Result<Option<Row>, QueryError> {
        match self.rows.next() {
            Some(Ok(row)) if row.len() != self.schema.len() => Err(QueryError::RowWidth {
                expected: self.schema.len(),
                actual: row.len(),
            }),
            Some(Ok(row)) => Ok(Some(row)),
            Some(Err(e)) => Err(e),
            None => Ok(None),
        }
    }
}

/// Runs query text and hands the open result to `visit`.
///
/// Rows are fetched from the backend only as `visit` asks for them, so a
/// failure part way through the result surfaces after the rows before it.
pub trait QueryExecutor {
    fn execute<T, E, F>(&self, query: &str, visit: F) -> Result<T, E>
    where
        E: From<QueryError>,
        F: FnOnce(&mut QueryResult<'_>) -> Result<T, E>;
}

impl<X: QueryExecutor + ?Sized> QueryExecutor for &X {
    fn execute<T, E, F>(&self, query: &str, visit: F) -> Result<T, E>
    where
        E: From<QueryError>,
        F: FnOnce(&mut QueryResult<'_>) -> Result<T, E>,
    {
        (**self).execute(query, visit)
    }
}

// ============================================================================
// IN-MEMORY EXECUTOR
// ============================================================================

/// Serves canned results keyed by query text (surrounding whitespace ignored).
/// Counts executions so callers can observe how often a query actually ran.
#[derive(Debug, Default)]
pub struct MemoryExecutor {
    results: HashMap<String, (Schema, Vec<Row>)>,
    executions: AtomicUsize,
}

impl MemoryExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers (or replaces) the result returned for `query`.
    pub fn register(&mut self, query: &str, schema: Schema, rows: Vec<Row>) {
        self.results.insert(query.trim().to_string(), (schema, rows));
    }

    pub fn with_result(mut self, query: &str, schema: Schema, rows: Vec<Row>) -> Self {
        self.register(query, schema, rows);
        self
    }

    /// Number of `execute` calls that found a registered result.
    pub fn executions(&self) -> usize {
        self.executions.load(Ordering::Relaxed)
    }
}

impl QueryExecutor for MemoryExecutor {
    fn execute<T, E, F>(&self, query: &str, visit: F) -> Result<T, E>
    where
        E: From<QueryError>,
        F: FnOnce(&mut QueryResult<'_>) -> Result<T, E>,
    {
        let (schema, rows) = self
            .results
            .get(query.trim())
            .ok_or_else(|| QueryError::UnknownQuery(query.to_string()))?;
        self.executions.fetch_add(1, Ordering::Relaxed);
        let mut result = QueryResult::new(schema.clone(), Box::new(rows.iter().cloned().map(Ok)));
        visit(&mut result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::ColumnDesc;
    use crate::value::{ScalarType, ScalarValue};

    fn quarters() -> MemoryExecutor {
        MemoryExecutor::new().with_result(
            "select q, label from quarters",
            Schema::new(vec![
                ColumnDesc::varchar("q", 8),
                ColumnDesc::varchar("label", 32),
            ]),
            vec![
                Row::new(vec![ScalarValue::text("Q1"), ScalarValue::text("first")]),
                Row::new(vec![ScalarValue::text("Q2"), ScalarValue::text("second")]),
            ],
        )
    }

    #[test]
    fn test_fetch_drains_rows() {
        let exec = quarters();
        let count = exec
            .execute("  select q, label from quarters ", |result| {
                assert_eq!(result.schema().len(), 2);
                let mut count = 0;
                while let Some(row) = result.fetch()? {
                    assert!(row.get_str(0).is_some());
                    count += 1;
                }
                assert!(result.fetch()?.is_none());
                Ok::<_, QueryError>(count)
            })
            .unwrap();
        assert_eq!(count, 2);
        assert_eq!(exec.executions(), 1);
    }

    #[test]
    fn test_unknown_query() {
        let exec = quarters();
        let err = exec
            .execute("select 1", |_| Ok::<_, QueryError>(()))
            .unwrap_err();
        assert!(matches!(err, QueryError::UnknownQuery(_)));
        assert_eq!(exec.executions(), 0);
    }

    #[test]
    fn test_row_width_mismatch() {
        let exec = MemoryExecutor::new().with_result(
            "q",
            Schema::new(vec![ColumnDesc::new("a", ScalarType::Int)]),
            vec![Row::new(vec![ScalarValue::Int(1), ScalarValue::Int(2)])],
        );
        let err = exec.execute("q", |result| result.fetch()).unwrap_err();
        assert!(matches!(err, QueryError::RowWidth { expected: 1, actual: 2 }));
    }
}
