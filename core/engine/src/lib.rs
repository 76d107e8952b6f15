//! FILENAME: core/engine/src/lib.rs
//! PURPOSE: Main library entry point for the host-side data model.
//! CONTEXT: Re-exports the value, schema, row and sub-query types that table
//! transforms (such as the pivot engine) are written against.

pub mod datetime;
pub mod query;
pub mod row;
pub mod schema;
#[cfg(feature = "sqlite")]
pub mod sqlite;
pub mod value;

// Re-export commonly used types at the crate root
pub use datetime::DateTimeError;
pub use query::{MemoryExecutor, QueryError, QueryExecutor, QueryResult, RowStream};
pub use row::{Row, RowSink};
pub use schema::{ColumnDesc, Schema};
#[cfg(feature = "sqlite")]
pub use sqlite::SqliteExecutor;
pub use value::{ScalarType, ScalarValue};
