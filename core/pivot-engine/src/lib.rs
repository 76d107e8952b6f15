//! FILENAME: core/pivot-engine/src/lib.rs
//! Pivot transform subsystem.
//!
//! This crate turns a stream of narrow rows (one row per group and pivot key)
//! into wide rows (one row per group, one block of columns per pivot key).
//! The set of blocks and their column names come from a mapping query run
//! through the host's `QueryExecutor`. It depends on `engine` only for shared
//! types (ScalarValue, Schema, Row, QueryExecutor).
//!
//! Layers:
//! - `definition`: Named parameters and their validation (what the pivot IS)
//! - `canonical`: Key normalization shared by the map and the row stream
//! - `cache`: The session pivot map (HOW keys find blocks)
//! - `view`: Output schema and output rows (WHAT the host receives)
//! - `engine`: Row transformer and lifecycle (HOW rows are pivoted)

#[macro_use]
pub mod logging;

pub mod error;
pub mod definition;
pub mod canonical;
pub mod cache;
pub mod view;
pub mod engine;

pub use error::{ErrorKind, PivotError, PivotResult};
pub use definition::*;
pub use canonical::KeyKind;
pub use cache::*;
pub use view::*;
pub use crate::engine::{pivot_sorted, PartitionState, PivotFunction, RowTransformer};
