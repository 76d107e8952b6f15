//! FILENAME: core/pivot-engine/src/error.rs

use engine::{QueryError, ScalarType};
use thiserror::Error;

use crate::canonical::KeyKind;

/// Broad classification of a `PivotError`, for hosts that report by category.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Malformed or missing named parameters.
    Configuration,
    /// The mapping query result has the wrong shape or content.
    Schema,
    /// A streamed row cannot be placed.
    Data,
    /// A pivot key type outside the supported set.
    UnsupportedType,
    /// A host collaborator (sub-query executor or row sink) failed.
    Host,
}

#[derive(Error, Debug)]
pub enum PivotError {
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("invalid column description query: {0}")]
    Schema(String),

    #[error("cannot map NULL pivot column value")]
    NullPivotKey,

    #[error("pivot key '{0}' not found in pivot map")]
    UnmappedKey(String),

    #[error("derived offset {offset} does not map to proper pivot position (pivot area has {width} columns)")]
    OffsetOutOfRange { offset: usize, width: usize },

    #[error("input row has {width} values but column {column} is referenced")]
    MissingColumn { column: usize, width: usize },

    #[error("expected a {expected} pivot key but found a {found} value")]
    KeyTypeMismatch { expected: KeyKind, found: ScalarType },

    #[error("unsupported pivot key type: {0}")]
    UnsupportedType(ScalarType),

    #[error("lifecycle error: {0}")]
    Lifecycle(String),

    #[error("sub-query failed: {0}")]
    Query(#[from] QueryError),

    #[error("row sink rejected output row: {0}")]
    Sink(String),
}

impl PivotError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            PivotError::Configuration(_) | PivotError::Lifecycle(_) => ErrorKind::Configuration,
            PivotError::Schema(_) => ErrorKind::Schema,
            PivotError::NullPivotKey
            | PivotError::UnmappedKey(_)
            | PivotError::OffsetOutOfRange { .. }
            | PivotError::MissingColumn { .. }
            | PivotError::KeyTypeMismatch { .. } => ErrorKind::Data,
            PivotError::UnsupportedType(_) => ErrorKind::UnsupportedType,
            PivotError::Query(_) | PivotError::Sink(_) => ErrorKind::Host,
        }
    }
}

pub type PivotResult<T> = Result<T, PivotError>;
