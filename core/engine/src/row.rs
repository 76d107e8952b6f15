//! FILENAME: core/engine/src/row.rs
//! PURPOSE: Owned rows and the sink contract for transform output.

use serde::{Deserialize, Serialize};

use crate::value::ScalarValue;

/// One row of values, addressed by column index.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Row {
    values: Vec<ScalarValue>,
}

impl Row {
    pub fn new(values: Vec<ScalarValue>) -> Self {
        Row { values }
    }

    /// A row of `width` nulls.
    pub fn nulls(width: usize) -> Self {
        Row {
            values: vec![ScalarValue::Null; width],
        }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Value at `index`, or `None` when the index is past the end of the row.
    pub fn get(&self, index: usize) -> Option<&ScalarValue> {
        self.values.get(index)
    }

    /// Out-of-range columns count as null.
    pub fn is_null(&self, index: usize) -> bool {
        self.values.get(index).map_or(true, ScalarValue::is_null)
    }

    pub fn get_i64(&self, index: usize) -> Option<i64> {
        self.get(index).and_then(ScalarValue::as_i64)
    }

    pub fn get_f64(&self, index: usize) -> Option<f64> {
        self.get(index).and_then(ScalarValue::as_f64)
    }

    pub fn get_str(&self, index: usize) -> Option<&str> {
        self.get(index).and_then(ScalarValue::as_str)
    }

    pub fn values(&self) -> &[ScalarValue] {
        &self.values
    }

    pub fn into_values(self) -> Vec<ScalarValue> {
        self.values
    }
}

impl From<Vec<ScalarValue>> for Row {
    fn from(values: Vec<ScalarValue>) -> Self {
        Row::new(values)
    }
}

/// Receives completed output rows. The sink owns each row once `put` returns.
pub trait RowSink {
    type Error;

    fn put(&mut self, row: Row) -> Result<(), Self::Error>;
}

impl RowSink for Vec<Row> {
    type Error = std::convert::Infallible;

    fn put(&mut self, row: Row) -> Result<(), Self::Error> {
        self.push(row);
        Ok(())
    }
}
