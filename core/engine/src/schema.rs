//! FILENAME: core/engine/src/schema.rs
//! PURPOSE: Column descriptors and ordered schemas.
//! CONTEXT: Used for the input relation of a transform, for sub-query result
//! shapes, and for the output columns a transform declares during describe.

use serde::{Deserialize, Serialize};

use crate::value::ScalarType;

/// Type and naming metadata of one column.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnDesc {
    pub name: String,
    pub data_type: ScalarType,
    /// Declared length in bytes for character/binary types, 0 when not applicable.
    pub length: u32,
    pub nullable: bool,
    pub precision: u8,
    pub scale: u8,
}

impl ColumnDesc {
    pub fn new(name: impl Into<String>, data_type: ScalarType) -> Self {
        ColumnDesc {
            name: name.into(),
            data_type,
            length: 0,
            nullable: true,
            precision: 0,
            scale: 0,
        }
    }

    pub fn varchar(name: impl Into<String>, length: u32) -> Self {
        ColumnDesc {
            length,
            ..ColumnDesc::new(name, ScalarType::VarChar)
        }
    }

    pub fn numeric(name: impl Into<String>, precision: u8, scale: u8) -> Self {
        ColumnDesc {
            precision,
            scale,
            ..ColumnDesc::new(name, ScalarType::Numeric)
        }
    }

    /// Same column metadata under a different name.
    pub fn renamed(&self, name: impl Into<String>) -> Self {
        ColumnDesc {
            name: name.into(),
            ..self.clone()
        }
    }
}

/// An ordered list of column descriptors.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Schema {
    columns: Vec<ColumnDesc>,
}

impl Schema {
    pub fn new(columns: Vec<ColumnDesc>) -> Self {
        Schema { columns }
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    /// Column at `index`, or `None` when out of range.
    pub fn column(&self, index: usize) -> Option<&ColumnDesc> {
        self.columns.get(index)
    }

    pub fn columns(&self) -> &[ColumnDesc] {
        &self.columns
    }

    /// Position of the first column with the given name (case-insensitive).
    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.columns
            .iter()
            .position(|c| c.name.eq_ignore_ascii_case(name))
    }

    pub fn push(&mut self, column: ColumnDesc) -> usize {
        self.columns.push(column);
        self.columns.len() - 1
    }
}

impl FromIterator<ColumnDesc> for Schema {
    fn from_iter<I: IntoIterator<Item = ColumnDesc>>(iter: I) -> Self {
        Schema::new(iter.into_iter().collect())
    }
}
