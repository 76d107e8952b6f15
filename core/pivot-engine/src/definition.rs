//! FILENAME: core/pivot-engine/src/definition.rs
//! Pivot Definition - named parameters and their validated form.
//!
//! This module contains the types needed to DESCRIBE a pivot transform:
//! - `PivotConfig`: the raw named parameters as the host supplies them
//! - `PivotParameters`: the checked, resolved form used by every phase
//!
//! Validation runs on every phase transition. Only the phases that see the
//! input relation (describe, create) resolve column types.

use std::collections::BTreeMap;

use engine::{ColumnDesc, ScalarType, ScalarValue, Schema};
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

use crate::error::{PivotError, PivotResult};

/// Names of the four required parameters.
pub const NPV_PIVOT_COLUMN: &str = "pivotcol";
pub const NPV_GROUP_COLUMNS: &str = "groupcol";
pub const NPV_PIVOT_VALUES: &str = "pivotval";
pub const NPV_COLUMN_LIST: &str = "column_list";

/// Index into the input relation's columns (0-based).
pub type ColumnIndex = usize;

/// Most pivots group and copy only a handful of columns.
pub type ColumnIndexVec = SmallVec<[ColumnIndex; 4]>;

// ============================================================================
// NAMED PARAMETERS
// ============================================================================

/// The value bound to one named parameter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum NamedParameter {
    /// A single column of the input relation.
    ColumnRef(ColumnIndex),
    /// One or more columns of the input relation.
    ColumnRefList(Vec<ColumnIndex>),
    /// A literal.
    Constant(ScalarValue),
}

impl NamedParameter {
    pub fn text(s: impl Into<String>) -> Self {
        NamedParameter::Constant(ScalarValue::VarChar(s.into()))
    }

    /// Column indices referenced by the parameter, `None` for constants.
    fn column_indices(&self) -> Option<ColumnIndexVec> {
        match self {
            NamedParameter::ColumnRef(idx) => Some(smallvec::smallvec![*idx]),
            NamedParameter::ColumnRefList(list) => Some(list.iter().copied().collect()),
            NamedParameter::Constant(_) => None,
        }
    }

    /// The string literal, when the parameter is a character constant.
    pub fn as_string(&self) -> Option<&str> {
        match self {
            NamedParameter::Constant(v) => v.as_str(),
            _ => None,
        }
    }
}

/// Named parameters as supplied by the host. Names are case-insensitive.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(from = "BTreeMap<String, NamedParameter>", into = "BTreeMap<String, NamedParameter>")]
pub struct PivotConfig {
    params: BTreeMap<String, NamedParameter>,
}

impl From<BTreeMap<String, NamedParameter>> for PivotConfig {
    fn from(raw: BTreeMap<String, NamedParameter>) -> Self {
        let mut config = PivotConfig::default();
        for (name, value) in raw {
            config.set(&name, value);
        }
        config
    }
}

impl From<PivotConfig> for BTreeMap<String, NamedParameter> {
    fn from(config: PivotConfig) -> Self {
        config.params
    }
}

impl PivotConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, name: &str, value: NamedParameter) {
        self.params.insert(name.to_ascii_lowercase(), value);
    }

    pub fn get(&self, name: &str) -> Option<&NamedParameter> {
        self.params.get(&name.to_ascii_lowercase())
    }

    pub fn with(mut self, name: &str, value: NamedParameter) -> Self {
        self.set(name, value);
        self
    }

    pub fn with_pivot_column(self, column: ColumnIndex) -> Self {
        self.with(NPV_PIVOT_COLUMN, NamedParameter::ColumnRef(column))
    }

    pub fn with_group_columns(self, columns: &[ColumnIndex]) -> Self {
        self.with(NPV_GROUP_COLUMNS, NamedParameter::ColumnRefList(columns.to_vec()))
    }

    pub fn with_value_columns(self, columns: &[ColumnIndex]) -> Self {
        self.with(NPV_PIVOT_VALUES, NamedParameter::ColumnRefList(columns.to_vec()))
    }

    pub fn with_mapping_query(self, query: &str) -> Self {
        self.with(NPV_COLUMN_LIST, NamedParameter::text(query))
    }
}

// ============================================================================
// PHASES
// ============================================================================

/// Lifecycle phase the parameters are validated for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Plan time: output schema derivation.
    Describe,
    /// Session start: pivot map construction. The input relation is not visible.
    Start,
    /// Per-instance setup before rows flow.
    Create,
}

impl Phase {
    /// Whether column types must be looked up in the input schema.
    pub fn resolves_input_types(&self) -> bool {
        matches!(self, Phase::Describe | Phase::Create)
    }
}

// ============================================================================
// VALIDATED PARAMETERS
// ============================================================================

/// The validated pivot configuration. Immutable once built.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PivotParameters {
    /// Partition/order key and output row prefix, in declaration order.
    pub group_columns: ColumnIndexVec,

    /// Column whose values select the output block.
    pub pivot_column: ColumnIndex,

    /// Declared type of the pivot column. `None` when validated without the input schema.
    pub pivot_column_type: Option<ScalarType>,

    /// Columns copied into each block, in block order.
    pub value_columns: ColumnIndexVec,

    /// Input descriptors of `value_columns`. Empty when not resolved.
    pub value_column_descs: Vec<ColumnDesc>,

    /// Query enumerating pivot keys (column 0) and block display names (columns 1..).
    pub mapping_query: String,
}

fn missing(name: &str) -> PivotError {
    PivotError::Configuration(format!("'{}' must be specified.", name))
}

impl PivotParameters {
    /// Checks the named parameters and, for phases that see the input relation,
    /// resolves the referenced columns against `input`.
    pub fn validate(config: &PivotConfig, input: Option<&Schema>, phase: Phase) -> PivotResult<Self> {
        let pivot_column = match config.get(NPV_PIVOT_COLUMN) {
            None => return Err(missing(NPV_PIVOT_COLUMN)),
            Some(NamedParameter::ColumnRef(idx)) => *idx,
            Some(_) => {
                return Err(PivotError::Configuration(format!(
                    "'{}' must be a column reference.",
                    NPV_PIVOT_COLUMN
                )))
            }
        };

        let group_columns = config
            .get(NPV_GROUP_COLUMNS)
            .ok_or_else(|| missing(NPV_GROUP_COLUMNS))?
            .column_indices()
            .filter(|cols| !cols.is_empty())
            .ok_or_else(|| {
                PivotError::Configuration(format!(
                    "'{}' must be a column reference or list of column references",
                    NPV_GROUP_COLUMNS
                ))
            })?;

        let mapping_query = config
            .get(NPV_COLUMN_LIST)
            .ok_or_else(|| missing(NPV_COLUMN_LIST))?
            .as_string()
            .map(str::trim)
            .filter(|q| !q.is_empty())
            .ok_or_else(|| {
                PivotError::Configuration(format!(
                    "'{}' must be a non-empty string literal",
                    NPV_COLUMN_LIST
                ))
            })?
            .to_string();

        let value_columns = config
            .get(NPV_PIVOT_VALUES)
            .ok_or_else(|| missing(NPV_PIVOT_VALUES))?
            .column_indices()
            .filter(|cols| !cols.is_empty())
            .ok_or_else(|| {
                PivotError::Configuration(format!(
                    "'{}' must be a column reference or list of column references",
                    NPV_PIVOT_VALUES
                ))
            })?;

        let mut params = PivotParameters {
            group_columns,
            pivot_column,
            pivot_column_type: None,
            value_columns,
            value_column_descs: Vec::new(),
            mapping_query,
        };

        if phase.resolves_input_types() {
            let input = input.ok_or_else(|| {
                PivotError::Configuration(format!("input schema is required during {:?}", phase))
            })?;
            params.resolve(input)?;
        }
        Ok(params)
    }

    fn resolve(&mut self, input: &Schema) -> PivotResult<()> {
        let lookup = |idx: ColumnIndex| {
            input.column(idx).ok_or_else(|| {
                PivotError::Configuration(format!(
                    "column reference {} is out of range for an input of {} columns",
                    idx,
                    input.len()
                ))
            })
        };
        for &idx in &self.group_columns {
            lookup(idx)?;
        }
        self.pivot_column_type = Some(lookup(self.pivot_column)?.data_type);
        self.value_column_descs = self
            .value_columns
            .iter()
            .map(|&idx| lookup(idx).cloned())
            .collect::<PivotResult<_>>()?;
        Ok(())
    }

    /// Number of value columns per pivot key.
    pub fn block_width(&self) -> usize {
        self.value_columns.len()
    }

    pub fn group_width(&self) -> usize {
        self.group_columns.len()
    }

    pub fn is_resolved(&self) -> bool {
        self.pivot_column_type.is_some()
    }
}
