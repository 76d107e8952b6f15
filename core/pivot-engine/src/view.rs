//! FILENAME: core/pivot-engine/src/view.rs
//! Pivot Output - what the transform produces.
//!
//! - `OutputSchema`: declared at describe time from the mapping query's shape
//!   and display names; carries the partition/order keys the host must enforce
//! - `OutputRow`: one wide row per partition, group values followed by the
//!   pivoted cells, addressed only through validated (block, position) pairs

use engine::{ColumnDesc, QueryExecutor, Row, ScalarValue, Schema};
use serde::{Deserialize, Serialize};

use crate::cache::BlockIndex;
use crate::definition::{ColumnIndexVec, PivotParameters};
use crate::error::{PivotError, PivotResult};
use crate::logging::{log_debug, log_info};

// ============================================================================
// OUTPUT SCHEMA
// ============================================================================

/// Output declaration of a pivot transform.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutputSchema {
    /// Group columns first, then `block_count * block_width` pivoted columns.
    pub columns: Schema,

    /// Input columns the host must partition by.
    pub partition_by: ColumnIndexVec,

    /// Input columns the host must order each partition by.
    pub order_by: ColumnIndexVec,

    /// Rows of one group must all reach the same transform instance.
    pub global_partitioning: bool,

    /// Session start/shutdown commands must be issued for this transform.
    pub session_commands: bool,

    /// Number of mapping rows seen at describe time.
    pub block_count: usize,

    pub block_width: usize,
}

impl OutputSchema {
    /// Total number of output columns.
    pub fn width(&self) -> usize {
        self.columns.len()
    }

    pub fn group_width(&self) -> usize {
        self.partition_by.len()
    }

    /// Output column of (`block`, `position`), if it exists.
    pub fn pivoted_column(&self, block: BlockIndex, position: usize) -> Option<&ColumnDesc> {
        if position >= self.block_width {
            return None;
        }
        self.columns
            .column(self.group_width() + block * self.block_width + position)
    }
}

/// Derives the output schema by running the mapping query.
///
/// Only the result shape and the display-name columns are read; key values
/// are canonicalized later, at session start. Rows are consumed one at a time.
pub fn derive_schema<E: QueryExecutor + ?Sized>(
    params: &PivotParameters,
    input: &Schema,
    executor: &E,
) -> PivotResult<OutputSchema> {
    if !params.is_resolved() {
        return Err(PivotError::Configuration(
            "parameters must be resolved against the input before describe".to_string(),
        ));
    }

    let mut columns = Schema::default();
    for &idx in &params.group_columns {
        let desc = input.column(idx).ok_or_else(|| {
            PivotError::Configuration(format!("group column {} is not in the input", idx))
        })?;
        columns.push(desc.clone());
    }

    let width = params.block_width();
    let block_count = executor.execute(&params.mapping_query, |result| -> PivotResult<usize> {
        let schema = result.schema();
        if schema.len() < width + 1 {
            return Err(PivotError::Schema(format!(
                "must have at least {} columns",
                width + 1
            )));
        }
        for position in 1..=width {
            if let Some(col) = schema.column(position) {
                if !col.data_type.is_character() {
                    return Err(PivotError::Schema(format!(
                        "column {} must be a string, found {}",
                        position, col.data_type
                    )));
                }
            }
        }

        let mut block_count = 0;
        while let Some(row) = result.fetch()? {
            for (position, desc) in params.value_column_descs.iter().enumerate() {
                let name = row.get_str(position + 1).ok_or_else(|| {
                    PivotError::Schema(format!(
                        "display name in row {} column {} is NULL",
                        block_count,
                        position + 1
                    ))
                })?;
                columns.push(desc.renamed(name));
            }
            log_debug!("SCHEMA", "block {} declared", block_count);
            block_count += 1;
        }
        Ok(block_count)
    })?;

    log_info!(
        "SCHEMA",
        "derived {} output columns ({} group + {} blocks x {})",
        columns.len(),
        params.group_width(),
        block_count,
        width
    );
    Ok(OutputSchema {
        columns,
        partition_by: params.group_columns.clone(),
        order_by: params.group_columns.clone(),
        global_partitioning: true,
        session_commands: true,
        block_count,
        block_width: width,
    })
}

// ============================================================================
// OUTPUT ROW
// ============================================================================

/// The wide row being assembled for one partition.
#[derive(Debug, Clone, PartialEq)]
pub struct OutputRow {
    group_values: Vec<ScalarValue>,
    cells: Vec<ScalarValue>,
    block_width: usize,
}

impl OutputRow {
    /// A row whose pivoted cells are all null.
    pub fn new(group_values: Vec<ScalarValue>, block_count: usize, block_width: usize) -> Self {
        OutputRow {
            group_values,
            cells: vec![ScalarValue::Null; block_count * block_width],
            block_width,
        }
    }

    /// Index into the pivoted cells of (`block`, `position`).
    pub fn cell_offset(&self, block: BlockIndex, position: usize) -> PivotResult<usize> {
        let offset = block
            .checked_mul(self.block_width)
            .and_then(|o| o.checked_add(position))
            .filter(|&o| position < self.block_width && o < self.cells.len());
        offset.ok_or_else(|| PivotError::OffsetOutOfRange {
            offset: self
                .group_values
                .len()
                .saturating_add(block.saturating_mul(self.block_width))
                .saturating_add(position),
            width: self.cells.len(),
        })
    }

    /// Overwrites one pivoted cell.
    pub fn set(&mut self, block: BlockIndex, position: usize, value: ScalarValue) -> PivotResult<()> {
        let offset = self.cell_offset(block, position)?;
        self.cells[offset] = value;
        Ok(())
    }

    pub fn cell(&self, block: BlockIndex, position: usize) -> Option<&ScalarValue> {
        self.cell_offset(block, position)
            .ok()
            .and_then(|o| self.cells.get(o))
    }

    pub fn group_values(&self) -> &[ScalarValue] {
        &self.group_values
    }

    pub fn cells(&self) -> &[ScalarValue] {
        &self.cells
    }

    /// Total cell count: group values plus pivoted cells.
    pub fn width(&self) -> usize {
        self.group_values.len() + self.cells.len()
    }

    pub fn into_row(self) -> Row {
        let mut values = self.group_values;
        values.extend(self.cells);
        Row::new(values)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::definition::{Phase, PivotConfig};
    use crate::error::ErrorKind;
    use engine::{MemoryExecutor, ScalarType};

    const QUERY: &str = "select q, amount_name, margin_name from quarters";

    fn input() -> Schema {
        Schema::new(vec![
            ColumnDesc::varchar("store", 16),
            ColumnDesc::varchar("quarter", 2),
            ColumnDesc::new("amount", ScalarType::Int),
            ColumnDesc::numeric("margin", 8, 2),
        ])
    }

    fn params() -> PivotParameters {
        let config = PivotConfig::new()
            .with_pivot_column(1)
            .with_group_columns(&[0])
            .with_value_columns(&[2, 3])
            .with_mapping_query(QUERY);
        PivotParameters::validate(&config, Some(&input()), Phase::Describe).unwrap()
    }

    fn mapping(label_type: ScalarType, quarters: &[&str]) -> MemoryExecutor {
        let rows = quarters
            .iter()
            .map(|q| {
                Row::new(vec![
                    ScalarValue::text(*q),
                    ScalarValue::text(format!("{} amount", q)),
                    ScalarValue::text(format!("{} margin", q)),
                ])
            })
            .collect();
        MemoryExecutor::new().with_result(
            QUERY,
            Schema::new(vec![
                ColumnDesc::varchar("q", 2),
                ColumnDesc::varchar("amount_name", 32),
                ColumnDesc::new("margin_name", label_type),
            ]),
            rows,
        )
    }

    #[test]
    fn test_derive_schema_layout() {
        let exec = mapping(ScalarType::VarChar, &["Q1", "Q2"]);
        let out = derive_schema(&params(), &input(), &exec).unwrap();
        assert_eq!(out.width(), 1 + 2 * 2);
        assert_eq!(out.block_count, 2);
        assert_eq!(out.partition_by.as_slice(), &[0]);
        assert_eq!(out.order_by.as_slice(), &[0]);
        assert!(out.global_partitioning);

        let names: Vec<&str> = out.columns.columns().iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["store", "Q1 amount", "Q1 margin", "Q2 amount", "Q2 margin"]);

        let margin = out.pivoted_column(1, 1).unwrap();
        assert_eq!(margin.data_type, ScalarType::Numeric);
        assert_eq!((margin.precision, margin.scale), (8, 2));
        assert!(out.pivoted_column(2, 0).is_none());
    }

    #[test]
    fn test_display_names_must_be_strings() {
        let exec = mapping(ScalarType::Int, &["Q1"]);
        let err = derive_schema(&params(), &input(), &exec).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Schema);
        assert!(err.to_string().contains("column 2 must be a string"));
    }

    #[test]
    fn test_too_few_columns() {
        let exec = MemoryExecutor::new().with_result(
            QUERY,
            Schema::new(vec![ColumnDesc::varchar("q", 2), ColumnDesc::varchar("n", 8)]),
            vec![],
        );
        let err = derive_schema(&params(), &input(), &exec).unwrap_err();
        assert!(err.to_string().contains("at least 3 columns"));
    }

    #[test]
    fn test_zero_mapping_rows_leaves_group_columns() {
        let exec = mapping(ScalarType::VarChar, &[]);
        let out = derive_schema(&params(), &input(), &exec).unwrap();
        assert_eq!(out.width(), 1);
        assert_eq!(out.block_count, 0);
    }

    #[test]
    fn test_unresolved_parameters_rejected() {
        let config = PivotConfig::new()
            .with_pivot_column(1)
            .with_group_columns(&[0])
            .with_value_columns(&[2])
            .with_mapping_query(QUERY);
        let unresolved = PivotParameters::validate(&config, None, Phase::Start).unwrap();
        let exec = mapping(ScalarType::VarChar, &["Q1"]);
        assert!(derive_schema(&unresolved, &input(), &exec).is_err());
    }

    #[test]
    fn test_output_row_bounds() {
        let mut row = OutputRow::new(vec![ScalarValue::text("store_A")], 2, 2);
        assert_eq!(row.width(), 5);
        row.set(1, 1, ScalarValue::Int(7)).unwrap();
        assert_eq!(row.cell(1, 1), Some(&ScalarValue::Int(7)));
        assert_eq!(row.cell(0, 0), Some(&ScalarValue::Null));

        let err = row.set(2, 0, ScalarValue::Int(1)).unwrap_err();
        assert!(matches!(err, PivotError::OffsetOutOfRange { offset: 5, width: 4 }));
        assert!(row.set(0, 2, ScalarValue::Int(1)).is_err());
        assert!(row.cell(0, 2).is_none());

        let values = row.into_row().into_values();
        assert_eq!(values.len(), 5);
        assert_eq!(values[4], ScalarValue::Int(7));
    }
}
