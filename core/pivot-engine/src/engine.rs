//! FILENAME: core/pivot-engine/src/engine.rs
//! Pivot Engine - the streaming core and the lifecycle around it.
//!
//! `PivotFunction` walks the transform through its phases:
//! 1. Describe: validate parameters, derive the output schema
//! 2. Start: build the session's pivot map (second mapping-query execution)
//! 3. Create: hand out `RowTransformer`s sharing the map read-only
//!
//! A `RowTransformer` owns one `OutputRow` per partition:
//! `Empty -> Accumulating -> Flushed`, then reusable for the next partition.
//! The host delivers rows partitioned and ordered by the group columns and
//! signals each partition end with `finalize_partition`; `process_sorted`
//! detects the boundaries itself for callers that only have a sorted stream.

use std::sync::Arc;

use engine::{QueryExecutor, Row, RowSink, ScalarValue, Schema};

use crate::cache::{build_map, PivotMap};
use crate::canonical::KeyKind;
use crate::definition::{Phase, PivotConfig, PivotParameters};
use crate::error::{PivotError, PivotResult};
use crate::logging::{log_debug, log_enter, log_exit, log_info, log_trace, log_warn};
use crate::view::{derive_schema, OutputRow, OutputSchema};

// ============================================================================
// ROW TRANSFORMER
// ============================================================================

/// Where the transformer is within the current partition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PartitionState {
    /// No row of the next partition has arrived yet.
    Empty,
    /// The output row exists and is being filled.
    Accumulating,
    /// The last partition's row was handed out.
    Flushed,
}

/// Pivots the rows of one partition at a time into a single wide row.
#[derive(Debug)]
pub struct RowTransformer {
    params: Arc<PivotParameters>,
    map: Arc<PivotMap>,
    key_kind: KeyKind,
    state: PartitionState,
    current: Option<OutputRow>,
    rows_processed: u64,
    partitions_flushed: u64,
}

impl RowTransformer {
    /// Creates a transformer for `params` against the session map.
    ///
    /// `output` is the schema published at describe time. The map comes from a
    /// separate execution of the mapping query, so the two are checked for the
    /// same block layout before any row is accepted.
    pub fn new(
        params: Arc<PivotParameters>,
        map: Arc<PivotMap>,
        output: &OutputSchema,
    ) -> PivotResult<Self> {
        let pivot_type = params.pivot_column_type.ok_or_else(|| {
            PivotError::Configuration("pivot column type has not been resolved".to_string())
        })?;
        let key_kind = KeyKind::try_from(pivot_type)?;
        if !key_kind.is_compatible_with(map.key_kind()) {
            log_warn!(
                "PIVOT",
                "pivot column type {} differs from mapping key type {}",
                pivot_type,
                map.key_type()
            );
        }
        if map.block_width() != params.block_width() {
            return Err(PivotError::Schema(format!(
                "pivot map was built for {} value columns, parameters name {}",
                map.block_width(),
                params.block_width()
            )));
        }
        let expected = params.group_width() + map.pivot_width();
        if output.width() != expected {
            return Err(PivotError::Schema(format!(
                "mapping query returned {} rows at describe but {} at session start",
                output.block_count,
                map.len()
            )));
        }
        Ok(RowTransformer {
            params,
            map,
            key_kind,
            state: PartitionState::Empty,
            current: None,
            rows_processed: 0,
            partitions_flushed: 0,
        })
    }

    pub fn state(&self) -> PartitionState {
        self.state
    }

    pub fn rows_processed(&self) -> u64 {
        self.rows_processed
    }

    pub fn partitions_flushed(&self) -> u64 {
        self.partitions_flushed
    }

    /// Group values of the partition being accumulated.
    pub fn current_group(&self) -> Option<&[ScalarValue]> {
        self.current.as_ref().map(OutputRow::group_values)
    }

    /// Places the value columns of `row` into the block selected by its pivot key.
    /// The first row of a partition allocates the output row.
    pub fn process(&mut self, row: &Row) -> PivotResult<()> {
        let params = &self.params;
        check_row_width(params, row)?;
        let values = row.values();
        let map = &self.map;
        let out = self.current.get_or_insert_with(|| {
            let group = params.group_columns.iter().map(|&idx| values[idx].clone()).collect();
            OutputRow::new(group, map.len(), params.block_width())
        });
        self.state = PartitionState::Accumulating;

        let pivot_value = &values[params.pivot_column];
        if pivot_value.is_null() {
            return Err(PivotError::NullPivotKey);
        }
        let key = self.key_kind.canonicalize(pivot_value)?;

        let block = match map.lookup(&key) {
            Some(block) => block,
            // With no blocks at all there is no position any key could take.
            None if map.is_empty() => {
                return Err(PivotError::OffsetOutOfRange {
                    offset: params.group_width(),
                    width: 0,
                })
            }
            None => return Err(PivotError::UnmappedKey(key)),
        };

        for (position, &col) in params.value_columns.iter().enumerate() {
            out.set(block, position, values[col].clone())?;
        }
        self.rows_processed += 1;
        log_trace!("ROW", "key '{}' -> block {}", key, block);
        Ok(())
    }

    /// Ends the current partition and hands out its row. Returns `None` when
    /// no row arrived since the last flush.
    pub fn finalize_partition(&mut self) -> Option<OutputRow> {
        let out = self.current.take()?;
        self.state = PartitionState::Flushed;
        self.partitions_flushed += 1;
        log_debug!("ROW", "partition {} flushed", self.partitions_flushed);
        Some(out)
    }

    /// Finalizes the current partition into `sink`. Returns whether a row was emitted.
    pub fn flush<S>(&mut self, sink: &mut S) -> PivotResult<bool>
    where
        S: RowSink + ?Sized,
        S::Error: std::fmt::Display,
    {
        match self.finalize_partition() {
            Some(out) => {
                sink.put(out.into_row())
                    .map_err(|e| PivotError::Sink(e.to_string()))?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Like `process`, but flushes into `sink` first when `row` starts a new group.
    pub fn process_sorted<S>(&mut self, row: &Row, sink: &mut S) -> PivotResult<()>
    where
        S: RowSink + ?Sized,
        S::Error: std::fmt::Display,
    {
        let boundary = match self.current_group() {
            Some(group) => self
                .params
                .group_columns
                .iter()
                .zip(group)
                .any(|(&idx, value)| row.get(idx).unwrap_or(&ScalarValue::Null) != value),
            None => false,
        };
        if boundary {
            self.flush(sink)?;
        }
        self.process(row)
    }
}

/// Every group, pivot and value column must be present in `row`; checked
/// before a partition is opened or any value is copied.
fn check_row_width(params: &PivotParameters, row: &Row) -> PivotResult<()> {
    let width = row.len();
    let missing = params
        .group_columns
        .iter()
        .chain(params.value_columns.iter())
        .chain(std::iter::once(&params.pivot_column))
        .copied()
        .find(|&column| column >= width);
    match missing {
        Some(column) => Err(PivotError::MissingColumn { column, width }),
        None => Ok(()),
    }
}

/// Pivots a stream of rows sorted by the group columns into `sink`.
/// Returns the number of output rows emitted.
pub fn pivot_sorted<I, S>(transformer: &mut RowTransformer, rows: I, sink: &mut S) -> PivotResult<u64>
where
    I: IntoIterator<Item = Row>,
    S: RowSink + ?Sized,
    S::Error: std::fmt::Display,
{
    let before = transformer.partitions_flushed();
    for row in rows {
        transformer.process_sorted(&row, sink)?;
    }
    transformer.flush(sink)?;
    Ok(transformer.partitions_flushed() - before)
}

// ============================================================================
// LIFECYCLE
// ============================================================================

/// One pivot transform invocation: named parameters, the input relation's
/// schema and the executor used for the mapping query.
pub struct PivotFunction<E> {
    config: PivotConfig,
    input: Schema,
    executor: E,
    output: Option<OutputSchema>,
    session: Option<Arc<PivotMap>>,
}

impl<E: QueryExecutor> PivotFunction<E> {
    pub fn new(config: PivotConfig, input: Schema, executor: E) -> Self {
        PivotFunction {
            config,
            input,
            executor,
            output: None,
            session: None,
        }
    }

    pub fn executor(&self) -> &E {
        &self.executor
    }

    /// Plan time: validates the parameters and derives the output schema.
    pub fn describe(&mut self) -> PivotResult<&OutputSchema> {
        log_enter!("PIVOT", "describe");
        let params = PivotParameters::validate(&self.config, Some(&self.input), Phase::Describe)?;
        let output = derive_schema(&params, &self.input, &self.executor)?;
        log_exit!("PIVOT", "describe", "{} columns", output.width());
        Ok(self.output.insert(output))
    }

    /// Installs an output schema published by an earlier describe (for hosts
    /// that run describe in a different process).
    pub fn set_output_schema(&mut self, output: OutputSchema) {
        self.output = Some(output);
    }

    pub fn output_schema(&self) -> Option<&OutputSchema> {
        self.output.as_ref()
    }

    /// Session start: runs the mapping query again and builds the pivot map.
    pub fn start(&mut self) -> PivotResult<Arc<PivotMap>> {
        log_enter!("PIVOT", "start");
        let params = PivotParameters::validate(&self.config, None, Phase::Start)?;
        let map = Arc::new(build_map(&params, &self.executor)?);
        self.session = Some(Arc::clone(&map));
        log_exit!("PIVOT", "start", "{} keys", map.len());
        Ok(map)
    }

    /// Installs a pivot map restored from session state.
    pub fn restore_session(&mut self, map: PivotMap) -> Arc<PivotMap> {
        let map = Arc::new(map);
        self.session = Some(Arc::clone(&map));
        log_info!("PIVOT", "restored session map with {} keys", map.len());
        map
    }

    pub fn session_map(&self) -> Option<&Arc<PivotMap>> {
        self.session.as_ref()
    }

    /// Creates a transformer. May be called once per partition-processing
    /// instance; all of them share the session map.
    pub fn create(&self) -> PivotResult<RowTransformer> {
        let output = self
            .output
            .as_ref()
            .ok_or_else(|| PivotError::Lifecycle("create called before describe".to_string()))?;
        let map = self
            .session
            .as_ref()
            .ok_or_else(|| PivotError::Lifecycle("create called before session start".to_string()))?;
        let params = PivotParameters::validate(&self.config, Some(&self.input), Phase::Create)?;
        let transformer = RowTransformer::new(Arc::new(params), Arc::clone(map), output)?;
        log_info!("PIVOT", "transformer created ({} output columns)", output.width());
        Ok(transformer)
    }

    /// Session end. Transformers already created keep their map reference.
    pub fn shutdown(&mut self) {
        if self.session.take().is_some() {
            log_info!("PIVOT", "session shut down");
        }
    }

    /// Abandons the session; in-flight output rows are simply dropped with
    /// their transformers.
    pub fn abort(&mut self) {
        if self.session.take().is_some() {
            log_warn!("PIVOT", "session aborted");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use engine::{ColumnDesc, MemoryExecutor, ScalarType};

    const QUERY: &str = "select distinct quarter, quarter from sales";

    fn input() -> Schema {
        Schema::new(vec![
            ColumnDesc::varchar("store", 16),
            ColumnDesc::varchar("quarter", 2),
            ColumnDesc::new("amount", ScalarType::Int),
        ])
    }

    fn mapping(keys: &[&str]) -> MemoryExecutor {
        MemoryExecutor::new().with_result(
            QUERY,
            Schema::new(vec![ColumnDesc::varchar("quarter", 2), ColumnDesc::varchar("label", 2)]),
            keys.iter()
                .map(|k| Row::new(vec![ScalarValue::text(*k), ScalarValue::text(*k)]))
                .collect(),
        )
    }

    fn config() -> PivotConfig {
        PivotConfig::new()
            .with_pivot_column(1)
            .with_group_columns(&[0])
            .with_value_columns(&[2])
            .with_mapping_query(QUERY)
    }

    fn transformer(keys: &[&str]) -> RowTransformer {
        let mut func = PivotFunction::new(config(), input(), mapping(keys));
        func.describe().unwrap();
        func.start().unwrap();
        func.create().unwrap()
    }

    fn row(store: &str, quarter: Option<&str>, amount: i32) -> Row {
        Row::new(vec![
            ScalarValue::text(store),
            quarter.map_or(ScalarValue::Null, ScalarValue::text),
            ScalarValue::Int(amount),
        ])
    }

    #[test]
    fn test_first_row_fills_its_block() {
        let mut t = transformer(&["Q1", "Q2"]);
        assert_eq!(t.state(), PartitionState::Empty);
        t.process(&row("store_A", Some("Q1"), 100)).unwrap();
        assert_eq!(t.state(), PartitionState::Accumulating);
        let out = t.finalize_partition().unwrap();
        assert_eq!(
            out.into_row().into_values(),
            vec![ScalarValue::text("store_A"), ScalarValue::Int(100), ScalarValue::Null]
        );
        assert_eq!(t.state(), PartitionState::Flushed);
    }

    #[test]
    fn test_rows_accumulate_within_partition() {
        let mut t = transformer(&["Q1", "Q2"]);
        t.process(&row("store_A", Some("Q1"), 100)).unwrap();
        t.process(&row("store_A", Some("Q2"), 200)).unwrap();
        let out = t.finalize_partition().unwrap();
        assert_eq!(
            out.into_row().into_values(),
            vec![ScalarValue::text("store_A"), ScalarValue::Int(100), ScalarValue::Int(200)]
        );
    }

    #[test]
    fn test_last_writer_wins() {
        let mut t = transformer(&["Q1"]);
        t.process(&row("store_A", Some("Q1"), 1)).unwrap();
        t.process(&row("store_A", Some("Q1"), 2)).unwrap();
        let out = t.finalize_partition().unwrap();
        assert_eq!(out.cell(0, 0), Some(&ScalarValue::Int(2)));
    }

    #[test]
    fn test_unmapped_key_is_data_error() {
        let mut t = transformer(&["Q1", "Q2"]);
        let err = t.process(&row("store_A", Some("Q3"), 5)).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Data);
        assert!(err.to_string().contains("Q3"));
    }

    #[test]
    fn test_null_pivot_key_is_data_error() {
        let mut t = transformer(&["Q1"]);
        let err = t.process(&row("store_A", None, 5)).unwrap_err();
        assert!(matches!(err, PivotError::NullPivotKey));
        let out = t.finalize_partition().unwrap();
        assert_eq!(out.cell(0, 0), Some(&ScalarValue::Null));
    }

    #[test]
    fn test_short_row_is_data_error() {
        let mut t = transformer(&["Q1", "Q2"]);
        let short = Row::new(vec![ScalarValue::text("store_A"), ScalarValue::text("Q1")]);
        let err = t.process(&short).unwrap_err();
        assert!(matches!(err, PivotError::MissingColumn { column: 2, width: 2 }));
        assert_eq!(err.kind(), ErrorKind::Data);
        assert_eq!(t.state(), PartitionState::Empty);
        assert!(t.finalize_partition().is_none());

        t.process(&row("store_A", Some("Q2"), 7)).unwrap();
        let err = t.process(&Row::new(vec![ScalarValue::text("store_A")])).unwrap_err();
        assert!(matches!(err, PivotError::MissingColumn { width: 1, .. }));
        let out = t.finalize_partition().unwrap();
        assert_eq!(
            out.into_row().into_values(),
            vec![ScalarValue::text("store_A"), ScalarValue::Null, ScalarValue::Int(7)]
        );
    }

    #[test]
    fn test_empty_map_reports_bounds_violation() {
        let mut t = transformer(&[]);
        let err = t.process(&row("store_A", Some("Q1"), 5)).unwrap_err();
        assert!(matches!(err, PivotError::OffsetOutOfRange { offset: 1, width: 0 }));
        assert!(err.to_string().contains("does not map to proper pivot position"));
    }

    #[test]
    fn test_finalize_without_rows() {
        let mut t = transformer(&["Q1"]);
        assert!(t.finalize_partition().is_none());
        let mut sink: Vec<Row> = Vec::new();
        assert!(!t.flush(&mut sink).unwrap());
        assert!(sink.is_empty());
    }

    #[test]
    fn test_pivot_sorted_detects_partitions() {
        let mut t = transformer(&["Q1", "Q2"]);
        let rows = vec![
            row("store_A", Some("Q1"), 1),
            row("store_A", Some("Q2"), 2),
            row("store_B", Some("Q2"), 3),
        ];
        let mut sink: Vec<Row> = Vec::new();
        let emitted = pivot_sorted(&mut t, rows, &mut sink).unwrap();
        assert_eq!(emitted, 2);
        assert_eq!(sink[0].values(), &[ScalarValue::text("store_A"), ScalarValue::Int(1), ScalarValue::Int(2)]);
        assert_eq!(sink[1].values(), &[ScalarValue::text("store_B"), ScalarValue::Null, ScalarValue::Int(3)]);
        assert_eq!(t.rows_processed(), 3);
    }

    #[test]
    fn test_create_requires_describe_and_start() {
        let mut func = PivotFunction::new(config(), input(), mapping(&["Q1"]));
        assert_eq!(func.create().unwrap_err().kind(), ErrorKind::Configuration);
        func.describe().unwrap();
        assert!(matches!(func.create(), Err(PivotError::Lifecycle(_))));
        func.start().unwrap();
        assert!(func.create().is_ok());
        assert_eq!(func.executor().executions(), 2);
        func.shutdown();
        assert!(func.session_map().is_none());
    }

    #[test]
    fn test_drift_between_describe_and_start() {
        let mut func = PivotFunction::new(config(), input(), mapping(&["Q1", "Q2"]));
        func.describe().unwrap();
        let mut drifted = PivotFunction::new(config(), input(), mapping(&["Q1", "Q2", "Q3"]));
        let map = drifted.start().unwrap();
        func.restore_session((*map).clone());
        let err = func.create().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Schema);
        assert!(err.to_string().contains("2 rows at describe but 3"));
    }

    #[test]
    fn test_unsupported_pivot_column_type() {
        let input = Schema::new(vec![
            ColumnDesc::varchar("store", 16),
            ColumnDesc::new("flag", ScalarType::Boolean),
            ColumnDesc::new("amount", ScalarType::Int),
        ]);
        let mut func = PivotFunction::new(config(), input, mapping(&["Q1"]));
        func.describe().unwrap();
        func.start().unwrap();
        assert_eq!(func.create().unwrap_err().kind(), ErrorKind::UnsupportedType);
    }

    #[test]
    fn test_transformers_share_the_map() {
        let mut func = PivotFunction::new(config(), input(), mapping(&["Q1"]));
        func.describe().unwrap();
        let map = func.start().unwrap();
        let a = func.create().unwrap();
        let b = func.create().unwrap();
        assert!(Arc::ptr_eq(&a.map, &b.map));
        assert_eq!(Arc::strong_count(&map), 4);
    }
}
