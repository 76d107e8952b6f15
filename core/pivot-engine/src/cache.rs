//! FILENAME: core/pivot-engine/src/cache.rs
//! Pivot Map - the session-scoped key -> block lookup.
//!
//! The map is built once at session start from a fresh execution of the
//! mapping query and is read-only afterwards. Every transformer of the
//! session shares it behind an `Arc`.
//!
//! Architecture:
//! - Each mapping-query row contributes one block, numbered in arrival order
//! - Row keys are canonicalized (see `canonical`) before insertion
//! - The serialized form lists entries ordered by block so that encoding the
//!   same map twice yields identical bytes

use engine::{ColumnDesc, QueryExecutor, ScalarType, ScalarValue};
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

use crate::canonical::KeyKind;
use crate::definition::PivotParameters;
use crate::error::{PivotError, PivotResult};
use crate::logging::{log_debug, log_info};

/// Position of a block within the pivoted area (0-based).
pub type BlockIndex = usize;

// ============================================================================
// PIVOT MAP
// ============================================================================

/// Canonical key -> block index, plus metadata of the key column.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "PivotMapState", into = "PivotMapState")]
pub struct PivotMap {
    key_type: ScalarType,
    key_length: u32,
    key_kind: KeyKind,
    block_width: usize,
    entries: FxHashMap<String, BlockIndex>,
}

impl PivotMap {
    /// Block of a canonical key.
    pub fn lookup(&self, key: &str) -> Option<BlockIndex> {
        self.entries.get(key).copied()
    }

    /// Number of blocks (distinct keys).
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn block_width(&self) -> usize {
        self.block_width
    }

    /// Number of cells in the pivoted area of an output row.
    pub fn pivot_width(&self) -> usize {
        self.entries.len() * self.block_width
    }

    /// Declared type of the mapping query's key column.
    pub fn key_type(&self) -> ScalarType {
        self.key_type
    }

    pub fn key_length(&self) -> u32 {
        self.key_length
    }

    pub fn key_kind(&self) -> KeyKind {
        self.key_kind
    }

    /// Entries ordered by block index.
    pub fn entries(&self) -> Vec<(&str, BlockIndex)> {
        let mut entries: Vec<(&str, BlockIndex)> =
            self.entries.iter().map(|(k, &b)| (k.as_str(), b)).collect();
        entries.sort_by_key(|&(_, block)| block);
        entries
    }
}

// ============================================================================
// BUILDER
// ============================================================================

/// Accumulates mapping rows in arrival order. Finishing yields the immutable map.
#[derive(Debug)]
pub struct PivotMapBuilder {
    map: PivotMap,
}

impl PivotMapBuilder {
    /// Starts a map keyed by values of `key_column`. Fails for key types that
    /// cannot be canonicalized.
    pub fn new(key_column: &ColumnDesc, block_width: usize) -> PivotResult<Self> {
        let key_kind = KeyKind::try_from(key_column.data_type)?;
        Ok(PivotMapBuilder {
            map: PivotMap {
                key_type: key_column.data_type,
                key_length: key_column.length,
                key_kind,
                block_width,
                entries: FxHashMap::default(),
            },
        })
    }

    /// Assigns the next block to `key`.
    ///
    /// A null key or a key whose canonical form is already present is rejected:
    /// either would leave a block of the published schema without exactly one
    /// map entry.
    pub fn add(&mut self, key: &ScalarValue) -> PivotResult<BlockIndex> {
        let block = self.map.entries.len();
        let canonical = match self.map.key_kind.canonicalize(key) {
            Ok(c) => c,
            Err(PivotError::NullPivotKey) => {
                return Err(PivotError::Schema(format!(
                    "mapping row {} has a NULL pivot key",
                    block
                )))
            }
            Err(e) => return Err(e),
        };
        if let Some(&existing) = self.map.entries.get(&canonical) {
            return Err(PivotError::Schema(format!(
                "pivot key '{}' appears in mapping rows {} and {}",
                canonical, existing, block
            )));
        }
        log_debug!("MAP", "key '{}' -> block {}", canonical, block);
        self.map.entries.insert(canonical, block);
        Ok(block)
    }

    pub fn finish(self) -> PivotMap {
        self.map
    }
}

/// Runs the mapping query and builds the session's pivot map.
///
/// This is a separate execution from the one used to derive the output
/// schema; `RowTransformer::new` checks that both agree on the block count.
pub fn build_map<E: QueryExecutor + ?Sized>(
    params: &PivotParameters,
    executor: &E,
) -> PivotResult<PivotMap> {
    let map = executor.execute(&params.mapping_query, |result| -> PivotResult<PivotMap> {
        let schema = result.schema();
        let required = params.block_width() + 1;
        if schema.len() < required {
            return Err(PivotError::Schema(format!(
                "must have at least {} columns, found {}",
                required,
                schema.len()
            )));
        }
        let key_column = schema
            .column(0)
            .cloned()
            .ok_or_else(|| PivotError::Schema("missing key column".to_string()))?;

        let mut builder = PivotMapBuilder::new(&key_column, params.block_width())?;
        while let Some(row) = result.fetch()? {
            builder.add(row.get(0).unwrap_or(&ScalarValue::Null))?;
        }
        Ok(builder.finish())
    })?;
    log_info!(
        "MAP",
        "built pivot map: {} keys of type {} x {} value columns",
        map.len(),
        map.key_type(),
        map.block_width()
    );
    Ok(map)
}

// ============================================================================
// SERIALIZED FORM
// ============================================================================

/// One key -> block assignment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MapEntry {
    pub key: String,
    pub block: BlockIndex,
}

/// Wire layout of a `PivotMap`: metadata, entry count, then entries in block order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PivotMapState {
    pub key_type: ScalarType,
    pub key_length: u32,
    pub block_width: usize,
    pub entry_count: usize,
    pub entries: Vec<MapEntry>,
}

impl From<PivotMap> for PivotMapState {
    fn from(map: PivotMap) -> Self {
        let mut entries: Vec<MapEntry> = map
            .entries
            .into_iter()
            .map(|(key, block)| MapEntry { key, block })
            .collect();
        entries.sort_by_key(|e| e.block);
        PivotMapState {
            key_type: map.key_type,
            key_length: map.key_length,
            block_width: map.block_width,
            entry_count: entries.len(),
            entries,
        }
    }
}

impl TryFrom<PivotMapState> for PivotMap {
    type Error = PivotError;

    fn try_from(state: PivotMapState) -> Result<Self, Self::Error> {
        if state.entry_count != state.entries.len() {
            return Err(PivotError::Schema(format!(
                "pivot map declares {} entries but holds {}",
                state.entry_count,
                state.entries.len()
            )));
        }
        let key_kind = KeyKind::try_from(state.key_type)?;
        let mut seen = vec![false; state.entries.len()];
        let mut entries = FxHashMap::default();
        for MapEntry { key, block } in state.entries {
            match seen.get_mut(block) {
                Some(slot) if !*slot => *slot = true,
                _ => {
                    return Err(PivotError::Schema(format!(
                        "pivot map block {} is out of range or assigned twice",
                        block
                    )))
                }
            }
            if entries.insert(key.clone(), block).is_some() {
                return Err(PivotError::Schema(format!("pivot key '{}' stored twice", key)));
            }
        }
        Ok(PivotMap {
            key_type: state.key_type,
            key_length: state.key_length,
            key_kind,
            block_width: state.block_width,
            entries,
        })
    }
}
