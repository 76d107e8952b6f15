//! FILENAME: core/persistence/src/lib.rs
//! Pivot Persistence Module
//!
//! Handles saving and loading the session state of a pivot transform: the
//! pivot map built at session start, optionally together with the output
//! schema published at describe time. Encoded as versioned JSON.

mod error;

pub use error::PersistenceError;

use pivot_engine::{OutputSchema, PivotMap};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// Current session-state format version. Bumped on incompatible changes.
pub const SESSION_FORMAT_VERSION: u32 = 1;

// ============================================================================
// SESSION STATE
// ============================================================================

/// Everything a host needs to resume a pivot session without re-running
/// the mapping query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionState {
    pub version: u32,

    /// Mapping query the map was built from.
    pub mapping_query: String,

    /// Output schema from describe. Absent when only the map was saved.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<OutputSchema>,

    /// Key metadata, entry count and entries ordered by block.
    pub map: PivotMap,
}

/// Only the version field, read before decoding the rest.
#[derive(Deserialize)]
struct Envelope {
    version: u32,
}

impl SessionState {
    pub fn new(mapping_query: impl Into<String>, map: PivotMap) -> Self {
        Self {
            version: SESSION_FORMAT_VERSION,
            mapping_query: mapping_query.into(),
            output: None,
            map,
        }
    }

    pub fn with_output(mut self, output: OutputSchema) -> Self {
        self.output = Some(output);
        self
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, PersistenceError> {
        Ok(serde_json::to_vec_pretty(self)?)
    }

    /// Decodes and checks session state. The version is checked before the
    /// body so that newer formats report a version error, not a parse error.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, PersistenceError> {
        if bytes.iter().all(u8::is_ascii_whitespace) {
            return Err(PersistenceError::InvalidFormat("empty session state".to_string()));
        }
        let envelope: Envelope = serde_json::from_slice(bytes)?;
        if envelope.version != SESSION_FORMAT_VERSION {
            return Err(PersistenceError::UnsupportedVersion {
                found: envelope.version,
                supported: SESSION_FORMAT_VERSION,
            });
        }
        let state: SessionState = serde_json::from_slice(bytes)?;
        state.check()?;
        Ok(state)
    }

    /// The saved output schema and map must describe the same block layout.
    fn check(&self) -> Result<(), PersistenceError> {
        if let Some(output) = &self.output {
            if output.block_count != self.map.len() || output.block_width != self.map.block_width() {
                return Err(PersistenceError::InvalidFormat(format!(
                    "output schema has {} blocks of {} columns, map has {} blocks of {}",
                    output.block_count,
                    output.block_width,
                    self.map.len(),
                    self.map.block_width()
                )));
            }
        }
        Ok(())
    }
}

// ============================================================================
// FILE STORE
// ============================================================================

pub fn save_session(state: &SessionState, path: &Path) -> Result<(), PersistenceError> {
    let bytes = state.to_bytes()?;
    fs::write(path, bytes)?;
    log::info!(
        target: "SESSION",
        "saved session state ({} keys) to {}",
        state.map.len(),
        path.display()
    );
    Ok(())
}

pub fn load_session(path: &Path) -> Result<SessionState, PersistenceError> {
    let bytes = fs::read(path)?;
    let state = SessionState::from_bytes(&bytes)?;
    log::info!(
        target: "SESSION",
        "loaded session state ({} keys) from {}",
        state.map.len(),
        path.display()
    );
    Ok(state)
}
