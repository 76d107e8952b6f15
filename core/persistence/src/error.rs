//! FILENAME: core/persistence/src/error.rs

use thiserror::Error;

#[derive(Error, Debug)]
pub enum PersistenceError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid session state: {0}")]
    InvalidFormat(String),

    #[error("Unsupported session state version {found} (supported: {supported})")]
    UnsupportedVersion { found: u32, supported: u32 },
}
