//! Error types for healing-state

use thiserror::Error;

/// Errors that can occur in the persistence layer
#[derive(Error, Debug)]
pub enum StorageError {
    /// Module is not present in the baseline
    #[error("module not found in baseline: {module}")]
    NotFound { module: String },

    /// Module identifier cannot be mapped to a storage location
    #[error("invalid module path: {module}")]
    InvalidModulePath { module: String },

    /// Digest string is not 64 lowercase hex characters
    #[error("invalid content digest: {digest}")]
    InvalidDigest { digest: String },

    /// Baseline content changed between workspace open and commit
    #[error("baseline conflict on {module}: expected {expected}, found {actual}")]
    Conflict {
        module: String,
        expected: String,
        actual: String,
    },

    /// A persisted record carries a schema version this build cannot read
    #[error("unsupported record schema version {found} (supported: {supported})")]
    UnsupportedSchema { found: u32, supported: u32 },

    /// A persisted record could not be parsed
    #[error("corrupt record at line {line}: {detail}")]
    Corrupt { line: usize, detail: String },

    /// Serialization error
    #[error("serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Filesystem error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl StorageError {
    /// Whether this error is a compare-and-swap conflict on the baseline.
    pub fn is_conflict(&self) -> bool {
        matches!(self, StorageError::Conflict { .. })
    }
}
