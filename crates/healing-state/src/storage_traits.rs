//! Storage trait definitions for the healing orchestrator
//!
//! These traits define the core storage abstractions:
//! - `BaselineStore`: the shared, committed source of every module
//! - `RecordLog`: append-only structured records (knowledge entries, scores)
//!
//! All traits are async and backend-agnostic. In-memory fakes are provided
//! for testing via the `fakes` module.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::Sha256;

use crate::error::StorageError;

/// Result type for storage operations
pub type StorageResult<T> = std::result::Result<T, StorageError>;

/// Schema version written into every persisted record envelope.
pub const RECORD_SCHEMA_VERSION: u32 = 1;

// ---------------------------------------------------------------------------
// Identifiers
// ---------------------------------------------------------------------------

/// Stable module identity, e.g. `"pkg/parser.py"`.
///
/// Ordered so that every collection keyed by module iterates deterministically.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ModuleId(String);

impl ModuleId {
    pub fn new(id: impl Into<String>) -> Self {
        ModuleId(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ModuleId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ModuleId {
    fn from(s: &str) -> Self {
        ModuleId(s.to_string())
    }
}

impl From<String> for ModuleId {
    fn from(s: String) -> Self {
        ModuleId(s)
    }
}

/// Content digest (SHA-256 hex string).
///
/// The inner field is private to guarantee the string is always valid
/// lowercase hex produced by `from_bytes` or validated via `TryFrom<String>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ContentDigest(String);

impl ContentDigest {
    /// Compute the SHA-256 digest of the given bytes.
    pub fn from_bytes(data: &[u8]) -> Self {
        use sha2::Digest;
        let mut hasher = Sha256::new();
        hasher.update(data);
        ContentDigest(hex::encode(hasher.finalize()))
    }

    /// Return the full hex string.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Short form (first 12 hex chars).
    pub fn short(&self) -> &str {
        &self.0[..12.min(self.0.len())]
    }
}

impl TryFrom<String> for ContentDigest {
    type Error = StorageError;

    fn try_from(s: String) -> std::result::Result<Self, Self::Error> {
        if s.len() != 64 || !s.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(StorageError::InvalidDigest { digest: s });
        }
        Ok(ContentDigest(s.to_ascii_lowercase()))
    }
}

impl std::fmt::Display for ContentDigest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// BaselineStore: shared committed module sources
// ---------------------------------------------------------------------------

/// The shared baseline every healing workspace is opened from.
///
/// Guarantees:
/// - `read` returns the exact bytes of the last successful write.
/// - `compare_and_swap` writes only when the current content digest equals
///   `expected`; otherwise it returns `StorageError::Conflict` and leaves the
///   module untouched. A successful write is atomic: readers observe either
///   the old bytes or the new bytes, never a mixture.
#[async_trait]
pub trait BaselineStore: Send + Sync {
    /// Read the committed source of `module`.
    async fn read(&self, module: &ModuleId) -> StorageResult<Vec<u8>>;

    /// Digest of the committed source of `module`.
    async fn digest(&self, module: &ModuleId) -> StorageResult<ContentDigest> {
        let bytes = self.read(module).await?;
        Ok(ContentDigest::from_bytes(&bytes))
    }

    /// Replace the source of `module` if it still matches `expected`.
    async fn compare_and_swap(
        &self,
        module: &ModuleId,
        expected: &ContentDigest,
        content: &[u8],
    ) -> StorageResult<ContentDigest>;

    /// All modules present in the baseline, sorted.
    async fn modules(&self) -> StorageResult<Vec<ModuleId>>;
}

// ---------------------------------------------------------------------------
// RecordLog: append-only structured records
// ---------------------------------------------------------------------------

/// Kind of a persisted record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordKind {
    /// An accepted transformation and its outcome metrics
    Knowledge,
    /// A module health score observed after a rescore
    Score,
}

/// One persisted record envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogRecord {
    /// Envelope schema version
    pub schema_version: u32,
    /// Monotonic sequence number within the log, starting at 1
    pub seq: u64,
    /// Record kind
    pub kind: RecordKind,
    /// Record payload
    pub payload: serde_json::Value,
    /// Append timestamp
    pub recorded_at: DateTime<Utc>,
}

/// Append-only record log.
///
/// Guarantees:
/// - Records are never mutated or removed once appended.
/// - `seq` is strictly increasing in append order.
/// - Concurrent appends are safe; no ordering between concurrent appends is
///   promised beyond distinct sequence numbers.
/// - An append has been made durable by the time it returns.
#[async_trait]
pub trait RecordLog: Send + Sync {
    /// Append a record and return the stored envelope.
    async fn append(
        &self,
        kind: RecordKind,
        payload: serde_json::Value,
    ) -> StorageResult<LogRecord>;

    /// Every record, in sequence order.
    async fn records(&self) -> StorageResult<Vec<LogRecord>>;

    /// Records of one kind, in sequence order.
    async fn records_of(&self, kind: RecordKind) -> StorageResult<Vec<LogRecord>> {
        Ok(self
            .records()
            .await?
            .into_iter()
            .filter(|r| r.kind == kind)
            .collect())
    }
}
