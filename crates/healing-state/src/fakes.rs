//! In-memory fakes for storage traits (testing only)
//!
//! Provides `MemoryBaseline` and `MemoryRecordLog` that satisfy the trait
//! contracts without touching the filesystem.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;
use chrono::Utc;

use crate::error::StorageError;
use crate::storage_traits::*;

// ---------------------------------------------------------------------------
// MemoryBaseline
// ---------------------------------------------------------------------------

/// In-memory baseline backed by a `BTreeMap<ModuleId, bytes>`.
///
/// `inject_conflicts(n)` makes the next `n` writes fail with
/// `StorageError::Conflict` regardless of digest, to exercise retry paths.
#[derive(Debug, Default)]
pub struct MemoryBaseline {
    modules: Mutex<BTreeMap<ModuleId, Vec<u8>>>,
    pending_conflicts: AtomicU32,
    writes: AtomicU64,
}

impl MemoryBaseline {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert.
    pub fn with_module(self, module: impl Into<ModuleId>, content: impl Into<Vec<u8>>) -> Self {
        self.insert(module, content);
        self
    }

    /// Insert or replace a module without any conflict check.
    pub fn insert(&self, module: impl Into<ModuleId>, content: impl Into<Vec<u8>>) {
        self.modules
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(module.into(), content.into());
    }

    /// Copy of the full baseline, for before/after comparisons.
    pub fn snapshot(&self) -> BTreeMap<ModuleId, Vec<u8>> {
        self.modules
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Fail the next `n` writes with a conflict.
    pub fn inject_conflicts(&self, n: u32) {
        self.pending_conflicts.store(n, Ordering::SeqCst);
    }

    /// Number of successful writes so far.
    pub fn write_count(&self) -> u64 {
        self.writes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl BaselineStore for MemoryBaseline {
    async fn read(&self, module: &ModuleId) -> StorageResult<Vec<u8>> {
        self.modules
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(module)
            .cloned()
            .ok_or_else(|| StorageError::NotFound {
                module: module.to_string(),
            })
    }

    async fn compare_and_swap(
        &self,
        module: &ModuleId,
        expected: &ContentDigest,
        content: &[u8],
    ) -> StorageResult<ContentDigest> {
        let mut modules = self.modules.lock().unwrap_or_else(PoisonError::into_inner);
        let current = modules.get(module).ok_or_else(|| StorageError::NotFound {
            module: module.to_string(),
        })?;
        let actual = ContentDigest::from_bytes(current);

        let injected = self
            .pending_conflicts
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if injected || &actual != expected {
            return Err(StorageError::Conflict {
                module: module.to_string(),
                expected: expected.to_string(),
                actual: actual.to_string(),
            });
        }

        modules.insert(module.clone(), content.to_vec());
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(ContentDigest::from_bytes(content))
    }

    async fn modules(&self) -> StorageResult<Vec<ModuleId>> {
        Ok(self
            .modules
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect())
    }
}

// ---------------------------------------------------------------------------
// MemoryRecordLog
// ---------------------------------------------------------------------------

/// In-memory append-only record log backed by a `Vec<LogRecord>`.
#[derive(Debug, Default)]
pub struct MemoryRecordLog {
    records: Mutex<Vec<LogRecord>>,
}

impl MemoryRecordLog {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RecordLog for MemoryRecordLog {
    async fn append(
        &self,
        kind: RecordKind,
        payload: serde_json::Value,
    ) -> StorageResult<LogRecord> {
        let mut records = self.records.lock().unwrap_or_else(PoisonError::into_inner);
        let record = LogRecord {
            schema_version: RECORD_SCHEMA_VERSION,
            seq: records.len() as u64 + 1,
            kind,
            payload,
            recorded_at: Utc::now(),
        };
        records.push(record.clone());
        Ok(record)
    }

    async fn records(&self) -> StorageResult<Vec<LogRecord>> {
        Ok(self
            .records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone())
    }
}
