//! Healing-State: persistence layer for the code healing orchestrator
//!
//! This crate owns every byte the orchestrator persists. Nothing above this
//! layer touches the filesystem directly.
//!
//! ## Layer 0 - Data/Persistence
//!
//! Focus: atomic baseline writes and an append-only, schema-versioned record log.
//!
//! ## Key Components
//!
//! - `BaselineStore`: the shared module baseline (read, compare-and-swap write)
//! - `RecordLog`: append-only structured records (knowledge entries, scores)
//! - `FsBaseline` / `JsonlRecordLog`: filesystem implementations
//! - `fakes`: in-memory implementations for tests

mod error;
pub mod fakes;
pub mod fs;
pub mod storage_traits;

pub use error::StorageError;
pub use fs::{FsBaseline, JsonlRecordLog};
pub use storage_traits::{
    BaselineStore, ContentDigest, LogRecord, ModuleId, RecordKind, RecordLog, StorageResult,
    RECORD_SCHEMA_VERSION,
};
