//! Filesystem-backed storage.
//!
//! - [`FsBaseline`]: one file per module under a root directory, module id =
//!   path relative to the root. Writes are atomic (temp file + rename).
//! - [`JsonlRecordLog`]: append-only JSON Lines file, one envelope per line.

use std::io::Write;
use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use chrono::Utc;
use tempfile::NamedTempFile;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::debug;

use crate::error::StorageError;
use crate::storage_traits::*;

// ---------------------------------------------------------------------------
// FsBaseline
// ---------------------------------------------------------------------------

/// Baseline stored as plain files under `root`.
///
/// Directories whose name starts with `.` are not scanned by `modules()`, so
/// orchestrator state kept in e.g. `<root>/.heal/` never shows up as a module.
///
/// Compare-and-swap is atomic per module but not across processes: two
/// processes racing on the same file can both pass the digest check. The
/// orchestrator serializes commits within a process.
#[derive(Debug, Clone)]
pub struct FsBaseline {
    root: PathBuf,
}

impl FsBaseline {
    /// Create a baseline rooted at `root`. The directory must exist.
    pub fn new(root: impl AsRef<Path>) -> StorageResult<Self> {
        let root = root.as_ref().to_path_buf();
        if !root.is_dir() {
            return Err(StorageError::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("baseline root is not a directory: {}", root.display()),
            )));
        }
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn module_path(&self, module: &ModuleId) -> StorageResult<PathBuf> {
        let rel = Path::new(module.as_str());
        let valid = !module.as_str().is_empty()
            && rel
                .components()
                .all(|c| matches!(c, Component::Normal(_) | Component::CurDir));
        if !valid {
            return Err(StorageError::InvalidModulePath {
                module: module.to_string(),
            });
        }
        Ok(self.root.join(rel))
    }
}

fn not_found_or_io(module: &ModuleId, e: std::io::Error) -> StorageError {
    if e.kind() == std::io::ErrorKind::NotFound {
        StorageError::NotFound {
            module: module.to_string(),
        }
    } else {
        StorageError::Io(e)
    }
}

#[async_trait]
impl BaselineStore for FsBaseline {
    async fn read(&self, module: &ModuleId) -> StorageResult<Vec<u8>> {
        let path = self.module_path(module)?;
        tokio::fs::read(&path)
            .await
            .map_err(|e| not_found_or_io(module, e))
    }

    async fn compare_and_swap(
        &self,
        module: &ModuleId,
        expected: &ContentDigest,
        content: &[u8],
    ) -> StorageResult<ContentDigest> {
        let path = self.module_path(module)?;
        let module = module.clone();
        let expected = expected.clone();
        let content = content.to_vec();

        tokio::task::spawn_blocking(move || -> StorageResult<ContentDigest> {
            let current = std::fs::read(&path).map_err(|e| not_found_or_io(&module, e))?;
            let actual = ContentDigest::from_bytes(&current);
            if actual != expected {
                return Err(StorageError::Conflict {
                    module: module.to_string(),
                    expected: expected.to_string(),
                    actual: actual.to_string(),
                });
            }

            let dir = path.parent().ok_or_else(|| StorageError::InvalidModulePath {
                module: module.to_string(),
            })?;
            // Atomic write: temp file in the same directory, then rename.
            let mut tmp = NamedTempFile::new_in(dir)?;
            tmp.write_all(&content)?;
            tmp.as_file().sync_all()?;
            tmp.persist(&path).map_err(|e| e.error)?;

            debug!(module = %module, "baseline module replaced");
            Ok(ContentDigest::from_bytes(&content))
        })
        .await
        .map_err(|e| StorageError::Io(std::io::Error::other(e.to_string())))?
    }

    async fn modules(&self) -> StorageResult<Vec<ModuleId>> {
        let root = self.root.clone();
        tokio::task::spawn_blocking(move || -> StorageResult<Vec<ModuleId>> {
            let mut found = Vec::new();
            let mut stack = vec![root.clone()];
            while let Some(dir) = stack.pop() {
                for entry in std::fs::read_dir(&dir)? {
                    let entry = entry?;
                    let name = entry.file_name();
                    if name.to_string_lossy().starts_with('.') {
                        continue;
                    }
                    let path = entry.path();
                    if entry.file_type()?.is_dir() {
                        stack.push(path);
                    } else if let Ok(rel) = path.strip_prefix(&root) {
                        let id = rel
                            .components()
                            .map(|c| c.as_os_str().to_string_lossy())
                            .collect::<Vec<_>>()
                            .join("/");
                        found.push(ModuleId::new(id));
                    }
                }
            }
            found.sort();
            Ok(found)
        })
        .await
        .map_err(|e| StorageError::Io(std::io::Error::other(e.to_string())))?
    }
}

// ---------------------------------------------------------------------------
// JsonlRecordLog
// ---------------------------------------------------------------------------

/// Append-only JSON Lines record log.
///
/// Layout: one [`LogRecord`] envelope per line. Every append is flushed and
/// synced before it returns.
#[derive(Debug)]
pub struct JsonlRecordLog {
    path: PathBuf,
    next_seq: Mutex<u64>,
}

impl JsonlRecordLog {
    /// Open (or create) the log at `path`, validating existing records.
    pub async fn open(path: impl AsRef<Path>) -> StorageResult<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let last_seq = match tokio::fs::read_to_string(&path).await {
            Ok(contents) => parse_records(&contents)?
                .last()
                .map(|r| r.seq)
                .unwrap_or(0),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => 0,
            Err(e) => return Err(StorageError::Io(e)),
        };

        Ok(Self {
            path,
            next_seq: Mutex::new(last_seq + 1),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

fn parse_records(contents: &str) -> StorageResult<Vec<LogRecord>> {
    let mut records = Vec::new();
    for (idx, line) in contents.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        let line_no = idx + 1;
        let value: serde_json::Value =
            serde_json::from_str(line).map_err(|e| StorageError::Corrupt {
                line: line_no,
                detail: e.to_string(),
            })?;

        let version = value
            .get("schema_version")
            .and_then(|v| v.as_u64())
            .ok_or_else(|| StorageError::Corrupt {
                line: line_no,
                detail: "missing schema_version".to_string(),
            })?;
        if version != u64::from(RECORD_SCHEMA_VERSION) {
            return Err(StorageError::UnsupportedSchema {
                found: u32::try_from(version).unwrap_or(u32::MAX),
                supported: RECORD_SCHEMA_VERSION,
            });
        }

        let record: LogRecord =
            serde_json::from_value(value).map_err(|e| StorageError::Corrupt {
                line: line_no,
                detail: e.to_string(),
            })?;
        records.push(record);
    }
    Ok(records)
}

#[async_trait]
impl RecordLog for JsonlRecordLog {
    async fn append(
        &self,
        kind: RecordKind,
        payload: serde_json::Value,
    ) -> StorageResult<LogRecord> {
        let mut next_seq = self.next_seq.lock().await;
        let record = LogRecord {
            schema_version: RECORD_SCHEMA_VERSION,
            seq: *next_seq,
            kind,
            payload,
            recorded_at: Utc::now(),
        };

        let mut line = serde_json::to_vec(&record)?;
        line.push(b'\n');

        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        file.write_all(&line).await?;
        file.flush().await?;
        file.sync_data().await?;

        *next_seq += 1;
        Ok(record)
    }

    async fn records(&self) -> StorageResult<Vec<LogRecord>> {
        // Hold the append lock so a half-written line is never observed.
        let _guard = self.next_seq.lock().await;
        match tokio::fs::read_to_string(&self.path).await {
            Ok(contents) => parse_records(&contents),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
            Err(e) => Err(StorageError::Io(e)),
        }
    }
}
