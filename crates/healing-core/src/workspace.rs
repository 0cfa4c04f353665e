//! Isolated per-task workspaces over the shared baseline.
//!
//! A [`Workspace`] is a private copy of one module's baseline content plus an
//! optional staged candidate. It is released by exactly one of
//! [`WorkspaceManager::commit`] or [`WorkspaceManager::discard`]; a workspace
//! dropped without either is treated as discarded.
//!
//! Commits are serialized by the manager and applied with a compare-and-swap
//! against the digest captured at open time, so a commit can never overwrite
//! content the workspace did not start from.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use tracing::{debug, warn};
use uuid::Uuid;

use healing_state::{BaselineStore, ContentDigest, ModuleId, StorageError};

use crate::domain::{HealingError, HealingResult};
use crate::metrics::METRICS;

/// Private copy of one module, scoped to one task.
#[derive(Debug)]
pub struct Workspace {
    id: Uuid,
    module: ModuleId,
    base_digest: ContentDigest,
    original: String,
    candidate: Option<String>,
    opened_at: DateTime<Utc>,
    released: bool,
    open_count: Arc<AtomicUsize>,
}

impl Workspace {
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn module(&self) -> &ModuleId {
        &self.module
    }

    pub fn base_digest(&self) -> &ContentDigest {
        &self.base_digest
    }

    pub fn opened_at(&self) -> DateTime<Utc> {
        self.opened_at
    }

    /// Baseline source at open time.
    pub fn original_text(&self) -> &str {
        &self.original
    }

    pub fn candidate(&self) -> Option<&str> {
        self.candidate.as_deref()
    }

    /// Stage `source` as the content to commit. Replaces any earlier stage.
    pub fn stage(&mut self, source: impl Into<String>) {
        self.candidate = Some(source.into());
    }

    fn release(&mut self) {
        if !self.released {
            self.released = true;
            self.open_count.fetch_sub(1, Ordering::SeqCst);
        }
    }
}

impl Drop for Workspace {
    fn drop(&mut self) {
        if !self.released {
            warn!(
                workspace = %self.id,
                module = %self.module,
                "workspace dropped without commit or discard; treating as discarded"
            );
            self.release();
        }
    }
}

/// Opens, commits and discards workspaces against one [`BaselineStore`].
pub struct WorkspaceManager {
    baseline: Arc<dyn BaselineStore>,
    commit_lock: Mutex<()>,
    open_count: Arc<AtomicUsize>,
    conflict_backoff: Duration,
}

impl std::fmt::Debug for WorkspaceManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkspaceManager")
            .field("open", &self.open_count())
            .field("conflict_backoff", &self.conflict_backoff)
            .finish_non_exhaustive()
    }
}

impl WorkspaceManager {
    pub fn new(baseline: Arc<dyn BaselineStore>) -> Self {
        Self {
            baseline,
            commit_lock: Mutex::new(()),
            open_count: Arc::new(AtomicUsize::new(0)),
            conflict_backoff: Duration::from_millis(50),
        }
    }

    /// Delay before the single commit retry after a conflict.
    pub fn with_conflict_backoff(mut self, backoff: Duration) -> Self {
        self.conflict_backoff = backoff;
        self
    }

    pub fn baseline(&self) -> &Arc<dyn BaselineStore> {
        &self.baseline
    }

    /// Workspaces opened and not yet released.
    pub fn open_count(&self) -> usize {
        self.open_count.load(Ordering::SeqCst)
    }

    /// Open a workspace on the current baseline content of `module`.
    ///
    /// A module absent from the baseline is [`HealingError::ModuleMissing`];
    /// any other storage failure is [`HealingError::WorkspaceUnavailable`].
    pub async fn open(&self, module: &ModuleId) -> HealingResult<Workspace> {
        let bytes = self.baseline.read(module).await.map_err(|e| match e {
            StorageError::NotFound { .. } => HealingError::ModuleMissing {
                module: module.to_string(),
            },
            other => HealingError::WorkspaceUnavailable {
                detail: format!("open {module}: {other}"),
            },
        })?;

        let base_digest = ContentDigest::from_bytes(&bytes);
        let original = String::from_utf8_lossy(&bytes).into_owned();
        self.open_count.fetch_add(1, Ordering::SeqCst);

        let ws = Workspace {
            id: Uuid::new_v4(),
            module: module.clone(),
            base_digest,
            original,
            candidate: None,
            opened_at: Utc::now(),
            released: false,
            open_count: Arc::clone(&self.open_count),
        };
        debug!(workspace = %ws.id, module = %module, digest = %ws.base_digest.short(), "workspace opened");
        Ok(ws)
    }

    /// Atomically replace the baseline module with the staged candidate.
    ///
    /// A conflict is retried once after the configured backoff, against the
    /// same base digest; a second conflict is [`HealingError::CommitConflict`]
    /// and leaves the baseline untouched. The workspace is released on every
    /// path.
    pub async fn commit(&self, mut ws: Workspace) -> HealingResult<ContentDigest> {
        let Some(candidate) = ws.candidate.take() else {
            ws.release();
            return Err(HealingError::NothingStaged {
                module: ws.module.to_string(),
            });
        };

        let _guard = self.commit_lock.lock().await;
        let mut retried = false;
        let result = loop {
            match self
                .baseline
                .compare_and_swap(&ws.module, &ws.base_digest, candidate.as_bytes())
                .await
            {
                Ok(digest) => break Ok(digest),
                Err(e) if e.is_conflict() => {
                    METRICS.inc_commit_conflicts();
                    if retried {
                        break Err(HealingError::CommitConflict {
                            module: ws.module.to_string(),
                            detail: e.to_string(),
                        });
                    }
                    warn!(module = %ws.module, error = %e, "commit conflict; retrying once");
                    retried = true;
                    tokio::time::sleep(self.conflict_backoff).await;
                }
                Err(StorageError::NotFound { .. }) => {
                    break Err(HealingError::ModuleMissing {
                        module: ws.module.to_string(),
                    })
                }
                Err(e) => {
                    break Err(HealingError::WorkspaceUnavailable {
                        detail: format!("commit {}: {e}", ws.module),
                    })
                }
            }
        };

        ws.release();
        if let Ok(digest) = &result {
            METRICS.inc_commits();
            debug!(workspace = %ws.id, module = %ws.module, digest = %digest.short(), "workspace committed");
        }
        result
    }

    /// Release the workspace without touching the baseline.
    pub fn discard(&self, mut ws: Workspace) {
        ws.candidate = None;
        ws.release();
        debug!(workspace = %ws.id, module = %ws.module, "workspace discarded");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use healing_state::fakes::MemoryBaseline;

    fn manager_with(store: Arc<MemoryBaseline>) -> WorkspaceManager {
        WorkspaceManager::new(store).with_conflict_backoff(Duration::from_millis(1))
    }

    #[tokio::test]
    async fn commit_replaces_baseline_and_releases() {
        let store = Arc::new(MemoryBaseline::new().with_module("m.py", "x = 1\n"));
        let mgr = manager_with(Arc::clone(&store));

        let mut ws = mgr.open(&ModuleId::new("m.py")).await.unwrap();
        assert_eq!(mgr.open_count(), 1);
        assert_eq!(ws.original_text(), "x = 1\n");
        ws.stage("x = 2\n");
        mgr.commit(ws).await.unwrap();

        assert_eq!(mgr.open_count(), 0);
        assert_eq!(store.snapshot()[&ModuleId::new("m.py")], b"x = 2\n");
    }

    #[tokio::test]
    async fn discard_leaves_baseline_byte_identical() {
        let store = Arc::new(MemoryBaseline::new().with_module("m.py", "x = 1\n"));
        let before = store.snapshot();
        let mgr = manager_with(Arc::clone(&store));

        let mut ws = mgr.open(&ModuleId::new("m.py")).await.unwrap();
        ws.stage("broken(");
        mgr.discard(ws);

        assert_eq!(store.snapshot(), before);
        assert_eq!(mgr.open_count(), 0);
    }

    #[tokio::test]
    async fn single_conflict_is_retried() {
        let store = Arc::new(MemoryBaseline::new().with_module("m.py", "x = 1\n"));
        store.inject_conflicts(1);
        let mgr = manager_with(Arc::clone(&store));

        let mut ws = mgr.open(&ModuleId::new("m.py")).await.unwrap();
        ws.stage("x = 2\n");
        mgr.commit(ws).await.unwrap();
        assert_eq!(store.write_count(), 1);
    }

    #[tokio::test]
    async fn second_conflict_fails_and_leaves_baseline() {
        let store = Arc::new(MemoryBaseline::new().with_module("m.py", "x = 1\n"));
        store.inject_conflicts(2);
        let before = store.snapshot();
        let mgr = manager_with(Arc::clone(&store));

        let mut ws = mgr.open(&ModuleId::new("m.py")).await.unwrap();
        ws.stage("x = 2\n");
        let err = mgr.commit(ws).await.unwrap_err();

        assert!(matches!(err, HealingError::CommitConflict { .. }));
        assert!(!err.is_fatal());
        assert_eq!(store.snapshot(), before);
        assert_eq!(mgr.open_count(), 0);
    }

    #[tokio::test]
    async fn baseline_changed_underneath_is_a_conflict() {
        let store = Arc::new(MemoryBaseline::new().with_module("m.py", "x = 1\n"));
        let mgr = manager_with(Arc::clone(&store));

        let mut ws = mgr.open(&ModuleId::new("m.py")).await.unwrap();
        store.insert("m.py", "x = 99\n");
        ws.stage("x = 2\n");
        let err = mgr.commit(ws).await.unwrap_err();

        assert!(matches!(err, HealingError::CommitConflict { .. }));
        assert_eq!(store.snapshot()[&ModuleId::new("m.py")], b"x = 99\n");
    }

    #[tokio::test]
    async fn open_missing_module_is_not_fatal() {
        let mgr = manager_with(Arc::new(MemoryBaseline::new()));
        let err = mgr.open(&ModuleId::new("ghost.py")).await.unwrap_err();
        assert!(matches!(err, HealingError::ModuleMissing { .. }));
        assert!(!err.is_fatal());
        assert_eq!(mgr.open_count(), 0);
    }

    #[tokio::test]
    async fn commit_without_stage_is_rejected_and_released() {
        let store = Arc::new(MemoryBaseline::new().with_module("m.py", "x = 1\n"));
        let mgr = manager_with(Arc::clone(&store));
        let ws = mgr.open(&ModuleId::new("m.py")).await.unwrap();
        let err = mgr.commit(ws).await.unwrap_err();
        assert!(matches!(err, HealingError::NothingStaged { .. }));
        assert_eq!(mgr.open_count(), 0);
        assert_eq!(store.write_count(), 0);
    }

    #[tokio::test]
    async fn dropped_workspace_counts_as_discarded() {
        let store = Arc::new(MemoryBaseline::new().with_module("m.py", "x = 1\n"));
        let mgr = manager_with(Arc::clone(&store));
        {
            let mut ws = mgr.open(&ModuleId::new("m.py")).await.unwrap();
            ws.stage("leaked");
            assert_eq!(mgr.open_count(), 1);
        }
        assert_eq!(mgr.open_count(), 0);
        assert_eq!(store.write_count(), 0);
    }
}
