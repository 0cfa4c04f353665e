//! Error taxonomy for the healing orchestrator.

use healing_state::StorageError;

use crate::domain::task::{FailureClass, TaskStatus};

/// Errors produced by the orchestration layer.
///
/// Only [`HealingError::WorkspaceUnavailable`] aborts a run; every other
/// variant is resolved inside the task it occurred in.
#[derive(Debug, thiserror::Error)]
pub enum HealingError {
    /// Structural: the modules form an import cycle and are excluded.
    #[error("cyclic dependency among modules: {modules:?}")]
    CyclicDependency { modules: Vec<String> },

    /// Transient: the regenerator did not answer within its budget.
    #[error("regenerator timed out for {module} ({strategy}) after {timeout_ms}ms")]
    RegeneratorTimeout {
        module: String,
        strategy: String,
        timeout_ms: u64,
    },

    /// Transient: the regenerator reported an error.
    #[error("regenerator failed for {module} ({strategy}): {detail}")]
    RegeneratorError {
        module: String,
        strategy: String,
        detail: String,
    },

    /// A validation stage rejected a candidate.
    #[error("validation failed for {module} at {stage}: {diagnostic}")]
    ValidationFailure {
        module: String,
        stage: String,
        diagnostic: String,
    },

    /// The candidate validated but did not improve health enough.
    #[error("insufficient improvement for {module}: delta {delta} < threshold {threshold}")]
    InsufficientImprovement {
        module: String,
        delta: i32,
        threshold: i32,
    },

    /// The test suite exceeded its wall-clock budget.
    #[error("test suite for {module} timed out after {timeout_ms}ms")]
    TestTimeout { module: String, timeout_ms: u64 },

    /// The baseline changed underneath the workspace and the retry also failed.
    #[error("commit conflict on {module}: {detail}")]
    CommitConflict { module: String, detail: String },

    /// Every tournament variant failed validation.
    #[error("no tournament winner for {module}: all {candidates} variant(s) failed validation")]
    NoWinner { module: String, candidates: usize },

    /// The module is listed for healing but absent from the baseline.
    #[error("module missing from baseline: {module}")]
    ModuleMissing { module: String },

    /// Commit was requested on a workspace with no staged candidate.
    #[error("nothing staged in workspace for {module}")]
    NothingStaged { module: String },

    /// Fatal: the workspace manager cannot open or discard workspaces.
    #[error("workspace manager unavailable: {detail}")]
    WorkspaceUnavailable { detail: String },

    /// A task state transition outside the allowed state machine.
    #[error("invalid task transition {from:?} -> {to:?}")]
    InvalidTransition { from: TaskStatus, to: TaskStatus },

    /// A worker task ended without producing a report.
    #[error("task for {module} aborted: {detail}")]
    TaskAborted { module: String, detail: String },

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("digest mismatch: expected {expected}, got {actual}")]
    DigestMismatch { expected: String, actual: String },

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for orchestration operations.
pub type HealingResult<T> = std::result::Result<T, HealingError>;

impl HealingError {
    /// Whether the error aborts the whole orchestration run.
    pub fn is_fatal(&self) -> bool {
        matches!(self, HealingError::WorkspaceUnavailable { .. })
    }

    /// Whether a retry may reasonably succeed.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            HealingError::RegeneratorTimeout { .. }
                | HealingError::RegeneratorError { .. }
                | HealingError::CommitConflict { .. }
        )
    }

    /// Failure class recorded on task reports.
    pub fn class(&self) -> FailureClass {
        match self {
            HealingError::CyclicDependency { .. } => FailureClass::CyclicDependency,
            HealingError::RegeneratorTimeout { .. } => FailureClass::RegeneratorTimeout,
            HealingError::RegeneratorError { .. } => FailureClass::RegeneratorError,
            HealingError::ValidationFailure { .. } => FailureClass::ValidationFailure,
            HealingError::InsufficientImprovement { .. } => FailureClass::InsufficientImprovement,
            HealingError::TestTimeout { .. } => FailureClass::TestTimeout,
            HealingError::CommitConflict { .. } => FailureClass::CommitConflict,
            HealingError::NoWinner { .. } => FailureClass::NoWinner,
            HealingError::ModuleMissing { .. } => FailureClass::ModuleMissing,
            HealingError::WorkspaceUnavailable { .. } => FailureClass::WorkspaceUnavailable,
            _ => FailureClass::Internal,
        }
    }
}
