//! Healing task state machine.
//!
//! ```text
//! Pending -> Running -> Validating -> { Accepted | Rejected | Failed }
//!    |          |
//!    +----------+--> Failed
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use healing_state::ModuleId;

use crate::domain::error::{HealingError, HealingResult};
use crate::domain::variant::Variant;

/// Lifecycle status of a [`HealingTask`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Running,
    Validating,
    Accepted,
    Rejected,
    Failed,
}

impl TaskStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskStatus::Accepted | TaskStatus::Rejected | TaskStatus::Failed
        )
    }

    /// Whether `self -> next` is an edge of the state machine.
    pub fn can_transition_to(&self, next: TaskStatus) -> bool {
        use TaskStatus::*;
        matches!(
            (self, next),
            (Pending, Running)
                | (Pending, Failed)
                | (Running, Validating)
                | (Running, Failed)
                | (Validating, Accepted)
                | (Validating, Rejected)
                | (Validating, Failed)
        )
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Running => "running",
            TaskStatus::Validating => "validating",
            TaskStatus::Accepted => "accepted",
            TaskStatus::Rejected => "rejected",
            TaskStatus::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Coarse failure taxonomy recorded on rejected and failed tasks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureClass {
    CyclicDependency,
    RegeneratorTimeout,
    RegeneratorError,
    ValidationFailure,
    InsufficientImprovement,
    TestTimeout,
    CommitConflict,
    NoWinner,
    ModuleMissing,
    WorkspaceUnavailable,
    Internal,
}

impl FailureClass {
    pub fn name(&self) -> &'static str {
        match self {
            FailureClass::CyclicDependency => "cyclic_dependency",
            FailureClass::RegeneratorTimeout => "regenerator_timeout",
            FailureClass::RegeneratorError => "regenerator_error",
            FailureClass::ValidationFailure => "validation_failure",
            FailureClass::InsufficientImprovement => "insufficient_improvement",
            FailureClass::TestTimeout => "test_timeout",
            FailureClass::CommitConflict => "commit_conflict",
            FailureClass::NoWinner => "no_winner",
            FailureClass::ModuleMissing => "module_missing",
            FailureClass::WorkspaceUnavailable => "workspace_unavailable",
            FailureClass::Internal => "internal",
        }
    }

    /// Failures that mean the module could not be processed safely, as
    /// opposed to a candidate that was judged and found wanting.
    pub fn needs_manual_review(&self) -> bool {
        matches!(
            self,
            FailureClass::CyclicDependency
                | FailureClass::RegeneratorTimeout
                | FailureClass::RegeneratorError
                | FailureClass::CommitConflict
                | FailureClass::ModuleMissing
                | FailureClass::WorkspaceUnavailable
                | FailureClass::Internal
        )
    }
}

impl std::fmt::Display for FailureClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Failure class plus the diagnostic text that produced it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskFailure {
    pub class: FailureClass,
    pub detail: String,
}

impl From<&HealingError> for TaskFailure {
    fn from(err: &HealingError) -> Self {
        Self {
            class: err.class(),
            detail: err.to_string(),
        }
    }
}

/// One recorded state change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusChange {
    pub from: TaskStatus,
    pub to: TaskStatus,
    pub at: DateTime<Utc>,
}

/// A single healing attempt for one module within one run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealingTask {
    pub task_id: Uuid,
    pub module: ModuleId,
    /// Worker slot that executed the task.
    pub worker: Option<usize>,
    /// Workspace opened for the task.
    pub workspace: Option<Uuid>,
    pub variants: Vec<Variant>,
    pub status: TaskStatus,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub transitions: Vec<StatusChange>,
}

impl HealingTask {
    pub fn new(module: ModuleId) -> Self {
        Self {
            task_id: Uuid::new_v4(),
            module,
            worker: None,
            workspace: None,
            variants: Vec::new(),
            status: TaskStatus::Pending,
            started_at: None,
            finished_at: None,
            transitions: Vec::new(),
        }
    }

    /// Move to `next`, stamping start/finish times.
    pub fn advance(&mut self, next: TaskStatus) -> HealingResult<()> {
        if !self.status.can_transition_to(next) {
            return Err(HealingError::InvalidTransition {
                from: self.status,
                to: next,
            });
        }
        let now = Utc::now();
        if next == TaskStatus::Running {
            self.started_at = Some(now);
        }
        if next.is_terminal() {
            self.finished_at = Some(now);
        }
        self.transitions.push(StatusChange {
            from: self.status,
            to: next,
            at: now,
        });
        crate::obs::emit_task_transition(&self.module, self.status, next);
        self.status = next;
        Ok(())
    }

    /// Wall-clock time between start and finish (0 when never started).
    pub fn elapsed_ms(&self) -> u64 {
        match (self.started_at, self.finished_at) {
            (Some(start), Some(end)) => (end - start).num_milliseconds().max(0) as u64,
            _ => 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn happy_path_transitions_are_allowed() {
        let mut task = HealingTask::new(ModuleId::new("m"));
        task.advance(TaskStatus::Running).unwrap();
        task.advance(TaskStatus::Validating).unwrap();
        task.advance(TaskStatus::Accepted).unwrap();
        assert!(task.status.is_terminal());
        assert!(task.started_at.is_some());
        assert!(task.finished_at.is_some());
        assert_eq!(task.transitions.len(), 3);
    }

    #[test]
    fn terminal_states_cannot_be_left() {
        let mut task = HealingTask::new(ModuleId::new("m"));
        task.advance(TaskStatus::Failed).unwrap();
        let err = task.advance(TaskStatus::Running).unwrap_err();
        assert!(matches!(
            err,
            HealingError::InvalidTransition {
                from: TaskStatus::Failed,
                to: TaskStatus::Running
            }
        ));
    }

    #[test]
    fn pending_cannot_skip_to_accepted() {
        assert!(!TaskStatus::Pending.can_transition_to(TaskStatus::Accepted));
        assert!(!TaskStatus::Running.can_transition_to(TaskStatus::Rejected));
    }

    #[test]
    fn manual_review_classes() {
        assert!(FailureClass::CyclicDependency.needs_manual_review());
        assert!(FailureClass::RegeneratorTimeout.needs_manual_review());
        assert!(!FailureClass::InsufficientImprovement.needs_manual_review());
        assert!(!FailureClass::NoWinner.needs_manual_review());
    }
}
