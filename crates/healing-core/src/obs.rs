//! Structured lifecycle events for a healing run.
//!
//! Every event carries an `event` field so that JSON logs can be filtered
//! without parsing messages.

use tracing::{info, warn};

use healing_state::ModuleId;

use crate::domain::{FailureClass, Strategy, TaskFailure, TaskStatus};

/// Run-scoped span for instrumenting async work, where an entered guard
/// cannot be held across awaits.
pub fn run_span(run_id: &str) -> tracing::Span {
    tracing::info_span!("heal.run", run_id = %run_id)
}

pub fn emit_run_started(run_id: &str, modules: usize, workers: usize) {
    info!(event = "run.started", run_id = %run_id, modules, workers);
}

pub fn emit_cycles_excluded(run_id: &str, cycles: &[Vec<ModuleId>]) {
    for members in cycles {
        let names: Vec<&str> = members.iter().map(|m| m.as_str()).collect();
        warn!(event = "run.cycle_excluded", run_id = %run_id, modules = ?names);
    }
}

pub fn emit_level_started(run_id: &str, level: usize, modules: usize) {
    info!(event = "level.started", run_id = %run_id, level, modules);
}

pub fn emit_level_completed(run_id: &str, level: usize, accepted: usize, duration_ms: u64) {
    info!(
        event = "level.completed",
        run_id = %run_id,
        level,
        accepted,
        duration_ms,
    );
}

pub fn emit_task_transition(module: &ModuleId, from: TaskStatus, to: TaskStatus) {
    tracing::debug!(event = "task.transition", module = %module, from = %from, to = %to);
}

/// Emit event: a task reached a terminal state.
pub fn emit_task_finished(
    module: &ModuleId,
    status: TaskStatus,
    strategy: Option<Strategy>,
    failure: Option<FailureClass>,
    duration_ms: u64,
) {
    info!(
        event = "task.finished",
        module = %module,
        status = %status,
        strategy = strategy.map(|s| s.name()),
        failure = failure.map(|f| f.name()),
        duration_ms,
    );
}

/// Emit event: a failure recorded on the task without deciding its status.
pub fn emit_task_incident(module: &ModuleId, strategy: Option<Strategy>, failure: &TaskFailure) {
    warn!(
        event = "task.incident",
        module = %module,
        strategy = strategy.map(|s| s.name()),
        failure = failure.class.name(),
        detail = %failure.detail,
    );
}

pub fn emit_regenerator_retry(module: &ModuleId, strategy: Strategy, attempt: u32, error: &dyn std::fmt::Display) {
    warn!(
        event = "regenerator.retry",
        module = %module,
        strategy = %strategy,
        attempt,
        error = %error,
    );
}

pub fn emit_run_finished(run_id: &str, duration_ms: u64, accepted: usize, rejected: usize, failed: usize) {
    info!(
        event = "run.finished",
        run_id = %run_id,
        duration_ms,
        accepted,
        rejected,
        failed,
    );
}

/// Emit event: the run stopped on a fatal error (warning level).
pub fn emit_run_aborted(run_id: &str, error: &dyn std::fmt::Display) {
    warn!(event = "run.aborted", run_id = %run_id, error = %error);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn events_emit_inside_run_span() {
        let _span = run_span("run-test").entered();
        emit_run_started("run-test", 3, 2);
        emit_task_finished(
            &ModuleId::new("m"),
            TaskStatus::Rejected,
            Some(Strategy::Decompose),
            Some(FailureClass::NoWinner),
            12,
        );
        emit_task_incident(
            &ModuleId::new("m"),
            Some(Strategy::Modernize),
            &TaskFailure {
                class: FailureClass::RegeneratorError,
                detail: "model down".to_string(),
            },
        );
    }
}
