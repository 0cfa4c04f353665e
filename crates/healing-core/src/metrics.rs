//! Global atomic counters for healing runs.
//!
//! Counters are incremented at the call site and emitted together by
//! [`Metrics::flush`] at the end of a run.

use std::sync::atomic::{AtomicU64, Ordering};

/// Global metrics singleton.
pub static METRICS: Metrics = Metrics::new();

/// Lock-free counters.
pub struct Metrics {
    tasks_accepted: AtomicU64,
    tasks_rejected: AtomicU64,
    tasks_failed: AtomicU64,
    regenerator_attempts: AtomicU64,
    regenerator_retries: AtomicU64,
    commits: AtomicU64,
    commit_conflicts: AtomicU64,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    pub const fn new() -> Self {
        Self {
            tasks_accepted: AtomicU64::new(0),
            tasks_rejected: AtomicU64::new(0),
            tasks_failed: AtomicU64::new(0),
            regenerator_attempts: AtomicU64::new(0),
            regenerator_retries: AtomicU64::new(0),
            commits: AtomicU64::new(0),
            commit_conflicts: AtomicU64::new(0),
        }
    }

    pub fn inc_tasks_accepted(&self) {
        self.tasks_accepted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_tasks_rejected(&self) {
        self.tasks_rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_tasks_failed(&self) {
        self.tasks_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_regenerator_attempts(&self) {
        self.regenerator_attempts.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "regenerator_attempts", "counter incremented");
    }

    pub fn inc_regenerator_retries(&self) {
        self.regenerator_retries.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "regenerator_retries", "counter incremented");
    }

    pub fn inc_commits(&self) {
        self.commits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_commit_conflicts(&self) {
        self.commit_conflicts.fetch_add(1, Ordering::Relaxed);
    }

    /// Emit all current counter values as a single `info!` event.
    pub fn flush(&self) {
        tracing::info!(
            metric = "flush",
            tasks_accepted = self.tasks_accepted(),
            tasks_rejected = self.tasks_rejected(),
            tasks_failed = self.tasks_failed(),
            regenerator_attempts = self.regenerator_attempts(),
            regenerator_retries = self.regenerator_retries(),
            commits = self.commits(),
            commit_conflicts = self.commit_conflicts(),
        );
    }

    pub fn tasks_accepted(&self) -> u64 {
        self.tasks_accepted.load(Ordering::Relaxed)
    }

    pub fn tasks_rejected(&self) -> u64 {
        self.tasks_rejected.load(Ordering::Relaxed)
    }

    pub fn tasks_failed(&self) -> u64 {
        self.tasks_failed.load(Ordering::Relaxed)
    }

    pub fn regenerator_attempts(&self) -> u64 {
        self.regenerator_attempts.load(Ordering::Relaxed)
    }

    pub fn regenerator_retries(&self) -> u64 {
        self.regenerator_retries.load(Ordering::Relaxed)
    }

    pub fn commits(&self) -> u64 {
        self.commits.load(Ordering::Relaxed)
    }

    pub fn commit_conflicts(&self) -> u64 {
        self.commit_conflicts.load(Ordering::Relaxed)
    }

    /// Reset all counters to zero (useful in tests).
    pub fn reset(&self) {
        for counter in [
            &self.tasks_accepted,
            &self.tasks_rejected,
            &self.tasks_failed,
            &self.regenerator_attempts,
            &self.regenerator_retries,
            &self.commits,
            &self.commit_conflicts,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_increment_and_reset() {
        let m = Metrics::new();
        m.inc_tasks_accepted();
        m.inc_tasks_accepted();
        m.inc_commit_conflicts();
        m.inc_regenerator_retries();
        assert_eq!(m.tasks_accepted(), 2);
        assert_eq!(m.commit_conflicts(), 1);
        assert_eq!(m.regenerator_retries(), 1);

        m.reset();
        assert_eq!(m.tasks_accepted(), 0);
        assert_eq!(m.commit_conflicts(), 0);
    }
}
