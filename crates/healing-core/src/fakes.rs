//! Deterministic in-process collaborators (testing only)
//!
//! Each fake satisfies its collaborator trait without spawning processes.
//! Behaviour is keyed on module, strategy or source text so outcomes never
//! depend on call order across workers.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;

use healing_state::ModuleId;

use crate::collaborators::*;
use crate::domain::{RawMetrics, Strategy};

/// Long enough to trip any configured timeout.
const HANG: Duration = Duration::from_secs(24 * 60 * 60);

// ---------------------------------------------------------------------------
// ScriptedRegenerator
// ---------------------------------------------------------------------------

/// One scripted regenerator response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Scripted {
    Source(String),
    Error(String),
    /// Report a timeout immediately.
    Timeout,
    /// Never answer; the orchestrator's timeout must fire.
    Hang,
}

/// Regenerator answering from per-`(module, strategy)` scripts.
///
/// Each call pops the next response; the last response of a script repeats.
/// Unscripted pairs fail with an error. Tracks in-flight calls so tests can
/// assert the worker bound.
#[derive(Debug, Default)]
pub struct ScriptedRegenerator {
    scripts: Mutex<HashMap<(ModuleId, Strategy), VecDeque<Scripted>>>,
    delay: Duration,
    calls: AtomicU64,
    in_flight: AtomicUsize,
    peak: AtomicUsize,
    log: Mutex<Vec<(ModuleId, Strategy, u32)>>,
}

impl ScriptedRegenerator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sleep this long inside every call.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn script(
        self,
        module: impl Into<ModuleId>,
        strategy: Strategy,
        responses: impl IntoIterator<Item = Scripted>,
    ) -> Self {
        self.scripts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert((module.into(), strategy), responses.into_iter().collect());
        self
    }

    /// Shorthand for a script that always returns `source`.
    pub fn returns(self, module: impl Into<ModuleId>, strategy: Strategy, source: impl Into<String>) -> Self {
        self.script(module, strategy, [Scripted::Source(source.into())])
    }

    pub fn calls(&self) -> u64 {
        self.calls.load(Ordering::SeqCst)
    }

    /// Highest number of simultaneous calls observed.
    pub fn peak_concurrency(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    /// `(module, strategy, attempt)` for every call, in arrival order.
    pub fn call_log(&self) -> Vec<(ModuleId, Strategy, u32)> {
        self.log.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    fn next_response(&self, module: &ModuleId, strategy: Strategy) -> Option<Scripted> {
        let mut scripts = self.scripts.lock().unwrap_or_else(PoisonError::into_inner);
        let queue = scripts.get_mut(&(module.clone(), strategy))?;
        if queue.len() > 1 {
            queue.pop_front()
        } else {
            queue.front().cloned()
        }
    }
}

struct InFlight<'a>(&'a AtomicUsize);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl Regenerator for ScriptedRegenerator {
    async fn generate(&self, request: RegenerationRequest) -> Result<String, RegeneratorFailure> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.log
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((request.module.clone(), request.strategy, request.attempt));

        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        let _in_flight = InFlight(&self.in_flight);

        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        match self.next_response(&request.module, request.strategy) {
            Some(Scripted::Source(s)) => Ok(s),
            Some(Scripted::Error(e)) => Err(RegeneratorFailure::Failed(e)),
            Some(Scripted::Timeout) => Err(RegeneratorFailure::Timeout),
            Some(Scripted::Hang) => {
                tokio::time::sleep(HANG).await;
                Err(RegeneratorFailure::Timeout)
            }
            None => Err(RegeneratorFailure::Failed(format!(
                "no script for {} / {}",
                request.module, request.strategy
            ))),
        }
    }
}

// ---------------------------------------------------------------------------
// MetricsTable
// ---------------------------------------------------------------------------

/// Analyzer that looks metrics up by exact source text.
#[derive(Debug, Default, Clone)]
pub struct MetricsTable {
    by_source: HashMap<String, RawMetrics>,
    fallback: Option<RawMetrics>,
}

impl MetricsTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, source: impl Into<String>, metrics: RawMetrics) -> Self {
        self.by_source.insert(source.into(), metrics);
        self
    }

    /// Metrics for any source not in the table (otherwise an error).
    pub fn with_fallback(mut self, metrics: RawMetrics) -> Self {
        self.fallback = Some(metrics);
        self
    }
}

#[async_trait]
impl StaticAnalyzer for MetricsTable {
    async fn analyze(&self, module: &ModuleId, source: &str) -> Result<RawMetrics, CollaboratorError> {
        self.by_source
            .get(source)
            .copied()
            .or(self.fallback)
            .ok_or_else(|| CollaboratorError::new(format!("no metrics for source of {module}")))
    }
}

// ---------------------------------------------------------------------------
// SourceChecks
// ---------------------------------------------------------------------------

/// Inspector that fails sources containing configured markers.
#[derive(Debug, Default, Clone)]
pub struct SourceChecks {
    syntax_markers: Vec<String>,
    import_markers: Vec<String>,
}

impl SourceChecks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reject_syntax_containing(mut self, marker: impl Into<String>) -> Self {
        self.syntax_markers.push(marker.into());
        self
    }

    pub fn reject_imports_containing(mut self, marker: impl Into<String>) -> Self {
        self.import_markers.push(marker.into());
        self
    }

    fn check(markers: &[String], source: &str, what: &str) -> CheckReport {
        match markers.iter().find(|m| source.contains(m.as_str())) {
            Some(m) => CheckReport::fail(format!("{what}: found {m:?}")),
            None => CheckReport::pass(),
        }
    }
}

#[async_trait]
impl SourceInspector for SourceChecks {
    async fn check_syntax(&self, _module: &ModuleId, source: &str) -> Result<CheckReport, CollaboratorError> {
        Ok(Self::check(&self.syntax_markers, source, "syntax error"))
    }

    async fn check_imports(&self, _module: &ModuleId, source: &str) -> Result<CheckReport, CollaboratorError> {
        Ok(Self::check(&self.import_markers, source, "unresolved import"))
    }
}

// ---------------------------------------------------------------------------
// StubTestRunner
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
struct TestRunnerState {
    fail_markers: Vec<String>,
    hang_markers: Vec<String>,
    calls: AtomicU64,
    last_dependents: Mutex<Vec<ModuleId>>,
    tested: Mutex<HashSet<ModuleId>>,
}

/// Test runner that passes unless the source contains a fail or hang marker.
///
/// Cheap to clone; clones share call counters.
#[derive(Debug, Default, Clone)]
pub struct StubTestRunner {
    state: Arc<TestRunnerState>,
}

impl StubTestRunner {
    pub fn new() -> Self {
        Self::default()
    }

    fn configure(self, f: impl FnOnce(&mut TestRunnerState)) -> Self {
        let mut state = Arc::try_unwrap(self.state).unwrap_or_else(|shared| TestRunnerState {
            fail_markers: shared.fail_markers.clone(),
            hang_markers: shared.hang_markers.clone(),
            ..TestRunnerState::default()
        });
        f(&mut state);
        Self {
            state: Arc::new(state),
        }
    }

    pub fn fail_on_source_containing(self, marker: impl Into<String>) -> Self {
        let marker = marker.into();
        self.configure(|s| s.fail_markers.push(marker))
    }

    pub fn hang_on_source_containing(self, marker: impl Into<String>) -> Self {
        let marker = marker.into();
        self.configure(|s| s.hang_markers.push(marker))
    }

    pub fn calls(&self) -> u64 {
        self.state.calls.load(Ordering::SeqCst)
    }

    pub fn last_dependents(&self) -> Vec<ModuleId> {
        self.state
            .last_dependents
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn tested_modules(&self) -> HashSet<ModuleId> {
        self.state
            .tested
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[async_trait]
impl TestRunner for StubTestRunner {
    async fn run_tests(
        &self,
        module: &ModuleId,
        source: &str,
        dependents: &[ModuleId],
    ) -> Result<CheckReport, CollaboratorError> {
        self.state.calls.fetch_add(1, Ordering::SeqCst);
        *self
            .state
            .last_dependents
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = dependents.to_vec();
        self.state
            .tested
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(module.clone());

        if self.state.hang_markers.iter().any(|m| source.contains(m.as_str())) {
            tokio::time::sleep(HANG).await;
        }
        match self.state.fail_markers.iter().find(|m| source.contains(m.as_str())) {
            Some(m) => Ok(CheckReport::fail(format!("assertion failed near {m:?}"))),
            None => Ok(CheckReport::pass()),
        }
    }
}

// ---------------------------------------------------------------------------
// TimingTable
// ---------------------------------------------------------------------------

/// Benchmarker returning fixed timings per source text.
#[derive(Debug, Default, Clone)]
pub struct TimingTable {
    by_source: HashMap<String, f64>,
}

impl TimingTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, source: impl Into<String>, ms: f64) -> Self {
        self.by_source.insert(source.into(), ms);
        self
    }
}

#[async_trait]
impl Benchmarker for TimingTable {
    async fn measure(&self, _module: &ModuleId, source: &str) -> Option<f64> {
        self.by_source.get(source).copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(module: &str, strategy: Strategy, attempt: u32) -> RegenerationRequest {
        RegenerationRequest {
            module: ModuleId::new(module),
            source: String::new(),
            strategy,
            instructions: strategy.instructions().to_string(),
            attempt,
        }
    }

    #[tokio::test]
    async fn script_pops_then_repeats_last() {
        let regen = ScriptedRegenerator::new().script(
            "m",
            Strategy::Decompose,
            [Scripted::Timeout, Scripted::Source("ok".to_string())],
        );
        assert_eq!(
            regen.generate(request("m", Strategy::Decompose, 1)).await,
            Err(RegeneratorFailure::Timeout)
        );
        assert_eq!(
            regen.generate(request("m", Strategy::Decompose, 2)).await,
            Ok("ok".to_string())
        );
        assert_eq!(
            regen.generate(request("m", Strategy::Decompose, 3)).await,
            Ok("ok".to_string())
        );
        assert_eq!(regen.calls(), 3);
    }

    #[tokio::test]
    async fn unscripted_pair_is_an_error() {
        let regen = ScriptedRegenerator::new();
        assert!(matches!(
            regen.generate(request("m", Strategy::CleanLint, 1)).await,
            Err(RegeneratorFailure::Failed(_))
        ));
    }

    #[tokio::test]
    async fn test_runner_clones_share_counters() {
        let runner = StubTestRunner::new().fail_on_source_containing("boom");
        let clone = runner.clone();
        let report = clone.run_tests(&ModuleId::new("m"), "boom()", &[]).await.unwrap();
        assert!(!report.passed);
        assert_eq!(runner.calls(), 1);
    }
}
