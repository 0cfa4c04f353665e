//! Staged, fail-fast candidate validation.
//!
//! ```text
//! SyntaxCheck -> ImportCheck -> StaticTypeCheck -> TestSuite -> HealthDelta
//! ```
//!
//! The first failing stage ends the run and is recorded with its diagnostic.
//! The pipeline only reads: it never touches the baseline.

use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::debug;

use healing_state::ModuleId;

use crate::collaborators::{CheckReport, CollaboratorError, Toolchain};
use crate::domain::{HealingError, RawMetrics, Strategy};
use crate::health::HealthScorer;

/// The five validation stages, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidationStage {
    SyntaxCheck,
    ImportCheck,
    StaticTypeCheck,
    TestSuite,
    HealthDelta,
}

impl ValidationStage {
    pub const ORDER: [ValidationStage; 5] = [
        ValidationStage::SyntaxCheck,
        ValidationStage::ImportCheck,
        ValidationStage::StaticTypeCheck,
        ValidationStage::TestSuite,
        ValidationStage::HealthDelta,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            ValidationStage::SyntaxCheck => "syntax_check",
            ValidationStage::ImportCheck => "import_check",
            ValidationStage::StaticTypeCheck => "static_type_check",
            ValidationStage::TestSuite => "test_suite",
            ValidationStage::HealthDelta => "health_delta",
        }
    }
}

impl std::fmt::Display for ValidationStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Result of one stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageOutcome {
    pub stage: ValidationStage,
    pub passed: bool,
    #[serde(default)]
    pub timed_out: bool,
    pub diagnostic: String,
    pub duration_ms: u64,
}

/// Overall decision for one candidate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "verdict", rename_all = "snake_case")]
pub enum Verdict {
    Accepted,
    Rejected { stage: ValidationStage },
    /// A stage exceeded its wall-clock budget.
    TimedOut { stage: ValidationStage },
}

impl Verdict {
    pub fn is_accepted(&self) -> bool {
        matches!(self, Verdict::Accepted)
    }
}

/// Immutable record of validating one candidate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationResult {
    pub module: ModuleId,
    pub strategy: Option<Strategy>,
    pub stages: Vec<StageOutcome>,
    pub verdict: Verdict,
    pub health_before: u8,
    /// Present once the candidate has been analyzed.
    pub health_after: Option<u8>,
    pub health_delta: Option<i32>,
    pub metrics_before: RawMetrics,
    pub metrics_after: Option<RawMetrics>,
}

impl ValidationResult {
    pub fn is_accepted(&self) -> bool {
        self.verdict.is_accepted()
    }

    /// The outcome of the stage that ended validation, if it did not pass.
    pub fn failing_stage(&self) -> Option<&StageOutcome> {
        self.stages.iter().find(|s| !s.passed)
    }

    /// The error a rejected or timed-out candidate resolves to.
    pub fn failure(&self, min_improvement: i32, test_timeout: Duration) -> Option<HealingError> {
        let module = self.module.to_string();
        match self.verdict {
            Verdict::Accepted => None,
            Verdict::TimedOut { .. } => Some(HealingError::TestTimeout {
                module,
                timeout_ms: test_timeout.as_millis() as u64,
            }),
            Verdict::Rejected {
                stage: ValidationStage::HealthDelta,
            } if self.health_delta.is_some() => Some(HealingError::InsufficientImprovement {
                module,
                delta: self.health_delta.unwrap_or_default(),
                threshold: min_improvement,
            }),
            Verdict::Rejected { stage } => Some(HealingError::ValidationFailure {
                module,
                stage: stage.to_string(),
                diagnostic: self
                    .failing_stage()
                    .map(|s| s.diagnostic.clone())
                    .unwrap_or_default(),
            }),
        }
    }
}

/// Metrics and score of the baseline a candidate is compared against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BaselineProfile {
    pub metrics: RawMetrics,
    pub health: u8,
}

/// Runs the five stages against a candidate.
#[derive(Debug, Clone)]
pub struct ValidationPipeline {
    tools: Toolchain,
    scorer: HealthScorer,
    min_improvement: i32,
    test_timeout: Duration,
}

impl ValidationPipeline {
    pub fn new(tools: Toolchain, scorer: HealthScorer, min_improvement: i32, test_timeout: Duration) -> Self {
        Self {
            tools,
            scorer,
            min_improvement,
            test_timeout,
        }
    }

    pub fn min_improvement(&self) -> i32 {
        self.min_improvement
    }

    pub fn test_timeout(&self) -> Duration {
        self.test_timeout
    }

    pub fn scorer(&self) -> &HealthScorer {
        &self.scorer
    }

    /// Analyze `source`; analyzer failures yield unknown metrics, never an error.
    pub async fn measure(&self, module: &ModuleId, source: &str) -> RawMetrics {
        match self.tools.analyzer.analyze(module, source).await {
            Ok(metrics) => metrics,
            Err(e) => {
                tracing::warn!(module = %module, error = %e, "static analysis failed; metrics unknown");
                RawMetrics::unknown()
            }
        }
    }

    /// Metrics and health of the unmodified module.
    pub async fn profile(&self, module: &ModuleId, original: &str) -> BaselineProfile {
        let metrics = self.measure(module, original).await;
        BaselineProfile {
            metrics,
            health: self.scorer.score(&metrics),
        }
    }

    /// Validate `candidate` against the source it replaces.
    pub async fn validate_sources(
        &self,
        module: &ModuleId,
        original: &str,
        candidate: &str,
        dependents: &[ModuleId],
    ) -> ValidationResult {
        let baseline = self.profile(module, original).await;
        self.validate(module, None, &baseline, candidate, dependents).await
    }

    /// Validate `candidate` against an already-profiled baseline.
    pub async fn validate(
        &self,
        module: &ModuleId,
        strategy: Option<Strategy>,
        baseline: &BaselineProfile,
        candidate: &str,
        dependents: &[ModuleId],
    ) -> ValidationResult {
        let mut run = StageRun::new(module.clone(), strategy, *baseline);

        // 1. Syntax
        let started = Instant::now();
        let report = self.tools.inspector.check_syntax(module, candidate).await;
        if !run.record_check(ValidationStage::SyntaxCheck, report, started) {
            return run.finish();
        }

        // 2. Imports
        let started = Instant::now();
        let report = self.tools.inspector.check_imports(module, candidate).await;
        if !run.record_check(ValidationStage::ImportCheck, report, started) {
            return run.finish();
        }

        // 3. Static types: no new type errors relative to the baseline.
        let started = Instant::now();
        let metrics_after = self.measure(module, candidate).await;
        run.metrics_after = Some(metrics_after);
        let before = baseline.metrics.type_issues.filter(|n| *n >= 0).unwrap_or(0);
        let (passed, diagnostic) = match metrics_after.type_issues.filter(|n| *n >= 0) {
            None => (false, "type issue count unavailable for candidate".to_string()),
            Some(after) if after > before => (
                false,
                format!("candidate introduces type errors: {after} > baseline {before}"),
            ),
            Some(after) => (true, format!("type issues {after} (baseline {before})")),
        };
        if !run.record(ValidationStage::StaticTypeCheck, passed, diagnostic, started) {
            return run.finish();
        }

        // 4. Tests, under the wall-clock budget.
        let started = Instant::now();
        match tokio::time::timeout(
            self.test_timeout,
            self.tools.tests.run_tests(module, candidate, dependents),
        )
        .await
        {
            Ok(report) => {
                if !run.record_check(ValidationStage::TestSuite, report, started) {
                    return run.finish();
                }
            }
            Err(_elapsed) => {
                run.record_timeout(ValidationStage::TestSuite, self.test_timeout, started);
                return run.finish();
            }
        }

        // 5. Health delta.
        let started = Instant::now();
        let health_after = self.scorer.score(&metrics_after);
        let delta = i32::from(health_after) - i32::from(baseline.health);
        run.health_after = Some(health_after);
        run.health_delta = Some(delta);
        let passed = delta >= self.min_improvement;
        let diagnostic = format!(
            "health {} -> {} (delta {delta:+}, threshold {})",
            baseline.health, health_after, self.min_improvement
        );
        run.record(ValidationStage::HealthDelta, passed, diagnostic, started);
        run.finish()
    }
}

/// Accumulates stage outcomes for one candidate.
struct StageRun {
    module: ModuleId,
    strategy: Option<Strategy>,
    baseline: BaselineProfile,
    stages: Vec<StageOutcome>,
    verdict: Option<Verdict>,
    metrics_after: Option<RawMetrics>,
    health_after: Option<u8>,
    health_delta: Option<i32>,
}

impl StageRun {
    fn new(module: ModuleId, strategy: Option<Strategy>, baseline: BaselineProfile) -> Self {
        Self {
            module,
            strategy,
            baseline,
            stages: Vec::with_capacity(ValidationStage::ORDER.len()),
            verdict: None,
            metrics_after: None,
            health_after: None,
            health_delta: None,
        }
    }

    fn record(&mut self, stage: ValidationStage, passed: bool, diagnostic: String, started: Instant) -> bool {
        debug!(module = %self.module, stage = %stage, passed, "validation stage");
        self.stages.push(StageOutcome {
            stage,
            passed,
            timed_out: false,
            diagnostic,
            duration_ms: started.elapsed().as_millis() as u64,
        });
        if !passed {
            self.verdict = Some(Verdict::Rejected { stage });
        }
        passed
    }

    fn record_check(
        &mut self,
        stage: ValidationStage,
        report: Result<CheckReport, CollaboratorError>,
        started: Instant,
    ) -> bool {
        match report {
            Ok(report) => {
                let diagnostic = report.diagnostic_text();
                self.record(stage, report.passed, diagnostic, started)
            }
            Err(e) => self.record(stage, false, format!("{stage} could not run: {e}"), started),
        }
    }

    fn record_timeout(&mut self, stage: ValidationStage, budget: Duration, started: Instant) {
        self.stages.push(StageOutcome {
            stage,
            passed: false,
            timed_out: true,
            diagnostic: format!("exceeded {}ms budget", budget.as_millis()),
            duration_ms: started.elapsed().as_millis() as u64,
        });
        self.verdict = Some(Verdict::TimedOut { stage });
    }

    fn finish(self) -> ValidationResult {
        ValidationResult {
            module: self.module,
            strategy: self.strategy,
            stages: self.stages,
            verdict: self.verdict.unwrap_or(Verdict::Accepted),
            health_before: self.baseline.health,
            health_after: self.health_after,
            health_delta: self.health_delta,
            metrics_before: self.baseline.metrics,
            metrics_after: self.metrics_after,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fakes::{MetricsTable, SourceChecks, StubTestRunner, ScriptedRegenerator};
    use std::sync::Arc;

    const ORIGINAL: &str = "def m():\n    tangled()\n";
    const BETTER: &str = "def m():\n    clean()\n";

    fn toolchain(table: MetricsTable, checks: SourceChecks, tests: StubTestRunner) -> Toolchain {
        Toolchain::new(
            Arc::new(ScriptedRegenerator::new()),
            Arc::new(table),
            Arc::new(checks),
            Arc::new(tests),
        )
    }

    fn pipeline(tools: Toolchain) -> ValidationPipeline {
        ValidationPipeline::new(tools, HealthScorer::default(), 5, Duration::from_secs(5))
    }

    fn table() -> MetricsTable {
        MetricsTable::new()
            .with(ORIGINAL, RawMetrics::new(50, 400, 20, 4))
            .with(BETTER, RawMetrics::new(15, 300, 5, 2))
    }

    #[tokio::test]
    async fn all_five_stages_pass_for_a_real_improvement() {
        let p = pipeline(toolchain(table(), SourceChecks::new(), StubTestRunner::new()));
        let result = p
            .validate_sources(&ModuleId::new("m.py"), ORIGINAL, BETTER, &[])
            .await;

        assert!(result.is_accepted(), "{result:?}");
        let stages: Vec<_> = result.stages.iter().map(|s| s.stage).collect();
        assert_eq!(stages, ValidationStage::ORDER.to_vec());
        assert!(result.health_delta.unwrap() >= 5);
        assert!(result.failure(5, Duration::from_secs(5)).is_none());
    }

    #[tokio::test]
    async fn syntax_failure_short_circuits() {
        let checks = SourceChecks::new().reject_syntax_containing("clean");
        let tests = StubTestRunner::new();
        let p = pipeline(toolchain(table(), checks, tests.clone()));
        let result = p
            .validate_sources(&ModuleId::new("m.py"), ORIGINAL, BETTER, &[])
            .await;

        assert_eq!(
            result.verdict,
            Verdict::Rejected {
                stage: ValidationStage::SyntaxCheck
            }
        );
        assert_eq!(result.stages.len(), 1);
        assert_eq!(tests.calls(), 0, "tests must not run after an earlier failure");
        assert!(matches!(
            result.failure(5, Duration::from_secs(5)),
            Some(HealingError::ValidationFailure { .. })
        ));
    }

    #[tokio::test]
    async fn new_type_errors_are_rejected() {
        let table = MetricsTable::new()
            .with(ORIGINAL, RawMetrics::new(50, 400, 20, 1))
            .with(BETTER, RawMetrics::new(10, 200, 0, 3));
        let p = pipeline(toolchain(table, SourceChecks::new(), StubTestRunner::new()));
        let result = p
            .validate_sources(&ModuleId::new("m.py"), ORIGINAL, BETTER, &[])
            .await;
        assert_eq!(
            result.verdict,
            Verdict::Rejected {
                stage: ValidationStage::StaticTypeCheck
            }
        );
    }

    #[tokio::test]
    async fn small_gain_is_insufficient_improvement() {
        let table = MetricsTable::new()
            .with(ORIGINAL, RawMetrics::new(20, 400, 10, 0))
            .with(BETTER, RawMetrics::new(19, 400, 10, 0));
        let p = pipeline(toolchain(table, SourceChecks::new(), StubTestRunner::new()));
        let result = p
            .validate_sources(&ModuleId::new("m.py"), ORIGINAL, BETTER, &[])
            .await;

        assert_eq!(
            result.verdict,
            Verdict::Rejected {
                stage: ValidationStage::HealthDelta
            }
        );
        assert_eq!(result.stages.len(), 5);
        assert!(result.stages[..4].iter().all(|s| s.passed));
        assert!(matches!(
            result.failure(5, Duration::from_secs(5)),
            Some(HealingError::InsufficientImprovement { threshold: 5, .. })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn hanging_tests_time_out() {
        let tests = StubTestRunner::new().hang_on_source_containing("clean");
        let p = ValidationPipeline::new(
            toolchain(table(), SourceChecks::new(), tests),
            HealthScorer::default(),
            5,
            Duration::from_millis(200),
        );
        let result = p
            .validate_sources(&ModuleId::new("m.py"), ORIGINAL, BETTER, &[])
            .await;

        assert_eq!(
            result.verdict,
            Verdict::TimedOut {
                stage: ValidationStage::TestSuite
            }
        );
        assert!(result.stages.last().unwrap().timed_out);
        assert!(matches!(
            result.failure(5, p.test_timeout()),
            Some(HealingError::TestTimeout { timeout_ms: 200, .. })
        ));
    }

    #[tokio::test]
    async fn dependents_are_passed_to_the_test_runner() {
        let tests = StubTestRunner::new();
        let p = pipeline(toolchain(table(), SourceChecks::new(), tests.clone()));
        let deps = vec![ModuleId::new("b.py"), ModuleId::new("c.py")];
        p.validate_sources(&ModuleId::new("a.py"), ORIGINAL, BETTER, &deps)
            .await;
        assert_eq!(tests.last_dependents(), deps);
    }
}
