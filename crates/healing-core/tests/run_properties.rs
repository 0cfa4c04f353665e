//! Run-level guarantees: determinism, isolation, improvement, append-only
//! knowledge, cycle handling, lost records and fatal aborts.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use healing_core::fakes::{MetricsTable, ScriptedRegenerator, SourceChecks, StubTestRunner, TimingTable};
use healing_core::{
    read_run_summary, write_run_summary, FailureClass, HealingError, ModuleGraph, ModuleRecord, Orchestrator,
    OrchestratorConfig, RawMetrics, RunSummary, Strategy, TaskStatus, Toolchain,
};
use healing_state::fakes::{MemoryBaseline, MemoryRecordLog};
use healing_state::{
    BaselineStore, ContentDigest, FsBaseline, JsonlRecordLog, LogRecord, ModuleId, RecordKind, RecordLog,
    StorageError, StorageResult,
};
use tempfile::tempdir;

const ORIGINAL: RawMetrics = RawMetrics {
    complexity: Some(50),
    size: Some(400),
    lint_issues: Some(20),
    type_issues: Some(4),
};
const IMPROVED: RawMetrics = RawMetrics {
    complexity: Some(15),
    size: Some(300),
    lint_issues: Some(5),
    type_issues: Some(2),
};
const BARELY_BETTER: RawMetrics = RawMetrics {
    complexity: Some(48),
    size: Some(400),
    lint_issues: Some(20),
    type_issues: Some(4),
};

fn id(s: &str) -> ModuleId {
    ModuleId::new(s)
}

fn rec(name: &str, imports: &[&str]) -> ModuleRecord {
    ModuleRecord::new(name, imports.iter().map(|s| ModuleId::new(*s)).collect())
}

fn config(workers: usize) -> OrchestratorConfig {
    OrchestratorConfig {
        workers,
        strategies: vec![Strategy::ReduceComplexity],
        max_variants: 1,
        max_retries: 1,
        retry_backoff_ms: 5,
        regenerator_timeout_ms: 1_000,
        test_timeout_ms: 1_000,
        ..OrchestratorConfig::default()
    }
}

fn tools(regen: ScriptedRegenerator, table: MetricsTable) -> Toolchain {
    Toolchain::new(
        Arc::new(regen),
        Arc::new(table),
        Arc::new(SourceChecks::new().reject_syntax_containing("SYNTAX")),
        Arc::new(StubTestRunner::new().fail_on_source_containing("FAILTEST")),
    )
}

/// Eight modules over four levels with every kind of outcome:
///
/// ```text
/// a  accepted            e  accepted
/// b <- a  small gain     f <- e  tests fail
/// c <- a  syntax error   g <- d, f  accepted
/// d <- b, c  regenerator error
/// h  missing from the baseline
/// ```
fn mixed_modules() -> Vec<ModuleRecord> {
    vec![
        rec("a", &[]),
        rec("b", &["a"]),
        rec("c", &["a"]),
        rec("d", &["b", "c"]),
        rec("e", &[]),
        rec("f", &["e"]),
        rec("g", &["d", "f"]),
        rec("h", &[]),
    ]
}

fn mixed_baseline() -> MemoryBaseline {
    ["a", "b", "c", "d", "e", "f", "g"]
        .into_iter()
        .fold(MemoryBaseline::new(), |b, m| b.with_module(m, format!("{m}-src")))
}

fn mixed_tools() -> Toolchain {
    let s = Strategy::ReduceComplexity;
    let regen = ScriptedRegenerator::new()
        .returns("a", s, "a-healed")
        .returns("b", s, "b-tweaked")
        .returns("c", s, "c SYNTAX")
        .returns("e", s, "e-healed")
        .returns("f", s, "f FAILTEST")
        .returns("g", s, "g-healed")
        .returns("h", s, "h-healed");
    let table = MetricsTable::new()
        .with_fallback(ORIGINAL)
        .with("a-healed", IMPROVED)
        .with("e-healed", IMPROVED)
        .with("g-healed", IMPROVED)
        .with("b-tweaked", BARELY_BETTER);
    tools(regen, table)
}

async fn run_mixed(workers: usize) -> (RunSummary, Arc<MemoryBaseline>, Orchestrator) {
    let baseline = Arc::new(mixed_baseline());
    let orchestrator = Orchestrator::new(
        config(workers),
        mixed_tools(),
        baseline.clone(),
        Arc::new(MemoryRecordLog::new()),
    )
    .unwrap();
    let summary = orchestrator.run(mixed_modules()).await.unwrap();
    (summary, baseline, orchestrator)
}

#[tokio::test]
async fn mixed_run_reaches_expected_outcomes() {
    let (summary, _, _) = run_mixed(3).await;
    let status = |m: &str| summary.report(&id(m)).unwrap().status;
    let class = |m: &str| summary.report(&id(m)).unwrap().failure_class();

    assert_eq!(status("a"), TaskStatus::Accepted);
    assert_eq!(status("b"), TaskStatus::Rejected);
    assert_eq!(class("b"), Some(FailureClass::InsufficientImprovement));
    assert_eq!(status("c"), TaskStatus::Rejected);
    assert_eq!(class("c"), Some(FailureClass::ValidationFailure));
    assert_eq!(status("d"), TaskStatus::Failed);
    assert_eq!(class("d"), Some(FailureClass::RegeneratorError));
    assert_eq!(status("f"), TaskStatus::Rejected);
    assert_eq!(status("g"), TaskStatus::Accepted);
    assert_eq!(status("h"), TaskStatus::Failed);
    assert_eq!(class("h"), Some(FailureClass::ModuleMissing));

    assert_eq!(summary.reports.len(), 8, "every input module gets a report");
    assert!(summary.reports.iter().all(|r| r.status.is_terminal()));
    assert_eq!(summary.report(&id("g")).unwrap().level, Some(3));

    let review: Vec<&str> = summary.needs_manual_review().iter().map(|r| r.module.as_str()).collect();
    assert_eq!(review, vec!["d", "h"]);
}

#[tokio::test]
async fn outcomes_do_not_depend_on_worker_count() {
    let (one, base_one, _) = run_mixed(1).await;
    let (four, base_four, _) = run_mixed(4).await;

    assert_eq!(one.outcomes(), four.outcomes());
    assert_eq!(base_one.snapshot(), base_four.snapshot());
    assert_eq!(one.levels, four.levels);
}

#[tokio::test]
async fn unaccepted_modules_are_byte_identical_afterwards() {
    let before = mixed_baseline().snapshot();
    let (summary, baseline, orchestrator) = run_mixed(2).await;
    let after = baseline.snapshot();

    for report in &summary.reports {
        let module = &report.module;
        if report.status == TaskStatus::Accepted {
            assert_ne!(after.get(module), before.get(module), "{module} should change");
        } else {
            assert_eq!(after.get(module), before.get(module), "{module} leaked a change");
        }
    }
    assert_eq!(orchestrator.workspaces().open_count(), 0);
}

#[tokio::test]
async fn accepted_modules_improve_by_the_threshold() {
    let (summary, _, orchestrator) = run_mixed(2).await;
    let min = orchestrator.config().min_improvement;

    for report in summary.reports.iter().filter(|r| r.status == TaskStatus::Accepted) {
        assert!(
            i32::from(report.health_after) - i32::from(report.health_before) >= min,
            "{} improved too little",
            report.module
        );
        let validation = report.validations.last().unwrap();
        assert!(validation.is_accepted());
        assert!(validation.health_delta.unwrap() >= min);
    }
}

#[tokio::test]
async fn knowledge_grows_by_accepted_count_and_is_append_only() {
    let baseline = Arc::new(mixed_baseline());
    let log = Arc::new(MemoryRecordLog::new());
    let orchestrator = Orchestrator::new(config(2), mixed_tools(), baseline.clone(), log.clone()).unwrap();

    let first = orchestrator.run(mixed_modules()).await.unwrap();
    let after_first = orchestrator.knowledge().entries().await.unwrap();
    assert_eq!(after_first.len(), first.accepted());

    // Second pass over the healed baseline: a, e and g now start from their
    // healed text, which the regenerator does not improve further.
    let second = orchestrator.run(first.modules.clone()).await.unwrap();
    let after_second = orchestrator.knowledge().entries().await.unwrap();
    assert_eq!(after_second.len(), first.accepted() + second.accepted());
    assert_eq!(&after_second[..after_first.len()], &after_first[..]);

    let seqs: Vec<u64> = log
        .records_of(RecordKind::Knowledge)
        .await
        .unwrap()
        .iter()
        .map(|r| r.seq)
        .collect();
    assert!(seqs.windows(2).all(|w| w[0] < w[1]));
}

#[tokio::test]
async fn cycle_members_are_reported_and_the_rest_proceeds() {
    let baseline = Arc::new(
        MemoryBaseline::new()
            .with_module("p", "p-src")
            .with_module("q", "q-src")
            .with_module("r", "r-src")
            .with_module("s", "s-src"),
    );
    let s = Strategy::ReduceComplexity;
    let tools = tools(
        ScriptedRegenerator::new()
            .returns("p", s, "p-healed")
            .returns("q", s, "q-healed")
            .returns("r", s, "r-healed")
            .returns("s", s, "s-healed"),
        MetricsTable::new().with_fallback(ORIGINAL).with("s-healed", IMPROVED),
    );
    let orchestrator =
        Orchestrator::new(config(2), tools, baseline.clone(), Arc::new(MemoryRecordLog::new())).unwrap();

    let summary = orchestrator
        .run(vec![rec("p", &["q"]), rec("q", &["p"]), rec("r", &["r"]), rec("s", &[])])
        .await
        .unwrap();

    for m in ["p", "q", "r"] {
        let report = summary.report(&id(m)).unwrap();
        assert_eq!(report.status, TaskStatus::Failed);
        assert_eq!(report.failure_class(), Some(FailureClass::CyclicDependency));
        assert!(report.needs_manual_review);
        assert_eq!(report.level, None);
    }
    assert_eq!(summary.cycles.len(), 2);
    assert_eq!(summary.report(&id("s")).unwrap().status, TaskStatus::Accepted);
    assert_eq!(baseline.snapshot()[&id("p")], b"p-src");
}

#[test]
fn level_plan_never_schedules_a_module_before_its_imports() {
    // Deterministic pseudo-random DAGs plus a few back edges.
    let mut seed: u64 = 0x9e37_79b9_7f4a_7c15;
    let mut next = move || {
        seed ^= seed << 13;
        seed ^= seed >> 7;
        seed ^= seed << 17;
        seed
    };

    for _ in 0..20 {
        let n = 40;
        let mut modules = Vec::with_capacity(n);
        for i in 0..n {
            let mut imports = Vec::new();
            for j in 0..i {
                if next() % 7 == 0 {
                    imports.push(ModuleId::new(format!("m{j:02}")));
                }
            }
            if next() % 23 == 0 {
                imports.push(ModuleId::new(format!("m{:02}", (i + 1 + next() as usize % 5).min(n - 1))));
            }
            modules.push(ModuleRecord::new(format!("m{i:02}"), imports));
        }

        let graph = ModuleGraph::build(modules);
        let plan = graph.level_plan();
        assert!(plan.verify(&graph).is_ok());
        assert_eq!(plan.scheduled_count() + plan.excluded().len(), n);
    }
}

#[tokio::test]
async fn one_commit_conflict_is_retried() {
    let baseline = Arc::new(MemoryBaseline::new().with_module("m", "m-src"));
    baseline.inject_conflicts(1);
    let s = Strategy::ReduceComplexity;
    let orchestrator = Orchestrator::new(
        config(1),
        tools(
            ScriptedRegenerator::new().returns("m", s, "m-healed"),
            MetricsTable::new().with_fallback(ORIGINAL).with("m-healed", IMPROVED),
        ),
        baseline.clone(),
        Arc::new(MemoryRecordLog::new()),
    )
    .unwrap();

    let summary = orchestrator.run(vec![rec("m", &[])]).await.unwrap();
    assert_eq!(summary.report(&id("m")).unwrap().status, TaskStatus::Accepted);
    assert_eq!(baseline.snapshot()[&id("m")], b"m-healed");
}

#[tokio::test]
async fn repeated_commit_conflict_fails_without_touching_baseline() {
    let baseline = Arc::new(MemoryBaseline::new().with_module("m", "m-src"));
    baseline.inject_conflicts(2);
    let s = Strategy::ReduceComplexity;
    let orchestrator = Orchestrator::new(
        config(1),
        tools(
            ScriptedRegenerator::new().returns("m", s, "m-healed"),
            MetricsTable::new().with_fallback(ORIGINAL).with("m-healed", IMPROVED),
        ),
        baseline.clone(),
        Arc::new(MemoryRecordLog::new()),
    )
    .unwrap();

    let summary = orchestrator.run(vec![rec("m", &[])]).await.unwrap();
    let report = summary.report(&id("m")).unwrap();
    assert_eq!(report.status, TaskStatus::Failed);
    assert_eq!(report.failure_class(), Some(FailureClass::CommitConflict));
    assert!(report.needs_manual_review);
    assert_eq!(baseline.snapshot()[&id("m")], b"m-src");
    assert_eq!(orchestrator.knowledge().count().await.unwrap(), 0);
}

#[tokio::test]
async fn benchmark_breaks_an_otherwise_even_tournament() {
    let baseline = Arc::new(MemoryBaseline::new().with_module("m", "m-src"));
    let regen = ScriptedRegenerator::new()
        .returns("m", Strategy::Decompose, "slow-variant")
        .returns("m", Strategy::Modernize, "fast-variant");
    let table = MetricsTable::new()
        .with_fallback(ORIGINAL)
        .with("slow-variant", IMPROVED)
        .with("fast-variant", IMPROVED);
    let tools = tools(regen, table).with_benchmarker(Arc::new(
        TimingTable::new()
            .with("m-src", 100.0)
            .with("slow-variant", 100.0)
            .with("fast-variant", 50.0),
    ));
    let cfg = OrchestratorConfig {
        strategies: vec![Strategy::Decompose, Strategy::Modernize],
        max_variants: 2,
        ..config(1)
    };
    let orchestrator = Orchestrator::new(cfg, tools, baseline.clone(), Arc::new(MemoryRecordLog::new())).unwrap();

    let summary = orchestrator.run(vec![rec("m", &[])]).await.unwrap();
    assert_eq!(summary.report(&id("m")).unwrap().strategy, Some(Strategy::Modernize));
    assert_eq!(baseline.snapshot()[&id("m")], b"fast-variant");
}

/// Baseline whose storage has gone away entirely.
#[derive(Debug)]
struct UnreachableBaseline;

#[async_trait]
impl BaselineStore for UnreachableBaseline {
    async fn read(&self, _module: &ModuleId) -> StorageResult<Vec<u8>> {
        Err(StorageError::Io(std::io::Error::other("disk detached")))
    }

    async fn compare_and_swap(
        &self,
        _module: &ModuleId,
        _expected: &ContentDigest,
        _content: &[u8],
    ) -> StorageResult<ContentDigest> {
        Err(StorageError::Io(std::io::Error::other("disk detached")))
    }

    async fn modules(&self) -> StorageResult<Vec<ModuleId>> {
        Ok(Vec::new())
    }
}

#[tokio::test]
async fn unavailable_workspace_aborts_the_run() {
    let s = Strategy::ReduceComplexity;
    let orchestrator = Orchestrator::new(
        config(2),
        tools(
            ScriptedRegenerator::new().returns("a", s, "a-healed").returns("b", s, "b-healed"),
            MetricsTable::new().with_fallback(ORIGINAL),
        ),
        Arc::new(UnreachableBaseline),
        Arc::new(MemoryRecordLog::new()),
    )
    .unwrap();

    let err = orchestrator
        .run(vec![rec("a", &[]), rec("b", &["a"])])
        .await
        .unwrap_err();
    assert!(matches!(err, HealingError::WorkspaceUnavailable { .. }));
    assert!(err.is_fatal());
}

#[tokio::test]
async fn filesystem_backends_end_to_end() {
    let dir = tempdir().unwrap();
    let tree = dir.path().join("src");
    std::fs::create_dir_all(tree.join("pkg")).unwrap();
    std::fs::write(tree.join("pkg/core.py"), "core-src").unwrap();
    std::fs::write(tree.join("pkg/api.py"), "api-src").unwrap();

    let baseline = Arc::new(FsBaseline::new(&tree).unwrap());
    let log = Arc::new(JsonlRecordLog::open(dir.path().join(".heal/records.jsonl")).await.unwrap());
    let s = Strategy::ReduceComplexity;
    let orchestrator = Orchestrator::new(
        config(2),
        tools(
            ScriptedRegenerator::new()
                .returns("pkg/core.py", s, "core-healed")
                .returns("pkg/api.py", s, "api-healed"),
            MetricsTable::new().with_fallback(ORIGINAL).with("core-healed", IMPROVED),
        ),
        baseline,
        log.clone(),
    )
    .unwrap();

    let modules = orchestrator
        .rescore(vec![rec("pkg/core.py", &[]), rec("pkg/api.py", &["pkg/core.py"])])
        .await
        .unwrap();
    assert!(modules.iter().all(|m| m.health == 53));

    let summary = orchestrator.run(modules).await.unwrap();
    assert_eq!(summary.accepted(), 1);
    assert_eq!(std::fs::read_to_string(tree.join("pkg/core.py")).unwrap(), "core-healed");
    assert_eq!(std::fs::read_to_string(tree.join("pkg/api.py")).unwrap(), "api-src");

    // Reopening the log sees everything appended so far.
    let reopened = JsonlRecordLog::open(dir.path().join(".heal/records.jsonl")).await.unwrap();
    assert_eq!(reopened.records_of(RecordKind::Knowledge).await.unwrap().len(), 1);
    let scores: BTreeMap<_, _> = orchestrator.knowledge().latest_scores().await.unwrap();
    assert!(scores[&id("pkg/core.py")].health > scores[&id("pkg/api.py")].health);

    let runs = dir.path().join(".heal/runs");
    write_run_summary(&summary, &runs).unwrap();
    assert_eq!(read_run_summary(&summary.run_id, &runs).unwrap(), summary);
}

/// Record log whose appends all fail.
#[derive(Debug)]
struct FullDiskLog;

#[async_trait]
impl RecordLog for FullDiskLog {
    async fn append(&self, _kind: RecordKind, _payload: serde_json::Value) -> StorageResult<LogRecord> {
        Err(StorageError::Io(std::io::Error::other("disk full")))
    }

    async fn records(&self) -> StorageResult<Vec<LogRecord>> {
        Ok(Vec::new())
    }
}

#[tokio::test]
async fn lost_knowledge_write_keeps_the_commit_and_flags_review() {
    let baseline = Arc::new(MemoryBaseline::new().with_module("m", "m-src"));
    let s = Strategy::ReduceComplexity;
    let orchestrator = Orchestrator::new(
        config(1),
        tools(
            ScriptedRegenerator::new().returns("m", s, "m-healed"),
            MetricsTable::new().with_fallback(ORIGINAL).with("m-healed", IMPROVED),
        ),
        baseline.clone(),
        Arc::new(FullDiskLog),
    )
    .unwrap();

    let summary = orchestrator.run(vec![rec("m", &[])]).await.unwrap();
    let report = summary.report(&id("m")).unwrap();

    assert_eq!(report.status, TaskStatus::Accepted);
    assert!(report.failure.is_none());
    assert_eq!(baseline.snapshot()[&id("m")], b"m-healed");

    assert!(report.needs_manual_review);
    assert_eq!(report.incidents.len(), 2, "knowledge entry and score record");
    assert_eq!(report.incidents[0].strategy, Some(s));
    assert_eq!(report.incidents[1].strategy, None);
    for incident in &report.incidents {
        assert_eq!(incident.failure.class, FailureClass::Internal);
        assert!(incident.failure.detail.contains("disk full"));
    }
    assert_eq!(summary.needs_manual_review().len(), 1);
}
