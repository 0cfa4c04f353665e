//! Level-by-level healing with a bounded worker pool.
//!
//! For each level, in order:
//!
//! 1. spawn one task per module; each task waits for a free worker slot
//! 2. the task opens a workspace, asks the regenerator for one variant per
//!    planned strategy (retrying timeouts and errors with backoff), validates
//!    every variant independently, runs a tournament when more than one
//!    passes, then commits the winner or discards the workspace
//! 3. accepted tasks append a knowledge entry and persist the new score
//! 4. barrier: the next level starts only after every task here is terminal
//!
//! Only [`HealingError::WorkspaceUnavailable`] aborts the run, and only after
//! the current level's barrier. Everything else resolves inside its task.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;

use chrono::Utc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::{warn, Instrument};
use uuid::Uuid;

use healing_state::{BaselineStore, ModuleId, RecordLog};

use crate::collaborators::{RegenerationRequest, RegeneratorFailure, Toolchain};
use crate::config::OrchestratorConfig;
use crate::domain::{
    FitnessComponents, HealingError, HealingResult, HealingTask, KnowledgeEntry, ModuleRecord, ModuleSnapshot,
    Strategy, TaskFailure, TaskStatus, Variant,
};
use crate::graph::ModuleGraph;
use crate::health::HealthScorer;
use crate::knowledge::{FixedStrategies, KnowledgeRankedStrategies, KnowledgeStore, StrategyPlanner};
use crate::metrics::METRICS;
use crate::obs;
use crate::summary::{Incident, RunSummary, TaskReport};
use crate::tournament::{fitness_components, Contender, Standing, TournamentSelector};
use crate::validation::{BaselineProfile, ValidationPipeline, ValidationResult, Verdict};
use crate::workspace::{Workspace, WorkspaceManager};

// ---------------------------------------------------------------------------
// Worker pool
// ---------------------------------------------------------------------------

/// Fixed number of numbered worker slots.
#[derive(Debug, Clone)]
pub struct WorkerPool {
    permits: Arc<Semaphore>,
    free: Arc<Mutex<Vec<usize>>>,
    size: usize,
}

impl WorkerPool {
    pub fn new(size: usize) -> Self {
        let size = size.max(1);
        Self {
            permits: Arc::new(Semaphore::new(size)),
            // Popped from the back: lowest index first.
            free: Arc::new(Mutex::new((0..size).rev().collect())),
            size,
        }
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn available(&self) -> usize {
        self.permits.available_permits()
    }

    /// Wait for a free slot.
    pub async fn acquire(&self) -> Option<WorkerSlot> {
        let permit = Arc::clone(&self.permits).acquire_owned().await.ok()?;
        let index = self
            .free
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop()?;
        Some(WorkerSlot {
            index,
            free: Arc::clone(&self.free),
            _permit: permit,
        })
    }
}

/// A held worker slot; returned to the pool on drop.
#[derive(Debug)]
pub struct WorkerSlot {
    index: usize,
    free: Arc<Mutex<Vec<usize>>>,
    _permit: OwnedSemaphorePermit,
}

impl WorkerSlot {
    pub fn index(&self) -> usize {
        self.index
    }
}

impl Drop for WorkerSlot {
    fn drop(&mut self) {
        let mut free = self.free.lock().unwrap_or_else(PoisonError::into_inner);
        free.push(self.index);
        free.sort_unstable_by(|a, b| b.cmp(a));
    }
}

// ---------------------------------------------------------------------------
// Orchestrator
// ---------------------------------------------------------------------------

/// Result of one finished task.
struct TaskOutcome {
    report: TaskReport,
    record: ModuleRecord,
}

/// Per-task bookkeeping that ends up in the report.
struct TaskTrail {
    health_before: u8,
    attempts: u32,
    validations: Vec<ValidationResult>,
    standings: Vec<Standing>,
    incidents: Vec<Incident>,
}

/// The variant chosen for commit.
struct Winner {
    variant: Variant,
    validation: ValidationResult,
}

/// Shared state every task needs.
struct Engine {
    config: OrchestratorConfig,
    tools: Toolchain,
    workspaces: WorkspaceManager,
    knowledge: KnowledgeStore,
    pipeline: ValidationPipeline,
    selector: TournamentSelector,
}

/// Drives healing runs.
pub struct Orchestrator {
    engine: Arc<Engine>,
    planner: Option<Arc<dyn StrategyPlanner>>,
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("config", &self.engine.config)
            .field("workspaces", &self.engine.workspaces)
            .finish_non_exhaustive()
    }
}

impl Orchestrator {
    /// Validate `config` and wire the components.
    pub fn new(
        config: OrchestratorConfig,
        tools: Toolchain,
        baseline: Arc<dyn BaselineStore>,
        records: Arc<dyn RecordLog>,
    ) -> HealingResult<Self> {
        config.validate()?;
        let scorer = HealthScorer::new(config.scoring);
        let pipeline = ValidationPipeline::new(
            tools.clone(),
            scorer,
            config.min_improvement,
            config.test_timeout(),
        );
        let selector = TournamentSelector::new(config.fitness);
        let workspaces = WorkspaceManager::new(baseline).with_conflict_backoff(config.retry_backoff(1));

        Ok(Self {
            engine: Arc::new(Engine {
                config,
                tools,
                workspaces,
                knowledge: KnowledgeStore::new(records),
                pipeline,
                selector,
            }),
            planner: None,
        })
    }

    /// Replace the configured strategy planner.
    pub fn with_planner(mut self, planner: Arc<dyn StrategyPlanner>) -> Self {
        self.planner = Some(planner);
        self
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.engine.config
    }

    pub fn knowledge(&self) -> &KnowledgeStore {
        &self.engine.knowledge
    }

    pub fn workspaces(&self) -> &WorkspaceManager {
        &self.engine.workspaces
    }

    /// Analyze and score every module on the current baseline, persisting
    /// each score. Modules missing from the baseline keep their old record.
    pub async fn rescore(&self, modules: Vec<ModuleRecord>) -> HealingResult<Vec<ModuleRecord>> {
        let engine = &self.engine;
        let mut out = Vec::with_capacity(modules.len());
        for mut record in modules {
            match engine.workspaces.baseline().read(&record.id).await {
                Ok(bytes) => {
                    let source = String::from_utf8_lossy(&bytes);
                    let profile = engine.pipeline.profile(&record.id, &source).await;
                    record.rescore(profile.metrics, profile.health);
                    engine.knowledge.record_score(&record).await?;
                }
                Err(healing_state::StorageError::NotFound { .. }) => {
                    warn!(module = %record.id, "module missing from baseline; score unchanged");
                }
                Err(e) => return Err(e.into()),
            }
            out.push(record);
        }
        Ok(out)
    }

    async fn planner(&self) -> HealingResult<Arc<dyn StrategyPlanner>> {
        if let Some(p) = &self.planner {
            return Ok(Arc::clone(p));
        }
        let order = self.engine.config.strategies.clone();
        if self.engine.config.rank_by_knowledge {
            // Snapshot once: planning must not see entries appended mid-run.
            let snapshot = self.engine.knowledge.entries().await?;
            Ok(Arc::new(KnowledgeRankedStrategies::new(order, &snapshot)))
        } else {
            Ok(Arc::new(FixedStrategies::new(order)))
        }
    }

    /// Heal `modules` level by level and return the per-module outcomes.
    pub async fn run(&self, modules: Vec<ModuleRecord>) -> HealingResult<RunSummary> {
        let run_id = format!("run-{}", Uuid::new_v4());
        let span = obs::run_span(&run_id);
        self.run_inner(run_id, modules).instrument(span).await
    }

    async fn run_inner(&self, run_id: String, modules: Vec<ModuleRecord>) -> HealingResult<RunSummary> {
        let started_at = Utc::now();
        let config = &self.engine.config;
        obs::emit_run_started(&run_id, modules.len(), config.workers);

        let planner = self.planner().await?;
        let graph = ModuleGraph::build(modules);
        let plan = graph.level_plan();
        obs::emit_cycles_excluded(&run_id, &plan.cycles);

        let mut records: BTreeMap<ModuleId, ModuleRecord> =
            graph.records().map(|r| (r.id.clone(), r.clone())).collect();
        let mut reports: BTreeMap<ModuleId, TaskReport> = BTreeMap::new();

        for members in &plan.cycles {
            let err = HealingError::CyclicDependency {
                modules: members.iter().map(|m| m.to_string()).collect(),
            };
            for module in members {
                if let Some(record) = records.get(module) {
                    METRICS.inc_tasks_failed();
                    reports.insert(module.clone(), TaskReport::excluded(record, TaskFailure::from(&err)));
                }
            }
        }

        let pool = WorkerPool::new(config.workers);
        for level in &plan.levels {
            let level_started = Instant::now();
            obs::emit_level_started(&run_id, level.index, level.modules.len());

            let mut handles = Vec::with_capacity(level.modules.len());
            for module in &level.modules {
                let Some(record) = records.get(module).cloned() else {
                    continue;
                };
                let strategies = planner.plan(&record, config.max_variants);
                let dependents = graph.dependents_of(module);
                let engine = Arc::clone(&self.engine);
                let pool = pool.clone();
                let level_index = level.index;

                let handle = tokio::spawn(
                    async move {
                        let Some(slot) = pool.acquire().await else {
                            return Err(HealingError::TaskAborted {
                                module: record.id.to_string(),
                                detail: "worker pool closed".to_string(),
                            });
                        };
                        let worker = slot.index();
                        let outcome = engine
                            .heal_module(record, dependents, strategies, worker, level_index)
                            .await;
                        drop(slot);
                        outcome
                    }
                    .in_current_span(),
                );
                handles.push((module.clone(), handle));
            }

            // Barrier.
            let mut fatal: Option<HealingError> = None;
            let mut accepted = 0usize;
            for (module, handle) in handles {
                match handle.await {
                    Ok(Ok(outcome)) => {
                        if outcome.report.status == TaskStatus::Accepted {
                            accepted += 1;
                        }
                        records.insert(module.clone(), outcome.record);
                        reports.insert(module, outcome.report);
                    }
                    Ok(Err(e)) if e.is_fatal() => {
                        if fatal.is_none() {
                            fatal = Some(e);
                        }
                    }
                    Ok(Err(e)) => {
                        METRICS.inc_tasks_failed();
                        if let Some(record) = records.get(&module) {
                            reports.insert(module.clone(), aborted_report(record, level.index, &e));
                        }
                    }
                    Err(join_err) => {
                        warn!(module = %module, error = %join_err, "healing task panicked");
                        METRICS.inc_tasks_failed();
                        let e = HealingError::TaskAborted {
                            module: module.to_string(),
                            detail: join_err.to_string(),
                        };
                        if let Some(record) = records.get(&module) {
                            reports.insert(module.clone(), aborted_report(record, level.index, &e));
                        }
                    }
                }
            }

            obs::emit_level_completed(
                &run_id,
                level.index,
                accepted,
                level_started.elapsed().as_millis() as u64,
            );

            if let Some(e) = fatal {
                obs::emit_run_aborted(&run_id, &e);
                METRICS.flush();
                return Err(e);
            }
        }

        let finished_at = Utc::now();
        let summary = RunSummary {
            run_id: run_id.clone(),
            started_at,
            finished_at,
            workers: config.workers,
            levels: plan.levels.clone(),
            cycles: plan.cycles.clone(),
            reports: reports.into_values().collect(),
            modules: records.into_values().collect(),
        };
        obs::emit_run_finished(
            &run_id,
            summary.duration_ms(),
            summary.accepted(),
            summary.rejected(),
            summary.failed(),
        );
        METRICS.flush();
        Ok(summary)
    }
}

fn aborted_report(record: &ModuleRecord, level: usize, err: &HealingError) -> TaskReport {
    let mut report = TaskReport::excluded(record, TaskFailure::from(err));
    report.level = Some(level);
    report
}

impl Engine {
    /// Run one module to a terminal state. `Err` only for fatal errors.
    async fn heal_module(
        &self,
        record: ModuleRecord,
        dependents: Vec<ModuleId>,
        strategies: Vec<Strategy>,
        worker: usize,
        level: usize,
    ) -> HealingResult<TaskOutcome> {
        let mut task = HealingTask::new(record.id.clone());
        task.worker = Some(worker);
        let mut trail = TaskTrail {
            health_before: record.health,
            attempts: 0,
            validations: Vec::new(),
            standings: Vec::new(),
            incidents: Vec::new(),
        };

        let result = match task.advance(TaskStatus::Running) {
            Ok(()) => self.attempt(&mut task, &record, &dependents, &strategies, &mut trail).await,
            Err(e) => Err(e),
        };

        let mut updated = record.clone();
        let (status, failure, strategy) = match result {
            Ok((winner, committed_at)) => {
                let after = winner.validation.metrics_after.unwrap_or(winner.validation.metrics_before);
                let health_after = winner.validation.health_after.unwrap_or(trail.health_before);
                updated.rescore(after, health_after);
                updated.mark_healed(committed_at);
                let lost = self.persist_accepted(&record, &updated, &winner, trail.health_before).await;
                trail.incidents.extend(lost);
                (TaskStatus::Accepted, None, Some(winner.variant.strategy))
            }
            Err(e) if e.is_fatal() => {
                let _ = task.advance(TaskStatus::Failed);
                return Err(e);
            }
            Err(e) => {
                let rejected = matches!(
                    e,
                    HealingError::ValidationFailure { .. } | HealingError::InsufficientImprovement { .. }
                ) && task.status == TaskStatus::Validating;
                let status = if rejected {
                    TaskStatus::Rejected
                } else {
                    TaskStatus::Failed
                };
                (status, Some(TaskFailure::from(&e)), None)
            }
        };

        if task.advance(status).is_err() && !task.status.is_terminal() {
            // Unreachable for a well-formed flow; never leave a task open.
            let _ = task.advance(TaskStatus::Failed);
        }
        let status = task.status;

        match status {
            TaskStatus::Accepted => METRICS.inc_tasks_accepted(),
            TaskStatus::Rejected => METRICS.inc_tasks_rejected(),
            _ => METRICS.inc_tasks_failed(),
        }
        obs::emit_task_finished(
            &task.module,
            status,
            strategy,
            failure.as_ref().map(|f| f.class),
            task.elapsed_ms(),
        );

        let report = TaskReport {
            module: task.module.clone(),
            status,
            level: Some(level),
            needs_manual_review: failure.as_ref().is_some_and(|f| f.class.needs_manual_review())
                || trail.incidents.iter().any(|i| i.failure.class.needs_manual_review()),
            failure,
            health_before: trail.health_before,
            health_after: if status == TaskStatus::Accepted {
                updated.health
            } else {
                trail.health_before
            },
            strategy,
            attempts: trail.attempts,
            worker: task.worker,
            started_at: task.started_at,
            finished_at: task.finished_at,
            elapsed_ms: task.elapsed_ms(),
            validations: trail.validations,
            standings: trail.standings,
            incidents: trail.incidents,
        };
        if status != TaskStatus::Accepted {
            updated = record;
        }
        Ok(TaskOutcome {
            report,
            record: updated,
        })
    }

    /// Open → regenerate → validate → select → commit. The workspace is
    /// released on every path.
    async fn attempt(
        &self,
        task: &mut HealingTask,
        record: &ModuleRecord,
        dependents: &[ModuleId],
        strategies: &[Strategy],
        trail: &mut TaskTrail,
    ) -> HealingResult<(Winner, chrono::DateTime<Utc>)> {
        let mut ws = self.workspaces.open(&record.id).await?;
        task.workspace = Some(ws.id());

        let winner = match self.select(task, &ws, dependents, strategies, trail).await {
            Ok(winner) => winner,
            Err(e) => {
                self.workspaces.discard(ws);
                return Err(e);
            }
        };

        ws.stage(winner.variant.source.clone());
        self.workspaces.commit(ws).await?;
        Ok((winner, Utc::now()))
    }

    /// Produce, validate and rank variants inside the workspace.
    async fn select(
        &self,
        task: &mut HealingTask,
        ws: &Workspace,
        dependents: &[ModuleId],
        strategies: &[Strategy],
        trail: &mut TaskTrail,
    ) -> HealingResult<Winner> {
        let module = ws.module();
        let original = ws.original_text();
        let baseline = self.pipeline.profile(module, original).await;
        trail.health_before = baseline.health;

        let attempts = futures::future::join_all(
            strategies
                .iter()
                .map(|strategy| self.regenerate(module, original, *strategy)),
        )
        .await;

        let mut failures: Vec<(Strategy, HealingError)> = Vec::new();
        for (strategy, spent, result) in attempts {
            trail.attempts = trail.attempts.saturating_add(spent);
            match result {
                Ok(source) => {
                    let mut variant = Variant::new(strategy, source);
                    variant.attempts = spent;
                    task.variants.push(variant);
                }
                Err(e) => failures.push((strategy, e)),
            }
        }

        // With no variant at all, the first failure becomes the task's own;
        // every other strategy failure is kept as an incident.
        let mut failures = failures.into_iter();
        let task_error = if task.variants.is_empty() {
            Some(match failures.next() {
                Some((_, e)) => e,
                None => HealingError::RegeneratorError {
                    module: module.to_string(),
                    strategy: "none".to_string(),
                    detail: "no strategies planned".to_string(),
                },
            })
        } else {
            None
        };
        for (strategy, e) in failures {
            let incident = Incident::new(Some(strategy), &e);
            obs::emit_task_incident(module, incident.strategy, &incident.failure);
            trail.incidents.push(incident);
        }
        if let Some(e) = task_error {
            return Err(e);
        }

        task.advance(TaskStatus::Validating)?;
        let baseline_ms = match &self.tools.benchmarker {
            Some(b) if task.variants.len() > 1 => b.measure(module, original).await,
            _ => None,
        };

        // Every variant is validated on its own before any comparison.
        let mut contenders = Vec::with_capacity(task.variants.len());
        for (index, variant) in task.variants.iter_mut().enumerate() {
            let result = self
                .pipeline
                .validate(module, Some(variant.strategy), &baseline, &variant.source, dependents)
                .await;
            if let Verdict::TimedOut { .. } = result.verdict {
                let err = result.failure(self.pipeline.min_improvement(), self.pipeline.test_timeout());
                trail.validations.push(result);
                return Err(err.unwrap_or_else(|| HealingError::TestTimeout {
                    module: module.to_string(),
                    timeout_ms: self.config.test_timeout_ms,
                }));
            }

            let eligible = result.is_accepted();
            let fitness = if eligible {
                let candidate_ms = match (&self.tools.benchmarker, baseline_ms) {
                    (Some(b), Some(_)) => b.measure(module, &variant.source).await,
                    _ => None,
                };
                variant.benchmark_ms = candidate_ms;
                fitness_for(&baseline, &result, baseline_ms, candidate_ms)
            } else {
                FitnessComponents::default()
            };
            variant.fitness = eligible.then_some(fitness);

            let after = result.metrics_after.unwrap_or_default();
            contenders.push(Contender {
                index,
                strategy: variant.strategy,
                eligible,
                fitness,
                complexity_after: after.complexity,
                size_after: after.size,
            });
            trail.validations.push(result);
        }

        let winner_index = if task.variants.len() == 1 {
            let only = &trail.validations[trail.validations.len() - 1];
            if let Some(err) = only.failure(self.pipeline.min_improvement(), self.pipeline.test_timeout()) {
                return Err(err);
            }
            0
        } else {
            let outcome = self.selector.select_winner(module, &contenders)?;
            trail.standings = outcome.standings;
            outcome.winner
        };

        let offset = trail.validations.len() - task.variants.len();
        Ok(Winner {
            variant: task.variants[winner_index].clone(),
            validation: trail.validations[offset + winner_index].clone(),
        })
    }

    /// One strategy, with timeout and bounded retries. Returns
    /// `(strategy, attempts spent, result)`.
    async fn regenerate(
        &self,
        module: &ModuleId,
        source: &str,
        strategy: Strategy,
    ) -> (Strategy, u32, HealingResult<String>) {
        let max_attempts = self.config.max_retries.saturating_add(1);
        let timeout = self.config.regenerator_timeout();
        let mut last_error = HealingError::RegeneratorError {
            module: module.to_string(),
            strategy: strategy.to_string(),
            detail: "not attempted".to_string(),
        };

        for attempt in 1..=max_attempts {
            METRICS.inc_regenerator_attempts();
            let request = RegenerationRequest {
                module: module.clone(),
                source: source.to_string(),
                strategy,
                instructions: strategy.instructions().to_string(),
                attempt,
            };

            last_error = match tokio::time::timeout(timeout, self.tools.regenerator.generate(request)).await {
                Ok(Ok(candidate)) if !candidate.trim().is_empty() => return (strategy, attempt, Ok(candidate)),
                Ok(Ok(_)) => HealingError::RegeneratorError {
                    module: module.to_string(),
                    strategy: strategy.to_string(),
                    detail: "empty candidate".to_string(),
                },
                Ok(Err(RegeneratorFailure::Failed(detail))) => HealingError::RegeneratorError {
                    module: module.to_string(),
                    strategy: strategy.to_string(),
                    detail,
                },
                Ok(Err(RegeneratorFailure::Timeout)) | Err(_) => HealingError::RegeneratorTimeout {
                    module: module.to_string(),
                    strategy: strategy.to_string(),
                    timeout_ms: self.config.regenerator_timeout_ms,
                },
            };

            if attempt < max_attempts {
                METRICS.inc_regenerator_retries();
                obs::emit_regenerator_retry(module, strategy, attempt, &last_error);
                tokio::time::sleep(self.config.retry_backoff(attempt)).await;
            }
        }
        (strategy, max_attempts, Err(last_error))
    }

    /// Append the knowledge entry and score for an accepted task.
    ///
    /// The commit has already happened, so a failed append cannot change the
    /// outcome; it comes back as an incident instead.
    async fn persist_accepted(
        &self,
        before: &ModuleRecord,
        after: &ModuleRecord,
        winner: &Winner,
        health_before: u8,
    ) -> Vec<Incident> {
        let entry = KnowledgeEntry {
            strategy: winner.variant.strategy,
            module: before.id.clone(),
            before: ModuleSnapshot {
                health: health_before,
                complexity: winner.validation.metrics_before.complexity,
                size: winner.validation.metrics_before.size,
            },
            after: ModuleSnapshot::from(after),
            recorded_at: Utc::now(),
        };
        let mut lost = Vec::new();
        if let Err(e) = self.knowledge.append(&entry).await {
            lost.push(Incident::new(Some(entry.strategy), &e));
        }
        if let Err(e) = self.knowledge.record_score(after).await {
            lost.push(Incident::new(None, &e));
        }
        for incident in &lost {
            obs::emit_task_incident(&before.id, incident.strategy, &incident.failure);
        }
        lost
    }
}

fn fitness_for(
    baseline: &BaselineProfile,
    result: &ValidationResult,
    baseline_ms: Option<f64>,
    candidate_ms: Option<f64>,
) -> FitnessComponents {
    fitness_components(
        baseline.health,
        result.health_after.unwrap_or(baseline.health),
        &baseline.metrics,
        &result.metrics_after.unwrap_or_default(),
        baseline_ms,
        candidate_ms,
    )
}
