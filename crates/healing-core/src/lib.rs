//! Healing-Core: scheduling, isolation, validation and selection of
//! automated code-improvement attempts.
//!
//! ## Layer 1 - Orchestration
//!
//! Focus: never leave the shared baseline broken while many improvement
//! attempts run concurrently over a dependency graph of modules.
//!
//! ## Key Components
//!
//! - `health`: composite 0–100 module health score
//! - `graph`: import graph, cycle detection and level partition
//! - `workspace`: isolated per-task workspaces with serialized atomic commits
//! - `validation`: five-stage fail-fast candidate validation
//! - `tournament`: fitness scoring and winner selection among variants
//! - `scheduler`: level barriers, bounded worker pool, retries
//! - `knowledge`: append-only knowledge log and strategy planning
//! - `collaborators`: traits for the regenerator, analyzer, inspector, test
//!   runner and benchmarker

pub mod collaborators;
pub mod config;
pub mod domain;
pub mod fakes;
pub mod graph;
pub mod health;
pub mod knowledge;
pub mod metrics;
pub mod obs;
pub mod scheduler;
pub mod summary;
pub mod telemetry;
pub mod tournament;
pub mod validation;
pub mod workspace;

pub use collaborators::{
    Benchmarker, CheckReport, CollaboratorError, RegenerationRequest, Regenerator, RegeneratorFailure,
    SourceInspector, StaticAnalyzer, TestRunner, Toolchain,
};
pub use config::OrchestratorConfig;
pub use domain::{
    FailureClass, HealingError, HealingResult, HealingTask, KnowledgeEntry, ModuleRecord, RawMetrics, Strategy,
    TaskStatus, Variant,
};
pub use graph::{Level, LevelPlan, ModuleGraph};
pub use health::{HealthScorer, MetricRange, ScoringConfig};
pub use knowledge::{
    FixedStrategies, KnowledgeRankedStrategies, KnowledgeStore, KnowledgeSummary, ScoreRecord, StrategyPlanner,
};
pub use scheduler::{Orchestrator, WorkerPool};
pub use summary::{list_run_summaries, read_run_summary, write_run_summary, Incident, RunSummary, TaskReport};
pub use telemetry::{init_tracing, LogFormat};
pub use tournament::{FitnessWeights, TournamentSelector};
pub use validation::{ValidationPipeline, ValidationResult, ValidationStage, Verdict};
pub use workspace::{Workspace, WorkspaceManager};

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
