//! Heal - code health evolution orchestrator CLI
//!
//! ## Commands
//!
//! - `plan`: show the dependency levels and excluded cycles for a manifest
//! - `score`: analyze every module and persist its health score
//! - `run`: heal a module tree level by level
//! - `knowledge`: summarize accepted transformations per strategy
//! - `summary`: show or list recorded run summaries

mod manifest;
mod settings;

use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::{info, Level};

use healing_core::{
    init_tracing, list_run_summaries, read_run_summary, write_run_summary, HealthScorer, KnowledgeStore,
    KnowledgeSummary, LevelPlan, LogFormat, ModuleGraph, ModuleRecord, Orchestrator, OrchestratorConfig,
    RunSummary, StaticAnalyzer, TaskStatus, Toolchain,
};
use healing_state::{BaselineStore, FsBaseline, JsonlRecordLog};
use healing_tools::ProcessAnalyzer;

use crate::manifest::Manifest;
use crate::settings::Settings;

/// Record log under the state directory.
const RECORDS_FILE: &str = "records.jsonl";
/// Run summaries under the state directory.
const RUNS_DIR: &str = "runs";

#[derive(Parser)]
#[command(name = "heal")]
#[command(author = "Stevedores Org")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Code health evolution orchestrator", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true)]
    log_json: bool,

    /// Config file (default: ./heal.toml when present)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Directory for the record log and run summaries
    #[arg(long, global = true, default_value = ".heal")]
    state_dir: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show dependency levels and cycles without healing anything
    Plan {
        /// Module manifest (JSON)
        #[arg(short, long)]
        manifest: PathBuf,

        /// Print JSON instead of text
        #[arg(long)]
        json: bool,
    },

    /// Analyze every module on disk and persist its health score
    Score {
        /// Module manifest (JSON)
        #[arg(short, long)]
        manifest: PathBuf,

        /// Root directory the module ids are relative to
        #[arg(long, default_value = ".")]
        root: PathBuf,

        #[arg(long)]
        json: bool,
    },

    /// Heal the modules in a manifest
    Run {
        /// Module manifest (JSON)
        #[arg(short, long)]
        manifest: PathBuf,

        /// Root directory the module ids are relative to
        #[arg(long, default_value = ".")]
        root: PathBuf,

        /// Worker-pool size (overrides the config file)
        #[arg(short, long, env = "HEAL_WORKERS")]
        workers: Option<usize>,

        /// Re-analyze every module before healing
        #[arg(long)]
        rescore: bool,

        #[arg(long)]
        json: bool,
    },

    /// Summarize accepted transformations per strategy
    Knowledge {
        #[arg(long)]
        json: bool,
    },

    /// Show a recorded run summary, or list runs when no id is given
    Summary {
        /// Run ID to show
        run_id: Option<String>,

        #[arg(long)]
        json: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose { Level::DEBUG } else { Level::INFO };
    init_tracing(LogFormat::from_flag(cli.log_json), level);

    let config = cli.config.as_deref();
    let state_dir = cli.state_dir.as_path();

    match cli.command {
        Commands::Plan { manifest, json } => cmd_plan(config, &manifest, json),
        Commands::Score {
            manifest,
            root,
            json,
        } => cmd_score(config, state_dir, &manifest, &root, json).await,
        Commands::Run {
            manifest,
            root,
            workers,
            rescore,
            json,
        } => cmd_run(config, state_dir, &manifest, &root, workers, rescore, json).await,
        Commands::Knowledge { json } => cmd_knowledge(state_dir, json).await,
        Commands::Summary { run_id, json } => cmd_summary(state_dir, run_id.as_deref(), json),
    }
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

async fn open_records(state_dir: &Path) -> Result<Arc<JsonlRecordLog>> {
    let path = state_dir.join(RECORDS_FILE);
    let log = JsonlRecordLog::open(&path)
        .await
        .with_context(|| format!("Failed to open record log {:?}", path))?;
    Ok(Arc::new(log))
}

// ---------------------------------------------------------------------------
// plan
// ---------------------------------------------------------------------------

fn cmd_plan(config: Option<&Path>, manifest: &Path, json: bool) -> Result<()> {
    let settings = Settings::load(config)?;
    let scorer = HealthScorer::new(settings.orchestrator.scoring);
    let records = Manifest::load(manifest)?.records(&scorer);
    let plan = ModuleGraph::build(records).level_plan();

    if json {
        print_json(&plan)
    } else {
        print!("{}", render_plan(&plan));
        Ok(())
    }
}

fn render_plan(plan: &LevelPlan) -> String {
    let mut out = String::new();
    for level in &plan.levels {
        let names: Vec<&str> = level.modules.iter().map(|m| m.as_str()).collect();
        let _ = writeln!(out, "level {}: {}", level.index, names.join(", "));
    }
    for cycle in &plan.cycles {
        let names: Vec<&str> = cycle.iter().map(|m| m.as_str()).collect();
        let _ = writeln!(out, "excluded (cycle): {}", names.join(", "));
    }
    let _ = writeln!(
        out,
        "{} scheduled, {} excluded",
        plan.scheduled_count(),
        plan.excluded().len()
    );
    out
}

// ---------------------------------------------------------------------------
// score
// ---------------------------------------------------------------------------

async fn cmd_score(config: Option<&Path>, state_dir: &Path, manifest: &Path, root: &Path, json: bool) -> Result<()> {
    let settings = Settings::load(config)?;
    let analyzer = settings
        .tools
        .analyzer
        .clone()
        .context("[tools.analyzer] is not configured")?;
    let baseline = FsBaseline::new(root).with_context(|| format!("Invalid module root {:?}", root))?;
    let knowledge = KnowledgeStore::new(open_records(state_dir).await?);
    let scorer = HealthScorer::new(settings.orchestrator.scoring);
    let records = Manifest::load(manifest)?.records(&scorer);

    let scored = score_modules(&ProcessAnalyzer::new(analyzer), &scorer, &baseline, &knowledge, records).await?;
    if json {
        print_json(&scored)
    } else {
        print!("{}", render_scores(&scored));
        Ok(())
    }
}

async fn score_modules(
    analyzer: &dyn StaticAnalyzer,
    scorer: &HealthScorer,
    baseline: &dyn BaselineStore,
    knowledge: &KnowledgeStore,
    records: Vec<ModuleRecord>,
) -> Result<Vec<ModuleRecord>> {
    let mut scored = Vec::with_capacity(records.len());
    for mut record in records {
        let bytes = baseline
            .read(&record.id)
            .await
            .with_context(|| format!("Failed to read module {}", record.id))?;
        let source = String::from_utf8_lossy(&bytes);
        let metrics = analyzer
            .analyze(&record.id, &source)
            .await
            .with_context(|| format!("Analyzer failed on {}", record.id))?;
        record.rescore(metrics, scorer.score(&metrics));
        knowledge.record_score(&record).await?;
        scored.push(record);
    }
    Ok(scored)
}

fn metric(value: Option<i64>) -> String {
    value.map_or_else(|| "?".to_string(), |v| v.to_string())
}

fn render_scores(records: &[ModuleRecord]) -> String {
    let mut out = String::new();
    for r in records {
        let m = &r.metrics;
        let _ = writeln!(
            out,
            "{:<40} {:>3}  complexity={} size={} lint={} types={}",
            r.id.as_str(),
            r.health,
            metric(m.complexity),
            metric(m.size),
            metric(m.lint_issues),
            metric(m.type_issues)
        );
    }
    out
}

// ---------------------------------------------------------------------------
// run
// ---------------------------------------------------------------------------

async fn cmd_run(
    config: Option<&Path>,
    state_dir: &Path,
    manifest: &Path,
    root: &Path,
    workers: Option<usize>,
    rescore: bool,
    json: bool,
) -> Result<()> {
    let mut settings = Settings::load(config)?;
    if let Some(w) = workers {
        settings.orchestrator.workers = w;
    }
    let toolchain = settings
        .tools
        .toolchain()
        .context("[tools] must configure regenerator, analyzer, syntax_check and tests")?;
    let scorer = HealthScorer::new(settings.orchestrator.scoring);
    let modules = Manifest::load(manifest)?.records(&scorer);

    let (summary, path) = heal(settings.orchestrator, toolchain, root, state_dir, modules, rescore).await?;
    if json {
        print_json(&summary)?;
    } else {
        print!("{}", render_summary(&summary));
        println!("summary written to {}", path.display());
    }
    Ok(())
}

/// Run the orchestrator over `modules` and persist the run summary.
async fn heal(
    config: OrchestratorConfig,
    toolchain: Toolchain,
    root: &Path,
    state_dir: &Path,
    modules: Vec<ModuleRecord>,
    rescore: bool,
) -> Result<(RunSummary, PathBuf)> {
    let baseline = FsBaseline::new(root).with_context(|| format!("Invalid module root {:?}", root))?;
    let records = open_records(state_dir).await?;
    let orchestrator = Orchestrator::new(config, toolchain, Arc::new(baseline), records)?;

    let modules = if rescore {
        orchestrator.rescore(modules).await.context("Rescore failed")?
    } else {
        modules
    };
    let summary = orchestrator.run(modules).await.context("Healing run aborted")?;
    let path = write_run_summary(&summary, &state_dir.join(RUNS_DIR))
        .with_context(|| format!("Failed to write summary for {}", summary.run_id))?;
    info!(run_id = %summary.run_id, path = %path.display(), "run summary written");
    Ok((summary, path))
}

fn render_summary(summary: &RunSummary) -> String {
    let mut out = String::new();
    let _ = writeln!(
        out,
        "{}: {} accepted, {} rejected, {} failed ({} ms, {} workers)",
        summary.run_id,
        summary.accepted(),
        summary.rejected(),
        summary.failed(),
        summary.duration_ms(),
        summary.workers
    );
    for r in &summary.reports {
        let detail = match (r.status, &r.failure) {
            (TaskStatus::Accepted, _) => format!(
                "{} -> {}  {}",
                r.health_before,
                r.health_after,
                r.strategy.map(|s| s.name()).unwrap_or("-")
            ),
            (_, Some(f)) => f.class.to_string(),
            _ => String::new(),
        };
        let _ = writeln!(out, "  {:<40} {:<9} {}", r.module.as_str(), r.status.to_string(), detail);
    }

    let review = summary.needs_manual_review();
    if !review.is_empty() {
        let _ = writeln!(out, "needs manual review:");
        for r in review {
            if let Some(f) = &r.failure {
                let _ = writeln!(out, "  {}: {}", r.module.as_str(), f.detail);
            }
            for i in &r.incidents {
                let strategy = i.strategy.map(|s| s.name()).unwrap_or("-");
                let _ = writeln!(out, "  {} [{}]: {}", r.module.as_str(), strategy, i.failure.detail);
            }
        }
    }
    out
}

// ---------------------------------------------------------------------------
// knowledge / summary
// ---------------------------------------------------------------------------

async fn cmd_knowledge(state_dir: &Path, json: bool) -> Result<()> {
    let knowledge = KnowledgeStore::new(open_records(state_dir).await?);
    let summary = knowledge.summary().await?;
    if json {
        print_json(&summary)
    } else {
        print!("{}", render_knowledge(&summary));
        Ok(())
    }
}

fn render_knowledge(summary: &KnowledgeSummary) -> String {
    if summary.total == 0 {
        return "No knowledge entries recorded yet.\n".to_string();
    }
    let mut out = String::new();
    let _ = writeln!(out, "{} accepted transformations", summary.total);
    for s in &summary.strategies {
        let reduction = s
            .mean_complexity_reduction
            .map_or_else(|| "?".to_string(), |v| format!("{v:.1}"));
        let _ = writeln!(
            out,
            "  {:<18} count={:<4} mean_gain={:>5.1} mean_complexity_reduction={}",
            s.strategy.name(),
            s.count,
            s.mean_health_gain,
            reduction
        );
    }
    out
}

fn cmd_summary(state_dir: &Path, run_id: Option<&str>, json: bool) -> Result<()> {
    let runs = state_dir.join(RUNS_DIR);
    let Some(run_id) = run_id else {
        let ids = list_run_summaries(&runs)?;
        if json {
            return print_json(&ids);
        }
        if ids.is_empty() {
            println!("No runs recorded in {:?}", runs);
        }
        for id in ids {
            println!("{id}");
        }
        return Ok(());
    };

    let summary = read_run_summary(run_id, &runs).with_context(|| format!("Failed to load run {run_id}"))?;
    if json {
        print_json(&summary)
    } else {
        print!("{}", render_summary(&summary));
        Ok(())
    }
}
