//! Run summary: the per-module outcome list handed to presentation layers.
//!
//! Persisted as `<dir>/<run_id>/summary.json` plus `summary.digest`; reads
//! verify the digest before parsing.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use healing_state::{ContentDigest, ModuleId};

use crate::domain::{FailureClass, HealingError, HealingResult, ModuleRecord, Strategy, TaskFailure, TaskStatus};
use crate::graph::Level;
use crate::tournament::Standing;
use crate::validation::ValidationResult;

/// A failure that did not decide the task's status but still needs a look:
/// a strategy that produced no variant while another did, or a record that
/// could not be persisted after the commit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Incident {
    pub strategy: Option<Strategy>,
    pub failure: TaskFailure,
}

impl Incident {
    pub fn new(strategy: Option<Strategy>, err: &HealingError) -> Self {
        Self {
            strategy,
            failure: TaskFailure::from(err),
        }
    }
}

/// Final report for one module.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskReport {
    pub module: ModuleId,
    pub status: TaskStatus,
    /// Level the module ran in; `None` for modules excluded before scheduling.
    pub level: Option<usize>,
    pub failure: Option<TaskFailure>,
    pub needs_manual_review: bool,
    pub health_before: u8,
    pub health_after: u8,
    pub strategy: Option<Strategy>,
    /// Regenerator attempts across all strategies.
    pub attempts: u32,
    pub worker: Option<usize>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub elapsed_ms: u64,
    #[serde(default)]
    pub validations: Vec<ValidationResult>,
    #[serde(default)]
    pub standings: Vec<Standing>,
    #[serde(default)]
    pub incidents: Vec<Incident>,
}

impl TaskReport {
    /// Report for a module that never got a task (cycle member).
    pub fn excluded(record: &ModuleRecord, failure: TaskFailure) -> Self {
        Self {
            module: record.id.clone(),
            status: TaskStatus::Failed,
            level: None,
            needs_manual_review: failure.class.needs_manual_review(),
            failure: Some(failure),
            health_before: record.health,
            health_after: record.health,
            strategy: None,
            attempts: 0,
            worker: None,
            started_at: None,
            finished_at: None,
            elapsed_ms: 0,
            validations: Vec::new(),
            standings: Vec::new(),
            incidents: Vec::new(),
        }
    }

    pub fn failure_class(&self) -> Option<FailureClass> {
        self.failure.as_ref().map(|f| f.class)
    }
}

/// Everything a run produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    pub run_id: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub workers: usize,
    pub levels: Vec<Level>,
    pub cycles: Vec<Vec<ModuleId>>,
    /// One report per input module, sorted by module id.
    pub reports: Vec<TaskReport>,
    /// Module records after the run, sorted by id.
    pub modules: Vec<ModuleRecord>,
}

impl RunSummary {
    fn count(&self, status: TaskStatus) -> usize {
        self.reports.iter().filter(|r| r.status == status).count()
    }

    pub fn accepted(&self) -> usize {
        self.count(TaskStatus::Accepted)
    }

    pub fn rejected(&self) -> usize {
        self.count(TaskStatus::Rejected)
    }

    pub fn failed(&self) -> usize {
        self.count(TaskStatus::Failed)
    }

    pub fn needs_manual_review(&self) -> Vec<&TaskReport> {
        self.reports.iter().filter(|r| r.needs_manual_review).collect()
    }

    /// Incidents across all reports, with the module they belong to.
    pub fn incidents(&self) -> impl Iterator<Item = (&ModuleId, &Incident)> {
        self.reports
            .iter()
            .flat_map(|r| r.incidents.iter().map(move |i| (&r.module, i)))
    }

    pub fn report(&self, module: &ModuleId) -> Option<&TaskReport> {
        self.reports.iter().find(|r| &r.module == module)
    }

    /// `module → status`, independent of scheduling.
    pub fn outcomes(&self) -> BTreeMap<ModuleId, TaskStatus> {
        self.reports.iter().map(|r| (r.module.clone(), r.status)).collect()
    }

    pub fn duration_ms(&self) -> u64 {
        (self.finished_at - self.started_at).num_milliseconds().max(0) as u64
    }
}

/// Persist `<dir>/<run_id>/summary.json` and `<dir>/<run_id>/summary.digest`.
pub fn write_run_summary(summary: &RunSummary, dir: &Path) -> HealingResult<PathBuf> {
    let run_dir = dir.join(&summary.run_id);
    std::fs::create_dir_all(&run_dir)?;

    let artifact_path = run_dir.join("summary.json");
    let digest_path = run_dir.join("summary.digest");
    let json = serde_json::to_vec_pretty(summary)?;
    let digest = ContentDigest::from_bytes(&json);

    std::fs::write(&artifact_path, &json)?;
    std::fs::write(&digest_path, digest.as_str().as_bytes())?;

    Ok(artifact_path)
}

/// Read and verify `<dir>/<run_id>/summary.json`.
pub fn read_run_summary(run_id: &str, dir: &Path) -> HealingResult<RunSummary> {
    let run_dir = dir.join(run_id);
    let json = std::fs::read(run_dir.join("summary.json"))?;
    let digest = std::fs::read_to_string(run_dir.join("summary.digest"))?;
    let actual = ContentDigest::from_bytes(&json);
    if digest.trim() != actual.as_str() {
        return Err(HealingError::DigestMismatch {
            expected: digest.trim().to_string(),
            actual: actual.to_string(),
        });
    }
    Ok(serde_json::from_slice(&json)?)
}

/// Run ids present under `dir`, sorted.
pub fn list_run_summaries(dir: &Path) -> HealingResult<Vec<String>> {
    let mut runs = Vec::new();
    match std::fs::read_dir(dir) {
        Ok(entries) => {
            for entry in entries {
                let entry = entry?;
                if entry.path().join("summary.json").is_file() {
                    runs.push(entry.file_name().to_string_lossy().into_owned());
                }
            }
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => return Err(e.into()),
    }
    runs.sort();
    Ok(runs)
}
