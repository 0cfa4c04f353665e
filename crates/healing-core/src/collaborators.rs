//! Boundary contracts for the external tools the orchestrator drives.
//!
//! Implementations live outside this crate (see `healing-tools` for
//! process-backed ones). Every trait is object-safe and `Send + Sync` so a
//! single instance can serve all workers concurrently.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use healing_state::ModuleId;

use crate::domain::{RawMetrics, Strategy};

/// Everything the regenerator gets for one attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegenerationRequest {
    pub module: ModuleId,
    pub source: String,
    pub strategy: Strategy,
    pub instructions: String,
    /// 1-based attempt number for this strategy.
    pub attempt: u32,
}

/// Why a regeneration attempt produced no candidate.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegeneratorFailure {
    /// The regenerator itself gave up on a deadline.
    #[error("timed out")]
    Timeout,
    #[error("{0}")]
    Failed(String),
}

/// Failure of an analyzer, inspector, test runner or benchmarker invocation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{0}")]
pub struct CollaboratorError(pub String);

impl CollaboratorError {
    pub fn new(detail: impl Into<String>) -> Self {
        Self(detail.into())
    }
}

/// Pass/fail plus diagnostic lines from a check or test run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckReport {
    pub passed: bool,
    #[serde(default)]
    pub diagnostics: Vec<String>,
}

impl CheckReport {
    pub fn pass() -> Self {
        Self {
            passed: true,
            diagnostics: Vec::new(),
        }
    }

    pub fn fail(diagnostic: impl Into<String>) -> Self {
        Self {
            passed: false,
            diagnostics: vec![diagnostic.into()],
        }
    }

    /// Diagnostics joined into one line-separated string.
    pub fn diagnostic_text(&self) -> String {
        self.diagnostics.join("\n")
    }
}

/// Produces candidate sources. Failures are expected.
#[async_trait]
pub trait Regenerator: Send + Sync {
    async fn generate(&self, request: RegenerationRequest) -> Result<String, RegeneratorFailure>;
}

/// Computes raw metrics for a source text.
#[async_trait]
pub trait StaticAnalyzer: Send + Sync {
    async fn analyze(&self, module: &ModuleId, source: &str) -> Result<RawMetrics, CollaboratorError>;
}

/// Structural checks run before the type check.
#[async_trait]
pub trait SourceInspector: Send + Sync {
    async fn check_syntax(&self, module: &ModuleId, source: &str) -> Result<CheckReport, CollaboratorError>;

    async fn check_imports(&self, module: &ModuleId, source: &str) -> Result<CheckReport, CollaboratorError>;
}

/// Runs the behavioural tests of a module and of the modules importing it.
#[async_trait]
pub trait TestRunner: Send + Sync {
    async fn run_tests(
        &self,
        module: &ModuleId,
        source: &str,
        dependents: &[ModuleId],
    ) -> Result<CheckReport, CollaboratorError>;
}

/// Optional performance measurement, in milliseconds.
#[async_trait]
pub trait Benchmarker: Send + Sync {
    async fn measure(&self, module: &ModuleId, source: &str) -> Option<f64>;
}

/// The full set of injected collaborators.
#[derive(Clone)]
pub struct Toolchain {
    pub regenerator: Arc<dyn Regenerator>,
    pub analyzer: Arc<dyn StaticAnalyzer>,
    pub inspector: Arc<dyn SourceInspector>,
    pub tests: Arc<dyn TestRunner>,
    pub benchmarker: Option<Arc<dyn Benchmarker>>,
}

impl Toolchain {
    pub fn new(
        regenerator: Arc<dyn Regenerator>,
        analyzer: Arc<dyn StaticAnalyzer>,
        inspector: Arc<dyn SourceInspector>,
        tests: Arc<dyn TestRunner>,
    ) -> Self {
        Self {
            regenerator,
            analyzer,
            inspector,
            tests,
            benchmarker: None,
        }
    }

    pub fn with_benchmarker(mut self, benchmarker: Arc<dyn Benchmarker>) -> Self {
        self.benchmarker = Some(benchmarker);
        self
    }
}

impl std::fmt::Debug for Toolchain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Toolchain")
            .field("benchmarker", &self.benchmarker.is_some())
            .finish_non_exhaustive()
    }
}
