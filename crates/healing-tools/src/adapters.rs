//! Collaborator implementations that shell out to configured commands.
//!
//! Every adapter writes the module source to the process's stdin and sets
//! `HEAL_MODULE`. The regenerator also gets `HEAL_STRATEGY`,
//! `HEAL_INSTRUCTIONS` and `HEAL_ATTEMPT`; the test runner gets
//! `HEAL_DEPENDENTS` (newline-separated).

use async_trait::async_trait;
use tracing::warn;

use healing_core::{
    Benchmarker, CheckReport, CollaboratorError, RawMetrics, RegenerationRequest, Regenerator,
    RegeneratorFailure, SourceInspector, StaticAnalyzer, TestRunner,
};
use healing_state::ModuleId;

use crate::command::ToolCommand;
use crate::error::ToolError;
use crate::runner::{run_tool, ProcessOutput};

pub const ENV_MODULE: &str = "HEAL_MODULE";
pub const ENV_STRATEGY: &str = "HEAL_STRATEGY";
pub const ENV_INSTRUCTIONS: &str = "HEAL_INSTRUCTIONS";
pub const ENV_ATTEMPT: &str = "HEAL_ATTEMPT";
pub const ENV_DEPENDENTS: &str = "HEAL_DEPENDENTS";

fn collaborator_error(err: ToolError) -> CollaboratorError {
    CollaboratorError::new(err.to_string())
}

fn check_report(output: ProcessOutput) -> CheckReport {
    CheckReport {
        passed: output.passed(),
        diagnostics: output.lines(),
    }
}

// ---------------------------------------------------------------------------
// Regenerator
// ---------------------------------------------------------------------------

/// Candidate source is the process's stdout.
#[derive(Debug, Clone)]
pub struct ProcessRegenerator {
    cmd: ToolCommand,
}

impl ProcessRegenerator {
    pub fn new(cmd: ToolCommand) -> Self {
        Self { cmd }
    }
}

#[async_trait]
impl Regenerator for ProcessRegenerator {
    async fn generate(&self, request: RegenerationRequest) -> Result<String, RegeneratorFailure> {
        let env = [
            (ENV_MODULE, request.module.to_string()),
            (ENV_STRATEGY, request.strategy.to_string()),
            (ENV_INSTRUCTIONS, request.instructions.clone()),
            (ENV_ATTEMPT, request.attempt.to_string()),
        ];
        match run_tool("regenerator", &self.cmd, &request.source, &env).await {
            Ok(out) if out.passed() => Ok(out.stdout),
            Ok(out) => Err(RegeneratorFailure::Failed(format!(
                "exit code {}: {}",
                out.exit_code,
                out.stderr.trim()
            ))),
            Err(e) if e.is_timeout() => Err(RegeneratorFailure::Timeout),
            Err(e) => Err(RegeneratorFailure::Failed(e.to_string())),
        }
    }
}

// ---------------------------------------------------------------------------
// Static analyzer
// ---------------------------------------------------------------------------

/// Expects one JSON object on stdout:
/// `{"complexity": 12, "size": 340, "lint_issues": 3, "type_issues": 0}`.
/// Missing keys are unknown dimensions.
#[derive(Debug, Clone)]
pub struct ProcessAnalyzer {
    cmd: ToolCommand,
}

impl ProcessAnalyzer {
    pub fn new(cmd: ToolCommand) -> Self {
        Self { cmd }
    }
}

pub fn parse_metrics(stdout: &str) -> Result<RawMetrics, ToolError> {
    serde_json::from_str(stdout.trim()).map_err(|e| ToolError::Output {
        tool: "analyzer".to_string(),
        detail: e.to_string(),
    })
}

#[async_trait]
impl StaticAnalyzer for ProcessAnalyzer {
    async fn analyze(&self, module: &ModuleId, source: &str) -> Result<RawMetrics, CollaboratorError> {
        let out = run_tool("analyzer", &self.cmd, source, &[(ENV_MODULE, module.to_string())])
            .await
            .and_then(ProcessOutput::require_success)
            .map_err(collaborator_error)?;
        parse_metrics(&out.stdout).map_err(collaborator_error)
    }
}

// ---------------------------------------------------------------------------
// Source inspector
// ---------------------------------------------------------------------------

/// Exit status is the verdict; output lines become diagnostics.
#[derive(Debug, Clone)]
pub struct ProcessInspector {
    syntax: ToolCommand,
    imports: Option<ToolCommand>,
}

impl ProcessInspector {
    pub fn new(syntax: ToolCommand, imports: Option<ToolCommand>) -> Self {
        Self { syntax, imports }
    }
}

#[async_trait]
impl SourceInspector for ProcessInspector {
    async fn check_syntax(&self, module: &ModuleId, source: &str) -> Result<CheckReport, CollaboratorError> {
        run_tool("syntax_check", &self.syntax, source, &[(ENV_MODULE, module.to_string())])
            .await
            .map(check_report)
            .map_err(collaborator_error)
    }

    async fn check_imports(&self, module: &ModuleId, source: &str) -> Result<CheckReport, CollaboratorError> {
        let Some(cmd) = &self.imports else {
            return Ok(CheckReport::pass());
        };
        run_tool("import_check", cmd, source, &[(ENV_MODULE, module.to_string())])
            .await
            .map(check_report)
            .map_err(collaborator_error)
    }
}

// ---------------------------------------------------------------------------
// Test runner
// ---------------------------------------------------------------------------

/// Runs the configured test command against the candidate source.
#[derive(Debug, Clone)]
pub struct ProcessTestRunner {
    cmd: ToolCommand,
}

impl ProcessTestRunner {
    pub fn new(cmd: ToolCommand) -> Self {
        Self { cmd }
    }
}

#[async_trait]
impl TestRunner for ProcessTestRunner {
    async fn run_tests(
        &self,
        module: &ModuleId,
        source: &str,
        dependents: &[ModuleId],
    ) -> Result<CheckReport, CollaboratorError> {
        let dependents = dependents
            .iter()
            .map(ModuleId::as_str)
            .collect::<Vec<_>>()
            .join("\n");
        let env = [(ENV_MODULE, module.to_string()), (ENV_DEPENDENTS, dependents)];
        run_tool("tests", &self.cmd, source, &env)
            .await
            .map(check_report)
            .map_err(collaborator_error)
    }
}

// ---------------------------------------------------------------------------
// Benchmarker
// ---------------------------------------------------------------------------

/// Expects a single number of milliseconds on stdout.
#[derive(Debug, Clone)]
pub struct ProcessBenchmarker {
    cmd: ToolCommand,
}

impl ProcessBenchmarker {
    pub fn new(cmd: ToolCommand) -> Self {
        Self { cmd }
    }
}

#[async_trait]
impl Benchmarker for ProcessBenchmarker {
    async fn measure(&self, module: &ModuleId, source: &str) -> Option<f64> {
        let out = match run_tool("benchmark", &self.cmd, source, &[(ENV_MODULE, module.to_string())])
            .await
            .and_then(ProcessOutput::require_success)
        {
            Ok(out) => out,
            Err(e) => {
                warn!(module = %module, error = %e, "benchmark failed; performance unknown");
                return None;
            }
        };
        match out.stdout.trim().parse::<f64>() {
            Ok(ms) if ms.is_finite() && ms > 0.0 => Some(ms),
            _ => {
                warn!(module = %module, output = %out.stdout.trim(), "benchmark output is not a duration");
                None
            }
        }
    }
}
