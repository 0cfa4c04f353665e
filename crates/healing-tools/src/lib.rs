//! Healing-Tools: process-backed collaborators for the healing orchestrator
//!
//! Each collaborator is an external command configured under `[tools]` in
//! `heal.toml`. The module source travels on stdin; request details travel in
//! `HEAL_*` environment variables.
//!
//! - Regenerator: stdout is the candidate source
//! - Analyzer: stdout is a JSON metrics object
//! - Syntax / import checks and tests: exit status is the verdict, output
//!   lines are diagnostics
//! - Benchmark (optional): stdout is a duration in milliseconds

pub mod adapters;
pub mod command;
mod error;
pub mod runner;

pub use adapters::{
    parse_metrics, ProcessAnalyzer, ProcessBenchmarker, ProcessInspector, ProcessRegenerator, ProcessTestRunner,
};
pub use command::{ToolCommand, ToolsConfig};
pub use error::ToolError;
pub use runner::{run_tool, ProcessOutput};
