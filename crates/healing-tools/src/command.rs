//! Tool command definitions and the `[tools]` configuration table.
//!
//! ```toml
//! [tools.regenerator]
//! command = ["./bin/regenerate"]
//! timeout_secs = 120
//!
//! [tools.analyzer]
//! command = ["./bin/metrics", "--json"]
//!
//! [tools.syntax_check]
//! command = ["python", "-m", "py_compile", "/dev/stdin"]
//!
//! [tools.tests]
//! command = ["./bin/run-tests"]
//! timeout_secs = 300
//! env = { PYTHONDONTWRITEBYTECODE = "1" }
//! ```

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use healing_core::Toolchain;

use crate::adapters::{
    ProcessAnalyzer, ProcessBenchmarker, ProcessInspector, ProcessRegenerator, ProcessTestRunner,
};
use crate::error::ToolError;

fn default_timeout_secs() -> u64 {
    60
}

/// One external command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolCommand {
    /// Command to execute (first element is the executable).
    pub command: Vec<String>,

    /// Timeout in seconds; 0 disables the tool's own deadline.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Extra environment for the process.
    #[serde(default)]
    pub env: BTreeMap<String, String>,

    /// Working directory; inherits the caller's when unset.
    #[serde(default)]
    pub cwd: Option<PathBuf>,
}

impl ToolCommand {
    pub fn new(command: Vec<String>, timeout_secs: u64) -> Self {
        Self {
            command,
            timeout_secs,
            env: BTreeMap::new(),
            cwd: None,
        }
    }

    /// `sh -c <script>`.
    pub fn shell(script: impl Into<String>, timeout_secs: u64) -> Self {
        Self::new(vec!["sh".to_string(), "-c".to_string(), script.into()], timeout_secs)
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    pub fn timeout(&self) -> Option<Duration> {
        (self.timeout_secs > 0).then(|| Duration::from_secs(self.timeout_secs))
    }

    pub fn program(&self) -> Option<&str> {
        self.command.first().map(String::as_str)
    }
}

/// The `[tools]` table.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolsConfig {
    pub regenerator: Option<ToolCommand>,
    pub analyzer: Option<ToolCommand>,
    pub syntax_check: Option<ToolCommand>,
    /// Optional; imports are taken as resolvable when unset.
    pub import_check: Option<ToolCommand>,
    pub tests: Option<ToolCommand>,
    /// Optional; enables the performance term of tournament fitness.
    pub benchmark: Option<ToolCommand>,
}

#[derive(Deserialize)]
struct HealFile {
    #[serde(default)]
    tools: ToolsConfig,
}

impl ToolsConfig {
    /// Read the `[tools]` table out of a full `heal.toml`; other tables are ignored.
    pub fn from_heal_toml(s: &str) -> Result<Self, ToolError> {
        let file: HealFile = toml::from_str(s).map_err(|e| ToolError::Config(e.to_string()))?;
        file.tools.validate()?;
        Ok(file.tools)
    }

    pub fn validate(&self) -> Result<(), ToolError> {
        let named = [
            ("regenerator", &self.regenerator),
            ("analyzer", &self.analyzer),
            ("syntax_check", &self.syntax_check),
            ("import_check", &self.import_check),
            ("tests", &self.tests),
            ("benchmark", &self.benchmark),
        ];
        for (tool, cmd) in named {
            if cmd.as_ref().is_some_and(|c| c.command.is_empty()) {
                return Err(ToolError::EmptyCommand {
                    tool: tool.to_string(),
                });
            }
        }
        Ok(())
    }

    /// Wire process adapters into a [`Toolchain`].
    ///
    /// Regenerator, analyzer, syntax check and tests are required.
    pub fn toolchain(&self) -> Result<Toolchain, ToolError> {
        self.validate()?;
        let required = |tool: &str, cmd: &Option<ToolCommand>| {
            cmd.clone().ok_or_else(|| ToolError::NotConfigured {
                tool: tool.to_string(),
            })
        };

        let mut toolchain = Toolchain::new(
            Arc::new(ProcessRegenerator::new(required("regenerator", &self.regenerator)?)),
            Arc::new(ProcessAnalyzer::new(required("analyzer", &self.analyzer)?)),
            Arc::new(ProcessInspector::new(
                required("syntax_check", &self.syntax_check)?,
                self.import_check.clone(),
            )),
            Arc::new(ProcessTestRunner::new(required("tests", &self.tests)?)),
        );
        if let Some(bench) = &self.benchmark {
            toolchain = toolchain.with_benchmarker(Arc::new(ProcessBenchmarker::new(bench.clone())));
        }
        Ok(toolchain)
    }
}
