//! Error types for healing-tools

use thiserror::Error;

/// Errors raised while configuring or invoking an external tool
#[derive(Error, Debug)]
pub enum ToolError {
    /// A required tool has no command configured
    #[error("no command configured for {tool}")]
    NotConfigured { tool: String },

    /// Command vector is empty
    #[error("tool {tool} has an empty command")]
    EmptyCommand { tool: String },

    /// The executable could not be started
    #[error("failed to spawn {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    /// The process exceeded its time budget and was killed
    #[error("tool {tool} timed out after {timeout_ms} ms")]
    Timeout { tool: String, timeout_ms: u64 },

    /// The process exited with a failure status where success was required
    #[error("tool {tool} exited with code {code}: {stderr}")]
    Exit {
        tool: String,
        code: i32,
        stderr: String,
    },

    /// Output could not be interpreted
    #[error("tool {tool} produced unreadable output: {detail}")]
    Output { tool: String, detail: String },

    /// `[tools]` configuration could not be parsed
    #[error("invalid tools configuration: {0}")]
    Config(String),

    /// Filesystem or pipe error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl ToolError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, ToolError::Timeout { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_error_carries_code_and_stderr() {
        let err = ToolError::Exit {
            tool: "analyzer".to_string(),
            code: 3,
            stderr: "boom".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("analyzer"));
        assert!(msg.contains('3'));
        assert!(msg.contains("boom"));
        assert!(!err.is_timeout());
    }
}
