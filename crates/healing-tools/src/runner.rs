//! Process execution with stdin input, extra environment and a deadline.

use std::process::Stdio;
use std::time::Instant;

use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::debug;

use crate::command::ToolCommand;
use crate::error::ToolError;

/// Result of one process execution.
#[derive(Debug, Clone)]
pub struct ProcessOutput {
    /// Tool label used in errors and logs.
    pub tool: String,

    /// Exit code (-1 when killed by a signal).
    pub exit_code: i32,

    pub stdout: String,

    pub stderr: String,

    pub duration_ms: u64,

    pub success: bool,
}

impl ProcessOutput {
    pub fn passed(&self) -> bool {
        self.success && self.exit_code == 0
    }

    /// Non-empty stdout and stderr lines, stdout first.
    pub fn lines(&self) -> Vec<String> {
        self.stdout
            .lines()
            .chain(self.stderr.lines())
            .map(str::trim_end)
            .filter(|l| !l.is_empty())
            .map(str::to_string)
            .collect()
    }

    /// Turn a failure status into [`ToolError::Exit`].
    pub fn require_success(self) -> Result<Self, ToolError> {
        if self.passed() {
            Ok(self)
        } else {
            Err(ToolError::Exit {
                tool: self.tool,
                code: self.exit_code,
                stderr: self.stderr.trim().to_string(),
            })
        }
    }
}

/// Run `cmd`, feeding `input` on stdin, with `env` added to the process
/// environment. The child is killed if the deadline passes.
pub async fn run_tool(
    tool: &str,
    cmd: &ToolCommand,
    input: &str,
    env: &[(&str, String)],
) -> Result<ProcessOutput, ToolError> {
    let start = Instant::now();

    let Some((exe, args)) = cmd.command.split_first() else {
        return Err(ToolError::EmptyCommand {
            tool: tool.to_string(),
        });
    };

    let mut command = Command::new(exe);
    command
        .args(args)
        .envs(&cmd.env)
        .envs(env.iter().map(|(k, v)| (*k, v.as_str())))
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    if let Some(dir) = &cmd.cwd {
        command.current_dir(dir);
    }

    let mut child = command.spawn().map_err(|source| ToolError::Spawn {
        program: exe.clone(),
        source,
    })?;

    // Feed stdin concurrently with draining stdout so large sources cannot
    // deadlock on a full pipe. Tools that ignore stdin close it early.
    if let Some(mut stdin) = child.stdin.take() {
        let bytes = input.as_bytes().to_vec();
        let label = tool.to_string();
        tokio::spawn(async move {
            if let Err(e) = stdin.write_all(&bytes).await {
                debug!(tool = %label, error = %e, "stdin closed early");
            }
        });
    }

    let output = match cmd.timeout() {
        Some(limit) => tokio::time::timeout(limit, child.wait_with_output())
            .await
            .map_err(|_| ToolError::Timeout {
                tool: tool.to_string(),
                timeout_ms: limit.as_millis() as u64,
            })??,
        None => child.wait_with_output().await?,
    };

    let result = ProcessOutput {
        tool: tool.to_string(),
        exit_code: output.status.code().unwrap_or(-1),
        stdout: String::from_utf8_lossy(&output.stdout).to_string(),
        stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        duration_ms: start.elapsed().as_millis() as u64,
        success: output.status.success(),
    };
    debug!(
        tool = %result.tool,
        exit_code = result.exit_code,
        duration_ms = result.duration_ms,
        "tool finished"
    );
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lines_skip_blanks() {
        let out = ProcessOutput {
            tool: "t".to_string(),
            exit_code: 1,
            stdout: "a\n\nb\n".to_string(),
            stderr: "c  \n".to_string(),
            duration_ms: 1,
            success: false,
        };
        assert_eq!(out.lines(), vec!["a", "b", "c"]);
        assert!(matches!(out.require_success(), Err(ToolError::Exit { code: 1, .. })));
    }

    #[tokio::test]
    async fn stdin_reaches_the_process() {
        let cmd = ToolCommand::new(vec!["cat".to_string()], 10);
        let out = run_tool("cat", &cmd, "def f(): pass\n", &[]).await.unwrap();
        assert!(out.passed());
        assert_eq!(out.stdout, "def f(): pass\n");
    }

    #[tokio::test]
    async fn env_is_layered_over_config() {
        let cmd = ToolCommand::shell("printf '%s/%s' \"$FROM_CONFIG\" \"$FROM_CALL\"", 10)
            .with_env("FROM_CONFIG", "cfg");
        let out = run_tool("env", &cmd, "", &[("FROM_CALL", "call".to_string())])
            .await
            .unwrap();
        assert_eq!(out.stdout, "cfg/call");
    }

    #[tokio::test]
    async fn failing_command_reports_exit_code() {
        let cmd = ToolCommand::new(vec!["false".to_string()], 10);
        let out = run_tool("false", &cmd, "", &[]).await.unwrap();
        assert!(!out.passed());
        assert_ne!(out.exit_code, 0);
    }

    #[tokio::test]
    async fn slow_command_times_out() {
        let cmd = ToolCommand::new(vec!["sleep".to_string(), "5".to_string()], 1);
        let err = run_tool("sleep", &cmd, "", &[]).await.unwrap_err();
        assert!(err.is_timeout());
    }

    #[tokio::test]
    async fn missing_executable_is_spawn_error() {
        let cmd = ToolCommand::new(vec!["/nonexistent/heal-tool".to_string()], 10);
        let err = run_tool("ghost", &cmd, "", &[]).await.unwrap_err();
        assert!(matches!(err, ToolError::Spawn { .. }));
    }

    #[tokio::test]
    async fn empty_command_is_rejected() {
        let cmd = ToolCommand::new(Vec::new(), 10);
        let err = run_tool("none", &cmd, "", &[]).await.unwrap_err();
        assert!(matches!(err, ToolError::EmptyCommand { .. }));
    }
}
