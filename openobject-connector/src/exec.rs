//! Command execution on behalf of bridge clients.

use std::io;
use std::os::unix::process::ExitStatusExt;
use std::process::Stdio;

use async_trait::async_trait;
use thiserror::Error;
use tokio::process::Command;
use tracing::debug;

/// Failure to run a bridge command.
///
/// Display strings are part of the reply frame and read by clients.
#[derive(Debug, Error)]
pub enum ExecError {
    #[error("{0}")]
    Spawn(#[source] io::Error),

    #[error("exit status {code}")]
    Exit { code: i32, stderr: String },

    #[error("signal: {signal}")]
    Signal { signal: i32 },
}

/// Runs a command string and returns its stdout.
#[async_trait]
pub trait CommandRunner: Send + Sync + 'static {
    async fn run(&self, command: &str) -> Result<String, ExecError>;
}

/// Runs commands through `sh -c`, optionally behind a fixed prefix
/// such as an `nsenter` invocation into the host namespaces.
#[derive(Debug, Clone, Default)]
pub struct ShellRunner {
    prefix: Option<String>,
}

impl ShellRunner {
    pub fn new(prefix: Option<String>) -> Self {
        Self {
            prefix: prefix.filter(|p| !p.trim().is_empty()),
        }
    }

    fn command_line(&self, command: &str) -> String {
        match &self.prefix {
            Some(prefix) => format!("{prefix} {command}"),
            None => command.to_string(),
        }
    }
}

#[async_trait]
impl CommandRunner for ShellRunner {
    async fn run(&self, command: &str) -> Result<String, ExecError> {
        let line = self.command_line(command);
        let output = Command::new("sh")
            .arg("-c")
            .arg(&line)
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(ExecError::Spawn)?;

        if output.status.success() {
            return Ok(String::from_utf8_lossy(&output.stdout).into_owned());
        }

        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        debug!(command = %line, stderr = %stderr, "command failed");
        match (output.status.code(), output.status.signal()) {
            (Some(code), _) => Err(ExecError::Exit { code, stderr }),
            (None, Some(signal)) => Err(ExecError::Signal { signal }),
            (None, None) => Err(ExecError::Spawn(io::Error::other(
                "process ended without exit code",
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn shell_runner_returns_stdout() {
        let out = ShellRunner::default().run("echo hi").await.unwrap();
        assert_eq!(out, "hi\n");
    }

    #[tokio::test]
    async fn shell_runner_reports_exit_status() {
        let err = ShellRunner::default().run("false").await.unwrap_err();
        assert!(matches!(err, ExecError::Exit { code: 1, .. }));
        assert_eq!(err.to_string(), "exit status 1");
    }

    #[tokio::test]
    async fn shell_runner_keeps_stderr_out_of_display() {
        let err = ShellRunner::default()
            .run("echo oops >&2; exit 3")
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "exit status 3");
        match err {
            ExecError::Exit { stderr, .. } => assert_eq!(stderr, "oops"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn shell_runner_applies_prefix() {
        let runner = ShellRunner::new(Some("env FOO=bar".to_string()));
        let out = runner.run("sh -c 'echo $FOO'").await.unwrap();
        assert_eq!(out, "bar\n");
    }

    #[test]
    fn blank_prefix_is_ignored() {
        let runner = ShellRunner::new(Some("  ".to_string()));
        assert_eq!(runner.command_line("ls"), "ls");
    }
}
