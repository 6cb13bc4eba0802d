//! Post-update shell hook.

use std::process::{ExitStatus, Stdio};

use thiserror::Error;
use tokio::process::Command;

#[derive(Debug, Error)]
pub enum HookError {
    #[error("failed to spawn hook `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("hook `{command}` exited with {status}: {}", String::from_utf8_lossy(.output).trim())]
    Failed {
        command: String,
        status: ExitStatus,
        output: Vec<u8>,
    },
}

/// Runs one shell command through `sh -c` after each successful publish.
#[derive(Debug, Clone)]
pub struct HookRunner {
    command: String,
}

impl HookRunner {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
        }
    }

    pub fn command(&self) -> &str {
        &self.command
    }

    /// Run the command and return its combined stdout and stderr.
    pub async fn run(&self) -> Result<Vec<u8>, HookError> {
        // stderr is folded into stdout by the shell so ordering is preserved.
        let script = format!("exec 2>&1\n{}", self.command);
        let output = Command::new("sh")
            .arg("-c")
            .arg(script)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|source| HookError::Spawn {
                command: self.command.clone(),
                source,
            })?;

        let combined = output.stdout;
        tracing::info!(
            command = %self.command,
            status = %output.status,
            output = %String::from_utf8_lossy(&combined).trim_end(),
            "hook finished",
        );

        if output.status.success() {
            Ok(combined)
        } else {
            Err(HookError::Failed {
                command: self.command.clone(),
                status: output.status,
                output: combined,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn captures_stdout_and_stderr_together() {
        let hook = HookRunner::new("echo out; echo err >&2");
        let output = hook.run().await.expect("hook succeeds");
        assert_eq!(String::from_utf8(output).unwrap(), "out\nerr\n");
    }

    #[tokio::test]
    async fn non_zero_exit_is_failure_with_output() {
        let hook = HookRunner::new("echo broken; exit 3");
        match hook.run().await {
            Err(HookError::Failed { status, output, .. }) => {
                assert_eq!(status.code(), Some(3));
                assert_eq!(output, b"broken\n");
            }
            other => panic!("expected failure, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn failure_message_carries_hook_output() {
        let hook = HookRunner::new("echo 'reload refused: bad config' >&2; exit 1");
        let err = hook.run().await.unwrap_err();
        let message = err.to_string();
        assert!(message.contains("exited with"), "{message}");
        assert!(message.ends_with(": reload refused: bad config"), "{message}");
    }

    #[tokio::test]
    async fn runs_in_a_shell() {
        let dir = tempfile::tempdir().unwrap();
        let marker = dir.path().join("marker");
        let hook = HookRunner::new(format!("touch '{}' && test -f '{}'", marker.display(), marker.display()));
        hook.run().await.expect("hook succeeds");
        assert!(marker.exists());
    }
}
