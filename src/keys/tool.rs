//! External tool invocation shared by key conversion and key generation

use std::ffi::OsStr;
use std::process::Stdio;

use thiserror::Error;
use tokio::process::Command;
use tracing::debug;

/// Subprocess failures
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ToolError {
    /// The binary is not on PATH
    #[error("{program} is not installed")]
    Missing { program: String },

    /// The tool ran and failed; carries its stderr, or a generic description
    #[error("{0}")]
    Failed(String),

    /// The tool could not be started for another reason
    #[error("Failed to run {program}: {reason}")]
    Spawn { program: String, reason: String },
}

/// Run `program` to completion without a terminal attached.
///
/// The child is killed if the returned future is dropped.
pub async fn run_tool<I, S>(program: &str, args: I) -> Result<(), ToolError>
where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    debug!("Running {}", program);

    let output = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .kill_on_drop(true)
        .output()
        .await
        .map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => ToolError::Missing {
                program: program.to_string(),
            },
            _ => ToolError::Spawn {
                program: program.to_string(),
                reason: e.to_string(),
            },
        })?;

    if output.status.success() {
        return Ok(());
    }

    let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
    if stderr.is_empty() {
        Err(ToolError::Failed(format!(
            "Command failed: {} exited with {}",
            program, output.status
        )))
    } else {
        Err(ToolError::Failed(stderr))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_missing_program() {
        let err = run_tool("sshmux-no-such-tool-7f3a", ["--version"])
            .await
            .unwrap_err();
        assert_eq!(
            err,
            ToolError::Missing {
                program: "sshmux-no-such-tool-7f3a".to_string()
            }
        );
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_failure_carries_stderr() {
        let err = run_tool("sh", ["-c", "echo 'bad passphrase' >&2; exit 2"])
            .await
            .unwrap_err();
        assert_eq!(err, ToolError::Failed("bad passphrase".to_string()));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_failure_without_stderr_is_generic() {
        let err = run_tool("sh", ["-c", "exit 3"]).await.unwrap_err();
        match err {
            ToolError::Failed(msg) => assert!(msg.starts_with("Command failed: sh exited with")),
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_success() {
        run_tool("sh", ["-c", "exit 0"]).await.unwrap();
    }
}
