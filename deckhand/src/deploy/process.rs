//! Child process helpers for CLI-backed providers

use std::process::Stdio;

use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::debug;

/// Captured output of a finished command
#[derive(Debug)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
}

/// Run `command` to completion. Non-zero exit is an error carrying stderr.
/// `stdin` is written and closed before waiting.
pub async fn run(
    mut command: Command,
    describe: &str,
    stdin: Option<&[u8]>,
) -> Result<CommandOutput, String> {
    debug!("Running {}", describe);

    command
        .stdin(if stdin.is_some() {
            Stdio::piped()
        } else {
            Stdio::null()
        })
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let mut child = command
        .spawn()
        .map_err(|e| format!("failed to start {}: {}", describe, e))?;

    if let Some(input) = stdin {
        if let Some(mut pipe) = child.stdin.take() {
            pipe.write_all(input)
                .await
                .map_err(|e| format!("failed to write stdin of {}: {}", describe, e))?;
        }
    }

    let output = child
        .wait_with_output()
        .await
        .map_err(|e| format!("failed to wait for {}: {}", describe, e))?;

    let stdout = String::from_utf8_lossy(&output.stdout).trim().to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();

    if !output.status.success() {
        return Err(format!(
            "{} exited with {}: {}",
            describe,
            output
                .status
                .code()
                .map(|c| c.to_string())
                .unwrap_or_else(|| "signal".to_string()),
            if stderr.is_empty() { &stdout } else { &stderr }
        ));
    }

    Ok(CommandOutput { stdout, stderr })
}
