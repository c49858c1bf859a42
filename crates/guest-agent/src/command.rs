//! External command execution with captured output.

use tokio::process::Command;
use tracing::trace;

/// Error from a failed command.
#[derive(Debug, thiserror::Error)]
#[error("command failed: {command}: {detail}")]
pub struct CommandError {
    pub command: String,
    pub detail: String,
}

/// Execute a program with arguments and wait for it.
///
/// Returns trimmed stdout on success. A non-zero exit reports the captured
/// stderr in the error so callers can log the exact failure.
pub async fn exec(program: &str, args: &[&str]) -> Result<String, CommandError> {
    let mut parts = Vec::with_capacity(args.len() + 1);
    parts.push(program);
    parts.extend_from_slice(args);
    let command_line = parts.join(" ");
    trace!(command = %command_line, "exec");

    let output = Command::new(program)
        .args(args)
        .output()
        .await
        .map_err(|e| CommandError {
            command: command_line.clone(),
            detail: e.to_string(),
        })?;

    if output.status.success() {
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    } else {
        Err(CommandError {
            command: command_line,
            detail: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        })
    }
}

/// Execute a command line already split into words, as produced by a
/// rendered command template.
pub async fn exec_line(line: &[String]) -> Result<String, CommandError> {
    let Some((program, args)) = line.split_first() else {
        return Err(CommandError {
            command: String::new(),
            detail: String::from("empty command"),
        });
    };
    let args: Vec<&str> = args.iter().map(String::as_str).collect();
    exec(program, &args).await
}
