use std::process::Command;

use anyhow::{anyhow, Context, Result};

pub fn run_command(command: &mut Command, context_message: &str) -> Result<()> {
    command_stdout(command, context_message).map(|_| ())
}

pub fn command_stdout(command: &mut Command, context_message: &str) -> Result<String> {
    let output = command
        .output()
        .with_context(|| format!("{context_message}: command failed to start"))?;
    let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
    if output.status.success() {
        return Ok(stdout);
    }

    let stderr = String::from_utf8_lossy(&output.stderr);
    Err(anyhow!(
        "{context_message}: status={} stdout='{}' stderr='{}'",
        output.status,
        stdout.trim(),
        stderr.trim()
    ))
}
