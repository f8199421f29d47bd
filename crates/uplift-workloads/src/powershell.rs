use std::process::Command;

use anyhow::{anyhow, Context, Result};
use serde::de::DeserializeOwned;
use uplift_core::Workload;

use crate::api::{BackupApi, BackupRecord, RestorePoint};

pub const DEFAULT_POWERSHELL: &str = "powershell";
pub const VEEAM_POWERSHELL_MODULE: &str = "Veeam.Backup.PowerShell";

#[derive(Debug, Clone)]
pub struct PowerShellBackupApi {
    program: String,
}

impl PowerShellBackupApi {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }

    fn run_script(&self, script: &str, context_message: &str) -> Result<String> {
        let mut command = build_powershell_command(&self.program, VEEAM_POWERSHELL_MODULE, script);
        let output = command
            .output()
            .with_context(|| format!("{context_message}: {} failed to start", self.program))?;
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

    fn query<T: DeserializeOwned>(&self, script: &str, context_message: &str) -> Result<Vec<T>> {
        let stdout = self.run_script(script, context_message)?;
        parse_json_rows(&stdout).with_context(|| context_message.to_string())
    }
}

impl BackupApi for PowerShellBackupApi {
    fn list_jobs(&self) -> Result<Vec<Workload>> {
        self.query(
            "ConvertTo-Json -Compress -InputObject @(Get-VBRJob | ForEach-Object { \
             [pscustomobject]@{ name = $_.Name; schedule_enabled = [bool]$_.IsScheduleEnabled; \
             is_running = [bool]$_.IsRunning; is_idle = [bool]$_.IsIdle } })",
            "failed to list backup jobs",
        )
    }

    fn list_backups(&self) -> Result<Vec<BackupRecord>> {
        self.query(
            "ConvertTo-Json -Compress -InputObject @(Get-VBRBackup | ForEach-Object { \
             [pscustomobject]@{ name = $_.Name; job_name = [string]$_.JobName } })",
            "failed to list backups",
        )
    }

    fn list_restore_points(&self, backup: &BackupRecord) -> Result<Vec<RestorePoint>> {
        let script = format!(
            "$backup = Get-VBRBackup | Where-Object {{ $_.Name -eq '{}' }} | Select-Object -First 1; \
             if (-not $backup) {{ '[]'; return }}; \
             ConvertTo-Json -Compress -InputObject @(Get-VBRRestorePoint -Backup $backup | ForEach-Object {{ \
             [pscustomobject]@{{ created_at = $_.CreationTime.ToUniversalTime().ToString('o') }} }})",
            escape_ps_single_quote(&backup.name)
        );
        self.query(
            &script,
            &format!("failed to list restore points for backup '{}'", backup.name),
        )
    }

    fn disable_job(&self, name: &str) -> Result<()> {
        self.run_script(
            &job_toggle_script(name, "Disable-VBRJob"),
            &format!("failed to disable job '{name}'"),
        )
        .map(|_| ())
    }

    fn enable_job(&self, name: &str) -> Result<()> {
        self.run_script(
            &job_toggle_script(name, "Enable-VBRJob"),
            &format!("failed to enable job '{name}'"),
        )
        .map(|_| ())
    }
}

pub(crate) fn build_powershell_command(program: &str, module: &str, script: &str) -> Command {
    let mut command = Command::new(program);
    command
        .arg("-NoProfile")
        .arg("-NonInteractive")
        .arg("-ExecutionPolicy")
        .arg("Bypass")
        .arg("-Command")
        .arg(format!(
            "$ErrorActionPreference = 'Stop'; Import-Module '{}' -DisableNameChecking; {}",
            escape_ps_single_quote(module),
            script
        ));
    command
}

pub(crate) fn job_toggle_script(name: &str, cmdlet: &str) -> String {
    format!(
        "$job = Get-VBRJob | Where-Object {{ $_.Name -eq '{name}' }} | Select-Object -First 1; \
         if (-not $job) {{ throw 'job not found: {name}' }}; $job | {cmdlet} | Out-Null",
        name = escape_ps_single_quote(name),
        cmdlet = cmdlet
    )
}

pub(crate) fn parse_json_rows<T: DeserializeOwned>(raw: &str) -> Result<Vec<T>> {
    let raw = raw.trim();
    if raw.is_empty() || raw == "null" {
        return Ok(Vec::new());
    }
    if raw.starts_with('{') {
        let row = serde_json::from_str(raw).context("failed to parse JSON object")?;
        return Ok(vec![row]);
    }
    serde_json::from_str(raw).context("failed to parse JSON array")
}

pub(crate) fn escape_ps_single_quote(value: &str) -> String {
    value.replace('\'', "''")
}
