use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::{anyhow, Context, Result};
use tracing::{info, warn};
use uplift_core::{PendingContinuation, WorkloadSnapshot, CONTINUATION_FORMAT_VERSION};

use crate::command::run_command;

pub const DEFAULT_TASK_NAME: &str = "uplift-continuation";
pub const DEFAULT_GRACE_SECS: u64 = 300;

const SYSTEMD_UNIT_DIR: &str = "/etc/systemd/system";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StartupTask {
    pub name: String,
    pub program: PathBuf,
    pub args: Vec<String>,
}

pub trait TaskRegistrar {
    fn register_startup_task(&self, task: &StartupTask) -> Result<()>;
    fn unregister(&self, name: &str) -> Result<()>;
    fn is_registered(&self, name: &str) -> Result<bool>;
}

pub fn os_task_registrar() -> Box<dyn TaskRegistrar> {
    if cfg!(windows) {
        Box::new(SchtasksRegistrar)
    } else {
        Box::new(SystemdRegistrar::new(SYSTEMD_UNIT_DIR))
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SchtasksRegistrar;

impl TaskRegistrar for SchtasksRegistrar {
    fn register_startup_task(&self, task: &StartupTask) -> Result<()> {
        run_command(
            &mut build_schtasks_create_command(task),
            &format!("failed to register startup task '{}'", task.name),
        )
    }

    fn unregister(&self, name: &str) -> Result<()> {
        run_command(
            &mut build_schtasks_delete_command(name),
            &format!("failed to unregister startup task '{name}'"),
        )
    }

    fn is_registered(&self, name: &str) -> Result<bool> {
        let output = Command::new("schtasks")
            .arg("/Query")
            .arg("/TN")
            .arg(name)
            .output()
            .context("failed to query scheduled tasks: command failed to start")?;
        Ok(output.status.success())
    }
}

pub(crate) fn build_schtasks_create_command(task: &StartupTask) -> Command {
    let mut task_run = quote_windows_arg(&task.program.display().to_string());
    for arg in &task.args {
        task_run.push(' ');
        task_run.push_str(&quote_windows_arg(arg));
    }

    let mut command = Command::new("schtasks");
    command
        .arg("/Create")
        .arg("/F")
        .arg("/TN")
        .arg(&task.name)
        .arg("/SC")
        .arg("ONSTART")
        .arg("/RU")
        .arg("SYSTEM")
        .arg("/RL")
        .arg("HIGHEST")
        .arg("/TR")
        .arg(task_run);
    command
}

pub(crate) fn build_schtasks_delete_command(name: &str) -> Command {
    let mut command = Command::new("schtasks");
    command.arg("/Delete").arg("/F").arg("/TN").arg(name);
    command
}

fn quote_windows_arg(value: &str) -> String {
    if value.is_empty() || value.contains([' ', '\t']) {
        format!("\"{value}\"")
    } else {
        value.to_string()
    }
}

#[derive(Debug, Clone)]
pub struct SystemdRegistrar {
    unit_dir: PathBuf,
}

impl SystemdRegistrar {
    pub fn new(unit_dir: impl Into<PathBuf>) -> Self {
        Self {
            unit_dir: unit_dir.into(),
        }
    }

    pub fn unit_path(&self, name: &str) -> PathBuf {
        self.unit_dir.join(format!("{name}.service"))
    }
}

impl TaskRegistrar for SystemdRegistrar {
    fn register_startup_task(&self, task: &StartupTask) -> Result<()> {
        register_systemd_unit_with_runner(self, task, run_command)
    }

    fn unregister(&self, name: &str) -> Result<()> {
        unregister_systemd_unit_with_runner(self, name, run_command)
    }

    fn is_registered(&self, name: &str) -> Result<bool> {
        Ok(self.unit_path(name).exists())
    }
}

pub(crate) fn register_systemd_unit_with_runner<RunCommand>(
    registrar: &SystemdRegistrar,
    task: &StartupTask,
    mut run: RunCommand,
) -> Result<()>
where
    RunCommand: FnMut(&mut Command, &str) -> Result<()>,
{
    let path = registrar.unit_path(&task.name);
    fs::create_dir_all(&registrar.unit_dir).with_context(|| {
        format!(
            "failed to create unit directory: {}",
            registrar.unit_dir.display()
        )
    })?;
    fs::write(&path, render_systemd_unit(task))
        .with_context(|| format!("failed to write unit file: {}", path.display()))?;

    run(
        Command::new("systemctl").arg("daemon-reload"),
        "failed to reload systemd units",
    )?;
    run(
        Command::new("systemctl")
            .arg("enable")
            .arg(format!("{}.service", task.name)),
        &format!("failed to enable startup unit '{}'", task.name),
    )
}

pub(crate) fn unregister_systemd_unit_with_runner<RunCommand>(
    registrar: &SystemdRegistrar,
    name: &str,
    mut run: RunCommand,
) -> Result<()>
where
    RunCommand: FnMut(&mut Command, &str) -> Result<()>,
{
    let path = registrar.unit_path(name);
    if !path.exists() {
        return Ok(());
    }
    if let Err(err) = run(
        Command::new("systemctl")
            .arg("disable")
            .arg(format!("{name}.service")),
        &format!("failed to disable startup unit '{name}'"),
    ) {
        warn!("{err:#}");
    }
    fs::remove_file(&path)
        .with_context(|| format!("failed to remove unit file: {}", path.display()))?;
    run(
        Command::new("systemctl").arg("daemon-reload"),
        "failed to reload systemd units",
    )
}

pub(crate) fn render_systemd_unit(task: &StartupTask) -> String {
    let mut exec = quote_systemd_arg(&task.program.display().to_string());
    for arg in &task.args {
        exec.push(' ');
        exec.push_str(&quote_systemd_arg(arg));
    }
    format!(
        "[Unit]\n\
         Description=uplift continuation: re-enable paused backup workloads\n\
         Wants=network-online.target\n\
         After=network-online.target\n\
         \n\
         [Service]\n\
         Type=oneshot\n\
         ExecStart={exec}\n\
         \n\
         [Install]\n\
         WantedBy=multi-user.target\n"
    )
}

fn quote_systemd_arg(value: &str) -> String {
    if value.is_empty() || value.contains([' ', '\t', '"', '\\']) {
        format!("\"{}\"", value.replace('\\', "\\\\").replace('"', "\\\""))
    } else {
        value.to_string()
    }
}

pub fn load_continuation_record(path: &Path) -> Result<Option<PendingContinuation>> {
    let raw = match fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(err) => {
            return Err(err).with_context(|| {
                format!("failed to read continuation record: {}", path.display())
            });
        }
    };
    PendingContinuation::from_json(&raw)
        .with_context(|| format!("failed parsing continuation record: {}", path.display()))
        .map(Some)
}

pub struct ContinuationScheduler<'a> {
    registrar: &'a dyn TaskRegistrar,
    record_path: PathBuf,
    task_name: String,
}

impl<'a> ContinuationScheduler<'a> {
    pub fn new(
        registrar: &'a dyn TaskRegistrar,
        record_path: impl Into<PathBuf>,
        task_name: impl Into<String>,
    ) -> Self {
        Self {
            registrar,
            record_path: record_path.into(),
            task_name: task_name.into(),
        }
    }

    pub fn record_path(&self) -> &Path {
        &self.record_path
    }

    pub fn task_name(&self) -> &str {
        &self.task_name
    }

    pub fn pending(&self) -> Result<Option<PendingContinuation>> {
        load_continuation_record(&self.record_path)
    }

    /// Persists the workload names, then registers `program [--config FILE] resume ...` as the
    /// startup task.
    pub fn register_continuation(
        &self,
        program: &Path,
        snapshot: &WorkloadSnapshot,
        log_path: &Path,
        config: Option<&Path>,
        grace_secs: u64,
        target_version: &str,
    ) -> Result<PendingContinuation> {
        if snapshot.is_empty() {
            return Err(anyhow!("refusing to register a continuation with no workloads"));
        }

        let record = PendingContinuation {
            version: CONTINUATION_FORMAT_VERSION,
            task_name: self.task_name.clone(),
            workloads: snapshot.names().to_vec(),
            log_path: log_path.to_path_buf(),
            grace_secs,
            target_version: target_version.to_string(),
            created_at_unix: SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .context("system time is before unix epoch")?
                .as_secs(),
        };
        self.write_record(&record)?;

        let mut args = Vec::new();
        if let Some(config) = config {
            args.push("--config".to_string());
            args.push(config.display().to_string());
        }
        args.extend([
            "resume".to_string(),
            "--continuation".to_string(),
            self.record_path.display().to_string(),
            "--log-file".to_string(),
            log_path.display().to_string(),
        ]);
        let task = StartupTask {
            name: self.task_name.clone(),
            program: program.to_path_buf(),
            args,
        };
        if let Err(err) = self.registrar.register_startup_task(&task) {
            let _ = fs::remove_file(&self.record_path);
            return Err(err);
        }

        info!(
            "registered startup task '{}' to re-enable {} workload(s)",
            self.task_name,
            record.workloads.len()
        );
        Ok(record)
    }

    /// Removes the startup task, then the record. Used after the work ran or was abandoned.
    pub fn clear(&self) -> Result<bool> {
        let mut removed = false;
        if self.registrar.is_registered(&self.task_name)? {
            self.registrar.unregister(&self.task_name)?;
            removed = true;
        }
        match fs::remove_file(&self.record_path) {
            Ok(()) => removed = true,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {}
            Err(err) => {
                return Err(err).with_context(|| {
                    format!(
                        "failed to remove continuation record: {}",
                        self.record_path.display()
                    )
                });
            }
        }
        Ok(removed)
    }

    fn write_record(&self, record: &PendingContinuation) -> Result<()> {
        if let Some(parent) = self.record_path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
        let part_path = self.record_path.with_extension("json.part");
        fs::write(&part_path, record.to_json()?).with_context(|| {
            format!(
                "failed to write continuation record: {}",
                part_path.display()
            )
        })?;
        fs::rename(&part_path, &self.record_path).with_context(|| {
            format!(
                "failed to move continuation record into place: {}",
                self.record_path.display()
            )
        })
    }
}
