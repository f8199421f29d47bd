use std::path::Path;
use std::process::Command;
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::{info, warn};
use uplift_system::{terminate_matching, NamePattern, ProcessControl};

use crate::acquire::VerifiedArtifact;

pub const DEFAULT_INSTALLER_ARGS: &[&str] = &[
    "--mode",
    "unattended",
    "--unattendedmodeui",
    "none",
    "--disable-components",
    "stackbuilder",
];

pub trait InstallExecutor {
    fn execute(&self, program: &Path, args: &[String], working_dir: &Path) -> Result<i32>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct ProcessExecutor;

impl InstallExecutor for ProcessExecutor {
    fn execute(&self, program: &Path, args: &[String], working_dir: &Path) -> Result<i32> {
        let status = Command::new(program)
            .args(args)
            .current_dir(working_dir)
            .status()
            .with_context(|| format!("failed to launch installer: {}", program.display()))?;
        // Killed by a signal: no code, reported as -1.
        Ok(status.code().unwrap_or(-1))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InstallOutcome {
    pub exit_code: i32,
}

impl InstallOutcome {
    pub fn is_success(&self) -> bool {
        self.exit_code == 0
    }
}

pub struct InstallRunner<'a> {
    executor: &'a dyn InstallExecutor,
    processes: &'a dyn ProcessControl,
    interfering: Vec<NamePattern>,
    settle: Duration,
}

impl<'a> InstallRunner<'a> {
    pub fn new(
        executor: &'a dyn InstallExecutor,
        processes: &'a dyn ProcessControl,
        interfering: Vec<NamePattern>,
        settle: Duration,
    ) -> Self {
        Self {
            executor,
            processes,
            interfering,
            settle,
        }
    }

    /// Closes admin consoles that hold files open, then runs the installer to completion.
    pub fn run(
        &self,
        artifact: &VerifiedArtifact,
        args: &[String],
        working_dir: &Path,
    ) -> Result<InstallOutcome> {
        let killed = terminate_matching(self.processes, &self.interfering)?;
        if !killed.is_empty() && !self.settle.is_zero() {
            thread::sleep(self.settle);
        }

        info!(
            "running installer {} {}",
            artifact.path().display(),
            args.join(" ")
        );
        let exit_code = self
            .executor
            .execute(artifact.path(), args, working_dir)?;
        let outcome = InstallOutcome { exit_code };
        if outcome.is_success() {
            info!("installer finished successfully");
        } else {
            warn!("installer exited with code {exit_code}");
        }
        Ok(outcome)
    }
}
