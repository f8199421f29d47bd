use std::process::Command;
use std::thread;

use anyhow::{Context, Result};
use serde::Deserialize;
use thiserror::Error;
use tracing::{info, warn};

use crate::command::{command_stdout, run_command};
use crate::patterns::NamePattern;
use crate::processes::{terminate_matching, ProcessControl};
use crate::retry::{wait_until, RetryPolicy};

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct ServiceStatus {
    pub name: String,
    pub running: bool,
}

pub trait ServiceControl {
    fn list_services(&self, pattern: &NamePattern) -> Result<Vec<ServiceStatus>>;
    fn stop_service(&self, name: &str) -> Result<()>;
    fn start_service(&self, name: &str) -> Result<()>;
}

#[derive(Debug, Clone)]
pub struct SystemServiceManager {
    powershell: String,
}

impl SystemServiceManager {
    pub fn new(powershell: impl Into<String>) -> Self {
        Self {
            powershell: powershell.into(),
        }
    }

    fn powershell(&self, script: String) -> Command {
        let mut command = Command::new(&self.powershell);
        command
            .arg("-NoProfile")
            .arg("-NonInteractive")
            .arg("-Command")
            .arg(format!("$ErrorActionPreference = 'Stop'; {script}"));
        command
    }
}

impl ServiceControl for SystemServiceManager {
    fn list_services(&self, pattern: &NamePattern) -> Result<Vec<ServiceStatus>> {
        if cfg!(windows) {
            let mut command = self.powershell(format!(
                "ConvertTo-Json -Compress -InputObject @(Get-Service -Name '{}' -ErrorAction SilentlyContinue | \
                 ForEach-Object {{ [pscustomobject]@{{ name = $_.Name; running = ($_.Status -ne 'Stopped') }} }})",
                escape_ps_single_quote(pattern.as_str())
            ));
            let stdout = command_stdout(&mut command, "failed to list services")?;
            return parse_service_json(&stdout);
        }

        let mut command = Command::new("systemctl");
        command
            .arg("list-units")
            .arg("--type=service")
            .arg("--all")
            .arg("--plain")
            .arg("--no-legend")
            .arg("--no-pager");
        let stdout = command_stdout(&mut command, "failed to list services")?;
        Ok(parse_systemctl_units(&stdout)
            .into_iter()
            .filter(|service| pattern.matches(&service.name))
            .collect())
    }

    fn stop_service(&self, name: &str) -> Result<()> {
        let context_message = format!("failed to stop service '{name}'");
        if cfg!(windows) {
            let mut command = self.powershell(format!(
                "Stop-Service -Name '{}' -Force",
                escape_ps_single_quote(name)
            ));
            return run_command(&mut command, &context_message);
        }
        run_command(
            Command::new("systemctl").arg("stop").arg(unit_name(name)),
            &context_message,
        )
    }

    fn start_service(&self, name: &str) -> Result<()> {
        let context_message = format!("failed to start service '{name}'");
        if cfg!(windows) {
            let mut command = self.powershell(format!(
                "Start-Service -Name '{}'",
                escape_ps_single_quote(name)
            ));
            return run_command(&mut command, &context_message);
        }
        run_command(
            Command::new("systemctl").arg("start").arg(unit_name(name)),
            &context_message,
        )
    }
}

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("services still running after forced termination: {}", .0.join(", "))]
    StillRunning(Vec<String>),
    #[error(transparent)]
    Control(#[from] anyhow::Error),
}

pub struct ServiceLifecycleController<'a> {
    services: &'a dyn ServiceControl,
    processes: &'a dyn ProcessControl,
    policy: RetryPolicy,
}

impl<'a> ServiceLifecycleController<'a> {
    pub fn new(
        services: &'a dyn ServiceControl,
        processes: &'a dyn ProcessControl,
        policy: RetryPolicy,
    ) -> Self {
        Self {
            services,
            processes,
            policy,
        }
    }

    pub fn running_services(&self, pattern: &NamePattern) -> Result<Vec<String>> {
        Ok(self
            .services
            .list_services(pattern)?
            .into_iter()
            .filter(|service| service.running)
            .map(|service| service.name)
            .collect())
    }

    /// Stops every running service matching `pattern`, escalating to process termination.
    ///
    /// Returns the services that were running beforehand so exactly those can be started again.
    pub fn stop_all(
        &self,
        pattern: &NamePattern,
        kill_patterns: &[NamePattern],
    ) -> Result<Vec<String>, ServiceError> {
        let running = self.running_services(pattern)?;
        if running.is_empty() {
            info!("no running services match '{pattern}'");
            return Ok(running);
        }

        for name in &running {
            match self.services.stop_service(name) {
                Ok(()) => info!("stop requested for service '{name}'"),
                Err(err) => warn!("{err:#}"),
            }
        }

        if self.wait_for_stop(pattern)? {
            return Ok(running);
        }

        let residual = self.running_services(pattern)?;
        warn!(
            "services did not stop gracefully ({}); terminating matching processes",
            residual.join(", ")
        );
        terminate_matching(self.processes, kill_patterns)?;
        if !self.policy.settle.is_zero() {
            thread::sleep(self.policy.settle);
        }

        if self.wait_for_stop(pattern)? {
            return Ok(running);
        }
        Err(ServiceError::StillRunning(self.running_services(pattern)?))
    }

    /// Best effort; returns the names that could not be started.
    pub fn start_all(&self, names: &[String]) -> Vec<String> {
        let mut failed = Vec::new();
        for name in names {
            match self.services.start_service(name) {
                Ok(()) => info!("started service '{name}'"),
                Err(err) => {
                    warn!("{err:#}");
                    failed.push(name.clone());
                }
            }
        }
        failed
    }

    fn wait_for_stop(&self, pattern: &NamePattern) -> Result<bool> {
        wait_until(&self.policy, || {
            self.running_services(pattern).map(|running| running.is_empty())
        })
    }
}

pub(crate) fn parse_service_json(raw: &str) -> Result<Vec<ServiceStatus>> {
    let raw = raw.trim();
    if raw.is_empty() || raw == "null" {
        return Ok(Vec::new());
    }
    if raw.starts_with('{') {
        let row = serde_json::from_str(raw).context("failed to parse service JSON object")?;
        return Ok(vec![row]);
    }
    serde_json::from_str(raw).context("failed to parse service JSON array")
}

/// Parses `systemctl list-units --plain --no-legend` rows: UNIT LOAD ACTIVE SUB DESCRIPTION.
pub(crate) fn parse_systemctl_units(raw: &str) -> Vec<ServiceStatus> {
    raw.lines()
        .filter_map(|line| {
            let mut columns = line.split_whitespace();
            let unit = columns.next()?;
            let _load = columns.next()?;
            let active = columns.next()?;
            let name = unit.strip_suffix(".service")?;
            Some(ServiceStatus {
                name: name.to_string(),
                running: matches!(active, "active" | "activating" | "deactivating" | "reloading"),
            })
        })
        .collect()
}

fn unit_name(name: &str) -> String {
    if name.ends_with(".service") {
        name.to_string()
    } else {
        format!("{name}.service")
    }
}

fn escape_ps_single_quote(value: &str) -> String {
    value.replace('\'', "''")
}
