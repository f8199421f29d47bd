use anyhow::{anyhow, Result};
use sysinfo::{Pid, System};
use tracing::{info, warn};

use crate::patterns::NamePattern;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessInfo {
    pub pid: u32,
    pub name: String,
}

pub trait ProcessControl {
    fn list_processes(&self, pattern: &NamePattern) -> Result<Vec<ProcessInfo>>;
    fn kill(&self, process: &ProcessInfo) -> Result<()>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SysinfoProcessControl;

impl ProcessControl for SysinfoProcessControl {
    fn list_processes(&self, pattern: &NamePattern) -> Result<Vec<ProcessInfo>> {
        let mut system = System::new();
        system.refresh_processes();
        let own_pid = std::process::id();

        let mut processes = system
            .processes()
            .iter()
            .filter(|(pid, _)| pid.as_u32() != own_pid)
            .filter(|(_, process)| pattern.matches(process.name()))
            .map(|(pid, process)| ProcessInfo {
                pid: pid.as_u32(),
                name: process.name().to_string(),
            })
            .collect::<Vec<_>>();
        processes.sort_by_key(|process| process.pid);
        Ok(processes)
    }

    fn kill(&self, process: &ProcessInfo) -> Result<()> {
        let pid = Pid::from_u32(process.pid);
        let mut system = System::new();
        if !system.refresh_process(pid) {
            return Ok(());
        }
        match system.process(pid) {
            Some(target) if target.kill() => Ok(()),
            Some(_) => Err(anyhow!(
                "failed to kill process {} (pid {})",
                process.name,
                process.pid
            )),
            None => Ok(()),
        }
    }
}

/// Forcefully terminates every process matching any pattern; failures are logged and skipped.
pub fn terminate_matching(
    control: &dyn ProcessControl,
    patterns: &[NamePattern],
) -> Result<Vec<ProcessInfo>> {
    let mut killed = Vec::new();
    for pattern in patterns {
        for process in control.list_processes(pattern)? {
            if killed.iter().any(|seen: &ProcessInfo| seen.pid == process.pid) {
                continue;
            }
            match control.kill(&process) {
                Ok(()) => {
                    info!("terminated process {} (pid {})", process.name, process.pid);
                    killed.push(process);
                }
                Err(err) => warn!("{err:#}"),
            }
        }
    }
    Ok(killed)
}
