use std::process::Command;

use anyhow::Result;

use crate::command::run_command;

pub trait Rebooter {
    fn reboot(&self) -> Result<()>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct OsRebooter;

impl Rebooter for OsRebooter {
    fn reboot(&self) -> Result<()> {
        run_command(&mut build_reboot_command(), "failed to initiate system restart")
    }
}

pub(crate) fn build_reboot_command() -> Command {
    if cfg!(windows) {
        let mut command = Command::new("shutdown");
        command
            .arg("/r")
            .arg("/t")
            .arg("0")
            .arg("/c")
            .arg("uplift: restart after database upgrade");
        command
    } else {
        let mut command = Command::new("systemctl");
        command.arg("reboot");
        command
    }
}
