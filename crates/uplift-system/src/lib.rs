mod command;
mod patterns;
mod privilege;
mod processes;
mod reboot;
mod retry;
mod scheduler;
mod services;

pub use command::{command_stdout, run_command};
pub use patterns::NamePattern;
pub use privilege::{current_user_is_administrator, OsPrivileges, PrivilegeCheck};
pub use processes::{terminate_matching, ProcessControl, ProcessInfo, SysinfoProcessControl};
pub use reboot::{OsRebooter, Rebooter};
pub use retry::{wait_until, RetryPolicy};
pub use scheduler::{
    load_continuation_record, os_task_registrar, ContinuationScheduler, SchtasksRegistrar,
    StartupTask, SystemdRegistrar, TaskRegistrar, DEFAULT_GRACE_SECS, DEFAULT_TASK_NAME,
};
pub use services::{
    ServiceControl, ServiceError, ServiceLifecycleController, ServiceStatus, SystemServiceManager,
};
