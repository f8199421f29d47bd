use std::path::Path;
use std::time::Duration;

use anyhow::Result;
use tracing::{info, warn};
use uplift_core::WorkloadSnapshot;
use uplift_system::{load_continuation_record, ContinuationScheduler, TaskRegistrar};
use uplift_workloads::{BackupApi, DependentWorkloadController, RestoreReport};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResumeOutcome {
    NothingPending,
    Restored {
        report: RestoreReport,
        /// False when the startup task or record could not be removed.
        cleaned_up: bool,
    },
}

impl ResumeOutcome {
    pub fn is_complete(&self) -> bool {
        match self {
            Self::NothingPending => true,
            Self::Restored { report, cleaned_up } => report.is_complete() && *cleaned_up,
        }
    }
}

/// Runs once at startup: waits for the backup services, re-enables the recorded workloads,
/// then removes its own startup task and record.
pub fn run_resume(
    record_path: &Path,
    backup: &dyn BackupApi,
    registrar: &dyn TaskRegistrar,
    wait: &dyn Fn(Duration),
) -> Result<ResumeOutcome> {
    let Some(record) = load_continuation_record(record_path)? else {
        info!(
            "no continuation record at {}; nothing to resume",
            record_path.display()
        );
        return Ok(ResumeOutcome::NothingPending);
    };

    info!(
        "continuation '{}' (target {}) will re-enable {} workload(s) in {}s",
        record.task_name,
        record.target_version,
        record.workloads.len(),
        record.grace_secs
    );
    if record.grace_secs > 0 {
        wait(Duration::from_secs(record.grace_secs));
    }

    let snapshot = WorkloadSnapshot::from_names(record.workloads.iter().cloned());
    let report = DependentWorkloadController::new(backup).enable_all(&snapshot);
    if report.is_complete() {
        info!("{report}");
    } else {
        warn!("{report}");
    }

    let scheduler = ContinuationScheduler::new(registrar, record_path, record.task_name.clone());
    let cleaned_up = match scheduler.clear() {
        Ok(_) => {
            info!("continuation '{}' removed", record.task_name);
            true
        }
        Err(err) => {
            warn!("failed to remove continuation '{}': {err:#}", record.task_name);
            false
        }
    };
    Ok(ResumeOutcome::Restored { report, cleaned_up })
}
