mod api;
mod controller;
mod powershell;

pub use api::{BackupApi, BackupRecord, RestorePoint};
pub use controller::{
    CandidatePolicy, DependentWorkloadController, RestoreOutcome, RestoreReport, RestoreStatus,
    WorkloadError, DEFAULT_RECENCY_DAYS,
};
pub use powershell::{PowerShellBackupApi, DEFAULT_POWERSHELL, VEEAM_POWERSHELL_MODULE};
