use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uplift_core::Workload;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BackupRecord {
    pub name: String,
    pub job_name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RestorePoint {
    pub created_at: DateTime<Utc>,
}

pub trait BackupApi {
    fn list_jobs(&self) -> Result<Vec<Workload>>;
    fn list_backups(&self) -> Result<Vec<BackupRecord>>;
    fn list_restore_points(&self, backup: &BackupRecord) -> Result<Vec<RestorePoint>>;
    fn disable_job(&self, name: &str) -> Result<()>;
    fn enable_job(&self, name: &str) -> Result<()>;
}
