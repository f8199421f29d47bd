use std::collections::HashMap;
use std::fmt;

use anyhow::Result;
use chrono::{DateTime, Duration, Utc};
use thiserror::Error;
use tracing::{debug, info, warn};
use uplift_core::{has_active_work, Workload, WorkloadSnapshot};

use crate::api::BackupApi;

pub const DEFAULT_RECENCY_DAYS: u32 = 14;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CandidatePolicy {
    pub recency_window: Option<Duration>,
}

impl CandidatePolicy {
    pub fn all_enabled() -> Self {
        Self {
            recency_window: None,
        }
    }

    pub fn recently_active(days: u32) -> Self {
        Self {
            recency_window: Some(Duration::days(i64::from(days))),
        }
    }
}

impl Default for CandidatePolicy {
    fn default() -> Self {
        Self::recently_active(DEFAULT_RECENCY_DAYS)
    }
}

#[derive(Debug, Error)]
pub enum WorkloadError {
    #[error("workloads still enabled after disable: {}", .0.join(", "))]
    StillEnabled(Vec<String>),
    #[error(transparent)]
    Api(#[from] anyhow::Error),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RestoreStatus {
    Enabled,
    Failed(String),
    Missing,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RestoreOutcome {
    pub name: String,
    pub status: RestoreStatus,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RestoreReport {
    pub outcomes: Vec<RestoreOutcome>,
}

impl RestoreReport {
    pub fn is_complete(&self) -> bool {
        self.outcomes
            .iter()
            .all(|outcome| outcome.status == RestoreStatus::Enabled)
    }

    pub fn enabled(&self) -> Vec<&str> {
        self.outcomes
            .iter()
            .filter(|outcome| outcome.status == RestoreStatus::Enabled)
            .map(|outcome| outcome.name.as_str())
            .collect()
    }

    pub fn failures(&self) -> Vec<&RestoreOutcome> {
        self.outcomes
            .iter()
            .filter(|outcome| outcome.status != RestoreStatus::Enabled)
            .collect()
    }
}

impl fmt::Display for RestoreReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let failures = self.failures();
        write!(
            f,
            "{} of {} workload(s) re-enabled",
            self.outcomes.len() - failures.len(),
            self.outcomes.len()
        )?;
        if !failures.is_empty() {
            let names = failures
                .iter()
                .map(|outcome| outcome.name.as_str())
                .collect::<Vec<_>>();
            write!(f, "; needs manual attention: {}", names.join(", "))?;
        }
        Ok(())
    }
}

pub struct DependentWorkloadController<'a> {
    api: &'a dyn BackupApi,
}

impl<'a> DependentWorkloadController<'a> {
    pub fn new(api: &'a dyn BackupApi) -> Self {
        Self { api }
    }

    /// Enabled workloads, narrowed to those with a checkpoint inside the recency window.
    pub fn list_candidate_workloads(
        &self,
        policy: &CandidatePolicy,
        now: DateTime<Utc>,
    ) -> Result<Vec<Workload>> {
        let enabled = self
            .api
            .list_jobs()?
            .into_iter()
            .filter(|job| job.schedule_enabled)
            .collect::<Vec<_>>();

        let Some(window) = policy.recency_window else {
            return Ok(enabled);
        };
        if enabled.is_empty() {
            return Ok(enabled);
        }

        let cutoff = now - window;
        let last_checkpoints = self.last_checkpoints()?;
        let (recent, stale): (Vec<_>, Vec<_>) = enabled.into_iter().partition(|job| {
            last_checkpoints
                .get(&job.name)
                .is_some_and(|last| *last >= cutoff)
        });
        for job in &stale {
            debug!(workload = %job.name, "skipping enabled workload without a recent checkpoint");
        }
        if !stale.is_empty() {
            info!(
                "{} enabled workload(s) have no checkpoint since {} and will not be paused",
                stale.len(),
                cutoff.format("%Y-%m-%d")
            );
        }
        Ok(recent)
    }

    pub fn has_active_work(&self, workloads: &[Workload]) -> bool {
        for workload in workloads.iter().filter(|workload| workload.is_active()) {
            warn!("workload '{}' is currently running", workload.name);
        }
        has_active_work(workloads)
    }

    pub fn disable_all(&self, snapshot: &WorkloadSnapshot) -> Result<(), WorkloadError> {
        for name in snapshot.names() {
            match self.api.disable_job(name) {
                Ok(()) => info!("disabled workload '{name}'"),
                Err(err) => warn!("failed to disable workload '{name}': {err:#}"),
            }
        }

        let still_enabled = self
            .api
            .list_jobs()?
            .into_iter()
            .filter(|job| job.schedule_enabled && snapshot.contains(&job.name))
            .map(|job| job.name)
            .collect::<Vec<_>>();
        if still_enabled.is_empty() {
            Ok(())
        } else {
            Err(WorkloadError::StillEnabled(still_enabled))
        }
    }

    /// Best effort: every snapshotted workload is attempted and verified individually.
    pub fn enable_all(&self, snapshot: &WorkloadSnapshot) -> RestoreReport {
        let mut enable_errors: HashMap<&str, String> = HashMap::new();
        for name in snapshot.names() {
            if let Err(err) = self.api.enable_job(name) {
                warn!("failed to enable workload '{name}': {err:#}");
                enable_errors.insert(name.as_str(), format!("{err:#}"));
            }
        }

        let current = match self.api.list_jobs() {
            Ok(jobs) => Some(jobs),
            Err(err) => {
                warn!("could not re-query workload state after enable: {err:#}");
                None
            }
        };

        let outcomes = snapshot
            .names()
            .iter()
            .map(|name| {
                // A job absent from the re-query is Missing even if enable_job errored on it.
                let found = current
                    .as_deref()
                    .map(|jobs| jobs.iter().find(|job| &job.name == name));
                let status = match (found, enable_errors.get(name.as_str())) {
                    (Some(None), _) => RestoreStatus::Missing,
                    (_, Some(reason)) => RestoreStatus::Failed(reason.clone()),
                    (None, None) => {
                        RestoreStatus::Failed("state could not be verified".to_string())
                    }
                    (Some(Some(job)), None) if job.schedule_enabled => RestoreStatus::Enabled,
                    (Some(Some(_)), None) => {
                        RestoreStatus::Failed("still disabled after enable".to_string())
                    }
                };
                match &status {
                    RestoreStatus::Enabled => info!("re-enabled workload '{name}'"),
                    RestoreStatus::Failed(reason) => {
                        warn!("workload '{name}' was not re-enabled: {reason}")
                    }
                    RestoreStatus::Missing => {
                        warn!("workload '{name}' no longer exists and was not re-enabled")
                    }
                }
                RestoreOutcome {
                    name: name.clone(),
                    status,
                }
            })
            .collect();

        RestoreReport { outcomes }
    }

    fn last_checkpoints(&self) -> Result<HashMap<String, DateTime<Utc>>> {
        let mut latest: HashMap<String, DateTime<Utc>> = HashMap::new();
        for backup in self.api.list_backups()? {
            let newest = self
                .api
                .list_restore_points(&backup)?
                .into_iter()
                .map(|point| point.created_at)
                .max();
            if let Some(newest) = newest {
                latest
                    .entry(backup.job_name.clone())
                    .and_modify(|current| {
                        if newest > *current {
                            *current = newest;
                        }
                    })
                    .or_insert(newest);
            }
        }
        Ok(latest)
    }
}
