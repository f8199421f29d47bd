use std::fmt;

use uplift_core::{InstalledVersion, PendingContinuation, TargetVersion, WorkloadSnapshot};
use uplift_installer::{InstallOutcome, VerifiedArtifact};
use uplift_workloads::RestoreReport;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Stage {
    Init,
    PrivilegeCheck,
    PathValidated,
    VersionChecked,
    WorkloadsSnapshotted,
    WorkloadsDisabled,
    ServicesStopped,
    ArtifactVerified,
    Installed,
    WorkloadsRestored,
    RestartScheduled,
    RestartSkipped,
    Done,
}

impl Stage {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Init => "startup",
            Self::PrivilegeCheck => "privilege check",
            Self::PathValidated => "path validation",
            Self::VersionChecked => "version check",
            Self::WorkloadsSnapshotted => "workload snapshot",
            Self::WorkloadsDisabled => "workload disable",
            Self::ServicesStopped => "service shutdown",
            Self::ArtifactVerified => "artifact verification",
            Self::Installed => "install",
            Self::WorkloadsRestored => "workload restore",
            Self::RestartScheduled => "restart scheduling",
            Self::RestartSkipped => "restart skipped",
            Self::Done => "done",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Restoration {
    Immediate(RestoreReport),
    Deferred(PendingContinuation),
    NotNeeded,
}

/// Everything the run has decided so far. Each step consumes it and returns an extended copy.
#[derive(Debug, Clone)]
pub struct WorkflowContext {
    pub stage: Stage,
    pub target: TargetVersion,
    pub installed: Option<InstalledVersion>,
    pub snapshot: WorkloadSnapshot,
    pub no_managed_workloads: bool,
    pub workloads_disabled: bool,
    pub stopped_services: Vec<String>,
    pub services_not_started: Vec<String>,
    pub staging_created: bool,
    pub artifact: Option<VerifiedArtifact>,
    pub install: Option<InstallOutcome>,
    pub restoration: Option<Restoration>,
    pub warnings: Vec<String>,
}

impl WorkflowContext {
    pub fn new(target: TargetVersion) -> Self {
        Self {
            stage: Stage::Init,
            target,
            installed: None,
            snapshot: WorkloadSnapshot::default(),
            no_managed_workloads: false,
            workloads_disabled: false,
            stopped_services: Vec::new(),
            services_not_started: Vec::new(),
            staging_created: false,
            artifact: None,
            install: None,
            restoration: None,
            warnings: Vec::new(),
        }
    }

    pub fn at(self, stage: Stage) -> Self {
        Self { stage, ..self }
    }

    pub fn with_installed(self, installed: InstalledVersion) -> Self {
        Self {
            installed: Some(installed),
            ..self
        }
    }

    pub fn with_snapshot(self, snapshot: WorkloadSnapshot) -> Self {
        Self {
            no_managed_workloads: snapshot.is_empty(),
            snapshot,
            ..self
        }
    }

    pub fn with_workloads_disabled(self) -> Self {
        Self {
            workloads_disabled: true,
            ..self
        }
    }

    pub fn with_stopped_services(self, stopped_services: Vec<String>) -> Self {
        Self {
            stopped_services,
            ..self
        }
    }

    pub fn with_services_not_started(self, services_not_started: Vec<String>) -> Self {
        Self {
            services_not_started,
            ..self
        }
    }

    pub fn with_staging_created(self, staging_created: bool) -> Self {
        Self {
            staging_created,
            ..self
        }
    }

    pub fn with_artifact(self, artifact: VerifiedArtifact) -> Self {
        Self {
            artifact: Some(artifact),
            ..self
        }
    }

    pub fn with_install(self, install: InstallOutcome) -> Self {
        Self {
            install: Some(install),
            ..self
        }
    }

    pub fn with_restoration(self, restoration: Restoration) -> Self {
        Self {
            restoration: Some(restoration),
            ..self
        }
    }

    pub fn with_warning(mut self, warning: impl Into<String>) -> Self {
        self.warnings.push(warning.into());
        self
    }

    pub fn install_succeeded(&self) -> bool {
        self.install.is_some_and(|outcome| outcome.is_success())
    }
}
