use std::path::PathBuf;

use chrono::{DateTime, Utc};
use tracing::{error, info, warn};
use uplift_core::{ArtifactSpec, InstalledVersion, TargetVersion, WorkloadSnapshot};
use uplift_installer::{
    AcquireError, ArtifactAcquirer, InstallExecutor, InstallOutcome, InstallRunner,
    StagingLayout, Transport, VerifiedArtifact, VersionProbe,
};
use uplift_system::{
    ContinuationScheduler, PrivilegeCheck, ProcessControl, Rebooter, ServiceControl,
    ServiceError, ServiceLifecycleController, TaskRegistrar,
};
use uplift_workloads::{BackupApi, DependentWorkloadController, WorkloadError};

use crate::config::{EmptyWorkloadPolicy, Settings};
use crate::context::{Restoration, Stage, WorkflowContext};
use crate::countdown::{CountdownOutcome, RestartCountdown};
use crate::error::{ExitKind, WorkflowError};

#[derive(Clone, Copy)]
pub struct Collaborators<'a> {
    pub privileges: &'a dyn PrivilegeCheck,
    pub versions: &'a dyn VersionProbe,
    pub backup: &'a dyn BackupApi,
    pub services: &'a dyn ServiceControl,
    pub processes: &'a dyn ProcessControl,
    pub primary_transport: &'a dyn Transport,
    pub fallback_transport: &'a dyn Transport,
    pub executor: &'a dyn InstallExecutor,
    pub registrar: &'a dyn TaskRegistrar,
    pub countdown: &'a dyn RestartCountdown,
    pub rebooter: &'a dyn Rebooter,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RestartDecision {
    NotRequested,
    NotOffered,
    Rebooting,
    Cancelled,
    /// The restart could not be arranged; state was restored in-process instead.
    Failed(String),
}

#[derive(Debug, Clone)]
pub struct WorkflowReport {
    pub stage: Stage,
    pub installed: Option<InstalledVersion>,
    pub target: TargetVersion,
    pub up_to_date: bool,
    pub dry_run: bool,
    pub snapshot: WorkloadSnapshot,
    pub services_to_stop: Vec<String>,
    pub stopped_services: Vec<String>,
    pub services_not_started: Vec<String>,
    pub artifact: Option<VerifiedArtifact>,
    pub install: Option<InstallOutcome>,
    pub restoration: Restoration,
    pub restart: RestartDecision,
    pub warnings: Vec<String>,
}

impl WorkflowReport {
    fn from_context(ctx: WorkflowContext, restart: RestartDecision) -> Self {
        Self {
            stage: ctx.stage,
            installed: ctx.installed,
            target: ctx.target,
            up_to_date: false,
            dry_run: false,
            snapshot: ctx.snapshot,
            services_to_stop: Vec::new(),
            stopped_services: ctx.stopped_services,
            services_not_started: ctx.services_not_started,
            artifact: ctx.artifact,
            install: ctx.install,
            restoration: ctx.restoration.unwrap_or(Restoration::NotNeeded),
            restart,
            warnings: ctx.warnings,
        }
    }

    /// A failed install outranks an incomplete restore, which outranks a missed restart.
    pub fn exit_kind(&self) -> ExitKind {
        if self.install.is_some_and(|outcome| !outcome.is_success()) {
            return ExitKind::Install;
        }
        let restore_incomplete = matches!(
            &self.restoration,
            Restoration::Immediate(report) if !report.is_complete()
        );
        if restore_incomplete || !self.services_not_started.is_empty() {
            return ExitKind::Restoration;
        }
        if matches!(self.restart, RestartDecision::Failed(_)) {
            return ExitKind::RestartFailed;
        }
        ExitKind::Success
    }
}

pub struct Orchestrator<'a> {
    settings: &'a Settings,
    deps: Collaborators<'a>,
    program: PathBuf,
    now: DateTime<Utc>,
}

impl<'a> Orchestrator<'a> {
    /// `program` is what the startup task runs after a restart, normally the current executable.
    pub fn new(
        settings: &'a Settings,
        deps: Collaborators<'a>,
        program: impl Into<PathBuf>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            settings,
            deps,
            program: program.into(),
            now,
        }
    }

    pub fn run(&self, dry_run: bool) -> Result<WorkflowReport, WorkflowError> {
        let ctx = WorkflowContext::new(self.settings.target.clone());
        let ctx = self.check_privileges(ctx)?;
        let ctx = self.validate_paths(ctx)?;
        let ctx = self.check_version(ctx)?;

        if ctx
            .installed
            .as_ref()
            .is_some_and(|installed| ctx.target.is_met_by(installed))
        {
            info!("installation already meets target {}; nothing to do", ctx.target);
            let report = self.complete(ctx, RestartDecision::NotRequested);
            return Ok(WorkflowReport {
                up_to_date: true,
                dry_run,
                ..report
            });
        }

        let spec = self
            .settings
            .artifact_spec()
            .map_err(|err| WorkflowError::precondition(ctx.stage, format!("{err:#}")))?;

        let ctx = self.snapshot_workloads(ctx)?;
        if dry_run {
            return self.plan(ctx);
        }

        let ctx = self.disable_workloads(ctx)?;
        let ctx = self.stop_services(ctx)?;
        let (ctx, layout, artifact) = self.acquire_artifact(ctx, &spec)?;
        let ctx = self.install(ctx, &layout, &artifact);
        Ok(self.finish(ctx))
    }

    fn workloads(&self) -> DependentWorkloadController<'a> {
        DependentWorkloadController::new(self.deps.backup)
    }

    fn lifecycle(&self) -> ServiceLifecycleController<'a> {
        ServiceLifecycleController::new(self.deps.services, self.deps.processes, self.settings.retry)
    }

    fn scheduler(&self) -> ContinuationScheduler<'a> {
        ContinuationScheduler::new(
            self.deps.registrar,
            self.settings.record_path(),
            self.settings.task_name.clone(),
        )
    }

    fn advance(&self, ctx: WorkflowContext, stage: Stage) -> WorkflowContext {
        info!("stage: {stage}");
        ctx.at(stage)
    }

    fn check_privileges(&self, ctx: WorkflowContext) -> Result<WorkflowContext, WorkflowError> {
        let stage = Stage::PrivilegeCheck;
        let elevated = self
            .deps
            .privileges
            .is_elevated()
            .map_err(|err| WorkflowError::internal(stage, &err))?;
        if !elevated {
            return Err(WorkflowError::precondition(
                stage,
                "must run elevated (Administrator or root)",
            ));
        }
        Ok(self.advance(ctx, stage))
    }

    fn validate_paths(&self, ctx: WorkflowContext) -> Result<WorkflowContext, WorkflowError> {
        let stage = Stage::PathValidated;
        let install_path = &self.settings.install_path;
        if !install_path.is_dir() {
            return Err(WorkflowError::precondition(
                stage,
                format!("install path is not a directory: {}", install_path.display()),
            ));
        }

        // Workloads of an unfinished run are still disabled and would be missing from a new snapshot.
        match self.scheduler().pending() {
            Ok(None) => {}
            Ok(Some(pending)) => {
                return Err(WorkflowError::precondition(
                    stage,
                    format!(
                        "continuation '{}' from a previous run is still pending for {}; \
                         let it run after restart or use `uplift cancel-continuation`",
                        pending.task_name,
                        pending.workloads.join(", ")
                    ),
                ));
            }
            Err(err) => return Err(WorkflowError::precondition(stage, format!("{err:#}"))),
        }
        Ok(self.advance(ctx, stage))
    }

    fn check_version(&self, ctx: WorkflowContext) -> Result<WorkflowContext, WorkflowError> {
        let stage = Stage::VersionChecked;
        let installed = self
            .deps
            .versions
            .current_version(&self.settings.version_binary)
            .map_err(|err| WorkflowError::precondition(stage, err.to_string()))?;
        info!("installed version {installed}, target {}", ctx.target);
        Ok(self.advance(ctx.with_installed(installed), stage))
    }

    fn snapshot_workloads(&self, ctx: WorkflowContext) -> Result<WorkflowContext, WorkflowError> {
        let stage = Stage::WorkloadsSnapshotted;
        let controller = self.workloads();
        let candidates = controller
            .list_candidate_workloads(&self.settings.candidate_policy(), self.now)
            .map_err(|err| WorkflowError::internal(stage, &err))?;

        if controller.has_active_work(&candidates) {
            let active = candidates
                .iter()
                .filter(|workload| workload.is_active())
                .map(|workload| workload.name.as_str())
                .collect::<Vec<_>>();
            return Err(WorkflowError::conflict(
                stage,
                format!(
                    "workloads are running: {}; retry once they finish",
                    active.join(", ")
                ),
            ));
        }

        let snapshot = WorkloadSnapshot::capture(&candidates);
        if snapshot.is_empty() {
            match self.settings.empty_workloads {
                EmptyWorkloadPolicy::Abort => {
                    return Err(WorkflowError::precondition(
                        stage,
                        "no workloads qualify for pausing (empty_workloads = abort)",
                    ));
                }
                EmptyWorkloadPolicy::Proceed => {
                    info!("no managed workloads; nothing will be paused or re-enabled")
                }
            }
        } else {
            info!(
                "pausing {} workload(s): {}",
                snapshot.len(),
                snapshot.names().join(", ")
            );
        }
        Ok(self.advance(ctx.with_snapshot(snapshot), stage))
    }

    fn plan(&self, ctx: WorkflowContext) -> Result<WorkflowReport, WorkflowError> {
        let services_to_stop = self
            .lifecycle()
            .running_services(&self.settings.service_pattern)
            .map_err(|err| WorkflowError::internal(ctx.stage, &err))?;
        info!("dry run: stopping before any change");
        Ok(WorkflowReport {
            dry_run: true,
            services_to_stop,
            ..WorkflowReport::from_context(ctx, RestartDecision::NotRequested)
        })
    }

    fn disable_workloads(&self, ctx: WorkflowContext) -> Result<WorkflowContext, WorkflowError> {
        let stage = Stage::WorkloadsDisabled;
        if ctx.snapshot.is_empty() {
            return Ok(self.advance(ctx, stage));
        }

        // Marked before the call: a partial disable still needs undoing.
        let ctx = ctx.with_workloads_disabled();
        match self.workloads().disable_all(&ctx.snapshot) {
            Ok(()) => Ok(self.advance(ctx, stage)),
            Err(WorkloadError::StillEnabled(names)) => Err(self.abort(
                ctx,
                WorkflowError::conflict(
                    stage,
                    format!("workloads still enabled after disable: {}", names.join(", ")),
                ),
            )),
            Err(WorkloadError::Api(err)) => {
                Err(self.abort(ctx, WorkflowError::internal(stage, &err)))
            }
        }
    }

    fn stop_services(&self, ctx: WorkflowContext) -> Result<WorkflowContext, WorkflowError> {
        let stage = Stage::ServicesStopped;
        let lifecycle = self.lifecycle();
        let pattern = &self.settings.service_pattern;

        let running = match lifecycle.running_services(pattern) {
            Ok(running) => running,
            Err(err) => return Err(self.abort(ctx, WorkflowError::internal(stage, &err))),
        };
        let ctx = ctx.with_stopped_services(running);

        match lifecycle.stop_all(pattern, &self.settings.kill_patterns) {
            Ok(stopped) => Ok(self.advance(ctx.with_stopped_services(stopped), stage)),
            Err(ServiceError::StillRunning(names)) => Err(self.abort(
                ctx,
                WorkflowError::conflict(
                    stage,
                    format!(
                        "services still running after forced termination: {}; manual intervention required",
                        names.join(", ")
                    ),
                ),
            )),
            Err(ServiceError::Control(err)) => {
                Err(self.abort(ctx, WorkflowError::internal(stage, &err)))
            }
        }
    }

    fn acquire_artifact(
        &self,
        ctx: WorkflowContext,
        spec: &ArtifactSpec,
    ) -> Result<(WorkflowContext, StagingLayout, VerifiedArtifact), WorkflowError> {
        let stage = Stage::ArtifactVerified;
        let layout = StagingLayout::new(&self.settings.staging_dir);
        let created = match layout.ensure() {
            Ok(created) => created,
            Err(err) => return Err(self.abort(ctx, WorkflowError::internal(stage, &err))),
        };
        let ctx = ctx.with_staging_created(created);

        let file_name = match spec.file_name() {
            Ok(file_name) => file_name,
            Err(err) => {
                self.cleanup_staging(&layout, created);
                return Err(self.abort(
                    ctx,
                    WorkflowError::precondition(stage, format!("{err:#}")),
                ));
            }
        };

        let acquirer =
            ArtifactAcquirer::new(self.deps.primary_transport, self.deps.fallback_transport);
        match acquirer.acquire(spec, &layout.artifact_path(&file_name)) {
            Ok(artifact) => {
                let ctx = self.advance(ctx.with_artifact(artifact.clone()), stage);
                Ok((ctx, layout, artifact))
            }
            Err(err) => {
                self.cleanup_staging(&layout, created);
                let failure = match err {
                    AcquireError::Io(err) => WorkflowError::internal(stage, &err),
                    other => WorkflowError::acquisition(stage, other.to_string()),
                };
                Err(self.abort(ctx, failure))
            }
        }
    }

    /// Never fails: a broken install still falls through to restoration.
    fn install(
        &self,
        ctx: WorkflowContext,
        layout: &StagingLayout,
        artifact: &VerifiedArtifact,
    ) -> WorkflowContext {
        let runner = InstallRunner::new(
            self.deps.executor,
            self.deps.processes,
            self.settings.interfering_patterns.clone(),
            self.settings.retry.settle,
        );
        let (mut ctx, outcome) =
            match runner.run(artifact, &self.settings.installer_args, layout.root()) {
                Ok(outcome) => (ctx, outcome),
                Err(err) => {
                    error!("installer could not be run: {err:#}");
                    (
                        ctx.with_warning(format!("installer could not be run: {err:#}")),
                        InstallOutcome { exit_code: -1 },
                    )
                }
            };

        if let Err(err) = layout.cleanup(ctx.staging_created) {
            warn!("{err:#}");
            ctx = ctx.with_warning(format!("{err:#}"));
        }
        self.advance(ctx.with_install(outcome), Stage::Installed)
    }

    fn finish(&self, ctx: WorkflowContext) -> WorkflowReport {
        if ctx.install_succeeded() && self.settings.restart {
            return self.restart(ctx);
        }

        let restart = match (ctx.install_succeeded(), self.settings.restart) {
            (false, true) => RestartDecision::NotOffered,
            _ => RestartDecision::NotRequested,
        };
        let ctx = self.restore_now(ctx);
        let ctx = self.advance(ctx, Stage::RestartSkipped);
        self.complete(ctx, restart)
    }

    fn restart(&self, ctx: WorkflowContext) -> WorkflowReport {
        let scheduler = self.scheduler();
        let continuation = if ctx.workloads_disabled && !ctx.snapshot.is_empty() {
            match scheduler.register_continuation(
                &self.program,
                &ctx.snapshot,
                &self.settings.log_file,
                self.settings.config_file.as_deref(),
                self.settings.continuation_grace_secs,
                &ctx.target.to_string(),
            ) {
                Ok(record) => Some(record),
                Err(err) => {
                    error!("could not register continuation, restoring now and not restarting: {err:#}");
                    let ctx = self.restore_now(
                        ctx.with_warning(format!("continuation registration failed: {err:#}")),
                    );
                    let ctx = self.advance(ctx, Stage::RestartSkipped);
                    return self.complete(ctx, RestartDecision::Failed(format!("{err:#}")));
                }
            }
        } else {
            None
        };
        let ctx = self.advance(ctx, Stage::RestartScheduled);

        let outcome = match self.deps.countdown.run(self.settings.countdown_secs) {
            Ok(outcome) => outcome,
            Err(err) => {
                warn!("restart countdown failed, restarting without it: {err:#}");
                CountdownOutcome::Proceed
            }
        };

        match outcome {
            CountdownOutcome::Cancelled => {
                info!("restart cancelled by operator");
                let ctx = self.abandon_continuation(ctx, &scheduler, continuation.is_some());
                let ctx = self.restore_now(ctx);
                self.complete(ctx, RestartDecision::Cancelled)
            }
            CountdownOutcome::Proceed => match self.deps.rebooter.reboot() {
                Ok(()) => {
                    info!("restart initiated");
                    let restoration = continuation
                        .map(Restoration::Deferred)
                        .unwrap_or(Restoration::NotNeeded);
                    self.complete(ctx.with_restoration(restoration), RestartDecision::Rebooting)
                }
                Err(err) => {
                    error!("failed to initiate restart: {err:#}");
                    let ctx = self.abandon_continuation(ctx, &scheduler, continuation.is_some());
                    let ctx = self.restore_now(
                        ctx.with_warning(format!("restart failed: {err:#}")),
                    );
                    self.complete(ctx, RestartDecision::Failed(format!("{err:#}")))
                }
            },
        }
    }

    fn abandon_continuation(
        &self,
        ctx: WorkflowContext,
        scheduler: &ContinuationScheduler<'_>,
        registered: bool,
    ) -> WorkflowContext {
        if !registered {
            return ctx;
        }
        match scheduler.clear() {
            Ok(_) => {
                info!("removed startup task '{}'", scheduler.task_name());
                ctx
            }
            Err(err) => {
                warn!("could not remove startup task: {err:#}");
                ctx.with_warning(format!(
                    "startup task '{}' may still be registered: {err:#}",
                    scheduler.task_name()
                ))
            }
        }
    }

    fn restore_now(&self, ctx: WorkflowContext) -> WorkflowContext {
        let restoration = if ctx.workloads_disabled && !ctx.snapshot.is_empty() {
            let report = self.workloads().enable_all(&ctx.snapshot);
            if report.is_complete() {
                info!("{report}");
            } else {
                warn!("{report}");
            }
            Restoration::Immediate(report)
        } else {
            if ctx.no_managed_workloads {
                info!("no managed workloads; skipping re-enable");
            }
            Restoration::NotNeeded
        };

        let failed = self.lifecycle().start_all(&ctx.stopped_services);
        let mut ctx = ctx.with_restoration(restoration);
        if !failed.is_empty() {
            ctx = ctx.with_warning(format!("services not started: {}", failed.join(", ")));
        }
        self.advance(ctx.with_services_not_started(failed), Stage::WorkloadsRestored)
    }

    fn cleanup_staging(&self, layout: &StagingLayout, created: bool) {
        if let Err(err) = layout.cleanup(created) {
            warn!("{err:#}");
        }
    }

    /// Logs the failure and undoes what this run changed before it is returned.
    fn abort(&self, ctx: WorkflowContext, failure: WorkflowError) -> WorkflowError {
        error!("{failure}");
        let touched = ctx.workloads_disabled || !ctx.stopped_services.is_empty();
        if !touched {
            return failure;
        }

        if self.settings.restore_on_abort {
            let ctx = self.restore_now(ctx);
            if !ctx.services_not_started.is_empty() {
                error!(
                    "start these services manually: {}",
                    ctx.services_not_started.join(", ")
                );
            }
        } else {
            error!(
                "manual intervention required: re-enable workloads [{}] and start services [{}]",
                ctx.snapshot.names().join(", "),
                ctx.stopped_services.join(", ")
            );
        }
        failure
    }

    fn complete(&self, ctx: WorkflowContext, restart: RestartDecision) -> WorkflowReport {
        let ctx = self.advance(ctx, Stage::Done);
        WorkflowReport::from_context(ctx, restart)
    }
}
