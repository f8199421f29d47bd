use std::cell::{Cell, RefCell};
use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::rc::Rc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use anyhow::{anyhow, Result};
use chrono::{DateTime, TimeZone, Utc};
use clap::{CommandFactory, Parser};
use clap_complete::Shell;
use uplift_core::{InstalledVersion, Workload};
use uplift_installer::{InstallExecutor, Transport, VersionError, VersionProbe};
use uplift_security::sha256_hex;
use uplift_system::{
    NamePattern, PrivilegeCheck, ProcessControl, ProcessInfo, Rebooter, RetryPolicy,
    ServiceControl, ServiceStatus, StartupTask, TaskRegistrar,
};
use uplift_workloads::{BackupApi, BackupRecord, RestorePoint};

use crate::cli::{Cli, Commands, SettingsArgs};
use crate::config::{EmptyWorkloadPolicy, FileConfig, Settings};
use crate::context::{Restoration, Stage};
use crate::continuation::{run_resume, ResumeOutcome};
use crate::countdown::{CountdownOutcome, RestartCountdown};
use crate::dispatch::write_completions;
use crate::error::{ErrorKind, ExitKind, WorkflowError};
use crate::render::{format_report_lines, render_status_line, OutputStyle};
use crate::workflow::{Collaborators, Orchestrator, RestartDecision, WorkflowReport};

const PAYLOAD: &[u8] = b"postgresql-15.12 installer bytes";
const ARTIFACT_URL: &str = "https://downloads.example.test/postgresql-15.12-1-windows-x64.exe";

fn test_root(name: &str) -> PathBuf {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("must get system time")
        .as_nanos();
    std::env::temp_dir().join(format!("uplift-cli-{name}-{nanos}"))
}

fn test_settings(root: &Path) -> Settings {
    let install_path = root.join("install");
    fs::create_dir_all(&install_path).expect("must create install dir");
    let args = SettingsArgs {
        install_path: Some(install_path),
        artifact_url: Some(ARTIFACT_URL.to_string()),
        artifact_sha256: Some(sha256_hex(PAYLOAD)),
        restart: Some(false),
        skip_unused: Some(false),
        log_file: Some(root.join("uplift.log")),
        ..SettingsArgs::default()
    };
    let file = FileConfig {
        staging_dir: Some(root.join("staging")),
        state_dir: Some(root.join("state")),
        countdown_secs: Some(0),
        ..FileConfig::default()
    };
    let mut settings = Settings::resolve(&args, file).expect("must resolve settings");
    settings.retry = RetryPolicy::immediate(2);
    settings
}

fn now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 3, 1, 4, 0, 0)
        .single()
        .expect("must build timestamp")
}

struct FakePrivileges(bool);

impl PrivilegeCheck for FakePrivileges {
    fn is_elevated(&self) -> Result<bool> {
        Ok(self.0)
    }
}

struct FakeVersions {
    current: Rc<RefCell<String>>,
}

impl VersionProbe for FakeVersions {
    fn current_version(&self, binary: &Path) -> Result<InstalledVersion, VersionError> {
        InstalledVersion::parse(&self.current.borrow()).map_err(|err| VersionError::Unreadable {
            path: binary.to_path_buf(),
            reason: err.to_string(),
        })
    }
}

#[derive(Default)]
struct FakeBackup {
    jobs: RefCell<Vec<Workload>>,
    refuse_disable: BTreeSet<String>,
    refuse_enable: BTreeSet<String>,
    mutations: RefCell<Vec<String>>,
    queries: Cell<usize>,
}

impl FakeBackup {
    fn enabled(&self, name: &str) -> bool {
        self.jobs
            .borrow()
            .iter()
            .any(|job| job.name == name && job.schedule_enabled)
    }

    fn set_enabled(&self, name: &str, enabled: bool) -> Result<()> {
        let mut jobs = self.jobs.borrow_mut();
        let job = jobs
            .iter_mut()
            .find(|job| job.name == name)
            .ok_or_else(|| anyhow!("job not found: {name}"))?;
        job.schedule_enabled = enabled;
        Ok(())
    }
}

impl BackupApi for FakeBackup {
    fn list_jobs(&self) -> Result<Vec<Workload>> {
        self.queries.set(self.queries.get() + 1);
        Ok(self.jobs.borrow().clone())
    }

    fn list_backups(&self) -> Result<Vec<BackupRecord>> {
        Ok(Vec::new())
    }

    fn list_restore_points(&self, _backup: &BackupRecord) -> Result<Vec<RestorePoint>> {
        Ok(Vec::new())
    }

    fn disable_job(&self, name: &str) -> Result<()> {
        self.mutations.borrow_mut().push(format!("disable:{name}"));
        if self.refuse_disable.contains(name) {
            return Err(anyhow!("access denied"));
        }
        self.set_enabled(name, false)
    }

    fn enable_job(&self, name: &str) -> Result<()> {
        self.mutations.borrow_mut().push(format!("enable:{name}"));
        if self.refuse_enable.contains(name) {
            return Err(anyhow!("job is locked"));
        }
        self.set_enabled(name, true)
    }
}

struct FakeServices {
    known: Vec<String>,
    running: RefCell<BTreeSet<String>>,
    stubborn: bool,
    calls: RefCell<Vec<String>>,
}

impl FakeServices {
    fn running(names: &[&str]) -> Self {
        Self {
            known: names.iter().map(|name| name.to_string()).collect(),
            running: RefCell::new(names.iter().map(|name| name.to_string()).collect()),
            stubborn: false,
            calls: RefCell::new(Vec::new()),
        }
    }
}

impl ServiceControl for FakeServices {
    fn list_services(&self, pattern: &NamePattern) -> Result<Vec<ServiceStatus>> {
        let running = self.running.borrow();
        Ok(self
            .known
            .iter()
            .filter(|name| pattern.matches(name))
            .map(|name| ServiceStatus {
                name: name.clone(),
                running: running.contains(name),
            })
            .collect())
    }

    fn stop_service(&self, name: &str) -> Result<()> {
        self.calls.borrow_mut().push(format!("stop:{name}"));
        if !self.stubborn {
            self.running.borrow_mut().remove(name);
        }
        Ok(())
    }

    fn start_service(&self, name: &str) -> Result<()> {
        self.calls.borrow_mut().push(format!("start:{name}"));
        self.running.borrow_mut().insert(name.to_string());
        Ok(())
    }
}

#[derive(Default)]
struct FakeProcesses {
    kills: Cell<usize>,
}

impl ProcessControl for FakeProcesses {
    fn list_processes(&self, _pattern: &NamePattern) -> Result<Vec<ProcessInfo>> {
        Ok(Vec::new())
    }

    fn kill(&self, _process: &ProcessInfo) -> Result<()> {
        self.kills.set(self.kills.get() + 1);
        Ok(())
    }
}

struct FakeTransport {
    label: &'static str,
    payload: Option<Vec<u8>>,
    calls: Cell<usize>,
}

impl FakeTransport {
    fn serving(label: &'static str, payload: &[u8]) -> Self {
        Self {
            label,
            payload: Some(payload.to_vec()),
            calls: Cell::new(0),
        }
    }

    fn failing(label: &'static str) -> Self {
        Self {
            label,
            payload: None,
            calls: Cell::new(0),
        }
    }
}

impl Transport for FakeTransport {
    fn name(&self) -> &str {
        self.label
    }

    fn fetch(&self, _url: &str, destination: &Path) -> Result<()> {
        self.calls.set(self.calls.get() + 1);
        match &self.payload {
            Some(payload) => Ok(fs::write(destination, payload)?),
            None => Err(anyhow!("{} unreachable", self.label)),
        }
    }
}

struct FakeExecutor {
    exit_code: i32,
    installed: Rc<RefCell<String>>,
    runs: RefCell<Vec<(PathBuf, Vec<String>)>>,
}

impl InstallExecutor for FakeExecutor {
    fn execute(&self, program: &Path, args: &[String], _working_dir: &Path) -> Result<i32> {
        assert!(program.is_file(), "installer must exist when executed");
        self.runs
            .borrow_mut()
            .push((program.to_path_buf(), args.to_vec()));
        if self.exit_code == 0 {
            *self.installed.borrow_mut() = "15.12.0".to_string();
        }
        Ok(self.exit_code)
    }
}

#[derive(Default)]
struct FakeRegistrar {
    tasks: RefCell<Vec<StartupTask>>,
    refuse: bool,
}

impl TaskRegistrar for FakeRegistrar {
    fn register_startup_task(&self, task: &StartupTask) -> Result<()> {
        if self.refuse {
            return Err(anyhow!("task scheduler unavailable"));
        }
        self.tasks.borrow_mut().push(task.clone());
        Ok(())
    }

    fn unregister(&self, name: &str) -> Result<()> {
        self.tasks.borrow_mut().retain(|task| task.name != name);
        Ok(())
    }

    fn is_registered(&self, name: &str) -> Result<bool> {
        Ok(self.tasks.borrow().iter().any(|task| task.name == name))
    }
}

struct FakeCountdown {
    outcome: CountdownOutcome,
    runs: Cell<usize>,
}

impl RestartCountdown for FakeCountdown {
    fn run(&self, _seconds: u64) -> Result<CountdownOutcome> {
        self.runs.set(self.runs.get() + 1);
        Ok(self.outcome)
    }
}

#[derive(Default)]
struct FakeRebooter {
    fail: bool,
    calls: Cell<usize>,
}

impl Rebooter for FakeRebooter {
    fn reboot(&self) -> Result<()> {
        self.calls.set(self.calls.get() + 1);
        if self.fail {
            return Err(anyhow!("shutdown refused"));
        }
        Ok(())
    }
}

struct Harness {
    privileges: FakePrivileges,
    versions: FakeVersions,
    backup: FakeBackup,
    services: FakeServices,
    processes: FakeProcesses,
    primary: FakeTransport,
    fallback: FakeTransport,
    executor: FakeExecutor,
    registrar: FakeRegistrar,
    countdown: FakeCountdown,
    rebooter: FakeRebooter,
}

impl Harness {
    fn new(installed: &str, jobs: Vec<Workload>) -> Self {
        let installed = Rc::new(RefCell::new(installed.to_string()));
        Self {
            privileges: FakePrivileges(true),
            versions: FakeVersions {
                current: Rc::clone(&installed),
            },
            backup: FakeBackup {
                jobs: RefCell::new(jobs),
                ..FakeBackup::default()
            },
            services: FakeServices::running(&["VeeamBackupSvc", "VeeamBrokerSvc"]),
            processes: FakeProcesses::default(),
            primary: FakeTransport::serving("primary", PAYLOAD),
            fallback: FakeTransport::serving("fallback", PAYLOAD),
            executor: FakeExecutor {
                exit_code: 0,
                installed,
                runs: RefCell::new(Vec::new()),
            },
            registrar: FakeRegistrar::default(),
            countdown: FakeCountdown {
                outcome: CountdownOutcome::Proceed,
                runs: Cell::new(0),
            },
            rebooter: FakeRebooter::default(),
        }
    }

    fn deps(&self) -> Collaborators<'_> {
        Collaborators {
            privileges: &self.privileges,
            versions: &self.versions,
            backup: &self.backup,
            services: &self.services,
            processes: &self.processes,
            primary_transport: &self.primary,
            fallback_transport: &self.fallback,
            executor: &self.executor,
            registrar: &self.registrar,
            countdown: &self.countdown,
            rebooter: &self.rebooter,
        }
    }

    fn run(&self, settings: &Settings) -> Result<WorkflowReport, WorkflowError> {
        Orchestrator::new(settings, self.deps(), "/opt/uplift/bin/uplift", now()).run(false)
    }

    fn service_calls(&self) -> Vec<String> {
        self.services.calls.borrow().clone()
    }

    fn mutations(&self) -> Vec<String> {
        self.backup.mutations.borrow().clone()
    }
}

fn idle_job(name: &str, enabled: bool) -> Workload {
    Workload::new(name, enabled)
}

fn busy_job(name: &str) -> Workload {
    Workload {
        is_running: true,
        is_idle: false,
        ..Workload::new(name, true)
    }
}

#[test]
fn upgrade_pauses_enabled_workloads_only_and_restores_them() {
    let root = test_root("happy-path");
    let settings = test_settings(&root);
    let harness = Harness::new("15.6.0", vec![idle_job("A", true), idle_job("B", false)]);

    let report = harness.run(&settings).expect("must upgrade");

    assert_eq!(harness.mutations(), vec!["disable:A", "enable:A"]);
    assert!(harness.backup.enabled("A"));
    assert!(!harness.backup.enabled("B"));
    assert_eq!(harness.executor.runs.borrow().len(), 1);
    assert_eq!(report.stage, Stage::Done);
    assert_eq!(report.snapshot.names(), ["A".to_string()]);
    assert_eq!(report.exit_kind(), ExitKind::Success);
    assert_eq!(report.restart, RestartDecision::NotRequested);
    assert!(matches!(
        &report.restoration,
        Restoration::Immediate(restore) if restore.is_complete()
    ));
    assert_eq!(
        harness.service_calls(),
        vec![
            "stop:VeeamBackupSvc",
            "stop:VeeamBrokerSvc",
            "start:VeeamBackupSvc",
            "start:VeeamBrokerSvc",
        ]
    );
    assert!(
        !settings.staging_dir.exists(),
        "staging created by the run must be removed"
    );

    let _ = fs::remove_dir_all(&root);
}

#[test]
fn installer_runs_with_unattended_arguments() {
    let root = test_root("installer-args");
    let settings = test_settings(&root);
    let harness = Harness::new("15.6.0", vec![idle_job("A", true)]);

    harness.run(&settings).expect("must upgrade");

    let runs = harness.executor.runs.borrow();
    let (program, args) = &runs[0];
    assert_eq!(
        program.file_name().and_then(|name| name.to_str()),
        Some("postgresql-15.12-1-windows-x64.exe")
    );
    assert_eq!(
        args.join(" "),
        "--mode unattended --unattendedmodeui none --disable-components stackbuilder"
    );

    let _ = fs::remove_dir_all(&root);
}

#[test]
fn active_workload_aborts_before_anything_changes() {
    let root = test_root("active");
    let settings = test_settings(&root);
    let harness = Harness::new("15.6.0", vec![busy_job("A"), idle_job("B", true)]);

    let err = harness.run(&settings).expect_err("must abort");

    assert_eq!(err.kind, ErrorKind::Conflict);
    assert_eq!(err.exit_code(), 11);
    assert_eq!(err.stage, Stage::WorkloadsSnapshotted);
    assert!(harness.mutations().is_empty());
    assert!(harness.service_calls().is_empty());
    assert_eq!(harness.primary.calls.get(), 0);
    assert_eq!(harness.fallback.calls.get(), 0);

    let _ = fs::remove_dir_all(&root);
}

#[test]
fn running_but_idle_workload_does_not_block() {
    let root = test_root("idle-running");
    let settings = test_settings(&root);
    let continuous = Workload {
        is_running: true,
        is_idle: true,
        ..Workload::new("Cloud", true)
    };
    let harness = Harness::new("15.6.0", vec![continuous]);

    let report = harness.run(&settings).expect("must upgrade");

    assert_eq!(harness.mutations(), vec!["disable:Cloud", "enable:Cloud"]);
    assert_eq!(report.exit_kind(), ExitKind::Success);

    let _ = fs::remove_dir_all(&root);
}

#[test]
fn second_run_after_upgrade_changes_nothing() {
    let root = test_root("idempotent");
    let settings = test_settings(&root);
    let harness = Harness::new("15.6.0", vec![idle_job("A", true)]);
    harness.run(&settings).expect("must upgrade");

    harness.backup.mutations.borrow_mut().clear();
    harness.backup.queries.set(0);
    harness.services.calls.borrow_mut().clear();
    let downloads = harness.primary.calls.get();

    let report = harness.run(&settings).expect("must be a no-op");

    assert!(report.up_to_date);
    assert_eq!(report.exit_kind(), ExitKind::Success);
    assert!(harness.mutations().is_empty());
    assert_eq!(harness.backup.queries.get(), 0);
    assert!(harness.service_calls().is_empty());
    assert_eq!(harness.primary.calls.get(), downloads);
    assert_eq!(harness.executor.runs.borrow().len(), 1);

    let _ = fs::remove_dir_all(&root);
}

#[test]
fn up_to_date_run_needs_no_digest() {
    let root = test_root("no-digest-current");
    let mut settings = test_settings(&root);
    settings.artifact_sha256 = None;
    let harness = Harness::new("15.12.0", vec![idle_job("A", true)]);

    let report = harness.run(&settings).expect("must succeed");

    assert!(report.up_to_date);
    let _ = fs::remove_dir_all(&root);
}

#[test]
fn missing_digest_fails_before_any_change_when_upgrade_is_needed() {
    let root = test_root("no-digest");
    let mut settings = test_settings(&root);
    settings.artifact_sha256 = None;
    let harness = Harness::new("15.6.0", vec![idle_job("A", true)]);

    let err = harness.run(&settings).expect_err("must refuse");

    assert_eq!(err.kind, ErrorKind::Precondition);
    assert!(err.reason.contains("artifact_sha256"));
    assert!(harness.mutations().is_empty());
    assert!(harness.service_calls().is_empty());

    let _ = fs::remove_dir_all(&root);
}

#[test]
fn digest_mismatch_never_runs_installer_and_restores_state() {
    let root = test_root("mismatch");
    let settings = test_settings(&root);
    let mut harness = Harness::new("15.6.0", vec![idle_job("A", true)]);
    harness.primary = FakeTransport::serving("primary", b"tampered bytes");

    let err = harness.run(&settings).expect_err("must abort");

    assert_eq!(err.kind, ErrorKind::Acquisition);
    assert_eq!(err.exit_code(), 12);
    assert!(harness.executor.runs.borrow().is_empty());
    assert!(!settings.staging_dir.exists(), "corrupt artifact must not linger");
    assert!(harness.backup.enabled("A"), "abort must re-enable the snapshot");
    assert!(harness
        .service_calls()
        .contains(&"start:VeeamBackupSvc".to_string()));

    let _ = fs::remove_dir_all(&root);
}

#[test]
fn abort_without_restore_leaves_state_for_the_operator() {
    let root = test_root("no-restore");
    let mut settings = test_settings(&root);
    settings.restore_on_abort = false;
    let mut harness = Harness::new("15.6.0", vec![idle_job("A", true)]);
    harness.primary = FakeTransport::failing("primary");
    harness.fallback = FakeTransport::failing("fallback");

    let err = harness.run(&settings).expect_err("must abort");

    assert_eq!(err.kind, ErrorKind::Acquisition);
    assert!(!harness.backup.enabled("A"));
    assert!(!harness
        .service_calls()
        .iter()
        .any(|call| call.starts_with("start:")));

    let _ = fs::remove_dir_all(&root);
}

#[test]
fn primary_transport_failure_falls_back() {
    let root = test_root("fallback");
    let settings = test_settings(&root);
    let mut harness = Harness::new("15.6.0", vec![idle_job("A", true)]);
    harness.primary = FakeTransport::failing("primary");

    let report = harness.run(&settings).expect("must upgrade via fallback");

    assert_eq!(harness.primary.calls.get(), 1);
    assert_eq!(harness.fallback.calls.get(), 1);
    assert_eq!(report.exit_kind(), ExitKind::Success);

    let _ = fs::remove_dir_all(&root);
}

#[test]
fn workload_that_stays_enabled_aborts_before_services_stop() {
    let root = test_root("still-enabled");
    let settings = test_settings(&root);
    let mut harness = Harness::new("15.6.0", vec![idle_job("A", true), idle_job("B", true)]);
    harness.backup.refuse_disable = BTreeSet::from(["B".to_string()]);

    let err = harness.run(&settings).expect_err("must abort");

    assert_eq!(err.kind, ErrorKind::Conflict);
    assert_eq!(err.exit_code(), 11);
    assert_eq!(err.stage, Stage::WorkloadsDisabled);
    assert!(err.reason.contains('B'));
    assert!(harness.service_calls().is_empty());
    assert_eq!(harness.primary.calls.get(), 0);
    assert_eq!(harness.fallback.calls.get(), 0);
    assert!(harness.executor.runs.borrow().is_empty());
    assert!(harness.backup.enabled("A"), "abort must re-enable the snapshot");
    assert!(harness.backup.enabled("B"));
    assert_eq!(
        harness.mutations(),
        vec!["disable:A", "disable:B", "enable:A", "enable:B"]
    );

    let _ = fs::remove_dir_all(&root);
}

#[test]
fn services_that_refuse_to_stop_abort_before_download() {
    let root = test_root("stubborn");
    let settings = test_settings(&root);
    let mut harness = Harness::new("15.6.0", vec![idle_job("A", true)]);
    harness.services.stubborn = true;

    let err = harness.run(&settings).expect_err("must abort");

    assert_eq!(err.kind, ErrorKind::Conflict);
    assert_eq!(err.stage, Stage::ServicesStopped);
    assert_eq!(harness.primary.calls.get(), 0);
    assert!(harness.backup.enabled("A"));

    let _ = fs::remove_dir_all(&root);
}

#[test]
fn install_failure_still_restores_and_skips_restart() {
    let root = test_root("install-fails");
    let mut settings = test_settings(&root);
    settings.restart = true;
    let mut harness = Harness::new("15.6.0", vec![idle_job("A", true)]);
    harness.executor.exit_code = 1603;

    let report = harness.run(&settings).expect("must report");

    assert_eq!(report.exit_kind(), ExitKind::Install);
    assert_eq!(report.exit_kind().code(), 13);
    assert_eq!(report.restart, RestartDecision::NotOffered);
    assert!(harness.backup.enabled("A"));
    assert!(harness.registrar.tasks.borrow().is_empty());
    assert_eq!(harness.countdown.runs.get(), 0);
    assert_eq!(harness.rebooter.calls.get(), 0);

    let _ = fs::remove_dir_all(&root);
}

#[test]
fn failed_re_enable_is_reported_but_not_fatal() {
    let root = test_root("restore-partial");
    let settings = test_settings(&root);
    let mut harness = Harness::new("15.6.0", vec![idle_job("A", true), idle_job("C", true)]);
    harness.backup.refuse_enable = BTreeSet::from(["C".to_string()]);

    let report = harness.run(&settings).expect("must report");

    assert!(harness.backup.enabled("A"));
    assert!(!harness.backup.enabled("C"));
    assert_eq!(report.exit_kind(), ExitKind::Restoration);
    assert_eq!(report.exit_kind().code(), 14);

    let _ = fs::remove_dir_all(&root);
}

#[test]
fn restart_path_registers_snapshot_and_resume_re_enables_it() {
    let root = test_root("restart");
    let mut settings = test_settings(&root);
    settings.restart = true;
    let harness = Harness::new(
        "15.6.0",
        vec![idle_job("A", true), idle_job("B", false), idle_job("D", true)],
    );

    let report = harness.run(&settings).expect("must upgrade");

    assert_eq!(report.restart, RestartDecision::Rebooting);
    assert_eq!(harness.rebooter.calls.get(), 1);
    let Restoration::Deferred(pending) = &report.restoration else {
        panic!("restoration must be deferred to the continuation");
    };
    assert_eq!(pending.workloads, vec!["A".to_string(), "D".to_string()]);
    assert!(!harness.backup.enabled("A"), "nothing is re-enabled before restart");
    assert!(!harness
        .service_calls()
        .iter()
        .any(|call| call.starts_with("start:")));

    {
        let tasks = harness.registrar.tasks.borrow();
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].name, settings.task_name);
        assert_eq!(tasks[0].program, PathBuf::from("/opt/uplift/bin/uplift"));
        assert_eq!(tasks[0].args[0], "resume");
        assert_eq!(
            tasks[0].args[2],
            settings.record_path().display().to_string()
        );
    }
    assert!(settings.record_path().is_file());

    // Next boot.
    let waited = Cell::new(Duration::ZERO);
    let wait = |duration: Duration| waited.set(duration);
    let outcome = run_resume(
        &settings.record_path(),
        &harness.backup,
        &harness.registrar,
        &wait,
    )
    .expect("must resume");

    assert_eq!(waited.get(), Duration::from_secs(300));
    assert!(outcome.is_complete());
    assert!(harness.backup.enabled("A"));
    assert!(harness.backup.enabled("D"));
    assert!(!harness.backup.enabled("B"));
    assert!(harness.registrar.tasks.borrow().is_empty());
    assert!(!settings.record_path().exists());

    let _ = fs::remove_dir_all(&root);
}

#[test]
fn continuation_task_resumes_with_the_same_config_file() {
    let root = test_root("restart-config");
    let mut settings = test_settings(&root);
    settings.restart = true;
    let config_path = root.join("uplift.toml");
    settings.config_file = Some(config_path.clone());
    let harness = Harness::new("15.6.0", vec![idle_job("A", true)]);

    harness.run(&settings).expect("must upgrade");

    let tasks = harness.registrar.tasks.borrow();
    assert_eq!(tasks.len(), 1);
    let argv = std::iter::once("uplift".to_string()).chain(tasks[0].args.iter().cloned());
    let cli = Cli::try_parse_from(argv).expect("startup task arguments must parse");
    assert_eq!(cli.config, Some(config_path));
    let Commands::Resume { continuation, .. } = cli.command else {
        panic!("expected resume");
    };
    assert_eq!(continuation, settings.record_path());

    let _ = fs::remove_dir_all(&root);
}

#[test]
fn resume_without_record_is_a_no_op() {
    let root = test_root("resume-empty");
    let backup = FakeBackup::default();
    let registrar = FakeRegistrar::default();

    let no_wait = |_: Duration| {};
    let outcome = run_resume(&root.join("continuation.json"), &backup, &registrar, &no_wait)
        .expect("must succeed");

    assert_eq!(outcome, ResumeOutcome::NothingPending);
    assert!(backup.mutations.borrow().is_empty());
}

#[test]
fn cancelled_countdown_clears_continuation_and_restores() {
    let root = test_root("cancel");
    let mut settings = test_settings(&root);
    settings.restart = true;
    let mut harness = Harness::new("15.6.0", vec![idle_job("A", true)]);
    harness.countdown.outcome = CountdownOutcome::Cancelled;

    let report = harness.run(&settings).expect("must report");

    assert_eq!(report.restart, RestartDecision::Cancelled);
    assert_eq!(harness.rebooter.calls.get(), 0);
    assert!(harness.registrar.tasks.borrow().is_empty());
    assert!(!settings.record_path().exists());
    assert!(harness.backup.enabled("A"));
    assert!(harness
        .service_calls()
        .contains(&"start:VeeamBrokerSvc".to_string()));
    assert_eq!(report.exit_kind(), ExitKind::Success);

    let _ = fs::remove_dir_all(&root);
}

#[test]
fn failed_reboot_clears_continuation_and_restores() {
    let root = test_root("reboot-fails");
    let mut settings = test_settings(&root);
    settings.restart = true;
    let mut harness = Harness::new("15.6.0", vec![idle_job("A", true)]);
    harness.rebooter.fail = true;

    let report = harness.run(&settings).expect("must report");

    assert!(matches!(report.restart, RestartDecision::Failed(_)));
    assert_eq!(report.exit_kind(), ExitKind::RestartFailed);
    assert_eq!(report.exit_kind().code(), 15);
    assert!(harness.registrar.tasks.borrow().is_empty());
    assert!(harness.backup.enabled("A"));

    let _ = fs::remove_dir_all(&root);
}

#[test]
fn registration_failure_restores_instead_of_rebooting() {
    let root = test_root("register-fails");
    let mut settings = test_settings(&root);
    settings.restart = true;
    let mut harness = Harness::new("15.6.0", vec![idle_job("A", true)]);
    harness.registrar.refuse = true;

    let report = harness.run(&settings).expect("must report");

    assert!(matches!(report.restart, RestartDecision::Failed(_)));
    assert_eq!(report.exit_kind(), ExitKind::RestartFailed);
    assert_eq!(harness.rebooter.calls.get(), 0);
    assert!(harness.backup.enabled("A"));
    assert!(!settings.record_path().exists());

    let _ = fs::remove_dir_all(&root);
}

#[test]
fn pending_continuation_blocks_a_new_upgrade() {
    let root = test_root("pending");
    let settings = test_settings(&root);
    let harness = Harness::new("15.6.0", vec![idle_job("A", false)]);
    fs::create_dir_all(&settings.state_dir).expect("must create state dir");
    fs::write(
        settings.record_path(),
        r#"{"version":1,"task_name":"uplift-continuation","workloads":["A"],"log_path":"uplift.log","grace_secs":300,"target_version":"15.12.0","created_at_unix":1740801600}"#,
    )
    .expect("must write record");

    let err = harness.run(&settings).expect_err("must refuse");

    assert_eq!(err.kind, ErrorKind::Precondition);
    assert_eq!(err.stage, Stage::PathValidated);
    assert!(err.reason.contains("still pending"));
    assert!(harness.mutations().is_empty());

    let _ = fs::remove_dir_all(&root);
}

#[test]
fn unelevated_run_is_a_precondition_failure() {
    let root = test_root("unelevated");
    let settings = test_settings(&root);
    let mut harness = Harness::new("15.6.0", vec![idle_job("A", true)]);
    harness.privileges = FakePrivileges(false);

    let err = harness.run(&settings).expect_err("must refuse");

    assert_eq!(err.exit_code(), 10);
    assert_eq!(harness.backup.queries.get(), 0);

    let _ = fs::remove_dir_all(&root);
}

#[test]
fn missing_install_path_is_a_precondition_failure() {
    let root = test_root("no-install");
    let mut settings = test_settings(&root);
    settings.install_path = root.join("does-not-exist");
    let harness = Harness::new("15.6.0", vec![idle_job("A", true)]);

    let err = harness.run(&settings).expect_err("must refuse");

    assert_eq!(err.kind, ErrorKind::Precondition);
    assert_eq!(err.stage, Stage::PathValidated);

    let _ = fs::remove_dir_all(&root);
}

#[test]
fn empty_snapshot_follows_configured_policy() {
    let root = test_root("empty");
    let mut settings = test_settings(&root);
    let harness = Harness::new("15.6.0", vec![idle_job("B", false)]);

    settings.empty_workloads = EmptyWorkloadPolicy::Abort;
    let err = harness.run(&settings).expect_err("must abort");
    assert_eq!(err.kind, ErrorKind::Precondition);
    assert!(harness.service_calls().is_empty());

    settings.empty_workloads = EmptyWorkloadPolicy::Proceed;
    let report = harness.run(&settings).expect("must upgrade");
    assert!(harness.mutations().is_empty());
    assert_eq!(report.restoration, Restoration::NotNeeded);
    assert_eq!(harness.executor.runs.borrow().len(), 1);
    assert!(harness
        .service_calls()
        .contains(&"start:VeeamBackupSvc".to_string()));

    let _ = fs::remove_dir_all(&root);
}

#[test]
fn dry_run_reports_plan_without_mutation() {
    let root = test_root("dry-run");
    let settings = test_settings(&root);
    let harness = Harness::new("15.6.0", vec![idle_job("A", true), idle_job("B", false)]);

    let report = Orchestrator::new(&settings, harness.deps(), "/opt/uplift/bin/uplift", now())
        .run(true)
        .expect("must plan");

    assert!(report.dry_run);
    assert_eq!(report.snapshot.names(), ["A".to_string()]);
    assert_eq!(
        report.services_to_stop,
        vec!["VeeamBackupSvc".to_string(), "VeeamBrokerSvc".to_string()]
    );
    assert!(harness.mutations().is_empty());
    assert!(harness.service_calls().is_empty());
    assert_eq!(harness.primary.calls.get(), 0);

    let lines = format_report_lines(&report, OutputStyle::Plain);
    assert_eq!(lines[0], "upgrade 15.6.0 -> 15.12.0");
    assert_eq!(lines[1], "workloads to pause: A");

    let _ = fs::remove_dir_all(&root);
}

#[test]
fn file_config_parses_nested_retry_table() {
    let config = FileConfig::parse(
        r#"
target_version = "15.13"
empty_workloads = "abort"
kill_patterns = ["Veeam*", "pg_ctl*"]

[retry]
timeout_secs = 120
settle_secs = 2
"#,
    )
    .expect("must parse config");

    assert_eq!(config.target_version.as_deref(), Some("15.13"));
    assert_eq!(config.empty_workloads, Some(EmptyWorkloadPolicy::Abort));
    assert_eq!(config.retry.timeout_secs, Some(120));

    let settings = Settings::resolve(&SettingsArgs::default(), config).expect("must resolve");
    assert_eq!(settings.target.to_string(), "15.13.0");
    assert_eq!(settings.retry.timeout, Duration::from_secs(120));
    assert_eq!(settings.retry.settle, Duration::from_secs(2));
    assert_eq!(settings.retry.initial_delay, Duration::from_millis(500));
    assert_eq!(settings.kill_patterns.len(), 2);
}

#[test]
fn file_config_rejects_unknown_keys() {
    let err = FileConfig::parse("restrat = true\n").expect_err("must reject typo");
    assert!(format!("{err:#}").contains("restrat"));
}

#[test]
fn flags_override_file_config() {
    let file = FileConfig {
        target_version: Some("15.10".to_string()),
        restart: Some(true),
        ..FileConfig::default()
    };
    let args = SettingsArgs {
        target_version: Some("15.12.1".to_string()),
        restart: Some(false),
        ..SettingsArgs::default()
    };

    let settings = Settings::resolve(&args, file).expect("must resolve");

    assert_eq!(settings.target.to_string(), "15.12.1");
    assert!(!settings.restart);
    assert!(settings.skip_unused);
    assert!(settings.restore_on_abort);
    assert_eq!(
        settings
            .record_path()
            .file_name()
            .and_then(|name| name.to_str()),
        Some("continuation.json")
    );
}

#[test]
fn invalid_target_version_is_rejected() {
    let args = SettingsArgs {
        target_version: Some("latest".to_string()),
        ..SettingsArgs::default()
    };
    let err = Settings::resolve(&args, FileConfig::default()).expect_err("must reject");
    assert!(format!("{err:#}").contains("invalid target version"));
}

#[test]
fn relative_version_binary_resolves_under_install_path() {
    let args = SettingsArgs {
        install_path: Some(PathBuf::from("/srv/pg")),
        ..SettingsArgs::default()
    };
    let file = FileConfig {
        version_binary: Some(PathBuf::from("bin/pg_ctl")),
        ..FileConfig::default()
    };
    let settings = Settings::resolve(&args, file).expect("must resolve");
    assert_eq!(settings.version_binary, PathBuf::from("/srv/pg/bin/pg_ctl"));
}

#[test]
fn cli_definition_is_consistent() {
    Cli::command().debug_assert();
}

#[test]
fn upgrade_flags_parse_boolish_values() {
    let cli = Cli::try_parse_from([
        "uplift",
        "upgrade",
        "--restart",
        "--skip-unused",
        "off",
        "--target-version",
        "15.12",
        "--dry-run",
    ])
    .expect("must parse");

    let Commands::Upgrade { settings, dry_run } = cli.command else {
        panic!("expected upgrade");
    };
    assert!(dry_run);
    assert_eq!(settings.restart, Some(true));
    assert_eq!(settings.skip_unused, Some(false));
    assert_eq!(settings.target_version.as_deref(), Some("15.12"));
}

#[test]
fn resume_requires_explicit_paths() {
    assert!(Cli::try_parse_from(["uplift", "resume"]).is_err());

    let cli = Cli::try_parse_from([
        "uplift",
        "resume",
        "--continuation",
        "/var/lib/uplift/continuation.json",
        "--log-file",
        "/var/log/uplift.log",
    ])
    .expect("must parse");
    let Commands::Resume {
        continuation,
        log_file,
    } = cli.command
    else {
        panic!("expected resume");
    };
    assert_eq!(continuation, PathBuf::from("/var/lib/uplift/continuation.json"));
    assert_eq!(log_file, PathBuf::from("/var/log/uplift.log"));
}

#[test]
fn completions_are_generated_for_uplift() {
    let mut output = Vec::new();
    write_completions(Shell::Bash, &mut output).expect("must write completions");
    let script = String::from_utf8(output).expect("must be utf-8");
    assert!(script.contains("uplift"));
    assert!(script.contains("cancel-continuation"));
}

#[test]
fn render_status_line_plain_is_unadorned() {
    assert_eq!(
        render_status_line(OutputStyle::Plain, "ok", "upgraded 15.6.0 -> 15.12.0"),
        "upgraded 15.6.0 -> 15.12.0"
    );
}

#[test]
fn render_status_line_rich_includes_badge() {
    let line = render_status_line(
        OutputStyle::Rich,
        "warn",
        "services not started: VeeamBackupSvc",
    );
    assert!(line.contains("[WARN]"));
    assert!(line.ends_with(" services not started: VeeamBackupSvc"));
}

#[test]
fn workflow_errors_map_to_distinct_exit_codes() {
    let cases = [
        (WorkflowError::precondition(Stage::PrivilegeCheck, "x"), 10),
        (WorkflowError::conflict(Stage::ServicesStopped, "x"), 11),
        (WorkflowError::acquisition(Stage::ArtifactVerified, "x"), 12),
        (WorkflowError::internal(Stage::Init, &anyhow!("x")), 1),
    ];
    for (err, code) in cases {
        assert_eq!(err.exit_code(), code);
    }
    assert_eq!(
        WorkflowError::conflict(Stage::WorkloadsSnapshotted, "workloads are running: A")
            .to_string(),
        "external state conflict during workload snapshot: workloads are running: A"
    );
}
