use std::fs;
use std::io::{self, Write};
use std::path::Path;
use std::thread;

use anyhow::{Context, Result};
use chrono::Utc;
use clap::CommandFactory;
use clap_complete::Shell;
use tracing::{error, info, warn};
use uplift_installer::{
    BinaryVersionInspector, CommandTransport, ProcessExecutor, ReqwestTransport, VersionProbe,
};
use uplift_system::{
    os_task_registrar, ContinuationScheduler, OsPrivileges, OsRebooter, SysinfoProcessControl,
    SystemServiceManager,
};
use uplift_workloads::PowerShellBackupApi;

use crate::cli::{Cli, Commands, SettingsArgs};
use crate::config::{FileConfig, Settings};
use crate::context::Stage;
use crate::continuation::run_resume;
use crate::countdown::TerminalCountdown;
use crate::error::{ExitKind, WorkflowError};
use crate::logging::init_logging;
use crate::render::{
    current_output_style, exit_status_label, format_error_line, format_pending_line,
    format_report_lines, format_resume_lines, render_status_line, OutputStyle,
};
use crate::workflow::{Collaborators, Orchestrator};

pub fn run_cli(cli: Cli) -> i32 {
    let style = current_output_style();
    let config = cli.config.as_deref();
    match cli.command {
        Commands::Upgrade { settings, dry_run } => run_upgrade(config, &settings, dry_run, style),
        Commands::Status { settings } => run_status(config, &settings, style),
        Commands::Resume {
            continuation,
            log_file,
        } => run_resume_command(config, &continuation, &log_file, style),
        Commands::CancelContinuation { settings } => run_cancel(config, &settings, style),
        Commands::Completions { shell } => match write_completions(shell, &mut io::stdout()) {
            Ok(()) => ExitKind::Success.code(),
            Err(err) => {
                eprintln!("{err:#}");
                ExitKind::Internal.code()
            }
        },
    }
}

fn load_settings(config: Option<&Path>, args: &SettingsArgs) -> Result<Settings> {
    let file = FileConfig::load(config)?;
    let mut settings = Settings::resolve(args, file)?;
    if let Some(path) = config {
        let absolute = fs::canonicalize(path)
            .with_context(|| format!("failed to resolve config file: {}", path.display()))?;
        settings.config_file = Some(absolute);
    }
    Ok(settings)
}

/// Falls back to stderr only when the log file cannot be opened, e.g. without root.
fn start_logging(log_file: &Path) {
    if let Err(file_err) = init_logging(Some(log_file)) {
        if init_logging(None).is_ok() {
            warn!("logging to stderr only: {file_err:#}");
        }
    }
}

fn resolve_or_report(
    config: Option<&Path>,
    args: &SettingsArgs,
    style: OutputStyle,
) -> Result<Settings, i32> {
    match load_settings(config, args) {
        Ok(settings) => {
            start_logging(&settings.log_file);
            Ok(settings)
        }
        Err(err) => {
            let _ = init_logging(None);
            let failure = WorkflowError::precondition(Stage::Init, format!("{err:#}"));
            error!("{failure}");
            println!("{}", format_error_line(&failure, style));
            Err(failure.exit_code())
        }
    }
}

fn run_upgrade(
    config: Option<&Path>,
    args: &SettingsArgs,
    dry_run: bool,
    style: OutputStyle,
) -> i32 {
    let settings = match resolve_or_report(config, args, style) {
        Ok(settings) => settings,
        Err(code) => return code,
    };
    let program = match std::env::current_exe().context("failed to locate the uplift executable")
    {
        Ok(program) => program,
        Err(err) => {
            let failure = WorkflowError::internal(Stage::Init, &err);
            error!("{failure}");
            println!("{}", format_error_line(&failure, style));
            return failure.exit_code();
        }
    };

    let backup = PowerShellBackupApi::new(settings.powershell.clone());
    let services = SystemServiceManager::new(settings.powershell.clone());
    let primary_transport = ReqwestTransport::new(style == OutputStyle::Rich);
    let registrar = os_task_registrar();
    let deps = Collaborators {
        privileges: &OsPrivileges,
        versions: &BinaryVersionInspector,
        backup: &backup,
        services: &services,
        processes: &SysinfoProcessControl,
        primary_transport: &primary_transport,
        fallback_transport: &CommandTransport,
        executor: &ProcessExecutor,
        registrar: registrar.as_ref(),
        countdown: &TerminalCountdown,
        rebooter: &OsRebooter,
    };

    info!(
        "uplift {} starting{}",
        env!("CARGO_PKG_VERSION"),
        if dry_run { " (dry run)" } else { "" }
    );
    match Orchestrator::new(&settings, deps, program, Utc::now()).run(dry_run) {
        Ok(report) => {
            for line in format_report_lines(&report, style) {
                println!("{line}");
            }
            let kind = report.exit_kind();
            if kind != ExitKind::Success {
                let message = format!("finished with exit code {}", kind.code());
                warn!("{message}");
                println!(
                    "{}",
                    render_status_line(style, exit_status_label(kind), &message)
                );
            } else {
                info!("finished at stage '{}'", report.stage);
            }
            kind.code()
        }
        Err(failure) => {
            println!("{}", format_error_line(&failure, style));
            failure.exit_code()
        }
    }
}

fn run_status(config: Option<&Path>, args: &SettingsArgs, style: OutputStyle) -> i32 {
    let settings = match load_settings(config, args) {
        Ok(settings) => settings,
        Err(err) => {
            let failure = WorkflowError::precondition(Stage::Init, format!("{err:#}"));
            println!("{}", format_error_line(&failure, style));
            return failure.exit_code();
        }
    };

    let mut code = ExitKind::Success.code();
    match BinaryVersionInspector.current_version(&settings.version_binary) {
        Ok(installed) => {
            let status = if settings.target.is_met_by(&installed) {
                ("ok", "up to date")
            } else {
                ("warn", "upgrade needed")
            };
            println!(
                "{}",
                render_status_line(
                    style,
                    status.0,
                    &format!("installed {installed}, target {}: {}", settings.target, status.1),
                )
            );
        }
        Err(err) => {
            println!("{}", render_status_line(style, "error", &err.to_string()));
            code = ExitKind::Precondition.code();
        }
    }

    let registrar = os_task_registrar();
    let scheduler =
        ContinuationScheduler::new(registrar.as_ref(), settings.record_path(), &settings.task_name);
    match scheduler.pending() {
        Ok(pending) => println!("{}", format_pending_line(pending.as_ref(), style)),
        Err(err) => {
            println!("{}", render_status_line(style, "error", &format!("{err:#}")));
            code = ExitKind::Precondition.code();
        }
    }
    code
}

fn run_resume_command(
    config: Option<&Path>,
    record_path: &Path,
    log_file: &Path,
    style: OutputStyle,
) -> i32 {
    start_logging(log_file);
    let powershell = match load_settings(config, &SettingsArgs::default()) {
        Ok(settings) => settings.powershell,
        Err(err) => {
            warn!("ignoring configuration: {err:#}");
            uplift_workloads::DEFAULT_POWERSHELL.to_string()
        }
    };

    let backup = PowerShellBackupApi::new(powershell);
    let registrar = os_task_registrar();
    let wait = |duration| thread::sleep(duration);
    match run_resume(record_path, &backup, registrar.as_ref(), &wait) {
        Ok(outcome) => {
            for line in format_resume_lines(&outcome, style) {
                println!("{line}");
            }
            if outcome.is_complete() {
                ExitKind::Success.code()
            } else {
                ExitKind::Restoration.code()
            }
        }
        Err(err) => {
            error!("resume failed: {err:#}");
            ExitKind::Internal.code()
        }
    }
}

fn run_cancel(config: Option<&Path>, args: &SettingsArgs, style: OutputStyle) -> i32 {
    let settings = match resolve_or_report(config, args, style) {
        Ok(settings) => settings,
        Err(code) => return code,
    };
    let registrar = os_task_registrar();
    let scheduler =
        ContinuationScheduler::new(registrar.as_ref(), settings.record_path(), &settings.task_name);
    let pending = scheduler.pending().ok().flatten();
    match scheduler.clear() {
        Ok(true) => {
            let names = pending
                .map(|pending| pending.workloads.join(", "))
                .unwrap_or_default();
            warn!("continuation cancelled; workloads left disabled: {names}");
            println!(
                "{}",
                render_status_line(
                    style,
                    "ok",
                    &format!("continuation removed; re-enable manually if needed: {names}"),
                )
            );
            ExitKind::Success.code()
        }
        Ok(false) => {
            println!("{}", format_pending_line(None, style));
            ExitKind::Success.code()
        }
        Err(err) => {
            error!("{err:#}");
            println!("{}", render_status_line(style, "error", &format!("{err:#}")));
            ExitKind::Internal.code()
        }
    }
}

pub(crate) fn write_completions<W: Write>(shell: Shell, writer: &mut W) -> Result<()> {
    let mut command = Cli::command();
    let mut generated = Vec::new();
    clap_complete::generate(shell, &mut command, "uplift", &mut generated);
    writer
        .write_all(&generated)
        .context("failed writing generated completion script")
}
