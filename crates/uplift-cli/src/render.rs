use std::io::{self, IsTerminal};

use anstyle::{AnsiColor, Effects, Style};
use uplift_core::PendingContinuation;
use uplift_workloads::{RestoreReport, RestoreStatus};

use crate::context::Restoration;
use crate::continuation::ResumeOutcome;
use crate::error::{ExitKind, WorkflowError};
use crate::workflow::{RestartDecision, WorkflowReport};

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum OutputStyle {
    Plain,
    Rich,
}

pub fn current_output_style() -> OutputStyle {
    let no_color = std::env::var_os("NO_COLOR").is_some_and(|value| !value.is_empty());
    if no_color || !io::stdout().is_terminal() {
        OutputStyle::Plain
    } else {
        OutputStyle::Rich
    }
}

pub fn render_status_line(style: OutputStyle, status: &str, message: &str) -> String {
    match style {
        OutputStyle::Plain => message.to_string(),
        OutputStyle::Rich => {
            let badge = format!("[{}]", status.to_ascii_uppercase());
            format!("{} {message}", colorize(status_style(status), &badge))
        }
    }
}

pub fn format_report_lines(report: &WorkflowReport, style: OutputStyle) -> Vec<String> {
    let mut lines = Vec::new();
    let installed = report
        .installed
        .as_ref()
        .map(ToString::to_string)
        .unwrap_or_else(|| "unknown".to_string());

    if report.up_to_date {
        lines.push(render_status_line(
            style,
            "ok",
            &format!("installed {installed} already meets target {}", report.target),
        ));
        return lines;
    }

    if report.dry_run {
        lines.push(render_status_line(
            style,
            "plan",
            &format!("upgrade {installed} -> {}", report.target),
        ));
        lines.push(render_status_line(
            style,
            "plan",
            &format!("workloads to pause: {}", list_or_none(report.snapshot.names())),
        ));
        lines.push(render_status_line(
            style,
            "plan",
            &format!("services to stop: {}", list_or_none(&report.services_to_stop)),
        ));
        return lines;
    }

    if !report.stopped_services.is_empty() {
        lines.push(render_status_line(
            style,
            "info",
            &format!("stopped services: {}", report.stopped_services.join(", ")),
        ));
    }
    if let Some(artifact) = &report.artifact {
        lines.push(render_status_line(
            style,
            "info",
            &format!(
                "verified {} (sha256 {})",
                artifact.path().display(),
                artifact.sha256()
            ),
        ));
    }

    match report.install {
        Some(outcome) if outcome.is_success() => lines.push(render_status_line(
            style,
            "ok",
            &format!("upgraded {installed} -> {}", report.target),
        )),
        Some(outcome) => lines.push(render_status_line(
            style,
            "error",
            &format!("installer exited with code {}", outcome.exit_code),
        )),
        None => {}
    }

    match &report.restoration {
        Restoration::Immediate(restore) => lines.extend(format_restore_lines(restore, style)),
        Restoration::Deferred(pending) => lines.push(render_status_line(
            style,
            "info",
            &format!(
                "{} workload(s) will be re-enabled {}s after restart by '{}'",
                pending.workloads.len(),
                pending.grace_secs,
                pending.task_name
            ),
        )),
        Restoration::NotNeeded => {}
    }

    if !report.services_not_started.is_empty() {
        lines.push(render_status_line(
            style,
            "warn",
            &format!(
                "services not started: {}",
                report.services_not_started.join(", ")
            ),
        ));
    }

    let restart = match &report.restart {
        RestartDecision::NotRequested => None,
        RestartDecision::NotOffered => Some((
            "warn",
            "restart skipped: install did not succeed".to_string(),
        )),
        RestartDecision::Rebooting => Some(("info", "restarting now".to_string())),
        RestartDecision::Cancelled => Some((
            "info",
            "restart cancelled; workloads and services restored".to_string(),
        )),
        RestartDecision::Failed(reason) => {
            Some(("warn", format!("restart not performed: {reason}")))
        }
    };
    if let Some((status, message)) = restart {
        lines.push(render_status_line(style, status, &message));
    }

    for warning in &report.warnings {
        lines.push(render_status_line(style, "warn", warning));
    }
    lines
}

pub fn format_restore_lines(report: &RestoreReport, style: OutputStyle) -> Vec<String> {
    let mut lines = Vec::new();
    let status = if report.is_complete() { "ok" } else { "warn" };
    lines.push(render_status_line(style, status, &report.to_string()));
    for outcome in report.failures() {
        let reason = match &outcome.status {
            RestoreStatus::Failed(reason) => reason.as_str(),
            RestoreStatus::Missing => "workload no longer exists",
            RestoreStatus::Enabled => continue,
        };
        lines.push(render_status_line(
            style,
            "warn",
            &format!("{}: {reason}", outcome.name),
        ));
    }
    lines
}

pub fn format_resume_lines(outcome: &ResumeOutcome, style: OutputStyle) -> Vec<String> {
    match outcome {
        ResumeOutcome::NothingPending => {
            vec![render_status_line(style, "ok", "no continuation pending")]
        }
        ResumeOutcome::Restored { report, cleaned_up } => {
            let mut lines = format_restore_lines(report, style);
            if !cleaned_up {
                lines.push(render_status_line(
                    style,
                    "warn",
                    "startup task could not be removed; run `uplift cancel-continuation`",
                ));
            }
            lines
        }
    }
}

pub fn format_pending_line(pending: Option<&PendingContinuation>, style: OutputStyle) -> String {
    match pending {
        None => render_status_line(style, "ok", "no continuation pending"),
        Some(pending) => render_status_line(
            style,
            "warn",
            &format!(
                "continuation '{}' pending for {}",
                pending.task_name,
                list_or_none(&pending.workloads)
            ),
        ),
    }
}

pub fn format_error_line(error: &WorkflowError, style: OutputStyle) -> String {
    render_status_line(style, "error", &error.to_string())
}

pub fn exit_status_label(kind: ExitKind) -> &'static str {
    match kind {
        ExitKind::Success => "ok",
        ExitKind::Restoration | ExitKind::RestartFailed => "warn",
        _ => "error",
    }
}

fn list_or_none(names: &[String]) -> String {
    if names.is_empty() {
        "none".to_string()
    } else {
        names.join(", ")
    }
}

fn status_style(status: &str) -> Style {
    let color = match status {
        "ok" => AnsiColor::BrightGreen,
        "warn" => AnsiColor::BrightYellow,
        "error" => AnsiColor::BrightRed,
        "plan" => AnsiColor::BrightBlue,
        _ => AnsiColor::BrightCyan,
    };
    Style::new()
        .fg_color(Some(color.into()))
        .effects(Effects::BOLD)
}

fn colorize(style: Style, text: &str) -> String {
    format!("{}{}{}", style.render(), text, style.render_reset())
}
