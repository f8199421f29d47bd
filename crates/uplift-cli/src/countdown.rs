use std::io::{self, IsTerminal};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use crossterm::event::{self, Event, KeyEventKind};
use crossterm::terminal::{disable_raw_mode, enable_raw_mode};
use indicatif::{ProgressBar, ProgressStyle};
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CountdownOutcome {
    Proceed,
    Cancelled,
}

pub trait RestartCountdown {
    fn run(&self, seconds: u64) -> Result<CountdownOutcome>;
}

/// Counts down on the terminal; any key press cancels. Without a terminal it just waits.
#[derive(Debug, Default, Clone, Copy)]
pub struct TerminalCountdown;

impl RestartCountdown for TerminalCountdown {
    fn run(&self, seconds: u64) -> Result<CountdownOutcome> {
        if seconds == 0 {
            return Ok(CountdownOutcome::Proceed);
        }
        if !io::stdin().is_terminal() {
            info!("restarting in {seconds}s (no terminal attached, countdown cannot be cancelled)");
            thread::sleep(Duration::from_secs(seconds));
            return Ok(CountdownOutcome::Proceed);
        }

        let progress = ProgressBar::new(seconds);
        if let Ok(style) = ProgressStyle::with_template(
            "{msg} [{bar:20.yellow/red}] press any key to cancel",
        ) {
            progress.set_style(style.progress_chars("=>-"));
        }

        let outcome = {
            let _raw = RawModeGuard::enable()?;
            wait_for_key(seconds, &progress)?
        };
        progress.finish_and_clear();
        Ok(outcome)
    }
}

fn wait_for_key(seconds: u64, progress: &ProgressBar) -> Result<CountdownOutcome> {
    let deadline = Instant::now() + Duration::from_secs(seconds);
    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return Ok(CountdownOutcome::Proceed);
        }
        progress.set_position(seconds.saturating_sub(remaining.as_secs()));
        progress.set_message(format!("restarting in {:>2}s", remaining.as_secs() + 1));

        if event::poll(remaining.min(Duration::from_millis(250)))
            .context("failed to poll terminal events")?
        {
            if let Event::Key(key) = event::read().context("failed to read terminal event")? {
                if key.kind == KeyEventKind::Press {
                    return Ok(CountdownOutcome::Cancelled);
                }
            }
        }
    }
}

struct RawModeGuard;

impl RawModeGuard {
    fn enable() -> Result<Self> {
        enable_raw_mode().context("failed to switch terminal to raw mode")?;
        Ok(Self)
    }
}

impl Drop for RawModeGuard {
    fn drop(&mut self) {
        if let Err(err) = disable_raw_mode() {
            warn!("failed to restore terminal mode: {err}");
        }
    }
}
