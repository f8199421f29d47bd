use std::ffi::OsString;
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::Path;
use std::process::Command;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use indicatif::{ProgressBar, ProgressStyle};
use uplift_system::run_command;

pub trait Transport {
    fn name(&self) -> &str;
    fn fetch(&self, url: &str, destination: &Path) -> Result<()>;
}

#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    show_progress: bool,
    connect_timeout: Duration,
}

impl ReqwestTransport {
    pub fn new(show_progress: bool) -> Self {
        Self {
            show_progress,
            connect_timeout: Duration::from_secs(30),
        }
    }
}

impl Transport for ReqwestTransport {
    fn name(&self) -> &str {
        "http"
    }

    fn fetch(&self, url: &str, destination: &Path) -> Result<()> {
        let client = reqwest::blocking::Client::builder()
            .user_agent(concat!("uplift/", env!("CARGO_PKG_VERSION")))
            .connect_timeout(self.connect_timeout)
            .timeout(None)
            .build()
            .context("failed to build HTTP client")?;
        let response = client
            .get(url)
            .send()
            .with_context(|| format!("request failed: {url}"))?
            .error_for_status()
            .with_context(|| format!("server rejected download: {url}"))?;

        let progress = if self.show_progress {
            let bar = ProgressBar::new(response.content_length().unwrap_or(0));
            if let Ok(style) = ProgressStyle::with_template(
                "{msg:<10} [{bar:30.cyan/blue}] {bytes}/{total_bytes} {elapsed_precise}",
            ) {
                bar.set_style(style.progress_chars("=>-"));
            }
            bar.set_message("download");
            bar
        } else {
            ProgressBar::hidden()
        };

        let file = File::create(destination)
            .with_context(|| format!("failed to create {}", destination.display()))?;
        let mut writer = BufWriter::new(file);
        let mut reader = progress.wrap_read(response);
        io::copy(&mut reader, &mut writer)
            .with_context(|| format!("failed to write download to {}", destination.display()))?;
        writer
            .flush()
            .with_context(|| format!("failed to flush {}", destination.display()))?;
        progress.finish_and_clear();
        Ok(())
    }
}

/// Shells out to the platform downloader: `Invoke-WebRequest` on Windows, curl then wget elsewhere.
#[derive(Debug, Default, Clone, Copy)]
pub struct CommandTransport;

impl Transport for CommandTransport {
    fn name(&self) -> &str {
        if cfg!(windows) {
            "powershell"
        } else {
            "curl"
        }
    }

    fn fetch(&self, url: &str, destination: &Path) -> Result<()> {
        if cfg!(windows) {
            return run_command(
                &mut build_powershell_download_command(url, destination),
                "powershell download failed",
            );
        }
        run_command(
            &mut build_curl_download_command(url, destination),
            "curl download failed",
        )
        .or_else(|curl_err| {
            run_command(
                &mut build_wget_download_command(url, destination),
                "wget download failed",
            )
            .map_err(|wget_err| anyhow!("{curl_err:#}; {wget_err:#}"))
        })
    }
}

pub(crate) fn build_curl_download_command(url: &str, out_path: &Path) -> Command {
    let mut command = Command::new("curl");
    command
        .arg("-fL")
        .arg("--retry")
        .arg("2")
        .arg("-o")
        .arg(out_path)
        .arg(url);
    command
}

pub(crate) fn build_wget_download_command(url: &str, out_path: &Path) -> Command {
    let mut command = Command::new("wget");
    command.arg("-O").arg(out_path).arg(url);
    command
}

pub(crate) fn build_powershell_download_command(url: &str, out_path: &Path) -> Command {
    let mut command = Command::new("powershell");
    command.arg("-NoProfile").arg("-Command").arg(format!(
        "$ProgressPreference = 'SilentlyContinue'; Invoke-WebRequest -UseBasicParsing -Uri '{}' -OutFile '{}'",
        escape_ps_single_quote(url),
        escape_ps_single_quote_path(out_path)
    ));
    command
}

fn escape_ps_single_quote(value: &str) -> String {
    value.replace('\'', "''")
}

fn escape_ps_single_quote_path(path: &Path) -> String {
    let mut os = OsString::new();
    os.push(path.as_os_str());
    os.to_string_lossy().replace('\'', "''")
}
