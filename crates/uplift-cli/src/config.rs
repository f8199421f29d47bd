use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use serde::Deserialize;
use uplift_core::{ArtifactSpec, TargetVersion};
use uplift_installer::{default_staging_root, default_version_binary, DEFAULT_INSTALLER_ARGS};
use uplift_system::{NamePattern, RetryPolicy, DEFAULT_GRACE_SECS, DEFAULT_TASK_NAME};
use uplift_workloads::{CandidatePolicy, DEFAULT_POWERSHELL, DEFAULT_RECENCY_DAYS};

use crate::cli::SettingsArgs;

pub const DEFAULT_ARTIFACT_URL: &str =
    "https://get.enterprisedb.com/postgresql/postgresql-15.12-1-windows-x64.exe";
pub const DEFAULT_SERVICE_PATTERN: &str = "Veeam*";
pub const DEFAULT_COUNTDOWN_SECS: u64 = 15;
pub const CONTINUATION_RECORD_FILE: &str = "continuation.json";

const DEFAULT_INTERFERING_PATTERNS: &[&str] = &["pgAdmin*", "Veeam.Backup.Shell*"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EmptyWorkloadPolicy {
    Proceed,
    Abort,
}

/// On-disk configuration. Every key is optional; CLI flags and environment win over it.
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct FileConfig {
    pub install_path: Option<PathBuf>,
    pub version_binary: Option<PathBuf>,
    pub target_version: Option<String>,
    pub artifact_url: Option<String>,
    pub artifact_sha256: Option<String>,
    pub restart: Option<bool>,
    pub skip_unused: Option<bool>,
    pub recency_days: Option<u32>,
    pub empty_workloads: Option<EmptyWorkloadPolicy>,
    pub restore_on_abort: Option<bool>,
    pub log_file: Option<PathBuf>,
    pub staging_dir: Option<PathBuf>,
    pub state_dir: Option<PathBuf>,
    pub service_pattern: Option<String>,
    pub kill_patterns: Option<Vec<String>>,
    pub interfering_patterns: Option<Vec<String>>,
    pub installer_args: Option<Vec<String>>,
    pub powershell: Option<String>,
    pub countdown_secs: Option<u64>,
    pub continuation_grace_secs: Option<u64>,
    pub task_name: Option<String>,
    #[serde(default)]
    pub retry: RetryFileConfig,
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct RetryFileConfig {
    pub initial_delay_ms: Option<u64>,
    pub max_delay_ms: Option<u64>,
    pub timeout_secs: Option<u64>,
    pub settle_secs: Option<u64>,
    pub max_attempts: Option<u32>,
}

impl FileConfig {
    pub fn parse(raw: &str) -> Result<Self> {
        toml::from_str(raw).context("failed to parse uplift configuration")
    }

    /// No path means built-in defaults; a path that cannot be read is an error.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        let raw = fs::read_to_string(path)
            .with_context(|| format!("failed to read config file: {}", path.display()))?;
        Self::parse(&raw).with_context(|| format!("invalid config file: {}", path.display()))
    }
}

#[derive(Debug, Clone)]
pub struct Settings {
    pub install_path: PathBuf,
    pub version_binary: PathBuf,
    pub target: TargetVersion,
    pub artifact_url: String,
    pub artifact_sha256: Option<String>,
    pub restart: bool,
    pub skip_unused: bool,
    pub recency_days: u32,
    pub empty_workloads: EmptyWorkloadPolicy,
    pub restore_on_abort: bool,
    pub log_file: PathBuf,
    pub staging_dir: PathBuf,
    pub state_dir: PathBuf,
    pub service_pattern: NamePattern,
    pub kill_patterns: Vec<NamePattern>,
    pub interfering_patterns: Vec<NamePattern>,
    pub installer_args: Vec<String>,
    pub powershell: String,
    pub retry: RetryPolicy,
    pub countdown_secs: u64,
    pub continuation_grace_secs: u64,
    pub task_name: String,
    /// Absolute path of the config file in use, handed on to `resume` after a restart.
    pub config_file: Option<PathBuf>,
}

impl Settings {
    pub fn resolve(args: &SettingsArgs, file: FileConfig) -> Result<Self> {
        let install_path = args
            .install_path
            .clone()
            .or(file.install_path)
            .unwrap_or_else(default_install_path);
        let version_binary = match file.version_binary {
            Some(binary) if binary.is_relative() => install_path.join(binary),
            Some(binary) => binary,
            None => default_version_binary(&install_path),
        };

        let raw_target = args.target_version.clone().or(file.target_version);
        let target = match raw_target {
            Some(raw) => TargetVersion::parse(&raw)
                .with_context(|| format!("invalid target version '{raw}'"))?,
            None => TargetVersion::default(),
        };

        let artifact_sha256 = args
            .artifact_sha256
            .clone()
            .or(file.artifact_sha256)
            .map(|digest| digest.trim().to_string())
            .filter(|digest| !digest.is_empty());

        let service_pattern = NamePattern::new(
            file.service_pattern
                .as_deref()
                .unwrap_or(DEFAULT_SERVICE_PATTERN),
        )
        .context("invalid service_pattern")?;
        let kill_patterns = match file.kill_patterns {
            Some(raw) => compile_patterns(&raw).context("invalid kill_patterns")?,
            None => vec![service_pattern.clone()],
        };
        let interfering_patterns = match file.interfering_patterns {
            Some(raw) => compile_patterns(&raw).context("invalid interfering_patterns")?,
            None => compile_patterns(DEFAULT_INTERFERING_PATTERNS)?,
        };

        let defaults = RetryPolicy::default();
        let retry = RetryPolicy {
            initial_delay: file
                .retry
                .initial_delay_ms
                .map(Duration::from_millis)
                .unwrap_or(defaults.initial_delay),
            max_delay: file
                .retry
                .max_delay_ms
                .map(Duration::from_millis)
                .unwrap_or(defaults.max_delay),
            timeout: file
                .retry
                .timeout_secs
                .map(Duration::from_secs)
                .unwrap_or(defaults.timeout),
            settle: file
                .retry
                .settle_secs
                .map(Duration::from_secs)
                .unwrap_or(defaults.settle),
            max_attempts: file.retry.max_attempts.unwrap_or(defaults.max_attempts),
        };

        let task_name = file
            .task_name
            .unwrap_or_else(|| DEFAULT_TASK_NAME.to_string());
        if task_name.trim().is_empty() {
            return Err(anyhow!("task_name must not be empty"));
        }

        Ok(Self {
            install_path,
            version_binary,
            target,
            artifact_url: args
                .artifact_url
                .clone()
                .or(file.artifact_url)
                .unwrap_or_else(|| DEFAULT_ARTIFACT_URL.to_string()),
            artifact_sha256,
            restart: args.restart.or(file.restart).unwrap_or(false),
            skip_unused: args.skip_unused.or(file.skip_unused).unwrap_or(true),
            recency_days: file.recency_days.unwrap_or(DEFAULT_RECENCY_DAYS),
            empty_workloads: file
                .empty_workloads
                .unwrap_or(EmptyWorkloadPolicy::Proceed),
            restore_on_abort: file.restore_on_abort.unwrap_or(true),
            log_file: args
                .log_file
                .clone()
                .or(file.log_file)
                .unwrap_or_else(default_log_file),
            staging_dir: file.staging_dir.unwrap_or_else(default_staging_root),
            state_dir: file.state_dir.unwrap_or_else(default_state_dir),
            service_pattern,
            kill_patterns,
            interfering_patterns,
            installer_args: file.installer_args.unwrap_or_else(|| {
                DEFAULT_INSTALLER_ARGS
                    .iter()
                    .map(|arg| arg.to_string())
                    .collect()
            }),
            powershell: file
                .powershell
                .unwrap_or_else(|| DEFAULT_POWERSHELL.to_string()),
            retry,
            countdown_secs: file.countdown_secs.unwrap_or(DEFAULT_COUNTDOWN_SECS),
            continuation_grace_secs: file
                .continuation_grace_secs
                .unwrap_or(DEFAULT_GRACE_SECS),
            task_name,
            config_file: None,
        })
    }

    pub fn candidate_policy(&self) -> CandidatePolicy {
        if self.skip_unused {
            CandidatePolicy::recently_active(self.recency_days)
        } else {
            CandidatePolicy::all_enabled()
        }
    }

    pub fn record_path(&self) -> PathBuf {
        self.state_dir.join(CONTINUATION_RECORD_FILE)
    }

    /// The artifact to fetch. The digest has no default, so an upgrade cannot start without one.
    pub fn artifact_spec(&self) -> Result<ArtifactSpec> {
        let sha256 = self.artifact_sha256.as_deref().ok_or_else(|| {
            anyhow!("artifact_sha256 is required (set --artifact-sha256 or UPLIFT_ARTIFACT_SHA256)")
        })?;
        let spec = ArtifactSpec::new(self.artifact_url.clone(), sha256);
        spec.validate()?;
        Ok(spec)
    }
}

fn compile_patterns<S: AsRef<str>>(raw: &[S]) -> Result<Vec<NamePattern>> {
    raw.iter()
        .map(|pattern| NamePattern::new(pattern.as_ref()))
        .collect()
}

fn default_install_path() -> PathBuf {
    if cfg!(windows) {
        PathBuf::from(r"C:\Program Files\PostgreSQL\15")
    } else {
        PathBuf::from("/usr/lib/postgresql/15")
    }
}

// Both must outlive a restart, so never under the temp dir.
fn program_data_dir() -> PathBuf {
    std::env::var_os("ProgramData")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(r"C:\ProgramData"))
        .join("uplift")
}

fn default_log_file() -> PathBuf {
    if cfg!(windows) {
        program_data_dir().join("uplift.log")
    } else {
        PathBuf::from("/var/log/uplift.log")
    }
}

fn default_state_dir() -> PathBuf {
    if cfg!(windows) {
        program_data_dir().join("state")
    } else {
        PathBuf::from("/var/lib/uplift")
    }
}
