use std::path::PathBuf;

use clap::builder::BoolishValueParser;
use clap::{Args, Parser, Subcommand};
use clap_complete::Shell;

#[derive(Parser, Debug)]
#[command(name = "uplift", version)]
#[command(
    about = "Unattended in-place PostgreSQL upgrade for backup servers",
    long_about = None
)]
pub struct Cli {
    /// TOML configuration file; flags and environment variables override its keys.
    #[arg(long, global = true, env = "UPLIFT_CONFIG")]
    pub config: Option<PathBuf>,
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Pause backup jobs, stop services, install the target release and restore everything.
    Upgrade {
        #[command(flatten)]
        settings: SettingsArgs,
        /// Report the plan after the workload snapshot without changing anything.
        #[arg(long)]
        dry_run: bool,
    },
    /// Show installed and target versions and any pending continuation.
    Status {
        #[command(flatten)]
        settings: SettingsArgs,
    },
    /// Re-enable the workloads recorded before a restart. Registered as a startup task.
    #[command(hide = true)]
    Resume {
        #[arg(long)]
        continuation: PathBuf,
        #[arg(long)]
        log_file: PathBuf,
    },
    /// Drop a pending continuation without re-enabling anything.
    CancelContinuation {
        #[command(flatten)]
        settings: SettingsArgs,
    },
    /// Print a shell completion script.
    Completions {
        #[arg(value_enum)]
        shell: Shell,
    },
}

#[derive(Args, Debug, Clone, Default)]
pub struct SettingsArgs {
    #[arg(long, env = "UPLIFT_INSTALL_PATH")]
    pub install_path: Option<PathBuf>,
    #[arg(long, env = "UPLIFT_TARGET_VERSION")]
    pub target_version: Option<String>,
    #[arg(long, env = "UPLIFT_ARTIFACT_URL")]
    pub artifact_url: Option<String>,
    #[arg(long, env = "UPLIFT_ARTIFACT_SHA256")]
    pub artifact_sha256: Option<String>,
    /// Restart the machine after a successful install.
    #[arg(
        long,
        env = "UPLIFT_RESTART",
        num_args = 0..=1,
        default_missing_value = "true",
        value_parser = BoolishValueParser::new()
    )]
    pub restart: Option<bool>,
    /// Only pause jobs that produced a restore point recently.
    #[arg(
        long,
        env = "UPLIFT_SKIP_UNUSED",
        num_args = 0..=1,
        default_missing_value = "true",
        value_parser = BoolishValueParser::new()
    )]
    pub skip_unused: Option<bool>,
    #[arg(long, env = "UPLIFT_LOG_FILE")]
    pub log_file: Option<PathBuf>,
}
