use std::path::PathBuf;

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};

pub const CONTINUATION_FORMAT_VERSION: u32 = 1;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PendingContinuation {
    pub version: u32,
    pub task_name: String,
    pub workloads: Vec<String>,
    pub log_path: PathBuf,
    pub grace_secs: u64,
    pub target_version: String,
    pub created_at_unix: u64,
}

impl PendingContinuation {
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).context("failed to serialize continuation record")
    }

    pub fn from_json(raw: &str) -> Result<Self> {
        let record: Self =
            serde_json::from_str(raw).context("failed to parse continuation record")?;
        if record.version != CONTINUATION_FORMAT_VERSION {
            return Err(anyhow!(
                "unsupported continuation record version {} (expected {})",
                record.version,
                CONTINUATION_FORMAT_VERSION
            ));
        }
        if record.task_name.trim().is_empty() {
            return Err(anyhow!("continuation record has an empty task name"));
        }
        Ok(record)
    }
}
