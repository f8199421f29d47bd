use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StagingLayout {
    root: PathBuf,
}

impl StagingLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn artifact_path(&self, file_name: &str) -> PathBuf {
        self.root.join(file_name)
    }

    /// Creates the staging root; returns whether this call created it.
    pub fn ensure(&self) -> Result<bool> {
        if self.root.is_dir() {
            return Ok(false);
        }
        fs::create_dir_all(&self.root)
            .with_context(|| format!("failed to create staging dir: {}", self.root.display()))?;
        Ok(true)
    }

    /// Removes the staging root, but only when this run created it.
    pub fn cleanup(&self, created_by_run: bool) -> Result<()> {
        if !created_by_run || !self.root.exists() {
            return Ok(());
        }
        fs::remove_dir_all(&self.root)
            .with_context(|| format!("failed to remove staging dir: {}", self.root.display()))
    }
}

pub fn default_staging_root() -> PathBuf {
    std::env::temp_dir().join("uplift-staging")
}
