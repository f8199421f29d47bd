use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Context;
use thiserror::Error;
use tracing::{info, warn};
use uplift_core::ArtifactSpec;
use uplift_security::{digests_match, sha256_file_hex};

use crate::fs_utils::remove_file_if_exists;
use crate::transport::Transport;

#[derive(Debug, Error)]
pub enum AcquireError {
    #[error("download failed on both transports: {primary}; {fallback}")]
    Download { primary: String, fallback: String },
    #[error("downloaded artifact is missing: {}", .0.display())]
    Missing(PathBuf),
    #[error("sha256 mismatch for {} (expected {expected}, got {actual})", .path.display())]
    DigestMismatch {
        path: PathBuf,
        expected: String,
        actual: String,
    },
    #[error(transparent)]
    Io(#[from] anyhow::Error),
}

/// An installer whose digest was checked during this run. Only the acquirer creates these.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifiedArtifact {
    path: PathBuf,
    sha256: String,
}

impl VerifiedArtifact {
    pub(crate) fn new(path: PathBuf, sha256: String) -> Self {
        Self { path, sha256 }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn sha256(&self) -> &str {
        &self.sha256
    }
}

pub struct ArtifactAcquirer<'a> {
    primary: &'a dyn Transport,
    fallback: &'a dyn Transport,
}

impl<'a> ArtifactAcquirer<'a> {
    pub fn new(primary: &'a dyn Transport, fallback: &'a dyn Transport) -> Self {
        Self { primary, fallback }
    }

    pub fn acquire(
        &self,
        spec: &ArtifactSpec,
        destination: &Path,
    ) -> Result<VerifiedArtifact, AcquireError> {
        // A leftover file from an earlier run is never trusted.
        remove_file_if_exists(destination)
            .with_context(|| format!("failed to remove stale artifact: {}", destination.display()))?;
        let part_path = part_path_for(destination);
        remove_file_if_exists(&part_path)
            .with_context(|| format!("failed to remove stale download: {}", part_path.display()))?;

        if let Err(primary_err) = self.fetch_with(self.primary, &spec.url, &part_path) {
            warn!(
                "{} transport failed, falling back to {}: {primary_err}",
                self.primary.name(),
                self.fallback.name()
            );
            if let Err(fallback_err) = self.fetch_with(self.fallback, &spec.url, &part_path) {
                let _ = remove_file_if_exists(&part_path);
                return Err(AcquireError::Download {
                    primary: primary_err,
                    fallback: fallback_err,
                });
            }
        }

        if !part_path.is_file() {
            return Err(AcquireError::Missing(part_path));
        }
        fs::rename(&part_path, destination).with_context(|| {
            format!(
                "failed to move downloaded artifact into place: {}",
                destination.display()
            )
        })?;
        if !destination.is_file() {
            return Err(AcquireError::Missing(destination.to_path_buf()));
        }

        let actual = sha256_file_hex(destination)?;
        if !digests_match(&actual, &spec.sha256) {
            let _ = remove_file_if_exists(destination);
            return Err(AcquireError::DigestMismatch {
                path: destination.to_path_buf(),
                expected: spec.sha256.trim().to_ascii_lowercase(),
                actual,
            });
        }

        info!(
            "verified installer {} (sha256 {actual})",
            destination.display()
        );
        Ok(VerifiedArtifact::new(destination.to_path_buf(), actual))
    }

    fn fetch_with(
        &self,
        transport: &dyn Transport,
        url: &str,
        part_path: &Path,
    ) -> Result<(), String> {
        info!("downloading {url} via {}", transport.name());
        match transport.fetch(url, part_path) {
            Ok(()) if part_path.is_file() => Ok(()),
            Ok(()) => Err(format!("{} produced no file", transport.name())),
            Err(err) => {
                let _ = remove_file_if_exists(part_path);
                Err(format!("{err:#}"))
            }
        }
    }
}

fn part_path_for(destination: &Path) -> PathBuf {
    let file_name = destination
        .file_name()
        .and_then(|value| value.to_str())
        .unwrap_or("artifact");
    destination.with_file_name(format!("{file_name}.part"))
}
