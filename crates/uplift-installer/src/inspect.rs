use std::path::{Path, PathBuf};
use std::process::Command;

use thiserror::Error;
use uplift_core::InstalledVersion;

#[derive(Debug, Error)]
pub enum VersionError {
    #[error("version binary not found: {}", .0.display())]
    NotFound(PathBuf),
    #[error("could not read version from {}: {reason}", .path.display())]
    Unreadable { path: PathBuf, reason: String },
}

pub trait VersionProbe {
    fn current_version(&self, binary: &Path) -> Result<InstalledVersion, VersionError>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct BinaryVersionInspector;

impl VersionProbe for BinaryVersionInspector {
    fn current_version(&self, binary: &Path) -> Result<InstalledVersion, VersionError> {
        if !binary.is_file() {
            return Err(VersionError::NotFound(binary.to_path_buf()));
        }
        let output = Command::new(binary)
            .arg("--version")
            .output()
            .map_err(|err| VersionError::Unreadable {
                path: binary.to_path_buf(),
                reason: format!("failed to start: {err}"),
            })?;
        if !output.status.success() {
            return Err(VersionError::Unreadable {
                path: binary.to_path_buf(),
                reason: format!("status={}", output.status),
            });
        }
        let banner = String::from_utf8_lossy(&output.stdout);
        InstalledVersion::parse(&banner).map_err(|err| VersionError::Unreadable {
            path: binary.to_path_buf(),
            reason: err.to_string(),
        })
    }
}

pub fn default_version_binary(install_path: &Path) -> PathBuf {
    let name = if cfg!(windows) { "postgres.exe" } else { "postgres" };
    install_path.join("bin").join(name)
}
