mod acquire;
mod fs_utils;
mod inspect;
mod layout;
mod runner;
mod transport;

pub use acquire::{AcquireError, ArtifactAcquirer, VerifiedArtifact};
pub use fs_utils::remove_file_if_exists;
pub use inspect::{default_version_binary, BinaryVersionInspector, VersionError, VersionProbe};
pub use layout::{default_staging_root, StagingLayout};
pub use runner::{
    InstallExecutor, InstallOutcome, InstallRunner, ProcessExecutor, DEFAULT_INSTALLER_ARGS,
};
pub use transport::{CommandTransport, ReqwestTransport, Transport};
