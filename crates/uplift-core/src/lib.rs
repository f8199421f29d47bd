mod artifact;
mod continuation;
mod version;
mod workload;

pub use artifact::ArtifactSpec;
pub use continuation::{PendingContinuation, CONTINUATION_FORMAT_VERSION};
pub use version::{
    parse_lenient_version, should_upgrade, InstalledVersion, TargetVersion,
    DEFAULT_TARGET_VERSION,
};
pub use workload::{has_active_work, Workload, WorkloadSnapshot};
