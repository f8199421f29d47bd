use std::fmt;

use anyhow::{anyhow, Result};
use semver::Version;

pub const DEFAULT_TARGET_VERSION: Version = Version::new(15, 12, 0);

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct InstalledVersion(Version);

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct TargetVersion(Version);

impl InstalledVersion {
    pub fn parse(raw: &str) -> Result<Self> {
        parse_lenient_version(raw).map(Self)
    }

    pub fn as_version(&self) -> &Version {
        &self.0
    }
}

impl TargetVersion {
    pub fn parse(raw: &str) -> Result<Self> {
        parse_lenient_version(raw).map(Self)
    }

    pub fn as_version(&self) -> &Version {
        &self.0
    }

    pub fn is_met_by(&self, installed: &InstalledVersion) -> bool {
        !should_upgrade(installed.as_version(), self.as_version())
    }
}

impl Default for TargetVersion {
    fn default() -> Self {
        Self(DEFAULT_TARGET_VERSION)
    }
}

impl fmt::Display for InstalledVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl fmt::Display for TargetVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Component-wise numeric comparison; equal or newer installs are left alone.
pub fn should_upgrade(current: &Version, target: &Version) -> bool {
    (current.major, current.minor, current.patch) < (target.major, target.minor, target.patch)
}

/// Parses product version strings that are not strict semver.
///
/// Accepts `15.6`, `9.6.24`, four-part file versions such as `15.6.0.24052` and tool banners
/// like `postgres (PostgreSQL) 15.6`. The first dotted numeric token wins; missing minor and
/// patch components are treated as zero and components past the third are ignored.
pub fn parse_lenient_version(raw: &str) -> Result<Version> {
    let token = raw
        .split(|c: char| c.is_whitespace() || c == ',' || c == '(' || c == ')')
        .map(|token| {
            token
                .trim_start_matches(['v', 'V'])
                .chars()
                .take_while(|c| c.is_ascii_digit() || *c == '.')
                .collect::<String>()
        })
        .find(|token| token.starts_with(|c: char| c.is_ascii_digit()))
        .ok_or_else(|| anyhow!("no version number found in '{}'", raw.trim()))?;

    let token = token.trim_end_matches('.');
    let mut components = [0_u64; 3];
    for (index, part) in token.split('.').take(3).enumerate() {
        components[index] = part
            .parse::<u64>()
            .map_err(|_| anyhow!("invalid version component '{part}' in '{}'", raw.trim()))?;
    }

    Ok(Version::new(components[0], components[1], components[2]))
}
