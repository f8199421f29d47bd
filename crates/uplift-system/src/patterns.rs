use std::fmt;

use anyhow::{anyhow, Context, Result};
use globset::{GlobBuilder, GlobMatcher};

/// Case-insensitive glob over service and process names, e.g. `Veeam*`.
#[derive(Debug, Clone)]
pub struct NamePattern {
    raw: String,
    matcher: GlobMatcher,
}

impl NamePattern {
    pub fn new(raw: &str) -> Result<Self> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Err(anyhow!("name pattern must not be empty"));
        }
        let matcher = GlobBuilder::new(raw)
            .case_insensitive(true)
            .build()
            .with_context(|| format!("invalid name pattern '{raw}'"))?
            .compile_matcher();
        Ok(Self {
            raw: raw.to_string(),
            matcher,
        })
    }

    pub fn matches(&self, name: &str) -> bool {
        self.matcher.is_match(name)
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }
}

impl fmt::Display for NamePattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}
