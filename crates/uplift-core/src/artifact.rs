use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ArtifactSpec {
    pub url: String,
    pub sha256: String,
}

impl ArtifactSpec {
    pub fn new(url: impl Into<String>, sha256: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            sha256: sha256.into(),
        }
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.url.starts_with("https://")
            || self.url.starts_with("http://")
            || self.url.starts_with("file://"))
        {
            return Err(anyhow!(
                "artifact url must be http(s) or file: '{}'",
                self.url
            ));
        }
        let digest = self.sha256.trim();
        if digest.len() != 64 || !digest.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(anyhow!(
                "artifact sha256 must be 64 hex characters, got '{}'",
                self.sha256
            ));
        }
        self.file_name().map(|_| ())
    }

    /// Last URL path segment, without query or fragment.
    pub fn file_name(&self) -> Result<String> {
        let without_query = self
            .url
            .split(['?', '#'])
            .next()
            .unwrap_or(self.url.as_str());
        let name = without_query
            .rsplit('/')
            .next()
            .map(str::trim)
            .filter(|name| !name.is_empty() && *name != "." && *name != "..")
            .ok_or_else(|| anyhow!("could not derive a file name from url '{}'", self.url))?;
        if name.contains('\\') || name.contains(':') {
            return Err(anyhow!("unsafe artifact file name '{name}'"));
        }
        Ok(name.to_string())
    }
}
