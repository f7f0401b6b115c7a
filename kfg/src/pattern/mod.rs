// File path patterns for multimode record storage, e.g. "users/{id}.json".

use crate::error::{KfgError, Result};

/// A parsed `{id}` file pattern. The placeholder appears exactly once and
/// the id itself never contains a path separator.
#[derive(Debug, Clone)]
pub struct PathPattern {
    raw: String,
    prefix: String,
    suffix: String,
}

impl PathPattern {
    pub fn parse(pattern: &str) -> Result<Self> {
        let marker = "{id}";
        let start = pattern.find(marker).ok_or_else(|| {
            KfgError::Other(format!("Pattern '{pattern}' must contain an {{id}} placeholder"))
        })?;
        let rest = &pattern[start + marker.len()..];
        if rest.contains(marker) {
            return Err(KfgError::Other(format!(
                "Pattern '{pattern}' must contain {{id}} exactly once"
            )));
        }
        Ok(PathPattern {
            raw: pattern.to_string(),
            prefix: pattern[..start].to_string(),
            suffix: rest.to_string(),
        })
    }

    pub fn raw(&self) -> &str {
        &self.raw
    }

    /// Relative path for a record id.
    pub fn render(&self, id: &str) -> String {
        format!("{}{}{}", self.prefix, id, self.suffix)
    }

    /// Recover a record id from a relative path, if it matches.
    pub fn extract(&self, path: &str) -> Option<String> {
        let inner = path.strip_prefix(&self.prefix)?.strip_suffix(&self.suffix)?;
        if inner.is_empty() || inner.contains('/') {
            return None;
        }
        Some(inner.to_string())
    }

    /// Glob pattern matching every rendered path.
    pub fn glob_pattern(&self) -> String {
        format!("{}*{}", self.prefix, self.suffix)
    }

    /// Directory portion of the prefix, used to create the collection
    /// directory on first write.
    pub fn base_directory(&self) -> &str {
        match self.prefix.rfind('/') {
            Some(idx) => &self.prefix[..idx],
            None => "",
        }
    }
}
