//! Vault-relative path handling.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A forward-slash-normalised path, relative to the vault root.
///
/// Construction strips a leading `/` and rewrites `\` to `/`; nothing else is
/// canonicalised (no `.`/`..` resolution — the host filesystem adapter owns that).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RelativePath(String);

impl RelativePath {
    pub fn new(path: impl AsRef<str>) -> Self {
        let normalised = path.as_ref().replace('\\', "/");
        let normalised = normalised.trim_start_matches('/');
        Self(normalised.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn extension(&self) -> Option<&str> {
        self.0.rsplit('.').next().filter(|ext| *ext != self.0)
    }

    /// The path with an inserted `" (N)"` disambiguator before the extension,
    /// used by `FileOps::move` to deconflict a collision (spec S2).
    pub fn with_disambiguator(&self, n: u32) -> Self {
        match self.0.rfind('.') {
            Some(dot) if dot > self.0.rfind('/').unwrap_or(0) => {
                let (stem, ext) = self.0.split_at(dot);
                Self(format!("{stem} ({n}){ext}"))
            }
            _ => Self(format!("{} ({n})", self.0)),
        }
    }
}

impl fmt::Display for RelativePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for RelativePath {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for RelativePath {
    fn from(s: String) -> Self {
        Self::new(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalises_backslashes_and_leading_slash() {
        assert_eq!(RelativePath::new("/a\\b\\c.md").as_str(), "a/b/c.md");
    }

    #[test]
    fn disambiguator_inserts_before_extension() {
        let p = RelativePath::new("notes/b.md");
        assert_eq!(p.with_disambiguator(1).as_str(), "notes/b (1).md");
    }

    #[test]
    fn disambiguator_without_extension() {
        let p = RelativePath::new("notes/b");
        assert_eq!(p.with_disambiguator(2).as_str(), "notes/b (2)");
    }

    #[test]
    fn extension_extraction() {
        assert_eq!(RelativePath::new("a/b.md").extension(), Some("md"));
        assert_eq!(RelativePath::new("a/b").extension(), None);
    }
}
