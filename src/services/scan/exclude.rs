//! Exclude patterns applied to relative paths during the scan.

use crate::error::ExcludeError;
use globset::{GlobBuilder, GlobSet, GlobSetBuilder};

/// Compiled exclude globs.
///
/// A pattern containing `/` is matched against the whole slash-separated
/// relative path; any other pattern is matched against the entry's name at
/// every depth (`*.tmp` excludes `a/b/c.tmp`).
#[derive(Debug, Clone)]
pub struct ExcludeSet {
    patterns: Vec<String>,
    by_path: GlobSet,
    by_name: GlobSet,
}

impl Default for ExcludeSet {
    fn default() -> Self {
        Self {
            patterns: Vec::new(),
            by_path: GlobSet::empty(),
            by_name: GlobSet::empty(),
        }
    }
}

impl ExcludeSet {
    /// Compile the supplied patterns.
    pub fn new<I, S>(patterns: I) -> Result<Self, ExcludeError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut by_path = GlobSetBuilder::new();
        let mut by_name = GlobSetBuilder::new();
        let mut kept = Vec::new();

        for pattern in patterns {
            let raw = pattern.as_ref().trim();
            if raw.is_empty() {
                continue;
            }
            let anchored = raw.trim_start_matches('/').trim_end_matches('/');
            let glob = GlobBuilder::new(anchored)
                .literal_separator(true)
                .build()
                .map_err(|source| ExcludeError {
                    pattern: raw.to_string(),
                    source,
                })?;

            if anchored.contains('/') || raw.starts_with('/') {
                by_path.add(glob);
            } else {
                by_name.add(glob);
            }
            kept.push(raw.to_string());
        }

        let build = |builder: GlobSetBuilder, patterns: &[String]| {
            builder.build().map_err(|source| ExcludeError {
                pattern: patterns.join(", "),
                source,
            })
        };

        Ok(Self {
            by_path: build(by_path, &kept)?,
            by_name: build(by_name, &kept)?,
            patterns: kept,
        })
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }

    #[must_use]
    pub fn patterns(&self) -> &[String] {
        &self.patterns
    }

    /// Check a slash-separated path relative to the source root.
    #[must_use]
    pub fn is_excluded(&self, relative_path: &str) -> bool {
        if self.patterns.is_empty() {
            return false;
        }
        let name = relative_path.rsplit('/').next().unwrap_or(relative_path);
        self.by_name.is_match(name) || self.by_path.is_match(relative_path)
    }
}
