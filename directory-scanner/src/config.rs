//! Configuration types for directory scanning.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Patterns excluded from every scan unless default excludes are disabled.
///
/// Covers version control metadata, editor backup and lock files, and OS
/// metadata files.
pub const DEFAULT_EXCLUDES: &[&str] = &[
    // Editor backups and locks
    "**/*~",
    "**/#*#",
    "**/.#*",
    "**/%*%",
    "**/._*",
    // CVS
    "**/CVS",
    "**/CVS/**",
    "**/.cvsignore",
    // SCCS
    "**/SCCS",
    "**/SCCS/**",
    // Visual SourceSafe
    "**/vssver.scc",
    // Subversion
    "**/.svn",
    "**/.svn/**",
    // macOS
    "**/.DS_Store",
    // Git
    "**/.git",
    "**/.git/**",
    "**/.gitattributes",
    "**/.gitignore",
    "**/.gitmodules",
    // Mercurial
    "**/.hg",
    "**/.hg/**",
    "**/.hgignore",
    "**/.hgsub",
    "**/.hgsubstate",
    "**/.hgtags",
    // Bazaar
    "**/.bzr",
    "**/.bzr/**",
    "**/.bzrignore",
];

/// Pattern configuration for a [`ScannerFactory`](crate::ScannerFactory).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScannerConfig {
    /// Include globs. Empty means everything.
    pub includes: Vec<String>,

    /// Exclude globs.
    pub excludes: Vec<String>,

    /// Whether [`DEFAULT_EXCLUDES`] are appended to the excludes.
    pub use_default_excludes: bool,

    /// Whether scans follow symbolic links.
    pub follow_links: bool,
}

impl ScannerConfig {
    /// Create an empty config with default excludes enabled.
    pub fn new() -> Self {
        Self {
            includes: Vec::new(),
            excludes: Vec::new(),
            use_default_excludes: true,
            follow_links: false,
        }
    }

    /// Parse a config from JSON.
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Add an include pattern.
    pub fn include(mut self, pattern: impl Into<String>) -> Self {
        self.includes.push(pattern.into());
        self
    }

    /// Add an exclude pattern.
    pub fn exclude(mut self, pattern: impl Into<String>) -> Self {
        self.excludes.push(pattern.into());
        self
    }

    /// Disable the built-in default excludes.
    pub fn without_default_excludes(mut self) -> Self {
        self.use_default_excludes = false;
        self
    }

    /// Enable following symbolic links.
    pub fn with_follow_links(mut self) -> Self {
        self.follow_links = true;
        self
    }
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Options for an [`FsWatcher`](crate::FsWatcher).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WatcherOptions {
    /// Idle interval after which the handler's poll-timeout callback fires.
    /// `None` or zero waits indefinitely.
    pub poll_timeout: Option<Duration>,
}

impl WatcherOptions {
    /// Set the poll timeout.
    pub fn with_poll_timeout(mut self, timeout: Duration) -> Self {
        self.poll_timeout = Some(timeout);
        self
    }

    pub(crate) fn effective_poll_timeout(&self) -> Option<Duration> {
        self.poll_timeout.filter(|t| !t.is_zero())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pattern::Pattern;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_config_builder() {
        let config = ScannerConfig::new()
            .include("**/*.rs")
            .exclude("**/target/**")
            .without_default_excludes();

        assert_eq!(config.includes, vec!["**/*.rs".to_string()]);
        assert_eq!(config.excludes, vec!["**/target/**".to_string()]);
        assert!(!config.use_default_excludes);
        assert!(!config.follow_links);
    }

    #[test]
    fn test_config_from_json_defaults() {
        let config = ScannerConfig::from_json(r#"{"includes": ["src/**"]}"#).unwrap();

        assert_eq!(config.includes, vec!["src/**".to_string()]);
        assert!(config.excludes.is_empty());
        assert!(config.use_default_excludes);
    }

    #[test]
    fn test_config_from_bad_json() {
        assert!(ScannerConfig::from_json("{not json").is_err());
    }

    #[test]
    fn test_default_excludes_compile() {
        for glob in DEFAULT_EXCLUDES {
            assert!(Pattern::compile(glob).is_ok(), "{glob}");
        }
    }

    #[test]
    fn test_zero_poll_timeout_means_none() {
        let options = WatcherOptions::default().with_poll_timeout(Duration::ZERO);
        assert_eq!(options.effective_poll_timeout(), None);

        let options = WatcherOptions::default().with_poll_timeout(Duration::from_millis(50));
        assert_eq!(
            options.effective_poll_timeout(),
            Some(Duration::from_millis(50))
        );
    }
}
