//! Error types for the directory scanner.

use thiserror::Error;

/// Result type alias for scanner and watcher operations.
pub type Result<T> = std::result::Result<T, ScannerError>;

/// Errors that can occur while configuring, scanning or watching.
#[derive(Error, Debug)]
pub enum ScannerError {
    /// Base path is missing or not a directory.
    #[error("not a directory: {0}")]
    NotADirectory(String),

    /// Glob pattern could not be compiled.
    #[error("invalid pattern `{pattern}`: {reason}")]
    InvalidPattern { pattern: String, reason: String },

    /// Watcher was closed and cannot accept registrations.
    #[error("watcher is closed")]
    WatcherClosed,

    /// Scanner session was closed.
    #[error("scanner is closed")]
    ScannerClosed,

    /// Notify error.
    #[error("notify error: {0}")]
    Notify(#[from] notify::Error),

    /// IO error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl ScannerError {
    pub(crate) fn invalid_pattern(pattern: &str, reason: impl Into<String>) -> Self {
        Self::InvalidPattern {
            pattern: pattern.to_string(),
            reason: reason.into(),
        }
    }
}
