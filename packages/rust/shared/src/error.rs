//! Error types for SubjectScan.
//!
//! Library crates use [`ScanError`] via `thiserror`.
//! The CLI wraps this with `color-eyre` for rich diagnostics.

use std::path::PathBuf;

/// Top-level error type for all SubjectScan operations.
#[derive(Debug, thiserror::Error)]
pub enum ScanError {
    /// Configuration loading or validation error.
    #[error("config error: {message}")]
    Config { message: String },

    /// Network/HTTP error while talking to the search API or the LLM service.
    #[error("network error: {0}")]
    Network(String),

    /// The search API reported that its quota is exhausted.
    #[error("search quota exceeded: {0}")]
    QuotaExceeded(String),

    /// The search API returned an error payload (other than quota).
    #[error("search API error: {0}")]
    Search(String),

    /// Response parsing error.
    #[error("parse error: {message}")]
    Parse { message: String },

    /// Database or storage layer error.
    #[error("storage error: {0}")]
    Storage(String),

    /// LLM text-completion error (transport, API, or empty response).
    #[error("completion error: {0}")]
    Completion(String),

    /// Filesystem I/O error.
    #[error("I/O error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Invalid input (empty subject, zero budget, unknown format, ...).
    #[error("validation error: {message}")]
    Validation { message: String },

    /// Dataset export failed while encoding the output file.
    #[error("export error: {0}")]
    Export(String),
}

/// Convenience alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, ScanError>;

impl ScanError {
    /// Create a config error from any displayable message.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    /// Create a parse error from any displayable message.
    pub fn parse(msg: impl Into<String>) -> Self {
        Self::Parse {
            message: msg.into(),
        }
    }

    /// Create a validation error from any displayable message.
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation {
            message: msg.into(),
        }
    }

    /// Wrap a `std::io::Error` with a path for context.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Whether this error should abort the whole scan run.
    pub fn is_quota_exceeded(&self) -> bool {
        matches!(self, Self::QuotaExceeded(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_formatting() {
        let err = ScanError::config("missing API key");
        assert_eq!(err.to_string(), "config error: missing API key");

        let err = ScanError::validation("budget must be greater than zero");
        assert!(err.to_string().contains("budget must be"));
    }

    #[test]
    fn quota_errors_are_flagged() {
        assert!(ScanError::QuotaExceeded("daily limit".into()).is_quota_exceeded());
        assert!(!ScanError::Search("bad request".into()).is_quota_exceeded());
        assert!(!ScanError::Network("timeout".into()).is_quota_exceeded());
    }
}
