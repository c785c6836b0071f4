//! Error types for tenantmove.
//!
//! Library crates use [`MigrationError`] via `thiserror`.
//! The CLI wraps this with `color-eyre` for rich diagnostics.

use std::path::PathBuf;

/// Top-level error type for all tenantmove operations.
#[derive(Debug, thiserror::Error)]
pub enum MigrationError {
    /// Configuration loading or validation error.
    #[error("config error: {message}")]
    Config { message: String },

    /// Transport-level failure (connect, timeout, TLS, body read).
    #[error("network error: {0}")]
    Network(String),

    /// The remote answered with a non-success status.
    #[error("HTTP {status} from {url}: {body}")]
    Http {
        status: u16,
        url: String,
        body: String,
    },

    /// A response did not have the expected shape.
    #[error("parse error: {message}")]
    Parse { message: String },

    /// Filesystem I/O error.
    #[error("I/O error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Invalid input supplied by the operator or found in source data.
    #[error("validation error: {message}")]
    Validation { message: String },

    /// CSV read/write error.
    #[error("csv error: {0}")]
    Csv(String),

    /// Admin page extraction error.
    #[error("scrape error: {0}")]
    Scrape(String),

    /// No usable browser session could be obtained.
    #[error("session error: {0}")]
    Session(String),
}

/// Convenience alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, MigrationError>;

impl MigrationError {
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

    /// HTTP status carried by this error, if it came from a remote response.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Http { status, .. } => Some(*status),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_formatting() {
        let err = MigrationError::config("missing token");
        assert_eq!(err.to_string(), "config error: missing token");

        let err = MigrationError::Http {
            status: 400,
            url: "https://target.example.net/rest/api/3/filter".into(),
            body: "Filter name already in use".into(),
        };
        assert!(err.to_string().starts_with("HTTP 400 from"));
        assert!(err.to_string().contains("already in use"));
    }

    #[test]
    fn status_only_for_http_errors() {
        let err = MigrationError::Http {
            status: 404,
            url: "u".into(),
            body: String::new(),
        };
        assert_eq!(err.status(), Some(404));
        assert_eq!(MigrationError::Network("reset".into()).status(), None);
    }
}
