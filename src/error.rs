//! Error types for the conformance harness.
//!
//! [`Error`] covers failures that abort a run (bad catalog, bad config, I/O on
//! report output). Per-case problems never surface here; they are collected in
//! the [`crate::report::Report`] instead.

use thiserror::Error;

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    /// Malformed catalog, unknown namespace, or invalid runner configuration.
    #[error("Configuration error: {0}")]
    Config(String),

    /// A value failed a structural check outside catalog loading.
    #[error("Validation error: {0}")]
    Validation(String),

    /// A report sink could not publish.
    #[error("Report sink error ({sink}): {message}")]
    Sink { sink: String, message: String },

    #[error("IO error: {0}")]
    Io(#[from] Box<std::io::Error>),

    #[error("JSON error: {0}")]
    Json(#[from] Box<serde_json::Error>),
}

impl Error {
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub fn sink(sink: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Sink {
            sink: sink.into(),
            message: message.into(),
        }
    }

    /// Message without the category prefix, for re-wrapping with more context.
    #[must_use]
    pub fn detail(&self) -> String {
        match self {
            Self::Config(message) | Self::Validation(message) => message.clone(),
            other => other.to_string(),
        }
    }

    /// True for errors that must abort a run before any evaluation happens.
    #[must_use]
    pub const fn is_config(&self) -> bool {
        matches!(self, Self::Config(_))
    }
}

impl From<std::io::Error> for Error {
    fn from(value: std::io::Error) -> Self {
        Self::Io(Box::new(value))
    }
}

impl From<serde_json::Error> for Error {
    fn from(value: serde_json::Error) -> Self {
        Self::Json(Box::new(value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_errors_are_flagged() {
        assert!(Error::config("bad").is_config());
        assert!(!Error::validation("bad").is_config());
    }

    #[test]
    fn display_includes_message() {
        let err = Error::sink("json", "disk full");
        assert_eq!(err.to_string(), "Report sink error (json): disk full");
    }

    #[test]
    fn detail_strips_category_prefix() {
        assert_eq!(Error::config("bad path").detail(), "bad path");
        assert_eq!(
            Error::sink("json", "full").detail(),
            "Report sink error (json): full"
        );
    }

    #[test]
    fn io_errors_convert() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        let err: Error = io.into();
        assert!(matches!(err, Error::Io(_)));
    }
}
