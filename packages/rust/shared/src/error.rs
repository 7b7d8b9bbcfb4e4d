//! Error types for pagetitles.
//!
//! Library crates use [`PageTitlesError`] via `thiserror`.
//! The CLI wraps this with `color-eyre` for rich diagnostics.

use std::path::PathBuf;

use crate::types::FailureKind;

/// Top-level error type for all pagetitles operations.
#[derive(Debug, thiserror::Error)]
pub enum PageTitlesError {
    /// Configuration loading or validation error.
    #[error("config error: {message}")]
    Config { message: String },

    /// The URL list could not be obtained. Fatal to a run.
    #[error("source unavailable: {message}")]
    SourceUnavailable { message: String },

    /// The output artifact could not be created or written. Fatal to a run.
    #[error("sink unavailable: {message}")]
    SinkUnavailable { message: String },

    /// Transport-level failure (DNS, connect, TLS, timeout, body read).
    #[error("network error: {0}")]
    Network(String),

    /// Response received but no title could be extracted.
    #[error("parse error: {message}")]
    Parse { message: String },

    /// Filesystem I/O error.
    #[error("I/O error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Data validation error.
    #[error("validation error: {message}")]
    Validation { message: String },

    /// A pipeline task panicked or was cancelled. Fatal to a run.
    #[error("task error: {0}")]
    Task(String),
}

/// Convenience alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, PageTitlesError>;

impl PageTitlesError {
    /// Create a config error from any displayable message.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    /// Create a source error from any displayable message.
    pub fn source_unavailable(msg: impl Into<String>) -> Self {
        Self::SourceUnavailable {
            message: msg.into(),
        }
    }

    /// Create a sink error from any displayable message.
    pub fn sink_unavailable(msg: impl Into<String>) -> Self {
        Self::SinkUnavailable {
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

    /// Classify a per-item error. Returns `None` for errors that are fatal to a run.
    pub fn failure_kind(&self) -> Option<FailureKind> {
        match self {
            Self::Network(_) => Some(FailureKind::Fetch),
            Self::Parse { .. } => Some(FailureKind::Parse),
            _ => None,
        }
    }

    /// Human-readable cause without the variant prefix, for failure rows.
    pub fn detail(&self) -> String {
        match self {
            Self::Network(msg) => msg.clone(),
            Self::Parse { message } => message.clone(),
            other => other.to_string(),
        }
    }
}
