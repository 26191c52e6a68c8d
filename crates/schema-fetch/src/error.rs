//! Run-level error types.
//!
//! Per-schema failures never show up here: they are recorded as
//! [`FetchOutcome`](crate::outcome::FetchOutcome) values. Only errors that stop
//! the whole run are modelled below.

use thiserror::Error;

use crate::aggregator::Summary;

/// Errors that abort a run.
#[derive(Error, Debug)]
pub enum FetchError {
    /// Invalid configuration, or the meta database could not be read.
    #[error("Configuration error: {0}")]
    Config(String),

    /// An artifact could not be written.
    ///
    /// When raised by [`Fetcher::run`](crate::runner::Fetcher::run) the
    /// finished summary rides along so the caller can retry persistence.
    #[error("Serialization error: {message}")]
    Serialization {
        message: String,
        summary: Option<Box<Summary>>,
    },

    /// Filesystem failure outside of the artifacts (log directory, query file).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl FetchError {
    /// Serialization error without an attached summary.
    pub fn serialization(message: impl Into<String>) -> Self {
        FetchError::Serialization {
            message: message.into(),
            summary: None,
        }
    }

    /// Attach the in-memory summary to a serialization error.
    pub fn with_summary(self, summary: Summary) -> Self {
        match self {
            FetchError::Serialization { message, .. } => FetchError::Serialization {
                message,
                summary: Some(Box::new(summary)),
            },
            other => other,
        }
    }

    /// Summary carried by a serialization error, if any.
    pub fn summary(&self) -> Option<&Summary> {
        match self {
            FetchError::Serialization { summary, .. } => summary.as_deref(),
            FetchError::Config(_) | FetchError::Io(_) => None,
        }
    }
}

/// Result type alias using FetchError.
pub type RunResult<T> = Result<T, FetchError>;

impl From<envy::Error> for FetchError {
    fn from(err: envy::Error) -> Self {
        FetchError::Config(err.to_string())
    }
}

impl From<serde_json::Error> for FetchError {
    fn from(err: serde_json::Error) -> Self {
        FetchError::serialization(err.to_string())
    }
}
