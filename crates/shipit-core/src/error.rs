//! Error types for shipit.
//!
//! Each pipeline stage has its own failure variant. "No release warranted" is not
//! an error; see [`crate::version::VersionDecision`].

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("validation failed at '{check}': {message}")]
    ValidationFailed { check: String, message: String },

    #[error("build failed for {}", failed.join(", "))]
    BuildFailed { failed: Vec<String> },

    #[error("artifact '{0}' is missing or empty")]
    MissingArtifact(String),

    #[error("tag '{0}' already exists")]
    TagExists(String),

    #[error("publish failed: {0}")]
    PublishFailed(String),

    #[error("propagation to '{target}' failed: {message}")]
    PropagationFailed { target: String, message: String },

    #[error("anchor not found in {file}: {anchor}")]
    AnchorNotFound { file: String, anchor: String },

    #[error("invalid version '{version}': {message}")]
    InvalidVersion { version: String, message: String },

    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("execution failed: {0}")]
    ExecutionFailed(String),

    #[error("timeout: {0}")]
    Timeout(String),

    #[error("cancelled")]
    Cancelled,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Propagation errors leave an already published release in place and may
    /// be retried on their own.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Error::PropagationFailed { .. } | Error::AnchorNotFound { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, Error>;
