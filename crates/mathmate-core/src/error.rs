use std::path::Path;

use thiserror::Error;

use crate::config::ConfigError;
use crate::kernel::KernelError;

/// Top-level error type for the mathmate-core library.
#[derive(Debug, Error)]
pub enum MathmateError {
    /// Kernel unreachable, malformed packet, or remote failure.
    #[error("kernel transport error: {0}")]
    Transport(#[from] KernelError),

    /// Cache folder or artifact file could not be created or deleted.
    #[error("filesystem error at {path}: {source}")]
    FileSystem {
        path: String,
        source: std::io::Error,
    },

    /// Operation invoked on a session that has already been closed.
    #[error("session '{session_id}' has been closed")]
    Closed { session_id: String },

    /// Operation invoked out of turn, or on the wrong kind of artifact.
    #[error("illegal state: {0}")]
    IllegalState(String),

    /// Empty or whitespace-only expression.
    #[error("invalid expression: {0}")]
    InvalidExpression(String),

    /// Page template missing or without its substitution token.
    #[error("layout error: {0}")]
    Layout(String),

    #[error("config error: {0}")]
    Config(#[from] ConfigError),
}

impl MathmateError {
    pub(crate) fn fs(path: &Path, source: std::io::Error) -> Self {
        MathmateError::FileSystem {
            path: path.display().to_string(),
            source,
        }
    }
}

/// Convenience alias used throughout the library.
pub type Result<T> = std::result::Result<T, MathmateError>;
