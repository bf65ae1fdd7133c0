//! Error types for Postline.
//!
//! Library crates use [`PostlineError`] via `thiserror`. The taxonomy follows
//! the pipeline's recovery rules: validation rejects synchronously, transient
//! store errors are retried, cache failures degrade, integrity failures are
//! fatal for the single record only.

use std::path::PathBuf;

/// Top-level error type for all Postline operations.
#[derive(Debug, thiserror::Error)]
pub enum PostlineError {
    /// Malformed input (missing URL, empty author handle, oversized batch).
    /// Rejected before any write is attempted.
    #[error("validation error: {message}")]
    Validation { message: String },

    /// Timeout or connection loss against the durable store. Retried with
    /// bounded attempts and exponential backoff.
    #[error("transient store error: {0}")]
    TransientStore(String),

    /// The cache tier is unreachable or offline. Never a hard dependency —
    /// callers log and proceed with the durable store alone.
    #[error("cache unavailable: {0}")]
    CacheUnavailable(String),

    /// No active agent descriptor for a stage. The record stays queued.
    #[error("stage unavailable: {stage}")]
    StageUnavailable { stage: String },

    /// Referential violation (e.g., metrics or media without a post).
    /// Fatal for the single record; the batch continues.
    #[error("data integrity error: {message}")]
    DataIntegrity { message: String },

    /// Network/HTTP error during a health probe.
    #[error("network error: {0}")]
    Network(String),

    /// Configuration loading or validation error.
    #[error("config error: {message}")]
    Config { message: String },

    /// Filesystem I/O error.
    #[error("I/O error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// Convenience alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, PostlineError>;

impl PostlineError {
    /// Create a validation error from any displayable message.
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation {
            message: msg.into(),
        }
    }

    /// Create a data integrity error from any displayable message.
    pub fn integrity(msg: impl Into<String>) -> Self {
        Self::DataIntegrity {
            message: msg.into(),
        }
    }

    /// Create a config error from any displayable message.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
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

    /// Whether a retry may succeed. Only transient store failures (including
    /// operation timeouts, which are folded into this variant) qualify.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::TransientStore(_))
    }
}
