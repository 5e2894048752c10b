//! Error types for outpost-wrapper.

use thiserror::Error;

/// Main error type for all wrapper operations.
#[derive(Debug, Error)]
pub enum WrapperError {
    /// I/O error during pipe/socket operations.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON error while loading the configuration file.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Protocol error (oversized payload, malformed control message, etc.).
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Too many consecutive accept failures on one front.
    #[error("too many consecutive accept failures on {0} front")]
    AcceptLimit(&'static str),

    /// Failed to spawn the backend child process.
    #[error("failed to spawn backend {path}: {source}")]
    Spawn {
        /// Path of the backend executable.
        path: String,
        /// Underlying spawn error.
        source: std::io::Error,
    },
}

/// Result type alias using WrapperError.
pub type Result<T> = std::result::Result<T, WrapperError>;
