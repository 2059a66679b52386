//! Error types for backend communication.

use thiserror::Error;

/// Backend transport and protocol errors.
#[derive(Error, Debug)]
pub enum BackendError {
    /// Network-level failure (connect, timeout, stream abort).
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// Non-success HTTP status from the backend.
    #[error("backend returned status {status}: {body}")]
    Status { status: u16, body: String },

    /// Unexpected bytes in a backend response.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Memory budget exceeded while buffering a response.
    #[error(transparent)]
    Core(#[from] mercache_core::CoreError),
}

/// Result type for backend operations.
pub type Result<T> = std::result::Result<T, BackendError>;
