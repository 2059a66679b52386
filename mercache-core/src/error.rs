//! Error types for the core cache structures.

use thiserror::Error;

/// Core cache errors.
#[derive(Error, Debug)]
pub enum CoreError {
    /// IO error during snapshot read/write or temp-file handling.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Snapshot format error (corrupt or truncated file).
    #[error("Snapshot format error: {0}")]
    Format(String),

    /// The configured memory budget would be exceeded.
    #[error("memory budget exceeded: {rss} resident + {needed} requested > {limit}")]
    OutOfMemory {
        rss: usize,
        needed: usize,
        limit: usize,
    },
}

/// Result type for core operations.
pub type Result<T> = std::result::Result<T, CoreError>;
