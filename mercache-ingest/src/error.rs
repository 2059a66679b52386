//! Error types for the ingestion pipeline.

use thiserror::Error;

/// Ingestion errors. Temp-file failures are fatal for the current build.
#[derive(Error, Debug)]
pub enum IngestError {
    /// Backend transport or protocol failure.
    #[error(transparent)]
    Backend(#[from] mercache_backend::BackendError),

    /// Temp-file or spill IO failure.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Core failure (memory budget, snapshot format).
    #[error(transparent)]
    Core(#[from] mercache_core::CoreError),
}

/// Result type for ingest operations.
pub type Result<T> = std::result::Result<T, IngestError>;
