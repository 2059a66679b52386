//! Error types for query-time operations.

use thiserror::Error;

/// Query errors.
#[derive(Error, Debug)]
pub enum QueryError {
    /// The geometry cache or the result set is not built yet.
    #[error("cache not ready")]
    CacheNotReady,

    /// Backend failure while fetching ids or rows.
    #[error(transparent)]
    Backend(#[from] mercache_backend::BackendError),

    /// Core failure (memory budget exceeded during grid construction).
    #[error(transparent)]
    Core(#[from] mercache_core::CoreError),
}

/// Result type for query operations.
pub type Result<T> = std::result::Result<T, QueryError>;
