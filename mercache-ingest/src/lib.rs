//! Ingestion pipeline for the mercache geometry cache.
//!
//! [`CacheBuilder`] drives the two backend downloads — paged TSV rows
//! with WKT literals, then the binary entity-id stream — through the
//! streaming [`WktScanner`] into temp-file spill storage, and assembles
//! the immutable [`mercache_core::GeomCache`].

pub mod builder;
pub mod error;
pub mod parser;
pub mod sink;

pub use builder::{CacheBuilder, IdAssigner, PAGE_ROWS};
pub use error::{IngestError, Result};
pub use parser::WktScanner;
pub use sink::GeomSink;
