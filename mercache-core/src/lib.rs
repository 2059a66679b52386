//! Core data model for the mercache geometry cache.
//!
//! This crate holds everything the cache keeps in memory between rebuilds:
//!
//! - [`GeomCache`]: the four immutable arrays (points, delta-coded line
//!   points, line offsets, id join table) plus random access and the
//!   galloped join against external id lists
//! - [`mcoord`]: the two-level delta encoding of line points
//! - [`grid`]: a uniform-cell bucket index with a generic payload
//! - [`snapshot`]: single-file binary persistence of a cache
//! - [`webmerc`]: WGS84 → Web-Mercator projection and float boxes
//! - [`mem`]: resident-memory probing against a configured budget
//!
//! Everything here is CPU-only; HTTP transport and ingestion live in the
//! `mercache-backend` and `mercache-ingest` crates.

pub mod error;
pub mod grid;
pub mod id;
pub mod mcoord;
pub mod mem;
pub mod snapshot;
mod store;
pub mod webmerc;

pub use error::{CoreError, Result};
pub use grid::Grid;
pub use id::{GeomId, GeomRef, IdMapping, I_OFFSET, INVALID_ID, QID_CONTINUATION, QID_PRINCIPAL};
pub use mcoord::{encode_line, LinePoint, M_COORD_GRANULARITY};
pub use store::GeomCache;
pub use webmerc::{latlng_to_web_merc, point_valid, FBox, FPoint};
