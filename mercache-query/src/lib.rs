//! Per-query result sets over the mercache geometry cache.
//!
//! A [`Requestor`] pins one user query: it fetches the query's entity
//! ids over the backend's binary protocol, joins them against the
//! cache's id table, and answers spatial questions over the joined
//! result — objects in a box, nearest object around a point — plus
//! single-row fetches and geometry reassembly for display.

pub mod error;
mod requestor;

pub use error::{QueryError, Result};
pub use requestor::{Nearest, Requestor, ResObj, ResultObject};
