//! SPARQL backend client for the mercache geometry cache.
//!
//! This crate owns everything that talks to the backend over HTTP:
//!
//! - [`SparqlBackend`]: query-URL assembly and the two result protocols
//!   (streamed TSV and little-endian binary entity ids)
//! - [`prep_query`] / [`prep_query_row`]: query rewriting for the id
//!   protocol and single-row fetches
//!
//! All I/O stays on the caller's task; CPU-heavy consumers stream the
//! response chunks through their own parsers.

pub mod client;
pub mod error;
pub mod query;

pub use client::{BackendConfig, SparqlBackend, ACCEPT_IDS, ACCEPT_TSV, MAX_ROWS};
pub use error::{BackendError, Result};
pub use query::{prep_query, prep_query_row};
