//! Cache builder: orchestrates the backend downloads and assembles the
//! geometry cache.
//!
//! Build protocol:
//! 1. run the count query (progress denominator)
//! 2. page through the WKT results (TSV protocol), streaming every chunk
//!    through the scanner into the temp-file sink, until a page adds no
//!    rows
//! 3. load the spilled arrays into vectors
//! 4. replay the same query over the binary-id protocol, filling entity
//!    ids into the preliminary table and propagating them through
//!    multi-geometry continuation rows
//! 5. sort the table by `(qid, id)`

use rayon::prelude::*;
use tracing::{info, warn};

use mercache_backend::{SparqlBackend, ACCEPT_IDS, ACCEPT_TSV, MAX_ROWS};
use mercache_core::{GeomCache, IdMapping, QID_CONTINUATION, QID_PRINCIPAL};

use crate::error::Result;
use crate::parser::WktScanner;
use crate::sink::GeomSink;

/// Rows per WKT result page.
pub const PAGE_ROWS: u64 = 1_000_000;

/// Builds a [`GeomCache`] from a backend.
pub struct CacheBuilder {
    backend: SparqlBackend,
    query: String,
    count_query: String,
}

impl CacheBuilder {
    /// `query` must bind the geometry literal as its last projected
    /// variable; `count_query` must return its count.
    pub fn new(backend: SparqlBackend, query: &str, count_query: &str) -> Self {
        Self {
            backend,
            query: query.to_string(),
            count_query: count_query.to_string(),
        }
    }

    /// Run the full build. The returned cache is ready for queries.
    pub async fn build(&self) -> Result<GeomCache> {
        let total = self.backend.fetch_count(&self.count_query).await?;
        info!(total, "counted geometry rows");
        info!(query = %self.query, "geometry query");

        let mut scanner = WktScanner::new(GeomSink::new()?, total);
        loop {
            let offset = scanner.cur_row();
            scanner.begin_page();
            let mut resp = self
                .backend
                .open_stream(&self.query, offset, PAGE_ROWS, ACCEPT_TSV)
                .await?;
            while let Some(chunk) = resp.chunk().await.map_err(mercache_backend::BackendError::from)? {
                scanner.feed(&chunk)?;
            }
            if scanner.cur_row() == offset {
                break;
            }
        }

        info!(
            rows = scanner.cur_row(),
            unique = scanner.unique_geoms(),
            "download done, loading vectors"
        );
        let (points, line_points, lines, mut qid_to_id) = scanner.into_sink().finish()?;
        info!(
            points = points.len(),
            lines = lines.len(),
            mappings = qid_to_id.len(),
            "vectors loaded"
        );

        let (rows, max_qid) = {
            let mut assigner = IdAssigner::new(&mut qid_to_id);
            let mut resp = self
                .backend
                .open_stream(&self.query, 0, MAX_ROWS, ACCEPT_IDS)
                .await?;
            while let Some(chunk) = resp.chunk().await.map_err(mercache_backend::BackendError::from)? {
                assigner.feed(&chunk);
            }
            (assigner.rows(), assigner.max_qid())
        };
        info!(rows, max_qid, "assigned entity ids");

        info!("sorting by entity id");
        qid_to_id.par_sort_unstable();

        Ok(GeomCache::from_parts(points, line_points, lines, qid_to_id))
    }
}

/// Fills entity ids from the binary stream into the preliminary table.
///
/// One little-endian `u64` arrives per principal result row; each value
/// is propagated forward through the continuation rows that follow its
/// principal. Rows whose placeholder is neither principal nor
/// continuation are out of sync and skipped with a warning.
pub struct IdAssigner<'a> {
    table: &'a mut [IdMapping],
    buf: [u8; 8],
    have: usize,
    cur_row: usize,
    max_qid: u64,
}

impl<'a> IdAssigner<'a> {
    pub fn new(table: &'a mut [IdMapping]) -> Self {
        Self {
            table,
            buf: [0; 8],
            have: 0,
            cur_row: 0,
            max_qid: 0,
        }
    }

    /// Table rows consumed so far, continuation propagation included.
    pub fn rows(&self) -> usize {
        self.cur_row
    }

    /// Largest entity id seen.
    pub fn max_qid(&self) -> u64 {
        self.max_qid
    }

    /// Consume one chunk of the binary id stream. Values split across
    /// chunk boundaries are reassembled.
    pub fn feed(&mut self, bytes: &[u8]) {
        for &b in bytes {
            self.buf[self.have] = b;
            self.have += 1;
            if self.have == 8 {
                self.have = 0;
                self.assign(u64::from_le_bytes(self.buf));
            }
        }
    }

    fn assign(&mut self, qid: u64) {
        if self.cur_row < self.table.len() && self.table[self.cur_row].qid == QID_PRINCIPAL {
            self.table[self.cur_row].qid = qid;
            if qid > self.max_qid {
                self.max_qid = qid;
            }
            while self.cur_row + 1 < self.table.len()
                && self.table[self.cur_row + 1].qid == QID_CONTINUATION
            {
                self.cur_row += 1;
                self.table[self.cur_row].qid = qid;
            }
        } else {
            warn!(
                row = self.cur_row,
                table = self.table.len(),
                "binary id results out of sync, row skipped"
            );
        }

        self.cur_row += 1;
        if self.cur_row % 1_000_000 == 0 {
            info!(row = self.cur_row, "assigning entity ids");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mercache_core::{INVALID_ID, I_OFFSET};

    fn ids(values: &[u64]) -> Vec<u8> {
        values.iter().flat_map(|v| v.to_le_bytes()).collect()
    }

    #[test]
    fn test_continuations_inherit_principal_id() {
        let mut table = vec![
            IdMapping::new(QID_PRINCIPAL, 0),
            IdMapping::new(QID_PRINCIPAL, I_OFFSET),
            IdMapping::new(QID_CONTINUATION, I_OFFSET + 1),
            IdMapping::new(QID_PRINCIPAL, 1),
        ];
        let mut assigner = IdAssigner::new(&mut table);
        assigner.feed(&ids(&[10, 42, 11]));
        assert_eq!(assigner.rows(), 4);
        assert_eq!(assigner.max_qid(), 42);
        drop(assigner);

        assert_eq!(table[0].qid, 10);
        assert_eq!(table[1].qid, 42);
        assert_eq!(table[2].qid, 42);
        assert_eq!(table[3].qid, 11);
    }

    #[test]
    fn test_values_split_across_chunks() {
        let mut table = vec![IdMapping::new(QID_PRINCIPAL, 0)];
        let bytes = ids(&[0x0102_0304_0506_0708]);
        let mut assigner = IdAssigner::new(&mut table);
        assigner.feed(&bytes[..3]);
        assigner.feed(&bytes[3..]);
        drop(assigner);
        assert_eq!(table[0].qid, 0x0102_0304_0506_0708);
    }

    #[test]
    fn test_out_of_sync_row_skipped() {
        // sentinel rows keep their placeholder 0, so they are assigned;
        // a row that already carries a real id is skipped
        let mut table = vec![
            IdMapping::new(QID_PRINCIPAL, INVALID_ID),
            IdMapping::new(99, 1),
        ];
        let mut assigner = IdAssigner::new(&mut table);
        assigner.feed(&ids(&[5, 6, 7]));
        drop(assigner);
        assert_eq!(table[0].qid, 5);
        assert_eq!(table[1].qid, 99);
    }
}
