//! The in-memory geometry cache.
//!
//! Four flat arrays hold every geometry the backend returned: projected
//! points, the delta-coded line-point stream, per-line start offsets into
//! that stream, and the entity-id join table. The arrays are immutable
//! once the cache is built; queries join external id lists against the
//! sorted table and resolve [`GeomId`]s to stored geometry.

use crate::id::{GeomId, IdMapping, INVALID_ID};
use crate::mcoord::{self, LinePoint};
use crate::webmerc::{FBox, FPoint};

/// Immutable geometry cache, built by the ingest pipeline or loaded from
/// a snapshot.
#[derive(Debug, Default)]
pub struct GeomCache {
    points: Vec<FPoint>,
    line_points: Vec<LinePoint>,
    lines: Vec<u64>,
    qid_to_id: Vec<IdMapping>,
    ready: bool,
}

impl GeomCache {
    /// An empty, not-yet-built cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Assemble a ready cache from its four arrays.
    ///
    /// `qid_to_id` must already be sorted by `(qid, id)`.
    pub fn from_parts(
        points: Vec<FPoint>,
        line_points: Vec<LinePoint>,
        lines: Vec<u64>,
        qid_to_id: Vec<IdMapping>,
    ) -> Self {
        debug_assert!(qid_to_id.windows(2).all(|w| w[0] <= w[1]));
        Self {
            points,
            line_points,
            lines,
            qid_to_id,
            ready: true,
        }
    }

    /// Whether a build has completed for this cache.
    pub fn is_ready(&self) -> bool {
        self.ready
    }

    pub fn points(&self) -> &[FPoint] {
        &self.points
    }

    pub fn line_points(&self) -> &[LinePoint] {
        &self.line_points
    }

    pub fn lines(&self) -> &[u64] {
        &self.lines
    }

    pub fn qid_to_id(&self) -> &[IdMapping] {
        &self.qid_to_id
    }

    pub fn point(&self, pid: usize) -> FPoint {
        self.points[pid]
    }

    /// Start offset of a line in the slot stream.
    pub fn line_start(&self, lid: usize) -> usize {
        self.lines[lid] as usize
    }

    /// One-past-the-end offset of a line in the slot stream.
    pub fn line_end(&self, lid: usize) -> usize {
        self.lines
            .get(lid + 1)
            .map(|&o| o as usize)
            .unwrap_or(self.line_points.len())
    }

    /// All slots of a line, bbox prefix and terminator included.
    pub fn line_slots(&self, lid: usize) -> &[LinePoint] {
        &self.line_points[self.line_start(lid)..self.line_end(lid)]
    }

    /// The precomputed bounding box of a line.
    pub fn line_bbox(&self, lid: usize) -> FBox {
        mcoord::read_bbox(self.line_slots(lid))
    }

    /// Whether a line is a filled-area ring.
    pub fn line_is_area(&self, lid: usize) -> bool {
        mcoord::is_area(self.line_slots(lid))
    }

    /// Decoded geometry points of a line (bbox prefix skipped).
    pub fn line_geometry(&self, lid: usize) -> impl Iterator<Item = FPoint> + '_ {
        mcoord::decode_geometry(self.line_slots(lid))
    }

    /// Join a sorted external id list against the sorted table.
    ///
    /// Emits one `(geometry id, result row)` pair per table entry whose
    /// qid matches; consecutive entries with the same qid are the
    /// constituents of a multi-geometry and all match the same row.
    /// Sentinel entries (unparsable geometry) are skipped. Since the
    /// table can be much larger than the probe list, the table pointer
    /// advances by galloping (doubling steps, then a binary search of
    /// the last interval).
    pub fn rel_objects(&self, ids: &[IdMapping]) -> Vec<(GeomId, u64)> {
        let table = &self.qid_to_id;

        // in most cases the result is about the size of the probe list
        let mut ret = Vec::with_capacity(ids.len());

        let mut i = 0;
        let mut j = 0;

        while i < ids.len() && j < table.len() {
            if ids[i].qid == table[j].qid {
                if table[j].id != INVALID_ID {
                    ret.push((GeomId(table[j].id), ids[i].id));
                }
                j += 1;
            } else if ids[i].qid < table[j].qid {
                i += 1;
            } else {
                let target = ids[i].qid;
                let mut step = 1;
                loop {
                    if j + step >= table.len() {
                        let lo = j + step / 2;
                        j = lo + table[lo..].partition_point(|m| m.qid < target);
                        break;
                    }
                    if table[j + step].qid >= target {
                        let lo = j + step / 2;
                        j = lo + table[lo..j + step].partition_point(|m| m.qid < target);
                        break;
                    }
                    step *= 2;
                }
            }
        }

        ret
    }
}
