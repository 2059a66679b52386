//! Geometry and entity identifiers.
//!
//! A [`GeomId`] is a single `u64` tagged by range: values below
//! [`I_OFFSET`] index the point array, values from `I_OFFSET` up to the
//! sentinel index the line-offsets array (after subtracting `I_OFFSET`),
//! and `u64::MAX` marks a row whose geometry could not be parsed. The
//! integer form is what the cache stores; [`GeomId::classify`] gives the
//! sum-type view for dispatch.

/// First geometry id that refers to a line rather than a point.
///
/// Large enough that a point array can never grow into the line range.
pub const I_OFFSET: u64 = 1 << 40;

/// Sentinel id for rows whose geometry is unparsable or invalid.
pub const INVALID_ID: u64 = u64::MAX;

/// Preliminary qid of a principal row during ingest, before the binary-id
/// pass fills in the real entity id.
pub const QID_PRINCIPAL: u64 = 0;

/// Preliminary qid marking a multi-geometry continuation row during
/// ingest. Rewritten to the principal's entity id by the binary-id pass.
///
/// The backend is assumed never to mint the entity ids 0 or 1; rows whose
/// placeholder is neither are skipped with a warning during the id pass.
pub const QID_CONTINUATION: u64 = 1;

/// Identifier of a cached geometry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct GeomId(pub u64);

/// Range-decoded view of a [`GeomId`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GeomRef {
    /// Index into the point array.
    Point(usize),
    /// Index into the line-offsets array.
    Line(usize),
    /// Unparsable/invalid geometry.
    Invalid,
}

impl GeomId {
    /// The invalid-geometry sentinel.
    pub const INVALID: GeomId = GeomId(INVALID_ID);

    /// Id of the point at `idx`.
    pub fn point(idx: u64) -> Self {
        debug_assert!(idx < I_OFFSET);
        GeomId(idx)
    }

    /// Id of the line at `idx`.
    pub fn line(idx: u64) -> Self {
        debug_assert!(idx < INVALID_ID - I_OFFSET);
        GeomId(I_OFFSET + idx)
    }

    /// Raw integer form.
    pub fn value(self) -> u64 {
        self.0
    }

    /// Decode the range tag.
    pub fn classify(self) -> GeomRef {
        if self.0 == INVALID_ID {
            GeomRef::Invalid
        } else if self.0 < I_OFFSET {
            GeomRef::Point(self.0 as usize)
        } else {
            GeomRef::Line((self.0 - I_OFFSET) as usize)
        }
    }

    pub fn is_point(self) -> bool {
        self.0 < I_OFFSET
    }

    pub fn is_line(self) -> bool {
        self.0 >= I_OFFSET && self.0 != INVALID_ID
    }

    pub fn is_invalid(self) -> bool {
        self.0 == INVALID_ID
    }
}

/// Mapping between a backend entity id (`qid`) and an internal geometry
/// id (`id`).
///
/// During ingest the table holds one entry per WKT row in insertion
/// order, with `qid` still a placeholder; the binary-id pass fills in the
/// real entity ids, after which the table is sorted by `(qid, id)`.
/// The derived ordering is exactly that lexicographic pair order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct IdMapping {
    pub qid: u64,
    pub id: u64,
}

impl IdMapping {
    /// Size of a serialized mapping in bytes.
    pub const SIZE: usize = 16;

    pub fn new(qid: u64, id: u64) -> Self {
        Self { qid, id }
    }

    /// Serialize to bytes (little-endian).
    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut buf = [0u8; Self::SIZE];
        buf[0..8].copy_from_slice(&self.qid.to_le_bytes());
        buf[8..16].copy_from_slice(&self.id.to_le_bytes());
        buf
    }

    /// Deserialize from bytes.
    pub fn from_bytes(data: &[u8; Self::SIZE]) -> Self {
        Self {
            qid: u64::from_le_bytes(data[0..8].try_into().unwrap()),
            id: u64::from_le_bytes(data[8..16].try_into().unwrap()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_ranges() {
        assert_eq!(GeomId::point(7).classify(), GeomRef::Point(7));
        assert_eq!(GeomId::line(3).classify(), GeomRef::Line(3));
        assert_eq!(GeomId::INVALID.classify(), GeomRef::Invalid);
        assert!(GeomId::point(0).is_point());
        assert!(GeomId::line(0).is_line());
        assert!(!GeomId::INVALID.is_line());
    }

    #[test]
    fn test_mapping_order_is_qid_then_id() {
        let a = IdMapping::new(1, 9);
        let b = IdMapping::new(2, 0);
        let c = IdMapping::new(2, 1);
        assert!(a < b);
        assert!(b < c);
    }

    #[test]
    fn test_mapping_roundtrip() {
        let m = IdMapping::new(0xDEAD_BEEF, I_OFFSET + 12);
        assert_eq!(IdMapping::from_bytes(&m.to_bytes()), m);
    }
}
