//! Streaming TSV/WKT scanner.
//!
//! Consumes the backend's tab-separated response byte by byte and emits
//! geometry records into a [`GeomSink`]. The scanner is resumable at any
//! chunk boundary: partial fields stay in the dangling buffer until the
//! field terminator arrives. The header line of every page is skipped.
//!
//! Per field the scanner dispatches on the WKT prefix of the quoted
//! literal; anything else becomes a sentinel row. Identical consecutive
//! single-geometry literals reuse the previously stored geometry instead
//! of being parsed again.

use geo::Simplify;
use geo_types::LineString;
use tracing::info;

use mercache_core::{
    latlng_to_web_merc, point_valid, FPoint, IdMapping, INVALID_ID, I_OFFSET, QID_CONTINUATION,
    QID_PRINCIPAL,
};

use crate::error::Result;
use crate::sink::GeomSink;

/// Douglas–Peucker tolerance for ingested rings, in Mercator metres.
const SIMPLIFY_EPS_M: f32 = 3.0;

/// Maximum segment length after densification, in Mercator metres.
const DENSIFY_MAX_M: f32 = 600.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ScanState {
    InHeader,
    InRow,
}

/// Byte-streaming scanner over TSV pages whose last column is a WKT
/// literal.
pub struct WktScanner {
    state: ScanState,
    dangling: Vec<u8>,
    prev: Vec<u8>,
    last_mapping: IdMapping,
    sink: GeomSink,
    cur_row: u64,
    unique_geoms: u64,
    total_rows: u64,
}

impl WktScanner {
    /// `total_rows` is the count-query result, used for progress logging
    /// only.
    pub fn new(sink: GeomSink, total_rows: u64) -> Self {
        Self {
            state: ScanState::InHeader,
            dangling: Vec::with_capacity(10_000),
            prev: Vec::new(),
            last_mapping: IdMapping::new(u64::MAX, u64::MAX),
            sink,
            cur_row: 0,
            unique_geoms: 0,
            total_rows,
        }
    }

    /// Rows fully consumed so far, across pages.
    pub fn cur_row(&self) -> u64 {
        self.cur_row
    }

    /// Geometries that went through a full parse (dedup hits excluded).
    pub fn unique_geoms(&self) -> u64 {
        self.unique_geoms
    }

    pub fn sink(&self) -> &GeomSink {
        &self.sink
    }

    pub fn into_sink(self) -> GeomSink {
        self.sink
    }

    /// Reset the per-page transport state. The row counter, dedup buffer
    /// and sink survive across pages.
    pub fn begin_page(&mut self) {
        self.state = ScanState::InHeader;
        self.dangling.clear();
    }

    /// Consume one chunk of the response body.
    pub fn feed(&mut self, bytes: &[u8]) -> Result<()> {
        for &b in bytes {
            match self.state {
                ScanState::InHeader => {
                    if b == b'\n' {
                        self.state = ScanState::InRow;
                    }
                }
                ScanState::InRow => {
                    if b == b'\t' || b == b'\n' {
                        self.handle_field()?;
                        std::mem::swap(&mut self.prev, &mut self.dangling);
                        self.dangling.clear();
                        if b == b'\n' {
                            self.cur_row += 1;
                            if self.cur_row % 1_000_000 == 0 {
                                let pct = if self.total_rows > 0 {
                                    self.cur_row as f64 / self.total_rows as f64 * 100.0
                                } else {
                                    0.0
                                };
                                info!(
                                    row = self.cur_row,
                                    pct = format!("{pct:.2}"),
                                    points = self.sink.num_points(),
                                    lines = self.sink.num_lines(),
                                    "parsing geometry rows"
                                );
                            }
                        }
                    } else {
                        self.dangling.push(b);
                    }
                }
            }
        }
        Ok(())
    }

    fn handle_field(&mut self) -> Result<()> {
        // identical consecutive literal of a single-geometry row: reuse
        // the stored geometry instead of re-parsing
        if self.dangling == self.prev && self.last_mapping.qid == QID_PRINCIPAL {
            let reuse = IdMapping::new(QID_PRINCIPAL, self.last_mapping.id);
            return self.emit(reuse);
        }

        let field = std::mem::take(&mut self.dangling);
        let res = self.dispatch(&field);
        self.dangling = field;
        res
    }

    fn dispatch(&mut self, field: &[u8]) -> Result<()> {
        if let Some(rest) = field.strip_prefix(b"\"POINT(".as_slice()) {
            self.unique_geoms += 1;
            let p = parse_point(rest);
            if point_valid(&p) {
                let idx = self.sink.append_point(p)?;
                self.emit(IdMapping::new(QID_PRINCIPAL, idx))
            } else {
                self.emit(IdMapping::new(QID_PRINCIPAL, INVALID_ID))
            }
        } else if let Some(rest) = field.strip_prefix(b"\"LINESTRING(".as_slice()) {
            self.unique_geoms += 1;
            let ring = parse_ring(rest);
            if ring.is_empty() {
                self.emit(IdMapping::new(QID_PRINCIPAL, INVALID_ID))
            } else {
                let lid = self.sink.append_line(&ring, false)?;
                self.emit(IdMapping::new(QID_PRINCIPAL, I_OFFSET + lid))
            }
        } else if let Some(rest) = field.strip_prefix(b"\"MULTILINESTRING(".as_slice()) {
            self.unique_geoms += 1;
            self.multi_rings(rest, false)
        } else if let Some(rest) = field.strip_prefix(b"\"POLYGON(".as_slice()) {
            self.unique_geoms += 1;
            self.multi_rings(rest, true)
        } else if let Some(rest) = field.strip_prefix(b"\"MULTIPOLYGON(".as_slice()) {
            self.unique_geoms += 1;
            self.multi_rings(rest, true)
        } else {
            self.emit(IdMapping::new(QID_PRINCIPAL, INVALID_ID))
        }
    }

    /// Emit one line per `(...)` sub-list. The first emitted line is the
    /// principal row; the rest are continuations. Rings of polygons keep
    /// the area marker; outer and inner rings are not distinguished.
    fn multi_rings(&mut self, rest: &[u8], is_area: bool) -> Result<()> {
        let mut emitted = 0u64;
        let mut i = 0;
        while i < rest.len() {
            // a '(' directly followed by a coordinate opens a ring; the
            // extra paren of a MULTIPOLYGON polygon is nesting only
            if rest[i] == b'(' && rest.get(i + 1) != Some(&b'(') {
                let ring = parse_ring(&rest[i + 1..]);
                if !ring.is_empty() {
                    let lid = self.sink.append_line(&ring, is_area)?;
                    let qid = if emitted == 0 {
                        QID_PRINCIPAL
                    } else {
                        QID_CONTINUATION
                    };
                    self.emit(IdMapping::new(qid, I_OFFSET + lid))?;
                    emitted += 1;
                }
                while i < rest.len() && rest[i] != b')' {
                    i += 1;
                }
            }
            i += 1;
        }
        if emitted == 0 {
            self.emit(IdMapping::new(QID_PRINCIPAL, INVALID_ID))?;
        }
        Ok(())
    }

    fn emit(&mut self, m: IdMapping) -> Result<()> {
        self.last_mapping = m;
        self.sink.append_mapping(m)?;
        Ok(())
    }
}

/// Parse a `lat lon` pair and project it. Malformed input yields an
/// invalid (NaN) point, which callers turn into the sentinel.
fn parse_coord_pair(bytes: &[u8]) -> Option<FPoint> {
    let s = std::str::from_utf8(bytes).ok()?;
    let mut it = s.split_whitespace();
    let lat: f64 = it.next()?.parse().ok()?;
    let lng: f64 = it.next()?.parse().ok()?;
    Some(latlng_to_web_merc(lat, lng))
}

fn parse_point(bytes: &[u8]) -> FPoint {
    let end = bytes
        .iter()
        .position(|&b| b == b')')
        .unwrap_or(bytes.len());
    parse_coord_pair(&bytes[..end]).unwrap_or_else(|| FPoint::new(f32::NAN, f32::NAN))
}

/// Parse a comma-separated ring terminated by `)`, dropping invalid
/// points, then simplify and densify it.
fn parse_ring(bytes: &[u8]) -> Vec<FPoint> {
    let end = bytes
        .iter()
        .position(|&b| b == b')')
        .unwrap_or(bytes.len());

    let mut line = Vec::new();
    for pair in bytes[..end].split(|&b| b == b',') {
        if let Some(p) = parse_coord_pair(pair) {
            if point_valid(&p) {
                line.push(p);
            }
        }
    }
    if line.is_empty() {
        return line;
    }

    let simplified: LineString<f32> = LineString::from(line).simplify(&SIMPLIFY_EPS_M);
    densify(&simplified.into_points(), DENSIFY_MAX_M)
}

/// Insert intermediate points so no segment exceeds `max_len`.
fn densify(line: &[FPoint], max_len: f32) -> Vec<FPoint> {
    let mut out = Vec::with_capacity(line.len());
    for w in line.windows(2) {
        let (a, b) = (w[0], w[1]);
        out.push(a);
        let dx = b.x() - a.x();
        let dy = b.y() - a.y();
        let len = (dx * dx + dy * dy).sqrt();
        if len > max_len {
            let n = (len / max_len).ceil() as usize;
            for k in 1..n {
                let t = k as f32 / n as f32;
                out.push(FPoint::new(a.x() + dx * t, a.y() + dy * t));
            }
        }
    }
    if let Some(&last) = line.last() {
        out.push(last);
    }
    out
}
