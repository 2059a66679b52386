//! Spill files for the arrays accumulated during ingest.
//!
//! A full build can stream hundreds of millions of rows, so the four
//! arrays are appended to temp files and only loaded into vectors once
//! the download completes. Backing files are unlinked at open
//! (`tempfile::tempfile`), so a crashed build leaves no residue.

use std::fs::File;
use std::io::{BufWriter, Read, Seek, SeekFrom, Write};

use mercache_core::{encode_line, FPoint, IdMapping, LinePoint};

use crate::error::Result;

/// Append-only temp-file sink for points, line points, line offsets and
/// id mappings.
pub struct GeomSink {
    points_f: BufWriter<File>,
    line_points_f: BufWriter<File>,
    lines_f: BufWriter<File>,
    qid_f: BufWriter<File>,
    num_points: u64,
    num_line_points: u64,
    num_lines: u64,
    num_mappings: u64,
}

impl GeomSink {
    pub fn new() -> Result<Self> {
        Ok(Self {
            points_f: BufWriter::new(tempfile::tempfile()?),
            line_points_f: BufWriter::new(tempfile::tempfile()?),
            lines_f: BufWriter::new(tempfile::tempfile()?),
            qid_f: BufWriter::new(tempfile::tempfile()?),
            num_points: 0,
            num_line_points: 0,
            num_lines: 0,
            num_mappings: 0,
        })
    }

    /// Append a projected point; returns its index in the point array.
    pub fn append_point(&mut self, p: FPoint) -> Result<u64> {
        self.points_f.write_all(&p.x().to_le_bytes())?;
        self.points_f.write_all(&p.y().to_le_bytes())?;
        let idx = self.num_points;
        self.num_points += 1;
        Ok(idx)
    }

    /// Append a ring as one line record; returns its index in the
    /// line-offsets array.
    pub fn append_line(&mut self, ring: &[FPoint], is_area: bool) -> Result<u64> {
        self.lines_f.write_all(&self.num_line_points.to_le_bytes())?;

        let slots = encode_line(ring, is_area);
        for s in &slots {
            self.line_points_f.write_all(&s.to_bytes())?;
        }
        self.num_line_points += slots.len() as u64;

        let idx = self.num_lines;
        self.num_lines += 1;
        Ok(idx)
    }

    /// Append one id mapping row.
    pub fn append_mapping(&mut self, m: IdMapping) -> Result<()> {
        self.qid_f.write_all(&m.to_bytes())?;
        self.num_mappings += 1;
        Ok(())
    }

    pub fn num_points(&self) -> u64 {
        self.num_points
    }

    pub fn num_lines(&self) -> u64 {
        self.num_lines
    }

    pub fn num_mappings(&self) -> u64 {
        self.num_mappings
    }

    /// Load the spilled arrays back into vectors, consuming the sink.
    #[allow(clippy::type_complexity)]
    pub fn finish(self) -> Result<(Vec<FPoint>, Vec<LinePoint>, Vec<u64>, Vec<IdMapping>)> {
        let mut points = Vec::with_capacity(self.num_points as usize);
        for chunk in read_back(self.points_f)?.chunks_exact(8) {
            let x = f32::from_le_bytes(chunk[0..4].try_into().unwrap());
            let y = f32::from_le_bytes(chunk[4..8].try_into().unwrap());
            points.push(FPoint::new(x, y));
        }

        let mut line_points = Vec::with_capacity(self.num_line_points as usize);
        for chunk in read_back(self.line_points_f)?.chunks_exact(LinePoint::SIZE) {
            line_points.push(LinePoint::from_bytes(chunk.try_into().unwrap()));
        }

        let mut lines = Vec::with_capacity(self.num_lines as usize);
        for chunk in read_back(self.lines_f)?.chunks_exact(8) {
            lines.push(u64::from_le_bytes(chunk.try_into().unwrap()));
        }

        let mut mappings = Vec::with_capacity(self.num_mappings as usize);
        for chunk in read_back(self.qid_f)?.chunks_exact(IdMapping::SIZE) {
            mappings.push(IdMapping::from_bytes(chunk.try_into().unwrap()));
        }

        Ok((points, line_points, lines, mappings))
    }
}

fn read_back(w: BufWriter<File>) -> Result<Vec<u8>> {
    let mut f = w.into_inner().map_err(|e| e.into_error())?;
    f.seek(SeekFrom::Start(0))?;
    let mut buf = Vec::new();
    f.read_to_end(&mut buf)?;
    Ok(buf)
}
