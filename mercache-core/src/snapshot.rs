//! Single-file binary snapshot of a geometry cache.
//!
//! The format is an implementation-private cache, not a stable
//! interchange format:
//!
//! ```text
//! count: u64 (LE)   points:      [x: f32, y: f32] * count
//! count: u64 (LE)   line points: [x: i16, y: i16] * count
//! count: u64 (LE)   line starts: [u64]            * count
//! count: u64 (LE)   id mappings: [qid: u64, id: u64] * count
//! ```

use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;

use crate::error::Result;
use crate::id::IdMapping;
use crate::mcoord::LinePoint;
use crate::store::GeomCache;
use crate::webmerc::FPoint;

/// Write a cache to a single file.
pub fn save(cache: &GeomCache, path: &Path) -> Result<()> {
    let mut w = BufWriter::new(File::create(path)?);

    w.write_all(&(cache.points().len() as u64).to_le_bytes())?;
    for p in cache.points() {
        w.write_all(&p.x().to_le_bytes())?;
        w.write_all(&p.y().to_le_bytes())?;
    }

    w.write_all(&(cache.line_points().len() as u64).to_le_bytes())?;
    for lp in cache.line_points() {
        w.write_all(&lp.to_bytes())?;
    }

    w.write_all(&(cache.lines().len() as u64).to_le_bytes())?;
    for &o in cache.lines() {
        w.write_all(&o.to_le_bytes())?;
    }

    w.write_all(&(cache.qid_to_id().len() as u64).to_le_bytes())?;
    for m in cache.qid_to_id() {
        w.write_all(&m.to_bytes())?;
    }

    w.flush()?;
    Ok(())
}

/// Read a cache back from a snapshot file. The loaded cache is ready.
pub fn load(path: &Path) -> Result<GeomCache> {
    let mut r = BufReader::new(File::open(path)?);

    let n = read_u64(&mut r)? as usize;
    let mut points = Vec::with_capacity(n);
    for _ in 0..n {
        let x = read_f32(&mut r)?;
        let y = read_f32(&mut r)?;
        points.push(FPoint::new(x, y));
    }

    let n = read_u64(&mut r)? as usize;
    let mut line_points = Vec::with_capacity(n);
    let mut buf = [0u8; LinePoint::SIZE];
    for _ in 0..n {
        r.read_exact(&mut buf)?;
        line_points.push(LinePoint::from_bytes(&buf));
    }

    let n = read_u64(&mut r)? as usize;
    let mut lines = Vec::with_capacity(n);
    for _ in 0..n {
        lines.push(read_u64(&mut r)?);
    }

    let n = read_u64(&mut r)? as usize;
    let mut qid_to_id = Vec::with_capacity(n);
    let mut buf = [0u8; IdMapping::SIZE];
    for _ in 0..n {
        r.read_exact(&mut buf)?;
        qid_to_id.push(IdMapping::from_bytes(&buf));
    }

    Ok(GeomCache::from_parts(points, line_points, lines, qid_to_id))
}

fn read_u64(r: &mut impl Read) -> Result<u64> {
    let mut buf = [0u8; 8];
    r.read_exact(&mut buf)?;
    Ok(u64::from_le_bytes(buf))
}

fn read_f32(r: &mut impl Read) -> Result<f32> {
    let mut buf = [0u8; 4];
    r.read_exact(&mut buf)?;
    Ok(f32::from_le_bytes(buf))
}
