//! Per-query result set over the geometry cache.
//!
//! [`Requestor::request`] runs a user query against the backend's binary
//! id protocol, joins the sorted id list against the cache's join table
//! and builds three grids over the result:
//!
//! - `pgrid`: point objects by position
//! - `lgrid`: line objects by bounding box
//! - `lpgrid`: per-cell 8-bit sub-pixel dots of the line geometry, the
//!   compact dot list downstream rendering draws at low zoom
//!
//! The result set is pinned to the object: the first successful build
//! wins and later `request` calls are no-ops. Readers fail with
//! [`QueryError::CacheNotReady`] until a build commits.

use std::sync::{Arc, OnceLock};

use geo::{ClosestPoint, Contains, Simplify};
use geo_types::{LineString, Polygon};
use rayon::prelude::*;
use rustc_hash::FxHashSet;
use tracing::info;

use mercache_backend::{prep_query, SparqlBackend};
use mercache_core::grid::grid_dims;
use mercache_core::{mem, FBox, FPoint, GeomCache, GeomId, GeomRef, Grid, IdMapping};

use crate::error::{QueryError, Result};

/// Grid cell side in Mercator metres.
const GRID_SIZE: f32 = 65536.0;

/// Objects between memory probes while filling a grid.
const MEM_CHECK_INTERVAL: usize = 100_000;

/// A result object: geometry id plus the result row it came from.
pub type ResultObject = (GeomId, u64);

/// Nearest-object search result (CPU part, before the row fetch).
#[derive(Debug, Clone, Copy)]
pub struct Nearest {
    /// Index into the result objects.
    pub object: usize,
    /// Distance from the reference point in Mercator metres.
    pub distance: f64,
    /// The point to highlight: the object itself, the projection of the
    /// reference point onto the polyline, or the reference point when it
    /// lies inside an area.
    pub visual: FPoint,
}

/// Full nearest-object answer, row values and reassembled geometry
/// included.
#[derive(Debug, Clone)]
pub struct ResObj {
    pub found: bool,
    /// Index into the result objects (0 when not found).
    pub object: usize,
    pub visual_geom: FPoint,
    /// `(column, value)` pairs of the backing result row.
    pub row: Vec<(String, String)>,
    pub multi_line: Vec<Vec<FPoint>>,
    pub multi_poly: Vec<Vec<FPoint>>,
}

impl ResObj {
    fn not_found() -> Self {
        Self {
            found: false,
            object: 0,
            visual_geom: FPoint::new(0.0, 0.0),
            row: Vec::new(),
            multi_line: Vec::new(),
            multi_poly: Vec::new(),
        }
    }
}

struct BuiltQuery {
    query: String,
    objects: Vec<ResultObject>,
    pgrid: Grid<usize>,
    lgrid: Grid<usize>,
    lpgrid: Grid<(u8, u8)>,
}

/// One user query's immutable view over the geometry cache.
pub struct Requestor {
    cache: Arc<GeomCache>,
    backend: SparqlBackend,
    max_memory: usize,
    build_lock: tokio::sync::Mutex<()>,
    built: OnceLock<BuiltQuery>,
}

impl Requestor {
    pub fn new(cache: Arc<GeomCache>, backend: SparqlBackend, max_memory: usize) -> Self {
        Self {
            cache,
            backend,
            max_memory,
            build_lock: tokio::sync::Mutex::new(()),
            built: OnceLock::new(),
        }
    }

    /// Whether a result set has been built.
    pub fn is_ready(&self) -> bool {
        self.built.get().is_some()
    }

    /// The joined result objects, in join scan order.
    pub fn objects(&self) -> Result<&[ResultObject]> {
        Ok(&self.built()?.objects)
    }

    /// The sub-pixel dot grid of the line geometry.
    pub fn line_point_grid(&self) -> Result<&Grid<(u8, u8)>> {
        Ok(&self.built()?.lpgrid)
    }

    /// Fetch the query's entity ids from the backend and build the
    /// result set. Idempotent: once built, later calls return without
    /// touching the backend.
    pub async fn request(&self, query: &str) -> Result<()> {
        let _guard = self.build_lock.lock().await;
        if self.built.get().is_some() {
            return Ok(());
        }
        if !self.cache.is_ready() {
            return Err(QueryError::CacheNotReady);
        }

        info!(query, "requesting entity ids");
        let mut ids = self
            .backend
            .fetch_ids(&prep_query(query), self.max_memory)
            .await?;

        info!(ids = ids.len(), "sorting ids");
        ids.par_sort_unstable();

        self.build_with_ids(query, ids)
    }

    /// Build the result set from a pre-fetched id list (sorted by qid).
    pub async fn request_with_ids(&self, query: &str, ids: Vec<IdMapping>) -> Result<()> {
        let _guard = self.build_lock.lock().await;
        if self.built.get().is_some() {
            return Ok(());
        }
        if !self.cache.is_ready() {
            return Err(QueryError::CacheNotReady);
        }
        self.build_with_ids(query, ids)
    }

    fn build_with_ids(&self, query: &str, ids: Vec<IdMapping>) -> Result<()> {
        let objects = self.cache.rel_objects(&ids);
        info!(objects = objects.len(), "joined ids against the cache");

        let (point_bbox, line_bbox) = self.result_bboxes(&objects);
        // pad so a single requested point still yields a non-degenerate box
        let point_bbox = point_bbox.pad(1.0);
        let line_bbox = line_bbox.pad(1.0);

        let (pxc, pyc) = grid_dims(GRID_SIZE, GRID_SIZE, &point_bbox);
        let (lxc, lyc) = grid_dims(GRID_SIZE, GRID_SIZE, &line_bbox);
        info!(
            point_cells = pxc * pyc,
            line_cells = lxc * lyc,
            "building grids"
        );
        mem::check_mem(8 * pxc * pyc, self.max_memory)?;
        mem::check_mem(2 * 8 * lxc * lyc, self.max_memory)?;

        let mut pgrid = Grid::new(GRID_SIZE, GRID_SIZE, point_bbox);
        let mut lgrid = Grid::new(GRID_SIZE, GRID_SIZE, line_bbox);
        let mut lpgrid = Grid::new(GRID_SIZE, GRID_SIZE, line_bbox);

        // three independent sections; the first error wins after the join
        let (pres, (lres, lpres)) = rayon::join(
            || self.fill_point_grid(&objects, &mut pgrid),
            || {
                rayon::join(
                    || self.fill_line_grid(&objects, &mut lgrid),
                    || self.fill_line_point_grid(&objects, &mut lpgrid),
                )
            },
        );
        pres?;
        lres?;
        lpres?;

        let _ = self.built.set(BuiltQuery {
            query: query.to_string(),
            objects,
            pgrid,
            lgrid,
            lpgrid,
        });
        info!("result set ready");
        Ok(())
    }

    /// Bounding boxes of the result's points and lines, accumulated over
    /// parallel chunks and reduced.
    fn result_bboxes(&self, objects: &[ResultObject]) -> (FBox, FBox) {
        if objects.is_empty() {
            return (FBox::empty(), FBox::empty());
        }
        let threads = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);
        let batch = objects.len().div_ceil(threads).max(1);

        objects
            .par_chunks(batch)
            .map(|chunk| {
                let mut points = FBox::empty();
                let mut lines = FBox::empty();
                for (gid, _) in chunk {
                    match gid.classify() {
                        GeomRef::Point(pid) => points = points.extend(self.cache.point(pid)),
                        GeomRef::Line(lid) => {
                            lines = lines.extend_box(self.cache.line_bbox(lid))
                        }
                        GeomRef::Invalid => {}
                    }
                }
                (points, lines)
            })
            .reduce(
                || (FBox::empty(), FBox::empty()),
                |a, b| (a.0.extend_box(b.0), a.1.extend_box(b.1)),
            )
    }

    fn fill_point_grid(&self, objects: &[ResultObject], grid: &mut Grid<usize>) -> Result<()> {
        for (i, (gid, _)) in objects.iter().enumerate() {
            if let GeomRef::Point(pid) = gid.classify() {
                grid.add_point(self.cache.point(pid), i);
            }
            if (i + 1) % MEM_CHECK_INTERVAL == 0 {
                mem::check_mem(1, self.max_memory)?;
            }
        }
        Ok(())
    }

    fn fill_line_grid(&self, objects: &[ResultObject], grid: &mut Grid<usize>) -> Result<()> {
        for (i, (gid, _)) in objects.iter().enumerate() {
            if let GeomRef::Line(lid) = gid.classify() {
                grid.add_box(&self.cache.line_bbox(lid), i);
            }
            if (i + 1) % MEM_CHECK_INTERVAL == 0 {
                mem::check_mem(1, self.max_memory)?;
            }
        }
        Ok(())
    }

    /// Re-decode every line and drop one 8-bit sub-pixel dot per distinct
    /// position into the cell the geometry point falls in.
    fn fill_line_point_grid(
        &self,
        objects: &[ResultObject],
        grid: &mut Grid<(u8, u8)>,
    ) -> Result<()> {
        if grid.is_empty() {
            return Ok(());
        }
        let sub_w = grid.cell_width() / 256.0;
        let sub_h = grid.cell_height() / 256.0;

        for (i, (gid, _)) in objects.iter().enumerate() {
            if let GeomRef::Line(lid) = gid.classify() {
                let mut last = None;
                for p in self.cache.line_geometry(lid) {
                    let cx = grid.cell_x_from_x(p.x());
                    let cy = grid.cell_y_from_y(p.y());
                    let off_x = p.x() - (grid.bbox().min_x + cx as f32 * grid.cell_width());
                    let off_y = p.y() - (grid.bbox().min_y + cy as f32 * grid.cell_height());
                    let sx = (off_x / sub_w).clamp(0.0, 255.0) as u8;
                    let sy = (off_y / sub_h).clamp(0.0, 255.0) as u8;
                    if last != Some((sx, sy)) {
                        grid.add_cell(cx, cy, (sx, sy));
                        last = Some((sx, sy));
                    }
                }
            }
            if (i + 1) % MEM_CHECK_INTERVAL == 0 {
                mem::check_mem(1, self.max_memory)?;
            }
        }
        Ok(())
    }

    /// Result objects whose point lies in the box or whose line bounding
    /// box intersects it, as sorted object indexes.
    pub fn get_objects(&self, bbox: &FBox) -> Result<Vec<usize>> {
        let built = self.built()?;

        let mut cand = FxHashSet::default();
        built.pgrid.get(bbox, &mut cand);
        built.lgrid.get(bbox, &mut cand);

        let mut out: Vec<usize> = cand
            .into_iter()
            .filter(|&i| match built.objects[i].0.classify() {
                GeomRef::Point(pid) => bbox.contains_point(&self.cache.point(pid)),
                GeomRef::Line(lid) => bbox.intersects(&self.cache.line_bbox(lid)),
                GeomRef::Invalid => false,
            })
            .collect();
        out.sort_unstable();
        Ok(out)
    }

    /// Nearest result object around `rp` within `radius`, CPU part only.
    ///
    /// Point and line candidates are searched concurrently; ties break
    /// toward the point.
    pub fn find_nearest(&self, rp: FPoint, radius: f64) -> Result<Option<Nearest>> {
        let built = self.built()?;
        let bbox = FBox::from_point(rp).pad(radius as f32);

        let (best_point, best_line) = rayon::join(
            || self.nearest_point(built, rp, &bbox),
            || self.nearest_line(built, rp, radius, &bbox),
        );

        if let Some((object, distance)) = best_point {
            if distance < radius && best_line.map_or(true, |(_, dl)| distance <= dl) {
                let GeomRef::Point(pid) = built.objects[object].0.classify() else {
                    unreachable!("point candidates are point objects");
                };
                return Ok(Some(Nearest {
                    object,
                    distance,
                    visual: self.cache.point(pid),
                }));
            }
        }

        if let Some((object, distance)) = best_line {
            if distance < radius {
                let GeomRef::Line(lid) = built.objects[object].0.classify() else {
                    unreachable!("line candidates are line objects");
                };
                let pts: Vec<FPoint> = self.cache.line_geometry(lid).collect();
                let visual = if self.cache.line_is_area(lid) && ring_contains(&pts, rp) {
                    rp
                } else {
                    project_on_polyline(&pts, rp)
                };
                return Ok(Some(Nearest {
                    object,
                    distance,
                    visual,
                }));
            }
        }

        Ok(None)
    }

    fn nearest_point(
        &self,
        built: &BuiltQuery,
        rp: FPoint,
        bbox: &FBox,
    ) -> Option<(usize, f64)> {
        let mut cand = FxHashSet::default();
        built.pgrid.get(bbox, &mut cand);
        let cand: Vec<usize> = cand.into_iter().collect();

        cand.into_par_iter()
            .filter_map(|i| {
                let GeomRef::Point(pid) = built.objects[i].0.classify() else {
                    return None;
                };
                let p = self.cache.point(pid);
                if !bbox.contains_point(&p) {
                    return None;
                }
                Some((i, dist(p, rp)))
            })
            .min_by(|a, b| a.1.total_cmp(&b.1).then(a.0.cmp(&b.0)))
    }

    fn nearest_line(
        &self,
        built: &BuiltQuery,
        rp: FPoint,
        radius: f64,
        bbox: &FBox,
    ) -> Option<(usize, f64)> {
        let mut cand = FxHashSet::default();
        built.lgrid.get(bbox, &mut cand);
        let cand: Vec<usize> = cand.into_iter().collect();

        cand.into_par_iter()
            .filter_map(|i| {
                let GeomRef::Line(lid) = built.objects[i].0.classify() else {
                    return None;
                };
                if !self.cache.line_bbox(lid).intersects(bbox) {
                    return None;
                }

                let pts: Vec<FPoint> = self.cache.line_geometry(lid).collect();
                let mut d = f64::INFINITY;
                for w in pts.windows(2) {
                    let dt = dist_to_segment(w[0], w[1], rp);
                    if dt < 1e-4 {
                        d = 0.0;
                        break;
                    }
                    if dt < d {
                        d = dt;
                    }
                }

                // a surrounding area must not shadow small objects inside
                // it: bias its distance to a quarter of the search radius
                if self.cache.line_is_area(lid) && ring_contains(&pts, rp) {
                    d = radius / 4.0;
                }

                Some((i, d))
            })
            .min_by(|a, b| a.1.total_cmp(&b.1).then(a.0.cmp(&b.0)))
    }

    /// Full nearest-object lookup: search, fetch the backing result row,
    /// and reassemble the object's (multi-)geometry.
    pub async fn get_nearest(&self, rp: FPoint, radius: f64) -> Result<ResObj> {
        let Some(nearest) = self.find_nearest(rp, radius)? else {
            return Ok(ResObj::not_found());
        };

        let built = self.built()?;
        let row = built.objects[nearest.object].1;
        let row_kvs = self.backend.fetch_row(&built.query, row).await?;
        let (multi_line, multi_poly) = self.get_geom(nearest.object, radius)?;

        Ok(ResObj {
            found: true,
            object: nearest.object,
            visual_geom: nearest.visual,
            row: row_kvs,
            multi_line,
            multi_poly,
        })
    }

    /// Fetch one row of the pinned query as `(column, value)` pairs.
    pub async fn request_row(&self, row: u64) -> Result<Vec<(String, String)>> {
        let built = self.built()?;
        Ok(self.backend.fetch_row(&built.query, row).await?)
    }

    /// The displayable geometry of a result object: open lines,
    /// simplified with `eps = radius / 10`, and area rings. Constituents
    /// of a multi-geometry are gathered by walking neighbouring objects
    /// that share the same result row, in both directions.
    #[allow(clippy::type_complexity)]
    pub fn get_geom(
        &self,
        object: usize,
        radius: f64,
    ) -> Result<(Vec<Vec<FPoint>>, Vec<Vec<FPoint>>)> {
        let built = self.built()?;
        let row = built.objects[object].1;

        let mut start = object;
        while start > 0 && built.objects[start - 1].1 == row {
            start -= 1;
        }
        let mut end = object + 1;
        while end < built.objects.len() && built.objects[end].1 == row {
            end += 1;
        }

        let eps = (radius / 10.0) as f32;
        let mut multi_line = Vec::new();
        let mut multi_poly = Vec::new();

        for (gid, _) in &built.objects[start..end] {
            if let GeomRef::Line(lid) = gid.classify() {
                let pts: Vec<FPoint> = self.cache.line_geometry(lid).collect();
                if self.cache.line_is_area(lid) {
                    multi_poly.push(pts);
                } else {
                    let simplified: LineString<f32> = LineString::from(pts).simplify(&eps);
                    multi_line.push(simplified.into_points());
                }
            }
        }

        Ok((multi_line, multi_poly))
    }

    fn built(&self) -> Result<&BuiltQuery> {
        self.built.get().ok_or(QueryError::CacheNotReady)
    }
}

fn dist(a: FPoint, b: FPoint) -> f64 {
    let dx = (a.x() - b.x()) as f64;
    let dy = (a.y() - b.y()) as f64;
    (dx * dx + dy * dy).sqrt()
}

/// Distance from `p` to the segment `a`–`b`.
fn dist_to_segment(a: FPoint, b: FPoint, p: FPoint) -> f64 {
    let (ax, ay) = (a.x() as f64, a.y() as f64);
    let (bx, by) = (b.x() as f64, b.y() as f64);
    let (px, py) = (p.x() as f64, p.y() as f64);

    let dx = bx - ax;
    let dy = by - ay;
    let len_sq = dx * dx + dy * dy;
    if len_sq == 0.0 {
        return dist(a, p);
    }

    let t = (((px - ax) * dx + (py - ay) * dy) / len_sq).clamp(0.0, 1.0);
    let cx = ax + t * dx;
    let cy = ay + t * dy;
    ((px - cx).powi(2) + (py - cy).powi(2)).sqrt()
}

/// Whether `p` lies inside the simple polygon spanned by `ring`.
fn ring_contains(ring: &[FPoint], p: FPoint) -> bool {
    if ring.len() < 3 {
        return false;
    }
    let poly = Polygon::new(LineString::from(ring.to_vec()), Vec::new());
    poly.contains(&p)
}

/// Project `rp` onto the polyline; falls back to `rp` for degenerate
/// input.
fn project_on_polyline(pts: &[FPoint], rp: FPoint) -> FPoint {
    let ls = LineString::from(pts.to_vec());
    match ls.closest_point(&rp) {
        geo::Closest::Intersection(p) | geo::Closest::SinglePoint(p) => p,
        geo::Closest::Indeterminate => rp,
    }
}
