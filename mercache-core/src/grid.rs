//! Uniform-cell bucket index over a Web-Mercator box.
//!
//! Cells are `cell_w` × `cell_h` metres, anchored at the lower-left
//! corner of the index box. Payloads are replicated into every cell a
//! box touches, so [`Grid::get`] may return false positives; callers
//! re-test against the actual geometry.

use crate::webmerc::{FBox, FPoint};
use rustc_hash::FxHashSet;
use std::hash::Hash;

/// Number of cells a grid with the given cell size needs to span `bbox`.
pub fn grid_dims(cell_w: f32, cell_h: f32, bbox: &FBox) -> (usize, usize) {
    if bbox.is_empty() {
        return (0, 0);
    }
    let x = (bbox.width() as f64 / cell_w as f64).ceil().max(0.0) as usize;
    let y = (bbox.height() as f64 / cell_h as f64).ceil().max(0.0) as usize;
    (x, y)
}

/// A bucket grid with payload `V`.
#[derive(Debug)]
pub struct Grid<V> {
    cell_w: f32,
    cell_h: f32,
    bbox: FBox,
    x_cells: usize,
    y_cells: usize,
    cells: Vec<Vec<V>>,
}

impl<V: Copy> Grid<V> {
    pub fn new(cell_w: f32, cell_h: f32, bbox: FBox) -> Self {
        let (x_cells, y_cells) = grid_dims(cell_w, cell_h, &bbox);
        Self {
            cell_w,
            cell_h,
            bbox,
            x_cells,
            y_cells,
            cells: vec![Vec::new(); x_cells * y_cells],
        }
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    pub fn bbox(&self) -> &FBox {
        &self.bbox
    }

    pub fn cell_width(&self) -> f32 {
        self.cell_w
    }

    pub fn cell_height(&self) -> f32 {
        self.cell_h
    }

    pub fn x_cells(&self) -> usize {
        self.x_cells
    }

    pub fn y_cells(&self) -> usize {
        self.y_cells
    }

    /// Cell column of an x coordinate, clamped to the grid.
    pub fn cell_x_from_x(&self, x: f32) -> usize {
        let c = ((x - self.bbox.min_x) as f64 / self.cell_w as f64).floor();
        (c.max(0.0) as usize).min(self.x_cells.saturating_sub(1))
    }

    /// Cell row of a y coordinate, clamped to the grid.
    pub fn cell_y_from_y(&self, y: f32) -> usize {
        let c = ((y - self.bbox.min_y) as f64 / self.cell_h as f64).floor();
        (c.max(0.0) as usize).min(self.y_cells.saturating_sub(1))
    }

    fn idx(&self, cx: usize, cy: usize) -> usize {
        cy * self.x_cells + cx
    }

    /// Add a payload at a point.
    pub fn add_point(&mut self, p: FPoint, v: V) {
        if self.is_empty() {
            return;
        }
        let cx = self.cell_x_from_x(p.x());
        let cy = self.cell_y_from_y(p.y());
        let idx = self.idx(cx, cy);
        self.cells[idx].push(v);
    }

    /// Add a payload to every cell a box intersects.
    pub fn add_box(&mut self, b: &FBox, v: V) {
        if self.is_empty() || b.is_empty() {
            return;
        }
        let x0 = self.cell_x_from_x(b.min_x);
        let x1 = self.cell_x_from_x(b.max_x);
        let y0 = self.cell_y_from_y(b.min_y);
        let y1 = self.cell_y_from_y(b.max_y);
        for cy in y0..=y1 {
            for cx in x0..=x1 {
                let idx = self.idx(cx, cy);
                self.cells[idx].push(v);
            }
        }
    }

    /// Add a payload directly to a cell.
    pub fn add_cell(&mut self, cx: usize, cy: usize, v: V) {
        if cx < self.x_cells && cy < self.y_cells {
            let idx = self.idx(cx, cy);
            self.cells[idx].push(v);
        }
    }

    /// Contents of a single cell.
    pub fn cell(&self, cx: usize, cy: usize) -> &[V] {
        &self.cells[self.idx(cx, cy)]
    }

    /// Union of the payloads of every cell the box touches.
    ///
    /// May contain false positives (payloads whose geometry does not
    /// actually intersect the box).
    pub fn get(&self, b: &FBox, out: &mut FxHashSet<V>)
    where
        V: Eq + Hash,
    {
        if self.is_empty() || b.is_empty() || !self.bbox.intersects(b) {
            return;
        }
        let x0 = self.cell_x_from_x(b.min_x);
        let x1 = self.cell_x_from_x(b.max_x);
        let y0 = self.cell_y_from_y(b.min_y);
        let y1 = self.cell_y_from_y(b.max_y);
        for cy in y0..=y1 {
            for cx in x0..=x1 {
                out.extend(self.cell(cx, cy).iter().copied());
            }
        }
    }
}
