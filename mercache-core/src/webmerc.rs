//! WGS84 → Web-Mercator projection and float boxes.
//!
//! All internal geometry is single-precision Web-Mercator. Boxes are
//! hand-rolled rather than `geo_types::Rect` because the empty (inverted)
//! box is the natural fold identity for bounding-box accumulation.

use geo_types::Point;

/// A single-precision Web-Mercator point.
pub type FPoint = Point<f32>;

const EARTH_RADIUS_M: f64 = 6_378_137.0;

/// Project a WGS84 latitude/longitude pair to Web-Mercator metres.
pub fn latlng_to_web_merc(lat: f64, lng: f64) -> FPoint {
    let x = EARTH_RADIUS_M * lng.to_radians();
    let y = EARTH_RADIUS_M * (lat.to_radians() / 2.0 + std::f64::consts::FRAC_PI_4).tan().ln();
    Point::new(x as f32, y as f32)
}

/// A point is valid iff both components are finite.
pub fn point_valid(p: &FPoint) -> bool {
    p.x().is_finite() && p.y().is_finite()
}

/// Axis-aligned bounding box over Web-Mercator points.
///
/// The default box is empty (min > max) so it can serve as the identity
/// of [`FBox::extend`] folds.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FBox {
    pub min_x: f32,
    pub min_y: f32,
    pub max_x: f32,
    pub max_y: f32,
}

impl Default for FBox {
    fn default() -> Self {
        Self::empty()
    }
}

impl FBox {
    pub fn new(min_x: f32, min_y: f32, max_x: f32, max_y: f32) -> Self {
        Self {
            min_x,
            min_y,
            max_x,
            max_y,
        }
    }

    /// The empty (inverted) box.
    pub fn empty() -> Self {
        Self {
            min_x: f32::INFINITY,
            min_y: f32::INFINITY,
            max_x: f32::NEG_INFINITY,
            max_y: f32::NEG_INFINITY,
        }
    }

    /// A degenerate box covering a single point.
    pub fn from_point(p: FPoint) -> Self {
        Self::new(p.x(), p.y(), p.x(), p.y())
    }

    pub fn is_empty(&self) -> bool {
        self.min_x > self.max_x || self.min_y > self.max_y
    }

    /// Smallest box covering `self` and `p`.
    pub fn extend(self, p: FPoint) -> Self {
        Self {
            min_x: self.min_x.min(p.x()),
            min_y: self.min_y.min(p.y()),
            max_x: self.max_x.max(p.x()),
            max_y: self.max_y.max(p.y()),
        }
    }

    /// Smallest box covering `self` and `other`.
    pub fn extend_box(self, other: FBox) -> Self {
        Self {
            min_x: self.min_x.min(other.min_x),
            min_y: self.min_y.min(other.min_y),
            max_x: self.max_x.max(other.max_x),
            max_y: self.max_y.max(other.max_y),
        }
    }

    /// Grow the box by `d` on every side.
    pub fn pad(self, d: f32) -> Self {
        Self {
            min_x: self.min_x - d,
            min_y: self.min_y - d,
            max_x: self.max_x + d,
            max_y: self.max_y + d,
        }
    }

    pub fn intersects(&self, other: &FBox) -> bool {
        self.min_x <= other.max_x
            && self.max_x >= other.min_x
            && self.min_y <= other.max_y
            && self.max_y >= other.min_y
    }

    pub fn contains_point(&self, p: &FPoint) -> bool {
        p.x() >= self.min_x && p.x() <= self.max_x && p.y() >= self.min_y && p.y() <= self.max_y
    }

    pub fn width(&self) -> f32 {
        self.max_x - self.min_x
    }

    pub fn height(&self) -> f32 {
        self.max_y - self.min_y
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_projection_anchors() {
        let origin = latlng_to_web_merc(0.0, 0.0);
        assert!(origin.x().abs() < 1e-3);
        assert!(origin.y().abs() < 1e-3);

        // the antimeridian maps to the projection's x extent
        let anti = latlng_to_web_merc(0.0, 180.0);
        assert!((anti.x() - 20_037_508.0).abs() < 2.0);

        // northern latitudes land above southern ones
        let north = latlng_to_web_merc(48.0, 7.8);
        let south = latlng_to_web_merc(-48.0, 7.8);
        assert!(north.y() > 0.0);
        assert!((north.y() + south.y()).abs() < 1.0);
    }

    #[test]
    fn test_point_valid() {
        assert!(point_valid(&Point::new(1.0, 2.0)));
        assert!(!point_valid(&Point::new(f32::NAN, 2.0)));
        assert!(!point_valid(&Point::new(1.0, f32::INFINITY)));
    }

    #[test]
    fn test_box_fold_identity() {
        let b = FBox::empty();
        assert!(b.is_empty());
        let b = b.extend(Point::new(3.0, 4.0)).extend(Point::new(-1.0, 9.0));
        assert_eq!(b, FBox::new(-1.0, 4.0, 3.0, 9.0));
        assert!(!b.is_empty());
    }

    #[test]
    fn test_box_predicates() {
        let a = FBox::new(0.0, 0.0, 10.0, 10.0);
        let b = FBox::new(5.0, 5.0, 15.0, 15.0);
        let c = FBox::new(11.0, 11.0, 12.0, 12.0);
        assert!(a.intersects(&b));
        assert!(!a.intersects(&c));
        assert!(a.contains_point(&Point::new(10.0, 0.0)));
        assert!(!a.contains_point(&Point::new(10.1, 0.0)));
        let padded = a.pad(1.0);
        assert!(padded.contains_point(&Point::new(10.5, -0.5)));
    }
}
