//! Normalized-coordinate geometry used by ROI and tripwire policy.

use serde::{Deserialize, Serialize};

/// Point in normalized `[0, 1]` coordinates, independent of frame size.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct NormPoint {
    pub x: f64,
    pub y: f64,
}

impl NormPoint {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    /// Fuzzy origin test, matching the config rule that a tripwire anchored
    /// at the origin on both ends is absent.
    pub fn is_origin(&self) -> bool {
        self.x.abs() < 1e-9 && self.y.abs() < 1e-9
    }

    pub fn distance_to(&self, other: &NormPoint) -> f64 {
        let dx = self.x - other.x;
        let dy = self.y - other.y;
        (dx * dx + dy * dy).sqrt()
    }
}

/// Directed line segment in normalized coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Tripwire {
    pub start: NormPoint,
    pub end: NormPoint,
}

impl Tripwire {
    pub fn new(start: NormPoint, end: NormPoint) -> Self {
        Self { start, end }
    }

    /// Signed side of the line for `point`; the sign flips when the line is
    /// crossed.
    pub fn side(&self, point: &NormPoint) -> f64 {
        side_of_line(point, &self.start, &self.end)
    }
}

/// Cross product `(p − a) × (b − a)`: positive on one side of the directed
/// line `a → b`, negative on the other, zero on the line.
pub fn side_of_line(p: &NormPoint, a: &NormPoint, b: &NormPoint) -> f64 {
    (p.x - a.x) * (b.y - a.y) - (p.y - a.y) * (b.x - a.x)
}

/// Ray-casting point-in-polygon test.
///
/// Polygons with fewer than three vertices contain nothing.
pub fn point_in_polygon(point: &NormPoint, polygon: &[NormPoint]) -> bool {
    let n = polygon.len();
    if n < 3 {
        return false;
    }

    let mut inside = false;
    let mut j = n - 1;
    for i in 0..n {
        let pi = polygon[i];
        let pj = polygon[j];
        if ((pi.y > point.y) != (pj.y > point.y))
            && (point.x < (pj.x - pi.x) * (point.y - pi.y) / (pj.y - pi.y) + pi.x)
        {
            inside = !inside;
        }
        j = i;
    }

    inside
}
