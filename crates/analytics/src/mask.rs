//! Binary foreground masks and the pixel-space operations the motion
//! detector needs: morphology, polygon rasterization, and image moments.

/// Binary image; zero is background, anything else foreground.
#[derive(Clone)]
pub struct Mask {
    pub width: i32,
    pub height: i32,
    pub data: Vec<u8>,
}

/// Elliptical 5×5 structuring element as (dy, dx) offsets.
const ELLIPSE_5X5: [(i32, i32); 17] = [
    (-2, 0),
    (-1, -2),
    (-1, -1),
    (-1, 0),
    (-1, 1),
    (-1, 2),
    (0, -2),
    (0, -1),
    (0, 0),
    (0, 1),
    (0, 2),
    (1, -2),
    (1, -1),
    (1, 0),
    (1, 1),
    (1, 2),
    (2, 0),
];

impl Mask {
    pub fn new(width: i32, height: i32) -> Self {
        Self {
            width,
            height,
            data: vec![0; (width.max(0) as usize) * (height.max(0) as usize)],
        }
    }

    #[inline]
    fn at(&self, x: i32, y: i32) -> u8 {
        self.data[(y * self.width + x) as usize]
    }

    pub fn count_nonzero(&self) -> usize {
        self.data.iter().filter(|&&v| v != 0).count()
    }

    /// Paint a filled axis-aligned rectangle, clipped to the mask bounds.
    pub fn fill_rect(&mut self, x0: i32, y0: i32, w: i32, h: i32) {
        for y in y0.max(0)..(y0 + h).min(self.height) {
            for x in x0.max(0)..(x0 + w).min(self.width) {
                self.data[(y * self.width + x) as usize] = 255;
            }
        }
    }

    /// Pixel-wise AND with another mask of identical dimensions.
    pub fn and(&self, other: &Mask) -> Mask {
        debug_assert_eq!((self.width, self.height), (other.width, other.height));
        let mut out = Mask::new(self.width, self.height);
        for (dst, (&a, &b)) in out
            .data
            .iter_mut()
            .zip(self.data.iter().zip(other.data.iter()))
        {
            *dst = if a != 0 && b != 0 { 255 } else { 0 };
        }
        out
    }

    /// Morphological opening (erode, then dilate) with the elliptical 5×5
    /// kernel. Removes speckle smaller than the kernel.
    pub fn morph_open(&mut self) {
        self.erode();
        self.dilate();
    }

    /// Morphological closing (dilate, then erode) with the elliptical 5×5
    /// kernel. Fills pinholes smaller than the kernel.
    pub fn morph_close(&mut self) {
        self.dilate();
        self.erode();
    }

    fn erode(&mut self) {
        let mut out = vec![0u8; self.data.len()];
        for y in 0..self.height {
            for x in 0..self.width {
                let mut keep = true;
                for (dy, dx) in ELLIPSE_5X5 {
                    let (nx, ny) = (x + dx, y + dy);
                    if nx < 0 || ny < 0 || nx >= self.width || ny >= self.height {
                        continue;
                    }
                    if self.at(nx, ny) == 0 {
                        keep = false;
                        break;
                    }
                }
                if keep {
                    out[(y * self.width + x) as usize] = 255;
                }
            }
        }
        self.data = out;
    }

    fn dilate(&mut self) {
        let mut out = vec![0u8; self.data.len()];
        for y in 0..self.height {
            for x in 0..self.width {
                for (dy, dx) in ELLIPSE_5X5 {
                    let (nx, ny) = (x + dx, y + dy);
                    if nx < 0 || ny < 0 || nx >= self.width || ny >= self.height {
                        continue;
                    }
                    if self.at(nx, ny) != 0 {
                        out[(y * self.width + x) as usize] = 255;
                        break;
                    }
                }
            }
        }
        self.data = out;
    }

    /// Rasterize a polygon given in pixel coordinates into the mask
    /// (even-odd scanline fill, sampled at pixel centers).
    pub fn fill_polygon(&mut self, vertices: &[(f64, f64)]) {
        let n = vertices.len();
        if n < 3 {
            return;
        }

        let mut crossings: Vec<f64> = Vec::with_capacity(n);
        for y in 0..self.height {
            let yc = y as f64 + 0.5;
            crossings.clear();

            let mut j = n - 1;
            for i in 0..n {
                let (xi, yi) = vertices[i];
                let (xj, yj) = vertices[j];
                if (yi > yc) != (yj > yc) {
                    crossings.push((xj - xi) * (yc - yi) / (yj - yi) + xi);
                }
                j = i;
            }
            crossings.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));

            for pair in crossings.chunks_exact(2) {
                let x_start = pair[0].ceil().max(0.0) as i32;
                let x_end = (pair[1].floor() as i32).min(self.width - 1);
                for x in x_start..=x_end {
                    if (x as f64 + 0.5) >= pair[0] && (x as f64 + 0.5) <= pair[1] {
                        self.data[(y * self.width + x) as usize] = 255;
                    }
                }
            }
        }
    }

    /// Binary image moments over nonzero pixels.
    pub fn moments(&self) -> Moments {
        let mut m = Moments::default();
        for y in 0..self.height {
            for x in 0..self.width {
                if self.at(x, y) != 0 {
                    m.m00 += 1.0;
                    m.m10 += x as f64;
                    m.m01 += y as f64;
                }
            }
        }
        m
    }
}

/// Zeroth and first-order moments of a binary mask.
#[derive(Debug, Default, Clone, Copy)]
pub struct Moments {
    pub m00: f64,
    pub m10: f64,
    pub m01: f64,
}

impl Moments {
    /// Centroid `(m10/m00, m01/m00)`, if any mass exists.
    pub fn centroid(&self) -> Option<(f64, f64)> {
        if self.m00 > 0.0 {
            Some((self.m10 / self.m00, self.m01 / self.m00))
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn open_removes_speckle_but_keeps_blocks() {
        let mut mask = Mask::new(64, 64);
        mask.fill_rect(10, 10, 20, 20);
        mask.data[(5 * 64 + 50) as usize] = 255; // lone pixel

        mask.morph_open();

        // The block survives modulo slight corner rounding; the speckle dies.
        let count = mask.count_nonzero();
        assert!(count >= 20 * 20 - 8 && count <= 20 * 20, "count = {count}");
        assert_eq!(mask.at(20, 20), 255);
        assert_eq!(mask.at(50, 5), 0);
    }

    #[test]
    fn close_fills_pinholes() {
        let mut mask = Mask::new(64, 64);
        mask.fill_rect(10, 10, 20, 20);
        mask.data[(15 * 64 + 15) as usize] = 0; // pinhole

        mask.morph_close();

        assert_eq!(mask.at(15, 15), 255);
        assert_eq!(mask.count_nonzero(), 20 * 20);
    }

    #[test]
    fn open_barely_changes_large_rectangles() {
        let mut mask = Mask::new(640, 480);
        mask.fill_rect(100, 100, 320, 96);
        mask.morph_open();
        let count = mask.count_nonzero();
        assert!(
            count >= 320 * 96 - 8 && count <= 320 * 96,
            "count = {count}"
        );
    }

    #[test]
    fn and_intersects() {
        let mut a = Mask::new(8, 8);
        a.fill_rect(0, 0, 4, 8);
        let mut b = Mask::new(8, 8);
        b.fill_rect(2, 0, 6, 8);
        assert_eq!(a.and(&b).count_nonzero(), 2 * 8);
    }

    #[test]
    fn polygon_fill_matches_rectangle_area() {
        let mut mask = Mask::new(100, 100);
        mask.fill_polygon(&[(10.0, 10.0), (50.0, 10.0), (50.0, 30.0), (10.0, 30.0)]);
        let count = mask.count_nonzero() as i32;
        assert!((count - 40 * 20).abs() <= 140, "count = {count}");
        assert_eq!(mask.at(30, 20), 255);
        assert_eq!(mask.at(60, 20), 0);
    }

    #[test]
    fn polygon_fill_agrees_with_ray_casting() {
        use crate::geometry::{point_in_polygon, NormPoint};

        let verts_px = [(20.0, 10.0), (80.0, 30.0), (60.0, 90.0), (10.0, 70.0)];
        let mut mask = Mask::new(100, 100);
        mask.fill_polygon(&verts_px);

        let verts_norm: Vec<NormPoint> = verts_px
            .iter()
            .map(|&(x, y)| NormPoint::new(x / 100.0, y / 100.0))
            .collect();

        // Interior samples well away from the edges agree with ray casting.
        for (x, y) in [(40, 40), (50, 50), (30, 60), (5, 5), (90, 90)] {
            let expected = point_in_polygon(
                &NormPoint::new((x as f64 + 0.5) / 100.0, (y as f64 + 0.5) / 100.0),
                &verts_norm,
            );
            assert_eq!(mask.at(x, y) != 0, expected, "at ({x}, {y})");
        }
    }

    #[test]
    fn moments_centroid_of_a_block() {
        let mut mask = Mask::new(640, 480);
        mask.fill_rect(300, 380, 40, 40);
        let m = mask.moments();
        assert_eq!(m.m00, 1600.0);
        let (cx, cy) = m.centroid().unwrap();
        assert!((cx - 319.5).abs() < 1e-6);
        assert!((cy - 399.5).abs() < 1e-6);
    }

    #[test]
    fn empty_mask_has_no_centroid() {
        assert!(Mask::new(10, 10).moments().centroid().is_none());
    }
}
