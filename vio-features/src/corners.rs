use crate::{box_filter, sobel_gradients, GrayFloatImage, OccupancyMask};
use core::cmp::Reverse;
use float_ord::FloatOrd;
use image::GrayImage;
use log::{debug, trace};
use vio_core::{Corner, KeyPoint};

/// How the structure tensor of a pixel is turned into a corner score.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CornerResponse {
    /// The smaller eigenvalue of the structure tensor (Shi-Tomasi).
    MinEigenvalue,
    /// `det - k * trace^2`.
    Harris { k: f64 },
}

impl CornerResponse {
    /// Scores the symmetric 2x2 tensor `[a b; b c]`.
    fn score(self, a: f32, b: f32, c: f32) -> f32 {
        match self {
            CornerResponse::MinEigenvalue => {
                let half_trace = 0.5 * (a + c);
                let half_diff = 0.5 * (a - c);
                half_trace - (half_diff * half_diff + b * b).sqrt()
            }
            CornerResponse::Harris { k } => a * c - b * b - k as f32 * (a + c) * (a + c),
        }
    }
}

/// Computes the corner response of every pixel.
///
/// The structure tensor is built from Sobel gradients and averaged over a
/// `block_size x block_size` box. Pixels closer than `block_size / 2 + 1` to the border
/// get a response of `0.0`, so they never become corners.
pub fn corner_response(
    image: &GrayFloatImage,
    block_size: usize,
    response: CornerResponse,
) -> GrayFloatImage {
    let (gx, gy) = sobel_gradients(image);
    let (width, height) = (image.width(), image.height());
    let mut xx = GrayFloatImage::new(width, height);
    let mut xy = GrayFloatImage::new(width, height);
    let mut yy = GrayFloatImage::new(width, height);
    for y in 0..height {
        for x in 0..width {
            let (dx, dy) = (gx.get(x, y), gy.get(x, y));
            xx.put(x, y, dx * dx);
            xy.put(x, y, dx * dy);
            yy.put(x, y, dy * dy);
        }
    }
    let xx = box_filter(&xx, block_size);
    let xy = box_filter(&xy, block_size);
    let yy = box_filter(&yy, block_size);

    let border = block_size / 2 + 1;
    let mut output = GrayFloatImage::new(width, height);
    if width <= 2 * border || height <= 2 * border {
        return output;
    }
    for y in border..height - border {
        for x in border..width - border {
            output.put(x, y, response.score(xx.get(x, y), xy.get(x, y), yy.get(x, y)));
        }
    }
    output
}

/// Checks that `(x, y)` is a 3x3 local maximum.
///
/// On plateaus the first pixel in scan order wins: the value must be strictly greater
/// than the neighbours already scanned and not lower than those after it.
fn is_local_maximum(response: &GrayFloatImage, x: usize, y: usize) -> bool {
    let value = response.get(x, y);
    let (x, y) = (x as isize, y as isize);
    let earlier = [(-1, -1), (0, -1), (1, -1), (-1, 0)];
    let later = [(1, 0), (-1, 1), (0, 1), (1, 1)];
    earlier
        .iter()
        .all(|&(dx, dy)| value > response.get_clamped(x + dx, y + dy))
        && later
            .iter()
            .all(|&(dx, dy)| value >= response.get_clamped(x + dx, y + dy))
}

/// Fits a parabola through three samples and returns the offset of its vertex from the
/// middle one, clamped to half a pixel.
fn parabola_offset(left: f32, center: f32, right: f32) -> f64 {
    let curvature = left - 2.0 * center + right;
    if curvature.abs() < f32::EPSILON {
        return 0.0;
    }
    (0.5 * f64::from(left - right) / f64::from(curvature)).clamp(-0.5, 0.5)
}

/// Accepted corners bucketed by a grid whose cells are `min_distance` wide, so only the
/// surrounding cells need to be searched.
struct SpacingGrid {
    cell: f64,
    columns: usize,
    rows: usize,
    cells: Vec<Vec<KeyPoint>>,
}

impl SpacingGrid {
    fn new(width: usize, height: usize, min_distance: f64) -> Self {
        let cell = min_distance.max(1.0);
        let columns = (width as f64 / cell).ceil() as usize + 1;
        let rows = (height as f64 / cell).ceil() as usize + 1;
        Self {
            cell,
            columns,
            rows,
            cells: vec![vec![]; columns * rows],
        }
    }

    fn cell_of(&self, point: &KeyPoint) -> (usize, usize) {
        let cx = (point.x.max(0.0) / self.cell) as usize;
        let cy = (point.y.max(0.0) / self.cell) as usize;
        (cx.min(self.columns - 1), cy.min(self.rows - 1))
    }

    fn is_far_from_all(&self, point: &KeyPoint, min_distance: f64) -> bool {
        let (cx, cy) = self.cell_of(point);
        for y in cy.saturating_sub(1)..=(cy + 1).min(self.rows - 1) {
            for x in cx.saturating_sub(1)..=(cx + 1).min(self.columns - 1) {
                if self.cells[y * self.columns + x]
                    .iter()
                    .any(|other| other.distance(point) < min_distance)
                {
                    return false;
                }
            }
        }
        true
    }

    fn insert(&mut self, point: KeyPoint) {
        let (cx, cy) = self.cell_of(&point);
        self.cells[cy * self.columns + cx].push(point);
    }
}

/// "Good features to track" corner detector.
///
/// Candidates are local maxima of the corner response above
/// `quality_level * max_response`. They are accepted greedily in order of decreasing
/// response as long as they are at least `min_distance` away from every blocked pixel of
/// the occupancy mask and from every corner accepted before them.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GoodFeatures {
    pub max_corners: usize,
    pub quality_level: f64,
    pub min_distance: f64,
    pub block_size: usize,
    pub response: CornerResponse,
    pub subpixel: bool,
}

impl Default for GoodFeatures {
    fn default() -> Self {
        Self {
            max_corners: 300,
            quality_level: 0.001,
            min_distance: 10.0,
            block_size: 3,
            response: CornerResponse::MinEigenvalue,
            subpixel: false,
        }
    }
}

impl GoodFeatures {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn max_corners(self, max_corners: usize) -> Self {
        Self {
            max_corners,
            ..self
        }
    }

    #[must_use]
    pub fn quality_level(self, quality_level: f64) -> Self {
        Self {
            quality_level,
            ..self
        }
    }

    #[must_use]
    pub fn min_distance(self, min_distance: f64) -> Self {
        Self {
            min_distance,
            ..self
        }
    }

    /// Must be odd.
    #[must_use]
    pub fn block_size(self, block_size: usize) -> Self {
        Self { block_size, ..self }
    }

    #[must_use]
    pub fn response(self, response: CornerResponse) -> Self {
        Self { response, ..self }
    }

    #[must_use]
    pub fn subpixel(self, subpixel: bool) -> Self {
        Self { subpixel, ..self }
    }

    /// Detects up to `max_corners` corners where `mask` is free.
    ///
    /// Every corner is farther than `min_distance` from the blocked pixels of `mask` and
    /// blocks its own pixel in it, so later detections with the same mask keep their
    /// distance. Corners are returned strongest first.
    pub fn detect(&self, image: &GrayImage, mask: &mut OccupancyMask) -> Vec<Corner> {
        assert_eq!(
            image.dimensions(),
            mask.dimensions(),
            "mask and image dimensions differ"
        );
        if self.max_corners == 0 {
            return vec![];
        }
        let image = GrayFloatImage::from_gray(image);
        let response = corner_response(&image, self.block_size, self.response);
        let max_response = response.max_value();
        if max_response <= 0.0 {
            debug!("image has no corner response");
            return vec![];
        }
        let threshold = (self.quality_level * f64::from(max_response)) as f32;

        let mut candidates = vec![];
        for y in 1..response.height().saturating_sub(1) {
            for x in 1..response.width().saturating_sub(1) {
                let value = response.get(x, y);
                if value > 0.0 && value > threshold && is_local_maximum(&response, x, y) {
                    candidates.push((x, y, value));
                }
            }
        }
        // Stable, so equal responses keep scan order.
        candidates.sort_by_key(|&(_, _, value)| Reverse(FloatOrd(value)));
        trace!("{} corner candidates above {}", candidates.len(), threshold);

        let clearance = mask.squared_clearance();
        let mut grid = SpacingGrid::new(image.width(), image.height(), self.min_distance);
        let mut corners = vec![];
        for (x, y, value) in candidates {
            if corners.len() >= self.max_corners {
                break;
            }
            if !mask.is_free(x as i64, y as i64) {
                continue;
            }
            let point = if self.subpixel {
                self.refine(&response, x, y)
            } else {
                KeyPoint::new(x as f64, y as f64)
            };
            if let Some(clearance) = &clearance {
                if clearance.distance(&point) < self.min_distance {
                    continue;
                }
            }
            if self.min_distance > 0.0 && !grid.is_far_from_all(&point, self.min_distance) {
                continue;
            }
            grid.insert(point);
            mask.block_point(&point);
            corners.push(Corner {
                point,
                score: f64::from(value),
            });
        }
        debug!("detected {} corners", corners.len());
        corners
    }

    fn refine(&self, response: &GrayFloatImage, x: usize, y: usize) -> KeyPoint {
        let center = response.get(x, y);
        let dx = parabola_offset(response.get(x - 1, y), center, response.get(x + 1, y));
        let dy = parabola_offset(response.get(x, y - 1), center, response.get(x, y + 1));
        KeyPoint::new(x as f64 + dx, y as f64 + dy)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use image::Luma;

    /// A bright square on a dark background has four corners.
    fn square() -> GrayImage {
        GrayImage::from_fn(40, 40, |x, y| {
            if (10..30).contains(&x) && (10..30).contains(&y) {
                Luma([200])
            } else {
                Luma([20])
            }
        })
    }

    #[test]
    fn finds_the_corners_of_a_square() {
        let image = square();
        let mut mask = OccupancyMask::new_free(40, 40);
        let corners = GoodFeatures::new()
            .min_distance(5.0)
            .quality_level(0.1)
            .detect(&image, &mut mask);
        assert_eq!(corners.len(), 4);
        for corner in &corners {
            let near = |v: f64| (v - 9.5).abs() < 2.0 || (v - 29.5).abs() < 2.0;
            assert!(near(corner.point.x) && near(corner.point.y), "{:?}", corner);
        }
        assert!(corners.windows(2).all(|w| w[0].score >= w[1].score));
    }

    #[test]
    fn blocked_mask_gives_nothing() {
        let image = square();
        let mut mask = OccupancyMask::new_free(40, 40);
        mask.block_rect(0, 0, 40, 40);
        assert!(GoodFeatures::new().detect(&image, &mut mask).is_empty());
    }

    #[test]
    fn flat_image_has_no_corners() {
        let image = GrayImage::from_pixel(20, 20, Luma([128]));
        let mut mask = OccupancyMask::new_free(20, 20);
        assert!(GoodFeatures::new().detect(&image, &mut mask).is_empty());
    }

    #[test]
    fn min_eigenvalue_of_diagonal_tensor() {
        assert_relative_eq!(CornerResponse::MinEigenvalue.score(3.0, 0.0, 2.0), 2.0);
        assert_relative_eq!(
            CornerResponse::Harris { k: 0.04 }.score(3.0, 0.0, 2.0),
            6.0 - 0.04 * 25.0
        );
    }

    #[test]
    fn plateau_keeps_first_in_scan_order() {
        let mut response = GrayFloatImage::new(5, 5);
        response.put(2, 2, 1.0);
        response.put(3, 2, 1.0);
        assert!(is_local_maximum(&response, 2, 2));
        assert!(!is_local_maximum(&response, 3, 2));
    }

    #[test]
    fn parabola_vertex() {
        assert_relative_eq!(parabola_offset(1.0, 2.0, 1.0), 0.0);
        // Samples of -(x - 0.25)^2 at -1, 0, 1.
        let f = |x: f32| -(x - 0.25) * (x - 0.25);
        assert_relative_eq!(parabola_offset(f(-1.0), f(0.0), f(1.0)), 0.25, epsilon = 1e-6);
    }
}
