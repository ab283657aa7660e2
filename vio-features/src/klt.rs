use crate::{sobel_gradients, GrayFloatImage};
use image::GrayImage;
use log::debug;
use vio_core::{
    nalgebra::{Matrix2, Vector2},
    KeyPoint,
};

#[cfg(feature = "rayon")]
use rayon::prelude::*;

/// Settings of the pyramidal Lucas-Kanade tracker.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct KltParams {
    /// Side of the square tracking window in pixels. Must be odd.
    pub window_size: usize,
    /// Index of the coarsest pyramid level; `0` tracks on the full resolution only.
    pub max_level: usize,
    pub max_iterations: usize,
    /// Iterations stop once an update moves the point less than this many pixels.
    pub epsilon: f64,
    /// Minimum of the smaller structure tensor eigenvalue divided by the window area.
    pub min_eigen_threshold: f64,
    /// Minimum normalized cross-correlation between the final patches. Patches reaching
    /// past the border are sampled with clamping.
    pub min_correlation: f64,
}

impl Default for KltParams {
    fn default() -> Self {
        Self {
            window_size: 21,
            max_level: 3,
            max_iterations: 30,
            epsilon: 0.01,
            min_eigen_threshold: 1e-4,
            min_correlation: 0.7,
        }
    }
}

struct PyramidLevel {
    image: GrayFloatImage,
    grad_x: GrayFloatImage,
    grad_y: GrayFloatImage,
}

impl PyramidLevel {
    fn new(image: GrayFloatImage) -> Self {
        let (grad_x, grad_y) = sobel_gradients(&image);
        Self {
            image,
            grad_x,
            grad_y,
        }
    }
}

/// Successively halved copies of an image together with their gradients.
///
/// Level `0` is the full resolution image. Halving stops early once a level would be
/// smaller than `min_size` in either dimension.
pub struct ImagePyramid {
    levels: Vec<PyramidLevel>,
}

impl ImagePyramid {
    pub fn new(image: &GrayImage, max_level: usize, min_size: usize) -> Self {
        let mut levels = vec![PyramidLevel::new(GrayFloatImage::from_gray(image))];
        while levels.len() <= max_level {
            let previous = &levels[levels.len() - 1].image;
            if previous.width() / 2 < min_size || previous.height() / 2 < min_size {
                break;
            }
            let half = previous.half_size();
            levels.push(PyramidLevel::new(half));
        }
        Self { levels }
    }

    pub fn len(&self) -> usize {
        self.levels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.levels.is_empty()
    }

    pub fn image(&self, level: usize) -> &GrayFloatImage {
        &self.levels[level].image
    }
}

/// Zero mean normalized cross-correlation of two equally sized patches.
///
/// Returns `0.0` if either patch has no variance.
pub fn normalized_cross_correlation(a: &[f32], b: &[f32]) -> f64 {
    assert_eq!(a.len(), b.len(), "patch sizes differ");
    let n = a.len() as f64;
    if a.is_empty() {
        return 0.0;
    }
    let mean_a = a.iter().map(|&v| f64::from(v)).sum::<f64>() / n;
    let mean_b = b.iter().map(|&v| f64::from(v)).sum::<f64>() / n;
    let (mut ab, mut aa, mut bb) = (0.0, 0.0, 0.0);
    for (&va, &vb) in a.iter().zip(b) {
        let da = f64::from(va) - mean_a;
        let db = f64::from(vb) - mean_b;
        ab += da * db;
        aa += da * da;
        bb += db * db;
    }
    let norm = (aa * bb).sqrt();
    if norm < 1e-12 {
        0.0
    } else {
        ab / norm
    }
}

/// Tracks points from one image to the next with iterative pyramidal Lucas-Kanade.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct KltTracker {
    pub params: KltParams,
}

impl KltTracker {
    pub fn new(params: KltParams) -> Self {
        Self { params }
    }

    /// Builds the pyramid this tracker expects for an image.
    pub fn pyramid(&self, image: &GrayImage) -> ImagePyramid {
        ImagePyramid::new(image, self.params.max_level, self.params.window_size)
    }

    /// Tracks every `points[i]` from `previous` into `next`, starting the search at
    /// `guesses[i]`.
    ///
    /// The output is index aligned with the input; a point that could not be tracked is
    /// `None`.
    pub fn track(
        &self,
        previous: &ImagePyramid,
        next: &ImagePyramid,
        points: &[KeyPoint],
        guesses: &[KeyPoint],
    ) -> Vec<Option<KeyPoint>> {
        assert_eq!(
            points.len(),
            guesses.len(),
            "every tracked point needs a guess"
        );
        #[cfg(not(feature = "rayon"))]
        let tracked: Vec<Option<KeyPoint>> = points
            .iter()
            .zip(guesses)
            .map(|(point, guess)| self.track_point(previous, next, point, guess))
            .collect();
        #[cfg(feature = "rayon")]
        let tracked: Vec<Option<KeyPoint>> = points
            .par_iter()
            .zip(guesses.par_iter())
            .map(|(point, guess)| self.track_point(previous, next, point, guess))
            .collect();
        debug!(
            "tracked {} of {} points",
            tracked.iter().filter(|p| p.is_some()).count(),
            points.len()
        );
        tracked
    }

    fn track_point(
        &self,
        previous: &ImagePyramid,
        next: &ImagePyramid,
        point: &KeyPoint,
        guess: &KeyPoint,
    ) -> Option<KeyPoint> {
        let levels = previous.len().min(next.len());
        if levels == 0 {
            return None;
        }
        let radius = (self.params.window_size / 2) as isize;
        let area = (self.params.window_size * self.params.window_size) as f64;
        let top = levels - 1;
        let mut displacement = (guess.0 - point.0) / f64::from(1u32 << top);

        for level in (0..levels).rev() {
            let scale = 1.0 / f64::from(1u32 << level);
            let origin = point.0.coords * scale;
            let prev = &previous.levels[level];
            let next_image = &next.levels[level].image;

            // Template and gradients are fixed for the level.
            let mut template = Vec::with_capacity(area as usize);
            let mut gradients = Vec::with_capacity(area as usize);
            let mut tensor = Matrix2::<f64>::zeros();
            for dy in -radius..=radius {
                for dx in -radius..=radius {
                    let x = (origin.x + dx as f64) as f32;
                    let y = (origin.y + dy as f64) as f32;
                    let gx = f64::from(prev.grad_x.sample(x, y));
                    let gy = f64::from(prev.grad_y.sample(x, y));
                    template.push(prev.image.sample(x, y));
                    gradients.push(Vector2::new(gx, gy));
                    tensor += Matrix2::new(gx * gx, gx * gy, gx * gy, gy * gy);
                }
            }
            let (a, b, c) = (tensor.m11, tensor.m12, tensor.m22);
            let min_eigenvalue = 0.5 * (a + c) - (0.25 * (a - c) * (a - c) + b * b).sqrt();
            if min_eigenvalue / area < self.params.min_eigen_threshold {
                return None;
            }
            let inverse = tensor.try_inverse()?;

            for _ in 0..self.params.max_iterations {
                let center = origin + displacement;
                let (cx, cy) = (center.x as f32, center.y as f32);
                if level == 0 && !next_image.window_inside(cx, cy, 0.0) {
                    return None;
                }
                let mut mismatch = Vector2::zeros();
                let mut ix = 0;
                for dy in -radius..=radius {
                    for dx in -radius..=radius {
                        let x = (center.x + dx as f64) as f32;
                        let y = (center.y + dy as f64) as f32;
                        let difference = f64::from(next_image.sample(x, y) - template[ix]);
                        mismatch += gradients[ix] * difference;
                        ix += 1;
                    }
                }
                let step = -(inverse * mismatch);
                displacement += step;
                if !displacement.iter().all(|v| v.is_finite()) {
                    return None;
                }
                if step.norm() < self.params.epsilon {
                    break;
                }
            }
            if level > 0 {
                displacement *= 2.0;
            }
        }

        let tracked = KeyPoint(point.0 + displacement);
        let prev = &previous.levels[0].image;
        let next_image = &next.levels[0].image;
        if !next_image.window_inside(tracked.x as f32, tracked.y as f32, 0.0) {
            return None;
        }
        let correlation = normalized_cross_correlation(
            &patch(prev, point, radius),
            &patch(next_image, &tracked, radius),
        );
        if correlation < self.params.min_correlation {
            return None;
        }
        Some(tracked)
    }
}

fn patch(image: &GrayFloatImage, center: &KeyPoint, radius: isize) -> Vec<f32> {
    let mut values = Vec::with_capacity(((2 * radius + 1) * (2 * radius + 1)) as usize);
    for dy in -radius..=radius {
        for dx in -radius..=radius {
            let x = (center.x + dx as f64) as f32;
            let y = (center.y + dy as f64) as f32;
            values.push(image.sample(x, y));
        }
    }
    values
}
