use derive_more::{Deref, DerefMut};
use image::{GrayImage, ImageBuffer, Luma};

type GrayImageBuffer = ImageBuffer<Luma<f32>, Vec<f32>>;

/// A single channel float image with intensities in `[0, 1]`.
///
/// All filters here clamp at the border, so pixels outside the image take the value of
/// the closest edge pixel.
#[derive(Debug, Clone, Deref, DerefMut)]
pub struct GrayFloatImage(pub GrayImageBuffer);

impl GrayFloatImage {
    /// Converts an 8-bit image, mapping `0..=255` to `0.0..=1.0`.
    pub fn from_gray(image: &GrayImage) -> Self {
        Self(ImageBuffer::from_fn(image.width(), image.height(), |x, y| {
            Luma([f32::from(image[(x, y)][0]) / 255f32])
        }))
    }

    pub fn new(width: usize, height: usize) -> Self {
        Self(ImageBuffer::from_pixel(
            width as u32,
            height as u32,
            Luma([0.0]),
        ))
    }

    pub fn width(&self) -> usize {
        self.0.width() as usize
    }

    pub fn height(&self) -> usize {
        self.0.height() as usize
    }

    pub fn get(&self, x: usize, y: usize) -> f32 {
        self.as_raw()[y * self.width() + x]
    }

    pub fn put(&mut self, x: usize, y: usize, pixel_value: f32) {
        let width = self.width();
        let raw: &mut [f32] = &mut self.0;
        raw[y * width + x] = pixel_value;
    }

    /// Reads a pixel, clamping the coordinates into the image.
    pub fn get_clamped(&self, x: isize, y: isize) -> f32 {
        let x = x.clamp(0, self.width() as isize - 1) as usize;
        let y = y.clamp(0, self.height() as isize - 1) as usize;
        self.get(x, y)
    }

    /// Bilinear interpolation at a sub-pixel location, clamped at the border.
    pub fn sample(&self, x: f32, y: f32) -> f32 {
        let x0 = x.floor();
        let y0 = y.floor();
        let ax = x - x0;
        let ay = y - y0;
        let (x0, y0) = (x0 as isize, y0 as isize);
        let top = (1.0 - ax) * self.get_clamped(x0, y0) + ax * self.get_clamped(x0 + 1, y0);
        let bottom =
            (1.0 - ax) * self.get_clamped(x0, y0 + 1) + ax * self.get_clamped(x0 + 1, y0 + 1);
        (1.0 - ay) * top + ay * bottom
    }

    /// Checks that a square window of the given radius around `(x, y)` is entirely inside
    /// the image, so that sampling it needs no clamping.
    pub fn window_inside(&self, x: f32, y: f32, radius: f32) -> bool {
        x - radius >= 0.0
            && y - radius >= 0.0
            && x + radius <= (self.width() - 1) as f32
            && y + radius <= (self.height() - 1) as f32
    }

    /// Halves the image in both dimensions by averaging 2x2 tiles.
    ///
    /// An odd last row or column is dropped.
    pub fn half_size(&self) -> Self {
        let width = self.width() / 2;
        let height = self.height() / 2;
        let mut half = Self::new(width, height);
        for y in 0..height {
            for x in 0..width {
                let sum = self.get(2 * x, 2 * y)
                    + self.get(2 * x + 1, 2 * y)
                    + self.get(2 * x, 2 * y + 1)
                    + self.get(2 * x + 1, 2 * y + 1);
                half.put(x, y, sum * 0.25);
            }
        }
        half
    }

    /// The largest value in the image, or `0.0` for an empty image.
    pub fn max_value(&self) -> f32 {
        self.as_raw().iter().copied().fold(0.0, f32::max)
    }
}

pub fn horizontal_filter(image: &GrayImageBuffer, kernel: &[f32]) -> GrayImageBuffer {
    debug_assert!(kernel.len() % 2 == 1);
    let half = (kernel.len() / 2) as isize;
    let width = image.width() as usize;
    let height = image.height() as usize;
    let mut output = vec![0.0; width * height];
    for (row_in, row_out) in image
        .as_raw()
        .chunks_exact(width.max(1))
        .zip(output.chunks_exact_mut(width.max(1)))
    {
        for (x, out) in row_out.iter_mut().enumerate() {
            *out = kernel
                .iter()
                .enumerate()
                .map(|(i, &k)| {
                    let sx = (x as isize + i as isize - half).clamp(0, width as isize - 1);
                    k * row_in[sx as usize]
                })
                .sum();
        }
    }
    GrayImageBuffer::from_raw(width as u32, height as u32, output)
        .unwrap_or_else(|| GrayImageBuffer::new(width as u32, height as u32))
}

pub fn vertical_filter(image: &GrayImageBuffer, kernel: &[f32]) -> GrayImageBuffer {
    debug_assert!(kernel.len() % 2 == 1);
    let half = (kernel.len() / 2) as isize;
    let width = image.width() as usize;
    let height = image.height() as usize;
    let input = image.as_raw();
    let mut output = vec![0.0; width * height];
    for y in 0..height {
        for (i, &k) in kernel.iter().enumerate() {
            let sy = (y as isize + i as isize - half).clamp(0, height as isize - 1) as usize;
            let row_in = &input[sy * width..(sy + 1) * width];
            let row_out = &mut output[y * width..(y + 1) * width];
            for (out, &value) in row_out.iter_mut().zip(row_in) {
                *out += k * value;
            }
        }
    }
    GrayImageBuffer::from_raw(width as u32, height as u32, output)
        .unwrap_or_else(|| GrayImageBuffer::new(width as u32, height as u32))
}

pub fn separable_filter(
    image: &GrayImageBuffer,
    h_kernel: &[f32],
    v_kernel: &[f32],
) -> GrayImageBuffer {
    let h = horizontal_filter(image, h_kernel);
    vertical_filter(&h, v_kernel)
}

/// Sobel derivatives scaled by `1/8`, so that a unit intensity ramp has unit gradient.
pub fn sobel_gradients(image: &GrayFloatImage) -> (GrayFloatImage, GrayFloatImage) {
    const DERIVATIVE: [f32; 3] = [-0.5, 0.0, 0.5];
    const SMOOTH: [f32; 3] = [0.25, 0.5, 0.25];
    (
        GrayFloatImage(separable_filter(image, &DERIVATIVE, &SMOOTH)),
        GrayFloatImage(separable_filter(image, &SMOOTH, &DERIVATIVE)),
    )
}

/// Averages every pixel over a `size x size` box.
pub fn box_filter(image: &GrayFloatImage, size: usize) -> GrayFloatImage {
    assert!(size % 2 == 1, "box size must be odd");
    let kernel = vec![1.0 / size as f32; size];
    GrayFloatImage(separable_filter(image, &kernel, &kernel))
}

/// The Gaussian function.
fn gaussian(x: f32, r: f32) -> f32 {
    ((2.0 * std::f32::consts::PI).sqrt() * r).recip() * (-x.powi(2) / (2.0 * r.powi(2))).exp()
}

/// Generate a normalized Gaussian kernel.
pub fn gaussian_kernel(r: f32, kernel_size: usize) -> Vec<f32> {
    assert!(kernel_size % 2 == 1, "kernel_size must be odd");
    let half_width = (kernel_size / 2) as i32;
    let mut kernel: Vec<f32> = (-half_width..=half_width)
        .map(|i| gaussian(i as f32, r))
        .collect();
    let sum: f32 = kernel.iter().sum();
    for val in kernel.iter_mut() {
        *val /= sum;
    }
    kernel
}

/// Perform Gaussian blur on an image with standard deviation `r`.
pub fn gaussian_blur(image: &GrayFloatImage, r: f32) -> GrayFloatImage {
    assert!(r > 0.0, "sigma must be > 0.0");
    let kernel_radius = (2.0 * r).ceil() as usize;
    let kernel = gaussian_kernel(r, kernel_radius * 2 + 1);
    GrayFloatImage(separable_filter(image, &kernel, &kernel))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn ramp(width: usize, height: usize) -> GrayFloatImage {
        let mut image = GrayFloatImage::new(width, height);
        for y in 0..height {
            for x in 0..width {
                image.put(x, y, 0.01 * x as f32 + 0.02 * y as f32);
            }
        }
        image
    }

    #[test]
    fn gaussian_kernel_is_normalized() {
        let kernel = gaussian_kernel(1.5, 7);
        assert_relative_eq!(kernel.iter().sum::<f32>(), 1.0, epsilon = 1e-6);
        assert_relative_eq!(kernel[0], kernel[6]);
    }

    #[test]
    fn sobel_of_ramp_is_constant_inside() {
        let (gx, gy) = sobel_gradients(&ramp(10, 10));
        assert_relative_eq!(gx.get(5, 5), 0.01, epsilon = 1e-6);
        assert_relative_eq!(gy.get(5, 5), 0.02, epsilon = 1e-6);
    }

    #[test]
    fn bilinear_sample_of_ramp_is_exact() {
        let image = ramp(10, 10);
        assert_relative_eq!(image.sample(3.25, 4.5), 0.0325 + 0.09, epsilon = 1e-6);
    }

    #[test]
    fn half_size_averages() {
        let image = ramp(5, 4);
        let half = image.half_size();
        assert_eq!((half.width(), half.height()), (2, 2));
        assert_relative_eq!(half.get(1, 1), image.sample(2.5, 2.5), epsilon = 1e-6);
    }

    #[test]
    fn from_gray_maps_to_unit_range() {
        let gray = GrayImage::from_fn(2, 1, |x, _| Luma([if x == 0 { 0 } else { 255 }]));
        let image = GrayFloatImage::from_gray(&gray);
        assert_eq!(image.get(0, 0), 0.0);
        assert_eq!(image.get(1, 0), 1.0);
    }
}
