use derive_more::{AsRef, Deref, DerefMut, From, Into};
use image::{GrayImage, ImageBuffer, Luma};
use imageproc::{
    distance_transform::euclidean_squared_distance_transform,
    drawing::{draw_filled_circle_mut, draw_filled_rect_mut},
    rect::Rect,
};
use vio_core::KeyPoint;

const FREE: Luma<u8> = Luma([255]);
const BLOCKED: Luma<u8> = Luma([0]);

/// Marks where new corners may be detected.
///
/// A non-zero pixel is free and a zero pixel is blocked. Detection only accepts corners
/// farther than its minimum distance from every blocked pixel, and blocks the pixel of
/// every corner it accepts, so one mask passed through successive detections keeps them
/// apart.
#[derive(Debug, Clone, PartialEq, AsRef, Deref, DerefMut, From, Into)]
pub struct OccupancyMask(pub GrayImage);

impl OccupancyMask {
    /// A mask where every pixel is free.
    pub fn new_free(width: u32, height: u32) -> Self {
        Self(GrayImage::from_pixel(width, height, FREE))
    }

    /// Wraps a gray image where zero pixels are blocked.
    pub fn from_gray(image: GrayImage) -> Self {
        Self(image)
    }

    /// Pixels outside the mask are never free.
    pub fn is_free(&self, x: i64, y: i64) -> bool {
        x >= 0
            && y >= 0
            && x < i64::from(self.0.width())
            && y < i64::from(self.0.height())
            && self.0[(x as u32, y as u32)][0] != 0
    }

    /// Checks the pixel containing a sub-pixel keypoint.
    pub fn is_free_at(&self, point: &KeyPoint) -> bool {
        self.is_free(point.x.round() as i64, point.y.round() as i64)
    }

    /// Blocks every pixel within `radius` of `center`.
    pub fn block_disc(&mut self, center: &KeyPoint, radius: f64) {
        let center = (center.x.round() as i32, center.y.round() as i32);
        draw_filled_circle_mut(&mut self.0, center, radius.round() as i32, BLOCKED);
    }

    /// Blocks an axis aligned rectangle, clipped to the mask.
    pub fn block_rect(&mut self, x: i32, y: i32, width: u32, height: u32) {
        if width == 0 || height == 0 {
            return;
        }
        draw_filled_rect_mut(
            &mut self.0,
            Rect::at(x, y).of_size(width, height),
            BLOCKED,
        );
    }

    /// Blocks the single pixel containing `point`.
    pub fn block_point(&mut self, point: &KeyPoint) {
        let (x, y) = (point.x.round() as i64, point.y.round() as i64);
        if self.is_free(x, y) {
            self.0.put_pixel(x as u32, y as u32, BLOCKED);
        }
    }

    /// Squared Euclidean distance from every pixel to the nearest blocked pixel.
    ///
    /// Returns `None` when nothing is blocked.
    pub fn squared_clearance(&self) -> Option<Clearance> {
        let blocked = GrayImage::from_fn(self.0.width(), self.0.height(), |x, y| {
            if self.0.get_pixel(x, y)[0] == 0 {
                FREE
            } else {
                BLOCKED
            }
        });
        if blocked.pixels().all(|p| p[0] == 0) {
            return None;
        }
        Some(Clearance(euclidean_squared_distance_transform(&blocked)))
    }

    pub fn free_count(&self) -> usize {
        self.0.pixels().filter(|p| p[0] != 0).count()
    }

    pub fn dimensions(&self) -> (u32, u32) {
        self.0.dimensions()
    }
}

/// Squared distances to the nearest blocked pixel of an [`OccupancyMask`].
#[derive(Debug, Clone)]
pub struct Clearance(ImageBuffer<Luma<f64>, Vec<f64>>);

impl Clearance {
    /// Distance from `point` to the nearest blocked pixel, never overestimated by more
    /// than the offset of `point` from its pixel center.
    pub fn distance(&self, point: &KeyPoint) -> f64 {
        let x = (point.x.round().max(0.0) as u32).min(self.0.width() - 1);
        let y = (point.y.round().max(0.0) as u32).min(self.0.height() - 1);
        let offset = (point.x - f64::from(x)).hypot(point.y - f64::from(y));
        (self.0.get_pixel(x, y)[0].sqrt() - offset).max(0.0)
    }
}
