use crate::{CameraIntrinsics, KeyPoint};
use nalgebra::{Matrix3, Point3};

#[cfg(feature = "serde-serialize")]
use serde::{Deserialize, Serialize};

/// A rectified stereo pair.
///
/// Both images share the same intrinsics, their rows are aligned, and the right camera
/// sits `baseline` metres along the positive X axis of the left camera. Points are
/// expressed in the left camera frame.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde-serialize", derive(Serialize, Deserialize))]
pub struct StereoCamera {
    pub intrinsics: CameraIntrinsics,
    pub baseline: f64,
    /// `(width, height)` of the rectified images in pixels.
    pub image_size: (u32, u32),
}

impl StereoCamera {
    pub fn new(intrinsics: CameraIntrinsics, baseline: f64, image_size: (u32, u32)) -> Self {
        Self {
            intrinsics,
            baseline,
            image_size,
        }
    }

    /// `fx * baseline`, the constant relating disparity to depth.
    pub fn disparity_depth_product(&self) -> f64 {
        self.intrinsics.focals.x * self.baseline
    }

    /// The depth of a point observed with the given disparity in pixels.
    ///
    /// Returns `None` for non-positive disparities.
    pub fn depth_from_disparity(&self, disparity: f64) -> Option<f64> {
        if disparity > 0.0 {
            Some(self.disparity_depth_product() / disparity)
        } else {
            None
        }
    }

    /// The disparity a point at the given depth is observed with.
    pub fn disparity_from_depth(&self, depth: f64) -> f64 {
        self.disparity_depth_product() / depth
    }

    /// Triangulates the point seen at `left` in the left image and at column `right_u`
    /// on the same row of the right image.
    ///
    /// Returns the point in the left camera frame along with the Jacobian of the point
    /// with respect to `(u_left, u_right, v)`. Returns `None` if the disparity is not
    /// positive or the result is not finite.
    pub fn backproject(&self, left: KeyPoint, right_u: f64) -> Option<(Point3<f64>, Matrix3<f64>)> {
        let fx = self.intrinsics.focals.x;
        let fy = self.intrinsics.focals.y;
        let cx = self.intrinsics.principal_point.x;
        let cy = self.intrinsics.principal_point.y;
        let disparity = left.x - right_u;
        let z = self.depth_from_disparity(disparity)?;
        let x = z * (left.x - cx) / fx;
        let y = z * (left.y - cy) / fy;
        let point = Point3::new(x, y, z);
        if !point.coords.iter().all(|c| c.is_finite()) {
            return None;
        }
        let d = disparity;
        #[rustfmt::skip]
        let jacobian = Matrix3::new(
            z / fx - x / d,  x / d,  0.0,
            -y / d,          y / d,  z / fy,
            -z / d,          z / d,  0.0,
        );
        Some((point, jacobian))
    }

    /// Projects a point in the left camera frame into both rectified images.
    ///
    /// Returns `None` for points on or behind the image plane.
    pub fn project(&self, point: &Point3<f64>) -> Option<(KeyPoint, KeyPoint)> {
        if point.z <= 0.0 {
            return None;
        }
        let fx = self.intrinsics.focals.x;
        let fy = self.intrinsics.focals.y;
        let cx = self.intrinsics.principal_point.x;
        let cy = self.intrinsics.principal_point.y;
        let v = fy * point.y / point.z + cy;
        let u_left = fx * point.x / point.z + cx;
        let u_right = fx * (point.x - self.baseline) / point.z + cx;
        Some((KeyPoint::new(u_left, v), KeyPoint::new(u_right, v)))
    }
}
