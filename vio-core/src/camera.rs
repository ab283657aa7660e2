use crate::{CameraId, ImagePoint, KeyPoint};
use nalgebra::{IsometryMatrix3, Matrix3, Point2, UnitVector3, Vector2, Vector3};

#[cfg(feature = "serde-serialize")]
use serde::{Deserialize, Serialize};

/// Converts between pixel coordinates and bearings in the camera frame.
pub trait CameraModel {
    /// Takes a point in raw pixel coordinates and returns the unit vector pointing
    /// from the optical center towards where the light that hit that pixel came from.
    fn calibrate<P>(&self, point: P) -> UnitVector3<f64>
    where
        P: ImagePoint;

    /// Projects a bearing back into raw pixel coordinates.
    ///
    /// Returns `None` if the bearing points behind the camera.
    fn uncalibrate(&self, bearing: UnitVector3<f64>) -> Option<KeyPoint>;
}

/// This contains intrinsic camera parameters as per
/// [this Wikipedia page](https://en.wikipedia.org/wiki/Camera_resectioning#Intrinsic_parameters).
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd)]
#[cfg_attr(feature = "serde-serialize", derive(Serialize, Deserialize))]
pub struct CameraIntrinsics {
    pub focals: Vector2<f64>,
    pub principal_point: Point2<f64>,
    pub skew: f64,
}

impl CameraIntrinsics {
    /// Creates camera intrinsics that would create an identity intrinsic matrix.
    pub fn identity() -> Self {
        Self {
            focals: Vector2::new(1.0, 1.0),
            skew: 0.0,
            principal_point: Point2::new(0.0, 0.0),
        }
    }

    pub fn focals(self, focals: Vector2<f64>) -> Self {
        Self { focals, ..self }
    }

    pub fn focal(self, focal: f64) -> Self {
        Self {
            focals: Vector2::new(focal, focal),
            ..self
        }
    }

    pub fn principal_point(self, principal_point: Point2<f64>) -> Self {
        Self {
            principal_point,
            ..self
        }
    }

    pub fn skew(self, skew: f64) -> Self {
        Self { skew, ..self }
    }

    #[rustfmt::skip]
    pub fn matrix(&self) -> Matrix3<f64> {
        Matrix3::new(
            self.focals.x,  self.skew,      self.principal_point.x,
            0.0,            self.focals.y,  self.principal_point.y,
            0.0,            0.0,            1.0,
        )
    }

    /// Pixel coordinates to normalized image coordinates (on the plane `z = 1`).
    pub fn normalize(&self, point: Point2<f64>) -> Point2<f64> {
        let centered = point - self.principal_point;
        let y = centered.y / self.focals.y;
        let x = (centered.x - self.skew * y) / self.focals.x;
        Point2::new(x, y)
    }

    /// Normalized image coordinates to pixel coordinates.
    pub fn denormalize(&self, normalized: Point2<f64>) -> Point2<f64> {
        let y = normalized.y * self.focals.y;
        let x = normalized.x * self.focals.x + self.skew * normalized.y;
        Point2::new(x, y) + self.principal_point.coords
    }
}

impl CameraModel for CameraIntrinsics {
    /// ```
    /// use vio_core::{CameraIntrinsics, CameraModel, KeyPoint};
    /// use vio_core::nalgebra::{Point2, Vector2};
    /// let intrinsics = CameraIntrinsics {
    ///     focals: Vector2::new(800.0, 900.0),
    ///     principal_point: Point2::new(500.0, 600.0),
    ///     skew: 1.7,
    /// };
    /// let kp = KeyPoint::new(471.0, 322.0);
    /// let bearing = intrinsics.calibrate(kp);
    /// let back = intrinsics.uncalibrate(bearing).unwrap();
    /// assert!(kp.distance(&back) < 1e-6);
    /// ```
    fn calibrate<P>(&self, point: P) -> UnitVector3<f64>
    where
        P: ImagePoint,
    {
        let normalized = self.normalize(point.image_point());
        UnitVector3::new_normalize(normalized.coords.push(1.0))
    }

    fn uncalibrate(&self, bearing: UnitVector3<f64>) -> Option<KeyPoint> {
        if bearing.z <= 0.0 {
            return None;
        }
        let normalized = Point2::new(bearing.x / bearing.z, bearing.y / bearing.z);
        Some(KeyPoint(self.denormalize(normalized)))
    }
}

/// Radial-tangential (plumb bob) lens distortion with two radial and two tangential
/// coefficients, applied in normalized image coordinates.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Default)]
#[cfg_attr(feature = "serde-serialize", derive(Serialize, Deserialize))]
pub struct RadTanDistortion {
    pub k1: f64,
    pub k2: f64,
    pub p1: f64,
    pub p2: f64,
}

impl RadTanDistortion {
    /// The number of fixed point iterations used by [`RadTanDistortion::undistort`].
    pub const UNDISTORT_ITERATIONS: usize = 20;

    pub fn none() -> Self {
        Self::default()
    }

    pub fn is_none(&self) -> bool {
        *self == Self::default()
    }

    /// Applies the distortion to an undistorted normalized point.
    pub fn distort(&self, point: Point2<f64>) -> Point2<f64> {
        let (x, y) = (point.x, point.y);
        let r2 = x * x + y * y;
        let radial = 1.0 + self.k1 * r2 + self.k2 * r2 * r2;
        let dx = 2.0 * self.p1 * x * y + self.p2 * (r2 + 2.0 * x * x);
        let dy = self.p1 * (r2 + 2.0 * y * y) + 2.0 * self.p2 * x * y;
        Point2::new(x * radial + dx, y * radial + dy)
    }

    /// Removes the distortion from a distorted normalized point.
    ///
    /// This inverts [`RadTanDistortion::distort`] by fixed point iteration, which
    /// converges for the moderate distortion of typical lenses.
    pub fn undistort(&self, distorted: Point2<f64>) -> Point2<f64> {
        if self.is_none() {
            return distorted;
        }
        let mut point = distorted;
        for _ in 0..Self::UNDISTORT_ITERATIONS {
            let (x, y) = (point.x, point.y);
            let r2 = x * x + y * y;
            let radial = 1.0 + self.k1 * r2 + self.k2 * r2 * r2;
            let dx = 2.0 * self.p1 * x * y + self.p2 * (r2 + 2.0 * x * x);
            let dy = self.p1 * (r2 + 2.0 * y * y) + 2.0 * self.p2 * x * y;
            point = Point2::new((distorted.x - dx) / radial, (distorted.y - dy) / radial);
        }
        point
    }
}

/// Everything needed to interpret the pixels of one camera.
///
/// These are consumed read-only; producing them (calibration) happens elsewhere.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde-serialize", derive(Serialize, Deserialize))]
pub struct CameraParams {
    pub camera_id: CameraId,
    pub intrinsics: CameraIntrinsics,
    pub distortion: RadTanDistortion,
    /// `(width, height)` in pixels.
    pub image_size: (u32, u32),
    /// The pose of the camera in the body frame.
    pub body_pose: IsometryMatrix3<f64>,
}

impl CameraParams {
    /// A distortion free camera rigidly attached at the body origin.
    pub fn pinhole(camera_id: CameraId, intrinsics: CameraIntrinsics, image_size: (u32, u32)) -> Self {
        Self {
            camera_id,
            intrinsics,
            distortion: RadTanDistortion::none(),
            image_size,
            body_pose: IsometryMatrix3::identity(),
        }
    }

    pub fn width(&self) -> u32 {
        self.image_size.0
    }

    pub fn height(&self) -> u32 {
        self.image_size.1
    }

    /// Checks that the pixel lies inside the image bounds.
    pub fn contains(&self, point: &KeyPoint) -> bool {
        point.x >= 0.0
            && point.y >= 0.0
            && point.x <= (self.image_size.0 as f64 - 1.0)
            && point.y <= (self.image_size.1 as f64 - 1.0)
    }

    /// Projects a point given in the camera frame into pixel coordinates.
    pub fn project(&self, point: &Vector3<f64>) -> Option<KeyPoint> {
        self.uncalibrate(UnitVector3::try_new(*point, 1e-12)?)
    }
}

impl CameraModel for CameraParams {
    fn calibrate<P>(&self, point: P) -> UnitVector3<f64>
    where
        P: ImagePoint,
    {
        let distorted = self.intrinsics.normalize(point.image_point());
        let undistorted = self.distortion.undistort(distorted);
        UnitVector3::new_normalize(undistorted.coords.push(1.0))
    }

    fn uncalibrate(&self, bearing: UnitVector3<f64>) -> Option<KeyPoint> {
        if bearing.z <= 0.0 {
            return None;
        }
        let normalized = Point2::new(bearing.x / bearing.z, bearing.y / bearing.z);
        let distorted = self.distortion.distort(normalized);
        Some(KeyPoint(self.intrinsics.denormalize(distorted)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn intrinsics() -> CameraIntrinsics {
        CameraIntrinsics::identity()
            .focals(Vector2::new(458.654, 457.296))
            .principal_point(Point2::new(367.215, 248.375))
    }

    #[test]
    fn undistort_inverts_distort() {
        let distortion = RadTanDistortion {
            k1: -0.28340811,
            k2: 0.07395907,
            p1: 0.00019359,
            p2: 1.76187114e-05,
        };
        for &(x, y) in &[(0.0, 0.0), (0.2, -0.1), (-0.4, 0.3), (0.5, 0.5)] {
            let point = Point2::new(x, y);
            let round = distortion.undistort(distortion.distort(point));
            assert_relative_eq!(round, point, epsilon = 1e-6);
        }
    }

    #[test]
    fn calibrate_round_trip_with_distortion() {
        let camera = CameraParams {
            distortion: RadTanDistortion {
                k1: -0.2,
                k2: 0.05,
                p1: 0.001,
                p2: -0.001,
            },
            ..CameraParams::pinhole(0, intrinsics(), (752, 480))
        };
        let kp = KeyPoint::new(100.0, 400.0);
        let bearing = camera.calibrate(kp);
        let back = camera.uncalibrate(bearing).unwrap();
        assert!(kp.distance(&back) < 1e-4);
    }

    #[test]
    fn principal_point_looks_forward() {
        let camera = CameraParams::pinhole(0, intrinsics(), (752, 480));
        let bearing = camera.calibrate(KeyPoint::new(367.215, 248.375));
        assert_relative_eq!(bearing.into_inner(), Vector3::z(), epsilon = 1e-12);
    }

    #[test]
    fn behind_camera_does_not_project() {
        let camera = CameraParams::pinhole(0, intrinsics(), (752, 480));
        assert!(camera.project(&Vector3::new(0.0, 0.0, -1.0)).is_none());
    }
}
