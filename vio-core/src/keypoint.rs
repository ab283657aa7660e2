use core::fmt;
use derive_more::{AsMut, AsRef, Deref, DerefMut, From, Into};
use nalgebra::Point2;

#[cfg(feature = "serde-serialize")]
use serde::{Deserialize, Serialize};

/// Allows the retrieval of the point on the image the feature came from.
pub trait ImagePoint {
    /// Retrieves the point on the image
    fn image_point(&self) -> Point2<f64>;
}

/// A point on an image frame in pixel coordinates.
///
/// For stereo frames these are rectified pixel coordinates. For monocular frames they
/// are raw (distorted) pixel coordinates and must go through
/// [`CameraModel::calibrate`](crate::CameraModel::calibrate) to get a bearing.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, AsMut, AsRef, Deref, DerefMut, From, Into)]
#[cfg_attr(feature = "serde-serialize", derive(Serialize, Deserialize))]
pub struct KeyPoint(pub Point2<f64>);

impl KeyPoint {
    pub fn new(x: f64, y: f64) -> Self {
        Self(Point2::new(x, y))
    }

    /// Euclidean pixel distance to another keypoint.
    pub fn distance(&self, other: &KeyPoint) -> f64 {
        (self.0 - other.0).norm()
    }
}

impl ImagePoint for KeyPoint {
    fn image_point(&self) -> Point2<f64> {
        self.0
    }
}

/// A keypoint produced by the corner detector, along with its detector response.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Corner {
    pub point: KeyPoint,
    /// The corner response at the point (minimum eigenvalue or Harris score).
    pub score: f64,
}

impl ImagePoint for Corner {
    fn image_point(&self) -> Point2<f64> {
        self.point.0
    }
}

/// Identifies a physical scene point across every frame it is tracked in.
///
/// Ids are handed out by the tracker in strictly increasing order and are never reused
/// by the same tracker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, From, Into)]
#[cfg_attr(feature = "serde-serialize", derive(Serialize, Deserialize))]
pub struct LandmarkId(pub u64);

impl fmt::Display for LandmarkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "L{}", self.0)
    }
}
