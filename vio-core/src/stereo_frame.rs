use crate::{Frame, KeypointStatus, Timestamp};
use nalgebra::{Matrix3, Point3};

/// The 3d information recovered for one stereo correspondence.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StereoMeasurement {
    /// The depth along the optical axis of the left camera in metres.
    pub depth: f64,
    /// The triangulated point in the left camera frame.
    pub point: Point3<f64>,
    /// The covariance of `point` induced by pixel noise.
    pub covariance: Matrix3<f64>,
}

/// A rectified stereo pair of frames taken at the same instant.
///
/// The left frame owns the landmark ids. Once stereo matching ran, the right frame is
/// index aligned with the left one: `right.keypoints[i]` is the match of
/// `left.keypoints[i]` and `right.statuses[i]` tells whether that match is usable.
/// `measurements[i]` is `Some` exactly when `right.statuses[i]` is
/// [`KeypointStatus::Valid`].
#[derive(Debug, Clone)]
pub struct StereoFrame {
    pub id: u64,
    pub timestamp: Timestamp,
    pub left: Frame,
    pub right: Frame,
    pub measurements: Vec<Option<StereoMeasurement>>,
}

impl StereoFrame {
    pub fn new(id: u64, timestamp: Timestamp, left: Frame, right: Frame) -> Self {
        Self {
            id,
            timestamp,
            left,
            right,
            measurements: vec![],
        }
    }

    /// The status of the right keypoint matched to left keypoint `index`.
    ///
    /// Before stereo matching ran every keypoint reads as
    /// [`KeypointStatus::NoRightRect`].
    pub fn right_status(&self, index: usize) -> KeypointStatus {
        self.right
            .statuses
            .get(index)
            .copied()
            .unwrap_or(KeypointStatus::NoRightRect)
    }

    /// The stereo measurement of left keypoint `index`, if it has a valid one.
    pub fn measurement(&self, index: usize) -> Option<&StereoMeasurement> {
        self.measurements.get(index).and_then(Option::as_ref)
    }

    /// Marks the stereo correspondence of left keypoint `index` as unusable.
    ///
    /// # Panics
    ///
    /// Panics if stereo matching did not produce an entry for `index`.
    pub fn invalidate_stereo(&mut self, index: usize, status: KeypointStatus) {
        self.right.statuses[index] = status;
        self.measurements[index] = None;
    }

    /// Checks that both frames and the measurements are index aligned, and that
    /// measurements exist exactly for valid right keypoints.
    pub fn is_consistent(&self) -> bool {
        let len = self.left.len();
        self.left.is_consistent()
            && self.right.is_consistent()
            && self.right.len() == len
            && self.measurements.len() == len
            && self
                .right
                .statuses
                .iter()
                .zip(&self.measurements)
                .all(|(status, m)| status.is_valid() == m.is_some())
    }
}
