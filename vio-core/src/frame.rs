use crate::{CameraId, Corner, KeyPoint, KeypointStatus, LandmarkId, Timestamp};
use image::GrayImage;

/// A single image along with the features observed in it.
///
/// The vectors `keypoints`, `scores`, `landmarks`, `landmark_ages` and `statuses` are
/// index aligned and must always have the same length. Use [`Frame::push_keypoint`] to
/// append a feature and [`Frame::is_consistent`] to check the invariant.
///
/// The tracker borrows frames mutably to fill them in, but never keeps them.
#[derive(Debug, Clone)]
pub struct Frame {
    pub id: u64,
    pub timestamp: Timestamp,
    pub camera_id: CameraId,
    pub image: GrayImage,
    pub keypoints: Vec<KeyPoint>,
    pub scores: Vec<f64>,
    /// `None` marks a landmark that was invalidated by outlier rejection.
    pub landmarks: Vec<Option<LandmarkId>>,
    /// The number of consecutive frames the landmark was seen in (`1` when just detected).
    pub landmark_ages: Vec<u32>,
    pub statuses: Vec<KeypointStatus>,
}

impl Frame {
    /// Creates a frame without any features.
    pub fn new(id: u64, timestamp: Timestamp, camera_id: CameraId, image: GrayImage) -> Self {
        Self {
            id,
            timestamp,
            camera_id,
            image,
            keypoints: vec![],
            scores: vec![],
            landmarks: vec![],
            landmark_ages: vec![],
            statuses: vec![],
        }
    }

    /// The number of features in the frame.
    pub fn len(&self) -> usize {
        self.keypoints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keypoints.is_empty()
    }

    /// Appends one feature to every sequence at once.
    pub fn push_keypoint(
        &mut self,
        keypoint: KeyPoint,
        score: f64,
        landmark: Option<LandmarkId>,
        age: u32,
        status: KeypointStatus,
    ) {
        self.keypoints.push(keypoint);
        self.scores.push(score);
        self.landmarks.push(landmark);
        self.landmark_ages.push(age);
        self.statuses.push(status);
    }

    /// Appends a freshly detected corner with its newly allocated landmark.
    pub fn push_corner(&mut self, corner: Corner, landmark: LandmarkId) {
        self.push_keypoint(
            corner.point,
            corner.score,
            Some(landmark),
            1,
            KeypointStatus::Valid,
        );
    }

    /// Removes all features while keeping the image.
    pub fn clear_features(&mut self) {
        self.keypoints.clear();
        self.scores.clear();
        self.landmarks.clear();
        self.landmark_ages.clear();
        self.statuses.clear();
    }

    /// Marks the landmark at `index` as invalid so it is no longer matched.
    ///
    /// # Panics
    ///
    /// Panics if `index` is out of range.
    pub fn invalidate_landmark(&mut self, index: usize) {
        self.landmarks[index] = None;
    }

    /// Checks that all the index aligned sequences have the same length.
    pub fn is_consistent(&self) -> bool {
        let len = self.keypoints.len();
        self.scores.len() == len
            && self.landmarks.len() == len
            && self.landmark_ages.len() == len
            && self.statuses.len() == len
    }

    /// Iterates over `(index, landmark)` for every feature with a valid landmark.
    pub fn valid_landmarks(&self) -> impl Iterator<Item = (usize, LandmarkId)> + '_ {
        self.landmarks
            .iter()
            .enumerate()
            .filter_map(|(ix, lm)| lm.map(|lm| (ix, lm)))
    }

    /// The index of the feature observing `landmark`, if any.
    pub fn find_landmark(&self, landmark: LandmarkId) -> Option<usize> {
        self.landmarks.iter().position(|&lm| lm == Some(landmark))
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame() -> Frame {
        Frame::new(0, 0, 0, GrayImage::new(32, 32))
    }

    #[test]
    fn push_keeps_sequences_aligned() {
        let mut frame = frame();
        frame.push_keypoint(
            KeyPoint::new(1.0, 2.0),
            0.5,
            Some(LandmarkId(3)),
            2,
            KeypointStatus::Valid,
        );
        frame.push_corner(
            Corner {
                point: KeyPoint::new(4.0, 5.0),
                score: 0.1,
            },
            LandmarkId(4),
        );
        assert!(frame.is_consistent());
        assert_eq!(frame.len(), 2);
        assert_eq!(frame.landmark_ages, vec![2, 1]);
        assert_eq!(frame.find_landmark(LandmarkId(4)), Some(1));
    }

    #[test]
    fn invalidated_landmarks_are_skipped() {
        let mut frame = frame();
        for i in 0..3 {
            frame.push_keypoint(
                KeyPoint::new(i as f64, 0.0),
                1.0,
                Some(LandmarkId(i)),
                1,
                KeypointStatus::Valid,
            );
        }
        frame.invalidate_landmark(1);
        let valid: Vec<_> = frame.valid_landmarks().collect();
        assert_eq!(valid, vec![(0, LandmarkId(0)), (2, LandmarkId(2))]);
        assert!(frame.find_landmark(LandmarkId(1)).is_none());
    }

    #[test]
    fn detects_misaligned_sequences() {
        let mut frame = frame();
        frame.keypoints.push(KeyPoint::new(0.0, 0.0));
        assert!(!frame.is_consistent());
    }
}
