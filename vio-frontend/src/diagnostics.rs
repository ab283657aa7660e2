use core::fmt;
use std::time::Duration;
use vio_core::KeypointStatus;

/// Counters and timings of the latest tracker stages.
///
/// Each stage overwrites its own fields, so a snapshot describes the most recent
/// detection, tracking, stereo matching and verification.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct TrackerDiagnostics {
    /// Corners the detector still had to find.
    pub need_n_corners: usize,
    /// Corners the detector found.
    pub extracted_corners: usize,
    /// Features in the frame after detection.
    pub detected_features: usize,
    pub tracked_features: usize,
    /// Features lost by tracking, including the ones retired for their age.
    pub lost_features: usize,

    pub mono_putatives: usize,
    pub mono_inliers: usize,
    pub mono_iterations: usize,
    pub stereo_putatives: usize,
    pub stereo_inliers: usize,
    pub stereo_iterations: usize,

    pub valid_right_keypoints: usize,
    pub no_left_rect_keypoints: usize,
    pub no_right_rect_keypoints: usize,
    pub no_depth_keypoints: usize,
    pub failed_triangulation_keypoints: usize,

    pub detection_time: Duration,
    pub tracking_time: Duration,
    pub mono_ransac_time: Duration,
    pub stereo_ransac_time: Duration,
}

impl TrackerDiagnostics {
    pub(crate) fn reset_right_keypoints(&mut self) {
        self.valid_right_keypoints = 0;
        self.no_left_rect_keypoints = 0;
        self.no_right_rect_keypoints = 0;
        self.no_depth_keypoints = 0;
        self.failed_triangulation_keypoints = 0;
    }

    pub(crate) fn count_right_keypoint(&mut self, status: KeypointStatus) {
        let counter = match status {
            KeypointStatus::Valid => &mut self.valid_right_keypoints,
            KeypointStatus::NoLeftRect => &mut self.no_left_rect_keypoints,
            KeypointStatus::NoRightRect => &mut self.no_right_rect_keypoints,
            KeypointStatus::NoDepth => &mut self.no_depth_keypoints,
            KeypointStatus::FailedTriangulation => &mut self.failed_triangulation_keypoints,
        };
        *counter += 1;
    }

    /// The number of right keypoints counted by the latest status check.
    pub fn right_keypoints(&self) -> usize {
        self.valid_right_keypoints
            + self.no_left_rect_keypoints
            + self.no_right_rect_keypoints
            + self.no_depth_keypoints
            + self.failed_triangulation_keypoints
    }
}

impl fmt::Display for TrackerDiagnostics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "detection: need {} extracted {} total {} ({:?})",
            self.need_n_corners,
            self.extracted_corners,
            self.detected_features,
            self.detection_time
        )?;
        writeln!(
            f,
            "tracking: tracked {} lost {} ({:?})",
            self.tracked_features, self.lost_features, self.tracking_time
        )?;
        writeln!(
            f,
            "mono ransac: {} of {} inliers in {} iterations ({:?})",
            self.mono_inliers, self.mono_putatives, self.mono_iterations, self.mono_ransac_time
        )?;
        writeln!(
            f,
            "stereo ransac: {} of {} inliers in {} iterations ({:?})",
            self.stereo_inliers,
            self.stereo_putatives,
            self.stereo_iterations,
            self.stereo_ransac_time
        )?;
        write!(
            f,
            "right keypoints: valid {} no left rect {} no right rect {} no depth {} failed triangulation {}",
            self.valid_right_keypoints,
            self.no_left_rect_keypoints,
            self.no_right_rect_keypoints,
            self.no_depth_keypoints,
            self.failed_triangulation_keypoints
        )
    }
}
