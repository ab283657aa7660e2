use crate::{find_matching_keypoints, find_outliers, Tracker};
use eight_point::EightPoint;
use log::debug;
use std::time::Instant;
use two_point::TwoPoint;
use vio_core::{
    nalgebra::Rotation3, BearingMatch, CameraModel, Frame, KeypointMatches, RelativePose,
    TrackingStatus,
};

/// Drops the matches that are not `inliers` and invalidates the landmarks of the
/// outliers in both frames.
///
/// The remaining matches keep their relative order.
pub fn remove_outliers_mono(
    inliers: &[usize],
    reference: &mut Frame,
    current: &mut Frame,
    matches: &mut KeypointMatches,
) {
    for outlier in find_outliers(matches, inliers) {
        let m = matches[outlier];
        reference.invalidate_landmark(m.reference);
        current.invalidate_landmark(m.current);
    }
    matches.retain_positions(inliers);
}

impl Tracker {
    /// Estimates the pose of `current` in `reference` up to scale from the bearings of
    /// the features they share, and rejects the matches that do not agree with it.
    ///
    /// With a known `rotation` of the current camera in the reference camera, and the
    /// two-point solver enabled, only the translation direction is estimated. Otherwise
    /// the eight-point solver estimates the full pose.
    ///
    /// Outliers have their landmark invalidated in both frames. The frames are left
    /// untouched unless sample consensus found a hypothesis.
    pub fn geometric_outlier_rejection_mono(
        &mut self,
        reference: &mut Frame,
        current: &mut Frame,
        rotation: Option<&Rotation3<f64>>,
    ) -> (TrackingStatus, RelativePose) {
        if !self.params.mono_verification {
            return (TrackingStatus::Disabled, RelativePose::identity());
        }
        let start = Instant::now();
        let mut matches = find_matching_keypoints(reference, current);
        self.diagnostics.mono_putatives = matches.len();
        self.diagnostics.mono_inliers = 0;
        self.diagnostics.mono_iterations = 0;
        if matches.len() < self.params.min_nr_mono_inliers {
            debug!(
                "mono ransac: only {} matches between frames {} and {}",
                matches.len(),
                reference.id,
                current.id
            );
            return (TrackingStatus::FewMatches, RelativePose::identity());
        }

        let data: Vec<BearingMatch> = matches
            .iter()
            .map(|m| {
                BearingMatch(
                    self.camera.calibrate(reference.keypoints[m.reference]),
                    self.camera.calibrate(current.keypoints[m.current]),
                )
            })
            .collect();
        let use_2point = self.params.ransac_use_2point_mono;
        let mut ransac = self.ransac(self.params.ransac_threshold_mono);
        let hypothesis = match rotation {
            Some(rotation) if use_2point => {
                ransac.run_refined(&TwoPoint::new(*rotation), data.iter().copied())
            }
            _ => ransac.run_refined(&EightPoint::new(), data.iter().copied()),
        };
        self.diagnostics.mono_ransac_time = start.elapsed();

        let hypothesis = match hypothesis {
            Some(hypothesis) => hypothesis,
            None => {
                debug!(
                    "mono ransac: no hypothesis for {} matches between frames {} and {}",
                    matches.len(),
                    reference.id,
                    current.id
                );
                return (TrackingStatus::Invalid, RelativePose::identity());
            }
        };
        self.diagnostics.mono_inliers = hypothesis.inliers.len();
        self.diagnostics.mono_iterations = hypothesis.iterations;
        remove_outliers_mono(&hypothesis.inliers, reference, current, &mut matches);
        debug!(
            "mono ransac: {} of {} inliers after {} iterations",
            hypothesis.inliers.len(),
            data.len(),
            hypothesis.iterations
        );
        let status = if matches.len() < self.params.min_nr_mono_inliers {
            TrackingStatus::FewMatches
        } else {
            TrackingStatus::Valid
        };
        (status, hypothesis.model)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::TrackerParams;
    use image::GrayImage;
    use vio_core::{CameraIntrinsics, CameraParams, KeyPoint, KeypointStatus, LandmarkId};

    fn frame(n: u64) -> Frame {
        let mut frame = Frame::new(0, 0, 0, GrayImage::new(16, 16));
        for i in 0..n {
            frame.push_keypoint(
                KeyPoint::new(i as f64, i as f64),
                1.0,
                Some(LandmarkId(i)),
                1,
                KeypointStatus::Valid,
            );
        }
        frame
    }

    #[test]
    fn outliers_are_invalidated_in_both_frames() {
        let mut reference = frame(5);
        let mut current = frame(5);
        let mut matches: KeypointMatches = (0..5).map(|i| (i, 4 - i)).collect();
        remove_outliers_mono(&[1, 3], &mut reference, &mut current, &mut matches);
        assert_eq!(matches, [(1, 3), (3, 1)].into_iter().collect::<KeypointMatches>());
        let valid = |frame: &Frame| frame.valid_landmarks().map(|(ix, _)| ix).collect::<Vec<_>>();
        assert_eq!(valid(&reference), vec![1, 3]);
        assert_eq!(valid(&current), vec![1, 3]);
    }

    #[test]
    fn exhausted_time_budget_is_invalid() {
        let camera = CameraParams::pinhole(0, CameraIntrinsics::identity(), (16, 16));
        let mut tracker = Tracker::new(TrackerParams::default(), camera, None).unwrap();
        // Below anything the configuration accepts.
        tracker.params.ransac_max_time_ms = Some(0);
        let mut reference = frame(12);
        let mut current = frame(12);
        let (status, pose) =
            tracker.geometric_outlier_rejection_mono(&mut reference, &mut current, None);
        assert_eq!(status, TrackingStatus::Invalid);
        assert_eq!(pose, RelativePose::identity());
        assert_eq!(tracker.diagnostics().mono_putatives, 12);
        assert_eq!(tracker.diagnostics().mono_iterations, 0);
        assert_eq!(current.valid_landmarks().count(), 12);
    }

    #[test]
    fn all_inliers_change_nothing() {
        let mut reference = frame(3);
        let mut current = frame(3);
        let mut matches: KeypointMatches = (0..3).map(|i| (i, i)).collect();
        let before = matches.clone();
        remove_outliers_mono(&[0, 1, 2], &mut reference, &mut current, &mut matches);
        assert_eq!(matches, before);
        assert_eq!(reference.valid_landmarks().count(), 3);
    }
}
