use crate::{find_matching_stereo_keypoints, find_outliers, Tracker};
use arun::{
    centroid_translation_covariance, covariant_point_match, information_weighted_translation,
    Arun, OnePoint,
};
use log::debug;
use std::time::Instant;
use vio_core::{
    nalgebra::{Matrix3, Point3, Rotation3, Vector3},
    KeyPoint, KeypointMatches, KeypointStatus, PointMatch, RelativePose, StereoCamera,
    StereoFrame, TrackingStatus,
};

/// Triangulates a stereo correspondence and propagates the pixel covariance of
/// `(u_left, u_right, v)` into the covariance of the point.
///
/// Returns `None` when the disparity is not positive or the point is not finite.
pub fn triangulate(
    camera: &StereoCamera,
    left: &KeyPoint,
    right_u: f64,
    pixel_covariance: &Matrix3<f64>,
) -> Option<(Point3<f64>, Matrix3<f64>)> {
    let (point, jacobian) = camera.backproject(*left, right_u)?;
    let covariance = jacobian * pixel_covariance * jacobian.transpose();
    Some((point, 0.5 * (covariance + covariance.transpose())))
}

/// The point of left keypoint `index` in the left camera frame together with its
/// covariance.
///
/// With a `rotation` the covariance is expressed in the rotated frame as `R C R^T`. The
/// point itself is never rotated.
///
/// # Panics
///
/// Panics if the right keypoint of `index` is not valid or cannot be triangulated.
pub fn get_point3_and_covariance(
    frame: &StereoFrame,
    camera: &StereoCamera,
    index: usize,
    pixel_covariance: &Matrix3<f64>,
    rotation: Option<&Rotation3<f64>>,
) -> (Vector3<f64>, Matrix3<f64>) {
    let status = frame.right_status(index);
    assert!(
        status.is_valid(),
        "stereo keypoint {} of frame {} has status {:?}",
        index,
        frame.id,
        status
    );
    let right_u = frame.right.keypoints[index].x;
    let (point, covariance) = match triangulate(
        camera,
        &frame.left.keypoints[index],
        right_u,
        pixel_covariance,
    ) {
        Some(triangulated) => triangulated,
        None => panic!(
            "stereo keypoint {} of frame {} cannot be triangulated",
            index, frame.id
        ),
    };
    let covariance = match rotation {
        Some(rotation) => {
            let r = rotation.matrix();
            let rotated = r * covariance * r.transpose();
            0.5 * (rotated + rotated.transpose())
        }
        None => covariance,
    };
    (point.coords, covariance)
}

/// Drops the matches that are not `inliers` and invalidates their landmarks and stereo
/// measurements in both frames.
///
/// The right keypoints of outliers get [`KeypointStatus::FailedTriangulation`].
pub fn remove_outliers_stereo(
    inliers: &[usize],
    reference: &mut StereoFrame,
    current: &mut StereoFrame,
    matches: &mut KeypointMatches,
) {
    for outlier in find_outliers(matches, inliers) {
        let m = matches[outlier];
        for (frame, ix) in [(&mut *reference, m.reference), (&mut *current, m.current)] {
            frame.left.invalidate_landmark(ix);
            frame.right.invalidate_landmark(ix);
            frame.invalidate_stereo(ix, KeypointStatus::FailedTriangulation);
        }
    }
    matches.retain_positions(inliers);
}

impl Tracker {
    /// The covariance of `(u_left, u_right, v)` for every stereo keypoint.
    fn stereo_pixel_covariance(&self) -> Matrix3<f64> {
        Matrix3::identity() * self.params.stereo_keypoint_sigma.powi(2)
    }

    /// Estimates the metric pose of `current` in `reference` from triangulated points
    /// and rejects the matches that do not agree with it.
    ///
    /// Without a `rotation` (or with one-point stereo switched off) the full pose is
    /// estimated with Arun's method on 3d point matches. With a rotation only the
    /// translation is estimated, weighting every point by its uncertainty.
    ///
    /// Also returns the covariance of the translation, which is zero unless the status is
    /// [`TrackingStatus::Valid`] or the inliers fell below the minimum after rejection.
    pub fn geometric_outlier_rejection_stereo(
        &mut self,
        reference: &mut StereoFrame,
        current: &mut StereoFrame,
        camera: &StereoCamera,
        rotation: Option<&Rotation3<f64>>,
    ) -> (TrackingStatus, RelativePose, Matrix3<f64>) {
        let failed = |status| (status, RelativePose::identity(), Matrix3::zeros());
        if !self.params.stereo_verification {
            return failed(TrackingStatus::Disabled);
        }
        let start = Instant::now();
        let mut matches = find_matching_stereo_keypoints(reference, current);
        self.diagnostics.stereo_putatives = matches.len();
        self.diagnostics.stereo_inliers = 0;
        self.diagnostics.stereo_iterations = 0;
        if matches.len() < self.params.min_nr_stereo_inliers {
            debug!(
                "stereo ransac: only {} matches between frames {} and {}",
                matches.len(),
                reference.id,
                current.id
            );
            return failed(TrackingStatus::FewMatches);
        }

        let pixel_covariance = self.stereo_pixel_covariance();
        let estimate = match rotation {
            Some(rotation) if self.params.ransac_use_1point_stereo => self.one_point_stereo(
                reference,
                current,
                camera,
                &matches,
                &pixel_covariance,
                rotation,
            ),
            _ => self.arun_stereo(reference, current, camera, &matches, &pixel_covariance),
        };
        self.diagnostics.stereo_ransac_time = start.elapsed();

        let (pose, covariance, inliers, iterations) = match estimate {
            Some(estimate) => estimate,
            None => {
                debug!(
                    "stereo ransac: no hypothesis for {} matches between frames {} and {}",
                    matches.len(),
                    reference.id,
                    current.id
                );
                return failed(TrackingStatus::Invalid);
            }
        };
        self.diagnostics.stereo_inliers = inliers.len();
        self.diagnostics.stereo_iterations = iterations;
        remove_outliers_stereo(&inliers, reference, current, &mut matches);
        debug!(
            "stereo ransac: {} of {} inliers after {} iterations",
            inliers.len(),
            self.diagnostics.stereo_putatives,
            iterations
        );
        let status = if matches.len() < self.params.min_nr_stereo_inliers {
            TrackingStatus::FewMatches
        } else {
            TrackingStatus::Valid
        };
        (status, pose, covariance)
    }

    /// Full pose from 3d point matches. Inliers are positions in `matches`.
    fn arun_stereo(
        &mut self,
        reference: &StereoFrame,
        current: &StereoFrame,
        camera: &StereoCamera,
        matches: &KeypointMatches,
        pixel_covariance: &Matrix3<f64>,
    ) -> Option<(RelativePose, Matrix3<f64>, Vec<usize>, usize)> {
        let points: Vec<((Vector3<f64>, Matrix3<f64>), (Vector3<f64>, Matrix3<f64>))> = matches
            .iter()
            .map(|m| {
                (
                    get_point3_and_covariance(reference, camera, m.reference, pixel_covariance, None),
                    get_point3_and_covariance(current, camera, m.current, pixel_covariance, None),
                )
            })
            .collect();
        let data = points
            .iter()
            .map(|((r, _), (c, _))| PointMatch(Point3::from(*r), Point3::from(*c)));
        let threshold = self.params.ransac_threshold_stereo;
        let hypothesis = self.ransac(threshold).run_refined(&Arun::new(), data)?;
        let covariance = centroid_translation_covariance(
            &hypothesis.model.rotation(),
            hypothesis
                .inliers
                .iter()
                .map(|&ix| (points[ix].0 .1, points[ix].1 .1)),
        )
        .unwrap_or_else(Matrix3::zeros);
        Some((
            hypothesis.model,
            covariance,
            hypothesis.inliers,
            hypothesis.iterations,
        ))
    }

    /// Translation only, with the rotation held fixed. Matches whose combined covariance
    /// cannot be inverted take no part and end up as outliers.
    fn one_point_stereo(
        &mut self,
        reference: &StereoFrame,
        current: &StereoFrame,
        camera: &StereoCamera,
        matches: &KeypointMatches,
        pixel_covariance: &Matrix3<f64>,
        rotation: &Rotation3<f64>,
    ) -> Option<(RelativePose, Matrix3<f64>, Vec<usize>, usize)> {
        let (positions, data): (Vec<usize>, Vec<_>) = matches
            .iter()
            .enumerate()
            .filter_map(|(position, m)| {
                let (p_ref, cov_ref) =
                    get_point3_and_covariance(reference, camera, m.reference, pixel_covariance, None);
                let (p_cur, cov_cur) = get_point3_and_covariance(
                    current,
                    camera,
                    m.current,
                    pixel_covariance,
                    Some(rotation),
                );
                covariant_point_match(
                    rotation,
                    &Point3::from(p_ref),
                    &cov_ref,
                    &Point3::from(p_cur),
                    &cov_cur,
                )
                .map(|data| (position, data))
            })
            .unzip();
        let threshold = self.params.ransac_mahalanobis_threshold_stereo;
        let hypothesis = self
            .ransac(threshold)
            .run_refined(&OnePoint::new(), data.iter().copied())?;
        let covariance =
            information_weighted_translation(hypothesis.inliers.iter().map(|&ix| data[ix]))
                .map(|(_, covariance)| covariance)
                .unwrap_or_else(Matrix3::zeros);
        let inliers = hypothesis.inliers.iter().map(|&ix| positions[ix]).collect();
        Some((
            hypothesis.model.with_rotation(*rotation),
            covariance,
            inliers,
            hypothesis.iterations,
        ))
    }
}
