use image::{GrayImage, Luma};
use rand::{Rng, SeedableRng};
use rand_pcg::Pcg64;
use vio_core::{
    nalgebra::{Matrix3, Point2, Point3, Rotation3, Vector2, Vector3},
    rotation_angle, CameraIntrinsics, CameraParams, Frame, KeyPoint, KeypointStatus, LandmarkId,
    RelativePose, StereoCamera, StereoFrame, StereoMeasurement, TrackingStatus,
};
use vio_features::{GoodFeatures, OccupancyMask};
use vio_frontend::{
    find_matching_stereo_keypoints, triangulate, StereoMatcher, StereoMatchingParams, Tracker,
    TrackerParams,
};

const WIDTH: u32 = 640;
const HEIGHT: u32 = 480;

fn intrinsics() -> CameraIntrinsics {
    CameraIntrinsics::identity()
        .focals(Vector2::new(400.0, 400.0))
        .principal_point(Point2::new(320.0, 240.0))
}

fn stereo_camera() -> StereoCamera {
    StereoCamera::new(intrinsics(), 0.1, (WIDTH, HEIGHT))
}

fn tracker(params: TrackerParams) -> Tracker {
    let camera = CameraParams::pinhole(0, intrinsics(), (WIDTH, HEIGHT));
    Tracker::new(params, camera, None).unwrap()
}

fn pose() -> RelativePose {
    RelativePose::from_parts(
        Vector3::new(0.2, -0.05, 0.4),
        Rotation3::from_euler_angles(0.03, 0.06, -0.02),
    )
}

/// Builds a matched stereo frame observing `points` (left camera frame) as landmarks
/// `0..points.len()`.
fn stereo_frame(id: u64, points: &[Point3<f64>]) -> StereoFrame {
    let camera = stereo_camera();
    let pixel_covariance = Matrix3::identity();
    let mut left = Frame::new(id, id as i64, 0, GrayImage::new(WIDTH, HEIGHT));
    let mut right = Frame::new(id, id as i64, 1, GrayImage::new(WIDTH, HEIGHT));
    let mut measurements = vec![];
    for (i, point) in points.iter().enumerate() {
        let (l, r) = camera.project(point).unwrap();
        let landmark = Some(LandmarkId(i as u64));
        left.push_keypoint(l, 1.0, landmark, 1, KeypointStatus::Valid);
        right.push_keypoint(r, 1.0, landmark, 1, KeypointStatus::Valid);
        let (point, covariance) = triangulate(&camera, &l, r.x, &pixel_covariance).unwrap();
        measurements.push(Some(StereoMeasurement {
            depth: point.z,
            point,
            covariance,
        }));
    }
    let mut frame = StereoFrame::new(id, id as i64, left, right);
    frame.measurements = measurements;
    frame
}

/// 50 points seen in the reference frame, 45 of them in the current frame where the last
/// 5 were displaced sideways.
fn scene(seed: u64, pose: &RelativePose) -> (StereoFrame, StereoFrame) {
    let mut rng = Pcg64::seed_from_u64(seed);
    let to_current = pose.inverse();
    let in_reference: Vec<Point3<f64>> = (0..50)
        .map(|_| {
            let z = rng.gen_range(2.0..6.0);
            Point3::new(
                z * rng.gen_range(-0.5..0.5),
                z * rng.gen_range(-0.4..0.4),
                z,
            )
        })
        .collect();
    let in_current: Vec<Point3<f64>> = in_reference[..45]
        .iter()
        .enumerate()
        .map(|(i, p)| {
            let p = to_current.transform(p);
            if i < 40 {
                p
            } else {
                p + Vector3::new(1.5, -1.0, 0.0)
            }
        })
        .collect();
    (stereo_frame(0, &in_reference), stereo_frame(1, &in_current))
}

fn is_positive_semi_definite(covariance: &Matrix3<f64>) -> bool {
    (covariance - covariance.transpose()).norm() < 1e-12
        && covariance
            .symmetric_eigenvalues()
            .iter()
            .all(|&e| e >= -1e-12)
}

#[test]
fn arun_recovers_the_pose() {
    let _ = pretty_env_logger::try_init_timed();
    let truth = pose();
    for seed in 0..4 {
        let (mut reference, mut current) = scene(seed, &truth);
        let mut tracker = tracker(TrackerParams {
            ransac_seed: seed,
            ..TrackerParams::default()
        });
        let (status, estimate, covariance) = tracker.geometric_outlier_rejection_stereo(
            &mut reference,
            &mut current,
            &stereo_camera(),
            None,
        );
        assert_eq!(status, TrackingStatus::Valid, "seed {}", seed);
        assert_eq!(tracker.diagnostics().stereo_inliers, 40, "seed {}", seed);
        assert!((estimate.translation() - truth.translation()).norm() < 1e-6);
        assert!(rotation_angle(&(estimate.rotation().inverse() * truth.rotation())) < 1e-6);
        assert!(is_positive_semi_definite(&covariance));
        assert!(covariance.trace() > 0.0);

        for ix in 40..45 {
            assert_eq!(current.right_status(ix), KeypointStatus::FailedTriangulation);
            assert!(current.measurement(ix).is_none());
            assert_eq!(current.left.landmarks[ix], None);
            assert_eq!(reference.left.landmarks[ix], None);
        }
        assert!(reference.is_consistent() && current.is_consistent());
        assert_eq!(find_matching_stereo_keypoints(&reference, &current).len(), 40);
    }
}

#[test]
fn one_point_with_known_rotation() {
    let truth = pose();
    for seed in 4..8 {
        let (mut reference, mut current) = scene(seed, &truth);
        let mut tracker = tracker(TrackerParams {
            ransac_seed: seed,
            stereo_keypoint_sigma: 0.5,
            ..TrackerParams::default()
        });
        let (status, estimate, covariance) = tracker.geometric_outlier_rejection_stereo(
            &mut reference,
            &mut current,
            &stereo_camera(),
            Some(&truth.rotation()),
        );
        assert_eq!(status, TrackingStatus::Valid, "seed {}", seed);
        assert_eq!(tracker.diagnostics().stereo_inliers, 40, "seed {}", seed);
        assert_eq!(estimate.rotation(), truth.rotation());
        assert!((estimate.translation() - truth.translation()).norm() < 1e-6);
        assert!(is_positive_semi_definite(&covariance));
        assert!(covariance.trace() > 0.0);
    }
}

#[test]
fn too_few_stereo_matches() {
    let points = [Point3::new(0.0, 0.0, 3.0), Point3::new(0.5, 0.1, 4.0)];
    let mut reference = stereo_frame(0, &points);
    let mut current = stereo_frame(1, &points);
    let mut tracker = tracker(TrackerParams {
        min_nr_stereo_inliers: 5,
        ..TrackerParams::default()
    });
    let (status, pose, covariance) = tracker.geometric_outlier_rejection_stereo(
        &mut reference,
        &mut current,
        &stereo_camera(),
        None,
    );
    assert_eq!(status, TrackingStatus::FewMatches);
    assert_eq!(pose, RelativePose::identity());
    assert_eq!(covariance, Matrix3::zeros());
    assert_eq!(tracker.diagnostics().stereo_iterations, 0);
    assert!(current.measurement(1).is_some());
}

#[test]
fn invalid_right_keypoints_are_not_matched() {
    let truth = pose();
    let (mut reference, current) = scene(3, &truth);
    reference.invalidate_stereo(0, KeypointStatus::NoDepth);
    reference.invalidate_stereo(7, KeypointStatus::NoRightRect);
    let matches = find_matching_stereo_keypoints(&reference, &current);
    assert_eq!(matches.len(), 43);
    assert!(matches.iter().all(|m| m.reference != 0 && m.reference != 7));
}

#[test]
fn stereo_verification_can_be_disabled() {
    let (mut reference, mut current) = scene(0, &pose());
    let mut tracker = tracker(TrackerParams {
        stereo_verification: false,
        ..TrackerParams::default()
    });
    let (status, _, _) = tracker.geometric_outlier_rejection_stereo(
        &mut reference,
        &mut current,
        &stereo_camera(),
        None,
    );
    assert_eq!(status, TrackingStatus::Disabled);
    assert_eq!(current.left.valid_landmarks().count(), 45);
}

/// Random 4x4 blocks, shifted left by `disparity` pixels (at most 16).
fn blocks(seed: u64, disparity: u32) -> GrayImage {
    let mut rng = Pcg64::seed_from_u64(seed);
    let columns = WIDTH / 4 + 4;
    let cells: Vec<u8> = (0..columns * (HEIGHT / 4)).map(|_| rng.gen()).collect();
    GrayImage::from_fn(WIDTH, HEIGHT, |x, y| {
        let x = x + disparity;
        Luma([cells[((y / 4) * columns + x / 4) as usize]])
    })
}

#[test]
fn matcher_recovers_a_known_disparity() {
    let _ = pretty_env_logger::try_init_timed();
    let disparity = 8;
    let left_image = blocks(5, 0);
    let right_image = blocks(5, disparity);
    let camera = stereo_camera();

    let mut left = Frame::new(0, 0, 0, left_image.clone());
    let mut mask = OccupancyMask::new_free(WIDTH, HEIGHT);
    let corners = GoodFeatures::new()
        .max_corners(80)
        .quality_level(0.01)
        .detect(&left_image, &mut mask);
    for (i, corner) in corners.into_iter().enumerate() {
        left.push_corner(corner, LandmarkId(i as u64));
    }
    let right = Frame::new(0, 0, 1, right_image);
    let mut frame = StereoFrame::new(0, 0, left, right);

    let matcher = StereoMatcher::new(camera, StereoMatchingParams::default(), 1.0);
    matcher.sparse_stereo_matching(&mut frame);
    assert!(frame.is_consistent());

    let interior: Vec<usize> = (0..frame.left.len())
        .filter(|&ix| {
            let point = frame.left.keypoints[ix];
            point.x > 30.0 && point.y > 10.0 && point.y < HEIGHT as f64 - 10.0
        })
        .collect();
    assert!(interior.len() >= 20, "only {} interior corners", interior.len());
    let mut valid = 0;
    for &ix in &interior {
        if frame.right_status(ix).is_valid() {
            valid += 1;
            let left = frame.left.keypoints[ix];
            let right = frame.right.keypoints[ix];
            assert!((left.x - right.x - disparity as f64).abs() < 0.5, "{:?} {:?}", left, right);
            assert_eq!(left.y, right.y);
            let measurement = frame.measurement(ix).unwrap();
            assert!((measurement.depth - 5.0).abs() < 0.5);
        }
    }
    assert!(valid * 10 >= interior.len() * 9, "{} of {}", valid, interior.len());
}

#[test]
fn matcher_flags_border_keypoints() {
    let image = blocks(6, 0);
    let mut left = Frame::new(0, 0, 0, image.clone());
    left.push_corner(
        vio_core::Corner {
            point: KeyPoint::new(2.0, 240.0),
            score: 1.0,
        },
        LandmarkId(0),
    );
    let mut frame = StereoFrame::new(0, 0, left, Frame::new(0, 0, 1, image));
    StereoMatcher::new(stereo_camera(), StereoMatchingParams::default(), 1.0)
        .sparse_stereo_matching(&mut frame);
    assert_eq!(frame.right_status(0), KeypointStatus::NoLeftRect);
    assert_eq!(frame.right.keypoints[0], frame.left.keypoints[0]);
    assert!(frame.measurement(0).is_none());
}
