use adaptive_ransac::Ransac;
use arun::Arun;
use eight_point::EightPoint;
use quickcheck_macros::quickcheck;
use rand::{Rng, SeedableRng};
use rand_pcg::Pcg64;
use rand_xoshiro::Xoshiro256PlusPlus;
use std::time::Duration;
use two_point::TwoPoint;
use vio_core::{
    nalgebra::{Point3, Rotation3, UnitVector3, Vector3},
    sample_consensus::{Consensus, Model},
    rotation_angle, BearingMatch, PointMatch, RelativePose,
};

const INLIERS: usize = 60;
const OUTLIERS: usize = 15;

fn random_vector(rng: &mut Pcg64) -> Vector3<f64> {
    Vector3::new(
        rng.gen_range(-1.0..1.0),
        rng.gen_range(-1.0..1.0),
        rng.gen_range(-1.0..1.0),
    )
}

fn pose() -> RelativePose {
    RelativePose::from_parts(
        Vector3::new(0.6, -0.1, 0.2).normalize(),
        Rotation3::from_euler_angles(0.03, -0.08, 0.05),
    )
}

fn random_point(rng: &mut Pcg64) -> Point3<f64> {
    Point3::new(
        rng.gen_range(-3.0..3.0),
        rng.gen_range(-2.0..2.0),
        rng.gen_range(4.0..10.0),
    )
}

/// Bearing matches where the last `OUTLIERS` are random mismatches.
fn bearing_scene(rng: &mut Pcg64) -> Vec<BearingMatch> {
    let to_current = pose().inverse();
    let mut matches: Vec<BearingMatch> = (0..INLIERS)
        .map(|_| {
            let p = random_point(rng);
            BearingMatch(
                UnitVector3::new_normalize(p.coords),
                UnitVector3::new_normalize(to_current.transform(&p).coords),
            )
        })
        .collect();
    for _ in 0..OUTLIERS {
        let p = random_point(rng);
        let q = random_point(rng);
        matches.push(BearingMatch(
            UnitVector3::new_normalize(p.coords),
            UnitVector3::new_normalize(q.coords),
        ));
    }
    matches
}

fn point_scene(rng: &mut Pcg64) -> Vec<PointMatch> {
    let to_current = pose().scale(0.5).inverse();
    let mut matches: Vec<PointMatch> = (0..INLIERS)
        .map(|_| {
            let p = random_point(rng);
            PointMatch(p, to_current.transform(&p))
        })
        .collect();
    for _ in 0..OUTLIERS {
        let p = random_point(rng);
        matches.push(PointMatch(p, p + random_vector(rng) * 3.0 + Vector3::x()));
    }
    matches
}

#[test]
fn eight_point_rejects_mismatches() {
    let _ = pretty_env_logger::try_init_timed();
    let mut rng = Pcg64::seed_from_u64(0);
    let matches = bearing_scene(&mut rng);
    let mut ransac = Ransac::new(1e-7, Xoshiro256PlusPlus::seed_from_u64(0))
        .max_iterations(2000)
        .refine(true);
    let hypothesis = ransac
        .run_refined(&EightPoint::new(), matches.iter().copied())
        .expect("no hypothesis");
    assert!(hypothesis.inliers.len() >= INLIERS);
    assert!(hypothesis.inliers.iter().copied().take(INLIERS).eq(0..INLIERS));
    let truth = pose();
    assert!(rotation_angle(&hypothesis.model.rotation().rotation_to(&truth.rotation())) < 1e-4);
    assert!(hypothesis.model.translation_direction_angle(&truth).unwrap() < 1e-3);
}

#[test]
fn two_point_with_known_rotation() {
    let mut rng = Pcg64::seed_from_u64(1);
    let matches = bearing_scene(&mut rng);
    let truth = pose();
    let mut ransac = Ransac::new(1e-7, Xoshiro256PlusPlus::seed_from_u64(1)).refine(true);
    let hypothesis = ransac
        .run_refined(&TwoPoint::new(truth.rotation()), matches.iter().copied())
        .expect("no hypothesis");
    assert!(hypothesis.inliers.len() >= INLIERS);
    assert!(hypothesis.model.translation_direction_angle(&truth).unwrap() < 1e-3);
    // Two-point samples are small, so adaptive stopping ends early.
    assert!(hypothesis.iterations < 100);
}

#[test]
fn arun_through_consensus_trait() {
    let mut rng = Pcg64::seed_from_u64(2);
    let matches = point_scene(&mut rng);
    let mut ransac = Ransac::new(0.05, Xoshiro256PlusPlus::seed_from_u64(2));
    let (model, inliers) = ransac
        .model_inliers(&Arun::new(), matches.iter().copied())
        .expect("no model");
    assert_eq!(inliers, (0..INLIERS).collect::<Vec<_>>());
    let truth = pose().scale(0.5);
    assert!((model.translation() - truth.translation()).norm() < 1e-6);
}

#[test]
fn same_seed_same_result() {
    let mut rng = Pcg64::seed_from_u64(3);
    let matches = bearing_scene(&mut rng);
    let run = |seed| {
        Ransac::new(1e-7, Xoshiro256PlusPlus::seed_from_u64(seed))
            .run(&EightPoint::new(), matches.iter().copied())
            .expect("no hypothesis")
    };
    assert_eq!(run(7), run(7));
}

#[test]
fn too_little_data() {
    let mut rng = Pcg64::seed_from_u64(4);
    let matches = bearing_scene(&mut rng);
    let mut ransac = Ransac::new(1e-7, Xoshiro256PlusPlus::seed_from_u64(4));
    assert!(ransac
        .run(&EightPoint::new(), matches.iter().copied().take(7))
        .is_none());
}

#[test]
fn exhausted_time_budget_gives_nothing() {
    let mut rng = Pcg64::seed_from_u64(5);
    let matches = bearing_scene(&mut rng);
    let mut ransac = Ransac::new(1e-7, Xoshiro256PlusPlus::seed_from_u64(5))
        .max_time(Some(Duration::from_secs(0)));
    assert!(ransac
        .run(&EightPoint::new(), matches.iter().copied())
        .is_none());

    let mut ransac = Ransac::new(1e-7, Xoshiro256PlusPlus::seed_from_u64(5))
        .max_time(Some(Duration::ZERO))
        .refine(true);
    assert!(ransac
        .run_refined(&EightPoint::new(), matches.iter().copied())
        .is_none());
}

#[test]
fn generous_time_budget_changes_nothing() {
    let mut rng = Pcg64::seed_from_u64(6);
    let matches = bearing_scene(&mut rng);
    let run = |max_time| {
        Ransac::new(1e-7, Xoshiro256PlusPlus::seed_from_u64(6))
            .max_time(max_time)
            .run(&EightPoint::new(), matches.iter().copied())
    };
    let bounded = run(Some(Duration::from_secs(3600))).expect("no hypothesis");
    assert_eq!(Some(bounded), run(None));
}

#[quickcheck]
fn inliers_are_sorted_and_below_threshold(seed: u64, threshold: u8) -> bool {
    let threshold = (threshold as f64 + 1.0) * 0.01;
    let mut rng = Pcg64::seed_from_u64(seed);
    let matches = point_scene(&mut rng);
    let hypothesis = match Ransac::new(threshold, Xoshiro256PlusPlus::seed_from_u64(seed))
        .max_iterations(50)
        .run(&Arun::new(), matches.iter().copied())
    {
        Some(hypothesis) => hypothesis,
        None => return true,
    };
    hypothesis.inliers.windows(2).all(|w| w[0] < w[1])
        && hypothesis
            .inliers
            .iter()
            .all(|&ix| hypothesis.model.residual(&matches[ix]) < threshold)
}
