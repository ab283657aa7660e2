use eight_point::EightPoint;
use rand::{Rng, SeedableRng};
use rand_pcg::Pcg64;
use vio_core::{
    nalgebra::{Point3, Rotation3, UnitVector3, Vector3},
    sample_consensus::{Estimator, Model},
    rotation_angle, BearingMatch, Refine, RelativePose,
};

const SAMPLE_POINTS: usize = 16;
const RESIDUAL_THRESHOLD: f64 = 1e-8;

const ROT_MAGNITUDE: f64 = 0.2;
const POINT_BOX_SIZE: f64 = 2.0;
const POINT_DISTANCE: f64 = 3.0;

#[test]
fn randomized() {
    let mut rng = Pcg64::seed_from_u64(0);
    let successes = (0..1000).filter(|_| run_round(&mut rng)).count();
    eprintln!("successes: {}", successes);
    assert!(successes > 950);
}

#[test]
fn refine_on_all_points() {
    let mut rng = Pcg64::seed_from_u64(1);
    let (pose, matches) = some_test_data(&mut rng);
    let eight_point = EightPoint::new();
    let refined = eight_point
        .refine(&RelativePose::identity(), matches.iter().copied())
        .expect("didn't get a refined pose");
    assert!(rotation_angle(&refined.rotation().rotation_to(&pose.rotation())) < 1e-6);
    assert!(refined.translation_direction_angle(&pose).unwrap() < 1e-6);
}

#[test]
fn too_few_matches() {
    let mut rng = Pcg64::seed_from_u64(2);
    let (_, matches) = some_test_data(&mut rng);
    let eight_point = EightPoint::new();
    assert!(eight_point.from_matches(matches.iter().copied().take(7)).is_none());
}

fn run_round(rng: &mut Pcg64) -> bool {
    let (pose, matches) = some_test_data(rng);
    let eight_point = EightPoint::new();
    let poses = eight_point.estimate(matches.iter().copied().take(8));
    let Some(best) = poses.into_iter().min_by(|a, b| {
        let ra: f64 = matches.iter().map(|m| a.residual(m)).sum();
        let rb: f64 = matches.iter().map(|m| b.residual(m)).sum();
        ra.total_cmp(&rb)
    }) else {
        eprintln!("didn't get any pose");
        return false;
    };
    let mut success = true;
    for m in &matches {
        if best.residual(m) > RESIDUAL_THRESHOLD {
            success = false;
            eprintln!("failed residual check: {}", best.residual(m));
        }
    }
    if rotation_angle(&best.rotation().rotation_to(&pose.rotation())) > 1e-4 {
        success = false;
        eprintln!("failed rotation check");
    }
    success
}

/// Gets a random relative pose and the bearing matches of random points in front of
/// both cameras.
fn some_test_data(rng: &mut Pcg64) -> (RelativePose, Vec<BearingMatch>) {
    let random_vector =
        |rng: &mut Pcg64| Vector3::new(rng.gen::<f64>(), rng.gen::<f64>(), rng.gen::<f64>());
    let translation = (random_vector(rng) - Vector3::repeat(0.5)).normalize();
    let rotation = Rotation3::new(
        (random_vector(rng) - Vector3::repeat(0.5)) * std::f64::consts::PI * ROT_MAGNITUDE,
    );
    let pose = RelativePose::from_parts(translation, rotation);
    let to_current = pose.inverse();

    let matches = (0..SAMPLE_POINTS)
        .map(|_| {
            let mut p = Point3::from(random_vector(rng) * POINT_BOX_SIZE);
            p.x -= 0.5 * POINT_BOX_SIZE;
            p.y -= 0.5 * POINT_BOX_SIZE;
            p.z += POINT_DISTANCE;
            let current = to_current.transform(&p);
            BearingMatch(
                UnitVector3::new_normalize(p.coords),
                UnitVector3::new_normalize(current.coords),
            )
        })
        .collect();
    (pose, matches)
}
