//! Estimates the translation direction between two cameras whose relative rotation is
//! already known, for example from integrated gyroscope measurements.
//!
//! Once the rotation `R` is fixed, the epipolar constraint of a bearing match
//! `f_ref^T [t]x R f_cur = 0` says that `t` is perpendicular to the normal of the
//! epipolar plane `n = (R f_cur) x f_ref`. Two matches give two such planes and the
//! translation direction is their intersection.

use arrayvec::ArrayVec;
use vio_core::{
    nalgebra::{Matrix3, Rotation3, Vector3},
    sample_consensus::Estimator,
    BearingMatch, Refine, RelativePose,
};

/// Estimates the unit translation of a [`RelativePose`] from two [`BearingMatch`]es
/// given the rotation of the current camera in the reference camera.
#[derive(Copy, Clone, Debug)]
pub struct TwoPoint {
    pub rotation: Rotation3<f64>,
    pub epsilon: f64,
    pub iterations: usize,
}

impl TwoPoint {
    pub fn new(rotation: Rotation3<f64>) -> Self {
        Self {
            rotation,
            epsilon: 1e-12,
            iterations: 1000,
        }
    }

    /// The (unnormalized) normal of the epipolar plane of a match.
    ///
    /// Its length is the sine of the angle between the rays, so matches with little
    /// parallax carry little weight.
    pub fn epipolar_normal(&self, data: &BearingMatch) -> Vector3<f64> {
        let &BearingMatch(reference, current) = data;
        (self.rotation * current.into_inner()).cross(&reference.into_inner())
    }

    /// The translation directions compatible with two matches, restricted to the signs
    /// that put the most matches in front of both cameras.
    fn minimal<I>(&self, data: I) -> ArrayVec<RelativePose, 2>
    where
        I: Iterator<Item = BearingMatch> + Clone,
    {
        let mut normals = data.clone().map(|m| self.epipolar_normal(&m));
        let (n1, n2) = match (normals.next(), normals.next()) {
            (Some(n1), Some(n2)) => (n1, n2),
            _ => return ArrayVec::new(),
        };
        let t = match n1.cross(&n2).try_normalize(self.epsilon) {
            Some(t) => t,
            None => return ArrayVec::new(),
        };
        let candidates = [
            RelativePose::from_parts(t, self.rotation),
            RelativePose::from_parts(-t, self.rotation),
        ];
        let counts = candidates.map(|pose| data.clone().filter(|m| pose.is_in_front(m)).count());
        let best = counts[0].max(counts[1]);
        if best == 0 {
            return ArrayVec::new();
        }
        candidates
            .iter()
            .zip(counts)
            .filter(|&(_, count)| count == best)
            .map(|(&pose, _)| pose)
            .collect()
    }
}

impl Estimator<BearingMatch> for TwoPoint {
    type Model = RelativePose;
    type ModelIter = ArrayVec<RelativePose, 2>;
    const MIN_SAMPLES: usize = 2;

    fn estimate<I>(&self, data: I) -> Self::ModelIter
    where
        I: Iterator<Item = BearingMatch> + Clone,
    {
        self.minimal(data)
    }
}

impl Refine<BearingMatch> for TwoPoint {
    /// The direction most perpendicular to every epipolar normal, which is the
    /// eigenvector of `sum(n * n^T)` with the smallest eigenvalue. Its sign is taken from
    /// the hypothesis.
    fn refine<I>(&self, model: &RelativePose, inliers: I) -> Option<RelativePose>
    where
        I: Iterator<Item = BearingMatch> + Clone,
    {
        let mut scatter = Matrix3::zeros();
        let mut count = 0;
        for m in inliers {
            let n = self.epipolar_normal(&m);
            scatter += n * n.transpose();
            count += 1;
        }
        if count < Self::MIN_SAMPLES {
            return None;
        }
        let eigens = scatter.try_symmetric_eigen(self.epsilon, self.iterations)?;
        let t = eigens
            .eigenvalues
            .iter()
            .enumerate()
            .min_by_key(|&(_, &n)| float_ord::FloatOrd(n))
            .map(|(ix, _)| eigens.eigenvectors.column(ix).into_owned())?
            .try_normalize(self.epsilon)?;
        let t = if t.dot(&model.translation()) < 0.0 {
            -t
        } else {
            t
        };
        Some(RelativePose::from_parts(t, self.rotation))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vio_core::nalgebra::{Point3, UnitVector3};

    fn observe(pose: &RelativePose, point: Point3<f64>) -> BearingMatch {
        let current = pose.inverse().transform(&point);
        BearingMatch(
            UnitVector3::new_normalize(point.coords),
            UnitVector3::new_normalize(current.coords),
        )
    }

    #[test]
    fn recovers_translation_from_two_points() {
        let pose = RelativePose::from_parts(
            Vector3::new(0.5, -0.2, 0.3).normalize(),
            Rotation3::from_euler_angles(0.02, -0.05, 0.1),
        );
        let data = [
            observe(&pose, Point3::new(1.0, 0.5, 5.0)),
            observe(&pose, Point3::new(-1.5, -0.3, 7.0)),
        ];
        let models = TwoPoint::new(pose.rotation()).estimate(data.iter().copied());
        assert_eq!(models.len(), 1);
        assert!(models[0].translation_direction_angle(&pose).unwrap() < 1e-9);
    }

    #[test]
    fn coplanar_normals_have_no_solution() {
        let pose = RelativePose::from_parts(Vector3::x(), Rotation3::identity());
        let m = observe(&pose, Point3::new(1.0, 0.5, 5.0));
        let models = TwoPoint::new(pose.rotation()).estimate([m, m].iter().copied());
        assert!(models.is_empty());
    }
}
