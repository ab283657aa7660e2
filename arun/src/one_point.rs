use arrayvec::ArrayVec;
use vio_core::{
    nalgebra::{Matrix3, Point3, Rotation3, Vector3},
    sample_consensus::Estimator,
    CovariantPointMatch, Refine, TranslationEstimate,
};

/// Builds the [`CovariantPointMatch`] of two triangulated points once the rotation of the
/// current camera in the reference camera is known.
///
/// `rotated_current_covariance` must already be expressed in the reference camera, which is
/// `R * cov_cur * R^T`. Returns `None` if the combined covariance is singular.
pub fn covariant_point_match(
    rotation: &Rotation3<f64>,
    reference: &Point3<f64>,
    reference_covariance: &Matrix3<f64>,
    current: &Point3<f64>,
    rotated_current_covariance: &Matrix3<f64>,
) -> Option<CovariantPointMatch> {
    let delta = reference.coords - rotation * current.coords;
    let information = (reference_covariance + rotated_current_covariance).try_inverse()?;
    Some(CovariantPointMatch {
        delta,
        information: 0.5 * (information + information.transpose()),
    })
}

/// The information-weighted mean of the translations voted by each match, together with
/// its covariance `(sum Λ_i)^-1`.
///
/// Returns `None` when there are no matches or the summed information is singular.
pub fn information_weighted_translation<I>(data: I) -> Option<(Vector3<f64>, Matrix3<f64>)>
where
    I: IntoIterator<Item = CovariantPointMatch>,
{
    let mut information_sum = Matrix3::zeros();
    let mut weighted_sum = Vector3::zeros();
    let mut any = false;
    for CovariantPointMatch { delta, information } in data {
        information_sum += information;
        weighted_sum += information * delta;
        any = true;
    }
    if !any {
        return None;
    }
    let covariance = information_sum.try_inverse()?;
    let covariance = 0.5 * (covariance + covariance.transpose());
    Some((covariance * weighted_sum, covariance))
}

/// Estimates the translation from a single stereo correspondence when the rotation is
/// known: the hypothesis is simply the translation that correspondence votes for.
///
/// Refining takes the information-weighted mean over all inliers, which is the maximum
/// likelihood translation under Gaussian point noise.
#[derive(Copy, Clone, Debug, Default)]
pub struct OnePoint;

impl OnePoint {
    pub fn new() -> Self {
        Self
    }
}

impl Estimator<CovariantPointMatch> for OnePoint {
    type Model = TranslationEstimate;
    type ModelIter = ArrayVec<TranslationEstimate, 1>;
    const MIN_SAMPLES: usize = 1;

    fn estimate<I>(&self, mut data: I) -> Self::ModelIter
    where
        I: Iterator<Item = CovariantPointMatch> + Clone,
    {
        data.next()
            .map(|m| TranslationEstimate(m.delta))
            .into_iter()
            .collect()
    }
}

impl Refine<CovariantPointMatch> for OnePoint {
    fn refine<I>(&self, _model: &TranslationEstimate, inliers: I) -> Option<TranslationEstimate>
    where
        I: Iterator<Item = CovariantPointMatch> + Clone,
    {
        information_weighted_translation(inliers).map(|(t, _)| TranslationEstimate(t))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn weighted_mean_favours_confident_votes() {
        let confident = CovariantPointMatch {
            delta: Vector3::new(1.0, 0.0, 0.0),
            information: Matrix3::identity() * 9.0,
        };
        let vague = CovariantPointMatch {
            delta: Vector3::new(2.0, 0.0, 0.0),
            information: Matrix3::identity(),
        };
        let (t, covariance) = information_weighted_translation([confident, vague]).unwrap();
        assert_relative_eq!(t, Vector3::new(1.1, 0.0, 0.0), epsilon = 1e-12);
        assert_relative_eq!(covariance, Matrix3::identity() * 0.1, epsilon = 1e-12);
    }

    #[test]
    fn singular_covariance_is_rejected() {
        let m = covariant_point_match(
            &Rotation3::identity(),
            &Point3::origin(),
            &Matrix3::zeros(),
            &Point3::origin(),
            &Matrix3::zeros(),
        );
        assert!(m.is_none());
    }

    #[test]
    fn hypothesis_is_the_sample_vote() {
        let m = CovariantPointMatch {
            delta: Vector3::new(0.1, 0.2, 0.3),
            information: Matrix3::identity(),
        };
        let models = OnePoint.estimate(std::iter::once(m));
        assert_eq!(models.as_slice(), &[TranslationEstimate(m.delta)]);
    }
}
