use arrayvec::ArrayVec;
use vio_core::{
    nalgebra::{Matrix3, Point3, Rotation3, Vector3},
    sample_consensus::Estimator,
    PointMatch, Refine, RelativePose,
};

/// Rigid registration of two point sets by
/// [Arun's method](https://doi.org/10.1109/TPAMI.1987.4767965).
///
/// Finds the pose `(R, t)` minimizing `sum |p_ref - (R * p_cur + t)|^2` in closed form from
/// the singular value decomposition of the cross-covariance of the centered sets.
#[derive(Copy, Clone, Debug)]
pub struct Arun {
    pub epsilon: f64,
    pub iterations: usize,
    /// Point sets whose second largest singular value, relative to the largest, falls
    /// below this are considered collinear and rejected.
    pub degeneracy_ratio: f64,
}

impl Arun {
    pub fn new() -> Self {
        Default::default()
    }

    /// Registers the current points onto the reference points.
    ///
    /// Returns `None` with fewer than three matches or when the points are collinear.
    pub fn fit<I>(&self, data: I) -> Option<RelativePose>
    where
        I: Iterator<Item = PointMatch> + Clone,
    {
        let mut count = 0usize;
        let mut reference_sum = Vector3::zeros();
        let mut current_sum = Vector3::zeros();
        for PointMatch(reference, current) in data.clone() {
            reference_sum += reference.coords;
            current_sum += current.coords;
            count += 1;
        }
        if count < Self::MIN_SAMPLES {
            return None;
        }
        let reference_centroid = Point3::from(reference_sum / count as f64);
        let current_centroid = Point3::from(current_sum / count as f64);

        let cross_covariance: Matrix3<f64> = data
            .map(|PointMatch(reference, current)| {
                (current - current_centroid) * (reference - reference_centroid).transpose()
            })
            .sum();

        let svd = cross_covariance.try_svd(true, true, self.epsilon, self.iterations)?;
        let singular = svd.singular_values;
        if singular[0] <= 0.0 || singular[1] < self.degeneracy_ratio * singular[0] {
            return None;
        }
        let u = svd.u?;
        let mut v = svd.v_t?.transpose();
        let mut rotation = v * u.transpose();
        // A reflection is the best fit, so flip the axis of the smallest singular value.
        if rotation.determinant() < 0.0 {
            for n in v.column_mut(2).iter_mut() {
                *n *= -1.0;
            }
            rotation = v * u.transpose();
        }
        let rotation = Rotation3::from_matrix_unchecked(rotation);
        let translation = reference_centroid.coords - rotation * current_centroid.coords;
        Some(RelativePose::from_parts(translation, rotation))
    }
}

impl Default for Arun {
    fn default() -> Self {
        Self {
            epsilon: 1e-12,
            iterations: 1000,
            degeneracy_ratio: 1e-6,
        }
    }
}

impl Estimator<PointMatch> for Arun {
    type Model = RelativePose;
    type ModelIter = ArrayVec<RelativePose, 1>;
    const MIN_SAMPLES: usize = 3;

    fn estimate<I>(&self, data: I) -> Self::ModelIter
    where
        I: Iterator<Item = PointMatch> + Clone,
    {
        self.fit(data).into_iter().collect()
    }
}

impl Refine<PointMatch> for Arun {
    fn refine<I>(&self, _model: &RelativePose, inliers: I) -> Option<RelativePose>
    where
        I: Iterator<Item = PointMatch> + Clone,
    {
        self.fit(inliers)
    }
}

/// The covariance of the translation estimated by [`Arun`] from `n` matches.
///
/// Each item holds the covariances of the reference and the current point of a match.
/// The translation is the difference of the centroids, so its covariance is
/// `1/n^2 * sum(cov_ref + R * cov_cur * R^T)`.
///
/// Returns `None` when there are no matches.
pub fn centroid_translation_covariance<I>(
    rotation: &Rotation3<f64>,
    covariances: I,
) -> Option<Matrix3<f64>>
where
    I: IntoIterator<Item = (Matrix3<f64>, Matrix3<f64>)>,
{
    let r = rotation.matrix();
    let mut count = 0usize;
    let mut sum = Matrix3::zeros();
    for (reference, current) in covariances {
        sum += reference + r * current * r.transpose();
        count += 1;
    }
    if count == 0 {
        return None;
    }
    let covariance = sum / (count * count) as f64;
    Some(0.5 * (covariance + covariance.transpose()))
}
