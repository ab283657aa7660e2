use derive_more::{AsMut, AsRef, Deref, DerefMut, From, Into};
use vio_core::{
    nalgebra::{Matrix3, Rotation3, Vector3},
    sample_consensus::Model,
    BearingMatch, RelativePose,
};

/// An essential matrix, which satisfies the epipolar constraint
///
/// ```text
/// transpose(f_ref) * E * f_cur = 0
/// ```
///
/// for every pair of bearings `f_ref` and `f_cur` observing the same point from the
/// reference and the current camera. For a [`RelativePose`] with rotation `R` and
/// translation `t` it is `E = [t]x R`.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, AsMut, AsRef, Deref, DerefMut, From, Into)]
pub struct EssentialMatrix(pub Matrix3<f64>);

impl EssentialMatrix {
    /// Finds the closest essential matrix in Frobenius norm.
    ///
    /// The two non-zero singular values are averaged and the third one is forced to zero.
    pub fn recondition(self, epsilon: f64, max_iterations: usize) -> Option<Self> {
        let mut svd = self.try_svd(true, true, epsilon, max_iterations)?;
        svd.singular_values[2] = 0.0;
        let new_singular = (svd.singular_values[0] + svd.singular_values[1]) / 2.0;
        svd.singular_values[0] = new_singular;
        svd.singular_values[1] = new_singular;
        svd.recompose().ok().map(Self)
    }

    /// Returns the two rotations compatible with the essential matrix along with the
    /// unit translation direction, whose sign is unknown.
    ///
    /// `epsilon` and `max_iterations` bound the singular value decomposition.
    ///
    /// ```
    /// use eight_point::EssentialMatrix;
    /// use vio_core::{rotation_angle, RelativePose};
    /// use vio_core::nalgebra::{Rotation3, Vector3};
    /// let pose = RelativePose::from_parts(
    ///     Vector3::new(-0.8, 0.4, 0.5),
    ///     Rotation3::from_euler_angles(0.2, 0.3, 0.4),
    /// );
    /// let (rot_a, rot_b, t) = EssentialMatrix::from(pose)
    ///     .possible_rotations_unscaled_translation(1e-9, 100)
    ///     .unwrap();
    /// let a_close = rotation_angle(&rot_a.rotation_to(&pose.rotation())) < 1e-4;
    /// let b_close = rotation_angle(&rot_b.rotation_to(&pose.rotation())) < 1e-4;
    /// assert!(a_close || b_close);
    /// assert!(1.0 - t.dot(&pose.translation().normalize()).abs() < 1e-6);
    /// ```
    pub fn possible_rotations_unscaled_translation(
        &self,
        epsilon: f64,
        max_iterations: usize,
    ) -> Option<(Rotation3<f64>, Rotation3<f64>, Vector3<f64>)> {
        // `W` from https://en.wikipedia.org/wiki/Essential_matrix#Finding_one_solution.
        let w = Matrix3::new(0.0, -1.0, 0.0, 1.0, 0.0, 0.0, 0.0, 0.0, 1.0);
        let wt = w.transpose();

        // The singular values come out sorted in decreasing order.
        let svd = self.try_svd(true, true, epsilon, max_iterations)?;
        let mut u = svd.u?;
        let mut v_t = svd.v_t?;
        // The last singular vectors are only defined up to sign since d = (a a 0),
        // so flip them to get proper rotations.
        if u.determinant() < 0.0 {
            for n in u.column_mut(2).iter_mut() {
                *n *= -1.0;
            }
        }
        if v_t.determinant() < 0.0 {
            for n in v_t.row_mut(2).iter_mut() {
                *n *= -1.0;
            }
        }
        Some((
            Rotation3::from_matrix_unchecked(u * w * v_t),
            Rotation3::from_matrix_unchecked(u * wt * v_t),
            u.column(2).normalize(),
        ))
    }

    /// All four poses compatible with the essential matrix. Exactly one of them places
    /// observed points in front of both cameras.
    pub fn possible_poses(&self, epsilon: f64, max_iterations: usize) -> Option<[RelativePose; 4]> {
        self.possible_rotations_unscaled_translation(epsilon, max_iterations)
            .map(|(rot_a, rot_b, t)| {
                [
                    RelativePose::from_parts(t, rot_a),
                    RelativePose::from_parts(t, rot_b),
                    RelativePose::from_parts(-t, rot_a),
                    RelativePose::from_parts(-t, rot_b),
                ]
            })
    }
}

impl From<RelativePose> for EssentialMatrix {
    fn from(pose: RelativePose) -> Self {
        Self(pose.essential_matrix())
    }
}

/// The absolute algebraic epipolar error.
impl Model<BearingMatch> for EssentialMatrix {
    fn residual(&self, data: &BearingMatch) -> f64 {
        let &BearingMatch(reference, current) = data;
        reference.dot(&(self.0 * current.into_inner())).abs()
    }
}
