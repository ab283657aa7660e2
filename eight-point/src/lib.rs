//! Relative pose estimation from eight or more bearing correspondences.
//!
//! The [`EightPoint`] estimator solves the linear epipolar system for an
//! [`EssentialMatrix`], decomposes it into the four candidate poses and keeps the
//! candidates that place the most sample points in front of both cameras.

mod essential;

pub use essential::*;

use arrayvec::ArrayVec;
use vio_core::{
    nalgebra::{Matrix3, SMatrix, SVector},
    sample_consensus::{Estimator, Model},
    BearingMatch, Refine, RelativePose,
};

type Matrix9 = SMatrix<f64, 9, 9>;
type Vector9 = SVector<f64, 9>;

/// Accumulates the normal equations of the epipolar constraint of every match.
///
/// The unknown vector is the column-major essential matrix, so element `i + 3 * j`
/// multiplies `f_ref[i] * f_cur[j]`.
fn epipolar_normal_equations(matches: impl Iterator<Item = BearingMatch>) -> (Matrix9, usize) {
    let mut normal = Matrix9::zeros();
    let mut count = 0;
    for BearingMatch(reference, current) in matches {
        let mut row = Vector9::zeros();
        for j in 0..3 {
            let v = current[j] * reference.into_inner();
            row.fixed_rows_mut::<3>(3 * j).copy_from(&v);
        }
        normal += row * row.transpose();
        count += 1;
    }
    (normal, count)
}

/// Performs the
/// [eight-point algorithm](https://en.wikipedia.org/wiki/Eight-point_algorithm)
/// by Richard Hartley and Andrew Zisserman on bearings.
///
/// Bearings are unit vectors, which keeps the linear system well conditioned without
/// the usual pixel normalization.
#[derive(Copy, Clone, Debug)]
pub struct EightPoint {
    pub epsilon: f64,
    pub iterations: usize,
}

impl EightPoint {
    pub fn new() -> Self {
        Default::default()
    }

    /// Fits an essential matrix to at least eight matches.
    ///
    /// The result is reconditioned so it has two equal singular values and one zero.
    pub fn from_matches<I>(&self, data: I) -> Option<EssentialMatrix>
    where
        I: Iterator<Item = BearingMatch>,
    {
        let (normal, count) = epipolar_normal_equations(data);
        if count < Self::MIN_SAMPLES {
            return None;
        }
        let eigens = normal.try_symmetric_eigen(self.epsilon, self.iterations)?;
        let eigenvector = eigens
            .eigenvalues
            .iter()
            .enumerate()
            .min_by_key(|&(_, &n)| float_ord::FloatOrd(n))
            .map(|(ix, _)| eigens.eigenvectors.column(ix).into_owned())?;
        let mat = Matrix3::from_iterator(eigenvector.iter().copied());
        EssentialMatrix(mat).recondition(self.epsilon, self.iterations)
    }

    /// Decomposes the essential matrix and keeps the poses that place the most matches
    /// in front of both cameras.
    pub fn cheiral_poses<I>(&self, essential: &EssentialMatrix, data: I) -> ArrayVec<RelativePose, 4>
    where
        I: Iterator<Item = BearingMatch> + Clone,
    {
        let poses = match essential.possible_poses(self.epsilon, self.iterations) {
            Some(poses) => poses,
            None => return ArrayVec::new(),
        };
        let counts: ArrayVec<usize, 4> = poses
            .iter()
            .map(|pose| data.clone().filter(|m| pose.is_in_front(m)).count())
            .collect();
        let best = counts.iter().copied().max().unwrap_or(0);
        if best == 0 {
            return ArrayVec::new();
        }
        poses
            .iter()
            .zip(&counts)
            .filter(|&(_, &count)| count == best)
            .map(|(&pose, _)| pose)
            .collect()
    }
}

impl Default for EightPoint {
    fn default() -> Self {
        Self {
            epsilon: 1e-12,
            iterations: 1000,
        }
    }
}

impl Estimator<BearingMatch> for EightPoint {
    type Model = RelativePose;
    type ModelIter = ArrayVec<RelativePose, 4>;
    const MIN_SAMPLES: usize = 8;

    fn estimate<I>(&self, data: I) -> Self::ModelIter
    where
        I: Iterator<Item = BearingMatch> + Clone,
    {
        self.from_matches(data.clone())
            .map(|essential| self.cheiral_poses(&essential, data))
            .unwrap_or_default()
    }
}

impl Refine<BearingMatch> for EightPoint {
    /// Refits the essential matrix to every inlier and keeps the cheiral candidate with
    /// the lowest summed residual.
    fn refine<I>(&self, _model: &RelativePose, inliers: I) -> Option<RelativePose>
    where
        I: Iterator<Item = BearingMatch> + Clone,
    {
        let essential = self.from_matches(inliers.clone())?;
        let residual = |pose: &RelativePose| {
            inliers
                .clone()
                .map(|m| pose.residual(&m))
                .sum::<f64>()
        };
        self.cheiral_poses(&essential, inliers.clone())
            .into_iter()
            .min_by_key(|pose| float_ord::FloatOrd(residual(pose)))
    }
}
