use crate::{BearingMatch, CovariantPointMatch, PointMatch};
use derive_more::{AsMut, AsRef, From, Into};
use nalgebra::{IsometryMatrix3, Matrix3, Point3, Rotation3, Vector3};
use sample_consensus::Model;

#[cfg(feature = "serde-serialize")]
use serde::{Deserialize, Serialize};

/// Rays whose directions are closer than this (as `1 - cos^2`) are treated as parallel.
const PARALLEL_EPSILON: f64 = 1e-12;

/// The angle of `rotation` in radians, in `[0, pi]`.
///
/// Unlike an `acos` of the trace, this stays accurate near the identity and never turns
/// into NaN when rounding pushes the trace past `3`.
pub fn rotation_angle(rotation: &Rotation3<f64>) -> f64 {
    let m = rotation.matrix();
    let sine = Vector3::new(
        m[(2, 1)] - m[(1, 2)],
        m[(0, 2)] - m[(2, 0)],
        m[(1, 0)] - m[(0, 1)],
    )
    .norm();
    sine.atan2(m.trace() - 1.0)
}

/// The pose of the current camera in the reference camera.
///
/// This transforms points from the current camera frame into the reference camera frame.
#[derive(Debug, Clone, Copy, PartialEq, AsMut, AsRef, From, Into)]
#[cfg_attr(feature = "serde-serialize", derive(Serialize, Deserialize))]
pub struct RelativePose(pub IsometryMatrix3<f64>);

impl RelativePose {
    /// Creates a pose with no change in position or orientation.
    pub fn identity() -> Self {
        Self(IsometryMatrix3::identity())
    }

    /// Create the pose from rotation and translation.
    pub fn from_parts(translation: Vector3<f64>, rotation: Rotation3<f64>) -> Self {
        Self(IsometryMatrix3::from_parts(translation.into(), rotation))
    }

    pub fn rotation(&self) -> Rotation3<f64> {
        self.0.rotation
    }

    pub fn translation(&self) -> Vector3<f64> {
        self.0.translation.vector
    }

    /// Takes the inverse of the pose.
    #[must_use]
    pub fn inverse(&self) -> Self {
        Self(self.0.inverse())
    }

    /// Applies a scale factor to the pose (scales the translation component).
    #[must_use]
    pub fn scale(self, scale: f64) -> Self {
        let mut isometry = self.0;
        isometry.translation.vector *= scale;
        Self(isometry)
    }

    /// Maps a point from the current camera frame into the reference camera frame.
    pub fn transform(&self, point: &Point3<f64>) -> Point3<f64> {
        self.0 * point
    }

    /// The essential matrix `E = [t]x R`, which satisfies `f_ref^T E f_cur = 0` for
    /// every bearing pair observing the same point.
    pub fn essential_matrix(&self) -> Matrix3<f64> {
        self.translation().cross_matrix() * self.rotation().matrix()
    }

    /// The angle of the rotation in radians.
    pub fn rotation_angle(&self) -> f64 {
        rotation_angle(&self.rotation())
    }

    /// The angle between the translation directions of two poses in radians.
    ///
    /// Returns `None` if either translation is zero.
    pub fn translation_direction_angle(&self, other: &RelativePose) -> Option<f64> {
        let a = self.translation().try_normalize(1e-12)?;
        let b = other.translation().try_normalize(1e-12)?;
        Some(a.dot(&b).clamp(-1.0, 1.0).acos())
    }

    /// The distances along the reference and the current bearing of the points where
    /// the two rays pass closest to each other.
    ///
    /// Returns `None` when the rays are parallel.
    pub fn ray_depths(&self, data: &BearingMatch) -> Option<(f64, f64)> {
        let &BearingMatch(reference, current) = data;
        let f_r = reference.into_inner();
        let g = self.rotation() * current.into_inner();
        let t = self.translation();
        let a = f_r.dot(&g);
        let denominator = 1.0 - a * a;
        if denominator < PARALLEL_EPSILON {
            return None;
        }
        let b1 = f_r.dot(&t);
        let b2 = g.dot(&t);
        Some(((b1 - a * b2) / denominator, (a * b1 - b2) / denominator))
    }

    /// Checks that the two rays of a match meet in front of both cameras.
    pub fn is_in_front(&self, data: &BearingMatch) -> bool {
        matches!(self.ray_depths(data), Some((r, c)) if r > 0.0 && c > 0.0)
    }
}

impl Default for RelativePose {
    fn default() -> Self {
        Self::identity()
    }
}

/// Triangulates both bearings by their midpoint and scores how far the point is from
/// each ray as `1 - cos` of the angle, averaged over both views.
///
/// Points that land behind either camera score close to `2.0`. When the rays are
/// parallel (no parallax) the score is the `1 - cos` between the rays themselves.
impl Model<BearingMatch> for RelativePose {
    fn residual(&self, data: &BearingMatch) -> f64 {
        let &BearingMatch(reference, current) = data;
        let f_r = reference.into_inner();
        let g = self.rotation() * current.into_inner();
        let t = self.translation();
        let fallback = 1.0 - f_r.dot(&g);

        let (lambda_r, lambda_c) = match self.ray_depths(data) {
            Some(depths) => depths,
            None => return fallback,
        };
        let midpoint = 0.5 * (lambda_r * f_r + (t + lambda_c * g));
        match (
            midpoint.try_normalize(1e-12),
            (midpoint - t).try_normalize(1e-12),
        ) {
            (Some(in_ref), Some(in_cur)) => {
                0.5 * ((1.0 - f_r.dot(&in_ref)) + (1.0 - g.dot(&in_cur)))
            }
            _ => fallback,
        }
    }
}

/// The Euclidean distance between the reference point and the transformed current point.
impl Model<PointMatch> for RelativePose {
    fn residual(&self, data: &PointMatch) -> f64 {
        let &PointMatch(reference, current) = data;
        (reference - self.transform(&current)).norm()
    }
}

/// A translation estimated while the rotation is held fixed.
#[derive(Debug, Clone, Copy, PartialEq, AsMut, AsRef, From, Into)]
#[cfg_attr(feature = "serde-serialize", derive(Serialize, Deserialize))]
pub struct TranslationEstimate(pub Vector3<f64>);

impl TranslationEstimate {
    /// Combines the translation with a known rotation into a full pose.
    pub fn with_rotation(self, rotation: Rotation3<f64>) -> RelativePose {
        RelativePose::from_parts(self.0, rotation)
    }
}

/// The squared Mahalanobis distance between the translation and the one the
/// correspondence votes for.
impl Model<CovariantPointMatch> for TranslationEstimate {
    fn residual(&self, data: &CovariantPointMatch) -> f64 {
        let error = data.delta - self.0;
        error.dot(&(data.information * error))
    }
}
