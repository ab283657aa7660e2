use crate::{triangulate, StereoMatchingParams};
use float_ord::FloatOrd;
use log::debug;
use std::collections::HashMap;
use vio_core::{
    nalgebra::Matrix3, Frame, KeyPoint, KeypointMatches, KeypointStatus, LandmarkId, StereoCamera,
    StereoFrame, StereoMeasurement,
};
use vio_features::GrayFloatImage;

/// The minimum number of matches [`compute_median_disparity`] needs.
pub const MIN_DISPARITY_MATCHES: usize = 1;

/// Normalized squared difference between a template and an equally sized window.
///
/// `0.0` is a perfect match. Two black patches also match perfectly, while a black and a
/// textured patch score `1.0`.
fn normalized_squared_difference(template: &[f32], window: &[f32]) -> f64 {
    let (mut diff, mut tt, mut ww) = (0.0f64, 0.0f64, 0.0f64);
    for (&t, &w) in template.iter().zip(window) {
        let (t, w) = (f64::from(t), f64::from(w));
        diff += (t - w) * (t - w);
        tt += t * t;
        ww += w * w;
    }
    let norm = (tt * ww).sqrt();
    if norm < 1e-12 {
        if diff < 1e-12 {
            0.0
        } else {
            1.0
        }
    } else {
        diff / norm
    }
}

/// Copies the square of radius `half` around the integer pixel `(x, y)`, which must be
/// inside the image.
fn window(image: &GrayFloatImage, x: usize, y: usize, half: usize) -> Vec<f32> {
    let mut values = Vec::with_capacity((2 * half + 1) * (2 * half + 1));
    for wy in y - half..=y + half {
        for wx in x - half..=x + half {
            values.push(image.get(wx, wy));
        }
    }
    values
}

/// Vertex offset of the parabola through three equally spaced samples.
fn parabola_offset(left: f64, center: f64, right: f64) -> f64 {
    let curvature = left - 2.0 * center + right;
    if curvature.abs() < 1e-12 {
        0.0
    } else {
        (0.5 * (left - right) / curvature).clamp(-0.5, 0.5)
    }
}

/// The outcome of searching one row range for a template.
struct RowSearch {
    column: usize,
    row: usize,
    score: f64,
    /// The scores of the columns left and right of the best one, if they were searched.
    neighbours: Option<(f64, f64)>,
}

/// Searches columns `columns` of rows `rows` of `image` for `template`.
fn search(
    image: &GrayFloatImage,
    template: &[f32],
    half: usize,
    columns: (usize, usize),
    rows: (usize, usize),
) -> Option<RowSearch> {
    let mut best: Option<RowSearch> = None;
    for row in rows.0..=rows.1 {
        let scores: Vec<f64> = (columns.0..=columns.1)
            .map(|column| {
                normalized_squared_difference(template, &window(image, column, row, half))
            })
            .collect();
        let (offset, &score) = match scores
            .iter()
            .enumerate()
            .min_by_key(|&(_, &score)| FloatOrd(score))
        {
            Some(found) => found,
            None => continue,
        };
        if best.as_ref().map_or(true, |best| score < best.score) {
            let neighbours = if offset > 0 && offset + 1 < scores.len() {
                Some((scores[offset - 1], scores[offset + 1]))
            } else {
                None
            };
            best = Some(RowSearch {
                column: columns.0 + offset,
                row,
                score,
                neighbours,
            });
        }
    }
    best
}

/// Clamps the closed range `[low, high]` to `[min, max]`, or returns `None` if nothing is
/// left.
fn clamp_range(low: f64, high: f64, min: usize, max: usize) -> Option<(usize, usize)> {
    let low = low.ceil().max(min as f64);
    let high = high.floor().min(max as f64);
    if low > high {
        None
    } else {
        Some((low as usize, high as usize))
    }
}

/// Finds the right image partners of the left keypoints of a rectified stereo frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StereoMatcher {
    pub camera: StereoCamera,
    pub params: StereoMatchingParams,
    /// Standard deviation in pixels of both keypoint columns and the row.
    pub keypoint_sigma: f64,
}

impl StereoMatcher {
    pub fn new(camera: StereoCamera, params: StereoMatchingParams, keypoint_sigma: f64) -> Self {
        Self {
            camera,
            params,
            keypoint_sigma,
        }
    }

    /// The covariance of `(u_left, u_right, v)`.
    pub fn pixel_covariance(&self) -> Matrix3<f64> {
        Matrix3::identity() * self.keypoint_sigma.powi(2)
    }

    /// Matches every left keypoint along its epipolar line in the right image.
    ///
    /// The right frame is rebuilt index aligned with the left one. Right keypoints
    /// without a usable match take the location of their left keypoint and carry the
    /// reason in their status. Valid matches get a triangulated measurement.
    ///
    /// # Panics
    ///
    /// Panics if the left and right images differ in size.
    pub fn sparse_stereo_matching(&self, frame: &mut StereoFrame) {
        assert_eq!(
            frame.left.image.dimensions(),
            frame.right.image.dimensions(),
            "stereo images differ in size"
        );
        let left_image = GrayFloatImage::from_gray(&frame.left.image);
        let right_image = GrayFloatImage::from_gray(&frame.right.image);
        let covariance = self.pixel_covariance();
        frame.right.clear_features();
        frame.measurements.clear();
        for ix in 0..frame.left.len() {
            let left = frame.left.keypoints[ix];
            let (right, status, measurement) =
                match self.match_keypoint(&left_image, &right_image, &left) {
                    Ok(right) => match triangulate(&self.camera, &left, right.x, &covariance) {
                        Some((point, covariance)) => (
                            right,
                            KeypointStatus::Valid,
                            Some(StereoMeasurement {
                                depth: point.z,
                                point,
                                covariance,
                            }),
                        ),
                        None => (right, KeypointStatus::FailedTriangulation, None),
                    },
                    Err(status) => (left, status, None),
                };
            frame.right.push_keypoint(
                right,
                frame.left.scores[ix],
                frame.left.landmarks[ix],
                frame.left.landmark_ages[ix],
                status,
            );
            frame.measurements.push(measurement);
        }
        debug!(
            "stereo frame {}: {} of {} keypoints matched",
            frame.id,
            frame.measurements.iter().flatten().count(),
            frame.left.len()
        );
    }

    fn match_keypoint(
        &self,
        left_image: &GrayFloatImage,
        right_image: &GrayFloatImage,
        left: &KeyPoint,
    ) -> Result<KeyPoint, KeypointStatus> {
        let half = self.params.template_half_size;
        let (width, height) = (left_image.width(), left_image.height());
        if width <= 2 * half || height <= 2 * half {
            return Err(KeypointStatus::NoLeftRect);
        }
        let (ul, vl) = (left.x.round(), left.y.round());
        if ul < half as f64
            || vl < half as f64
            || ul + half as f64 > (width - 1) as f64
            || vl + half as f64 > (height - 1) as f64
        {
            return Err(KeypointStatus::NoLeftRect);
        }
        let (ul, vl) = (ul as usize, vl as usize);
        let template = window(left_image, ul, vl, half);

        let min_disparity = self
            .camera
            .disparity_from_depth(self.params.max_point_distance);
        let max_disparity = self
            .camera
            .disparity_from_depth(self.params.min_point_distance);
        let columns = clamp_range(
            ul as f64 - max_disparity,
            ul as f64 - min_disparity,
            half,
            width - 1 - half,
        )
        .ok_or(KeypointStatus::NoRightRect)?;
        let extra = self.params.stripe_extra_rows as f64;
        let rows = clamp_range(
            vl as f64 - extra,
            vl as f64 + extra,
            half,
            height - 1 - half,
        )
        .ok_or(KeypointStatus::NoRightRect)?;
        let found = search(right_image, &template, half, columns, rows)
            .ok_or(KeypointStatus::NoRightRect)?;
        if found.score > self.params.template_matching_tolerance {
            return Err(KeypointStatus::NoRightRect);
        }

        if self.params.bidirectional_matching {
            let right_template = window(right_image, found.column, found.row, half);
            let back_columns = clamp_range(
                found.column as f64 + min_disparity,
                found.column as f64 + max_disparity,
                half,
                width - 1 - half,
            )
            .ok_or(KeypointStatus::NoRightRect)?;
            let back = search(
                left_image,
                &right_template,
                half,
                back_columns,
                (found.row, found.row),
            )
            .ok_or(KeypointStatus::NoRightRect)?;
            if (back.column as f64 - ul as f64).abs() > 1.0 {
                return Err(KeypointStatus::NoRightRect);
            }
        }

        let offset = match (self.params.subpixel_refinement, found.neighbours) {
            (true, Some((before, after))) => parabola_offset(before, found.score, after),
            _ => 0.0,
        };
        let right = KeyPoint::new(
            found.column as f64 + offset + (left.x - ul as f64),
            left.y + (found.row as f64 - vl as f64),
        );
        let disparity = left.x - right.x;
        match self.camera.depth_from_disparity(disparity) {
            Some(depth)
                if depth >= self.params.min_point_distance
                    && depth <= self.params.max_point_distance =>
            {
                Ok(right)
            }
            _ => Err(KeypointStatus::NoDepth),
        }
    }
}

/// Matches the features of two frames that observe the same landmark.
///
/// Matches are ordered by their position in `current`.
pub fn find_matching_keypoints(reference: &Frame, current: &Frame) -> KeypointMatches {
    let by_landmark: HashMap<LandmarkId, usize> = reference
        .valid_landmarks()
        .map(|(ix, landmark)| (landmark, ix))
        .collect();
    current
        .valid_landmarks()
        .filter_map(|(current_ix, landmark)| {
            by_landmark
                .get(&landmark)
                .map(|&reference_ix| (reference_ix, current_ix))
        })
        .collect()
}

/// Keeps the mono matches whose right keypoints are valid in both stereo frames.
pub fn find_matching_stereo_keypoints_from_mono(
    reference: &StereoFrame,
    current: &StereoFrame,
    mono: &KeypointMatches,
) -> KeypointMatches {
    mono.iter()
        .filter(|m| {
            reference.right_status(m.reference).is_valid()
                && current.right_status(m.current).is_valid()
        })
        .map(|m| (m.reference, m.current))
        .collect()
}

/// Matches the left features of two stereo frames by landmark and keeps the pairs whose
/// right keypoints are valid in both.
pub fn find_matching_stereo_keypoints(
    reference: &StereoFrame,
    current: &StereoFrame,
) -> KeypointMatches {
    let mono = find_matching_keypoints(&reference.left, &current.left);
    find_matching_stereo_keypoints_from_mono(reference, current, &mono)
}

/// The median pixel displacement of matched keypoints.
///
/// With an even count the upper of the two middle values is returned. Returns `None`
/// with fewer than [`MIN_DISPARITY_MATCHES`] matches.
///
/// # Panics
///
/// Panics if a match refers to a keypoint that does not exist.
pub fn compute_median_disparity(
    reference: &[KeyPoint],
    current: &[KeyPoint],
    matches: &KeypointMatches,
) -> Option<f64> {
    if matches.len() < MIN_DISPARITY_MATCHES {
        return None;
    }
    let mut disparities: Vec<f64> = matches
        .iter()
        .map(|m| reference[m.reference].distance(&current[m.current]))
        .collect();
    disparities.sort_unstable_by_key(|&d| FloatOrd(d));
    Some(disparities[disparities.len() / 2])
}
