use crate::{ConfigError, TrackerError};
use serde::{Deserialize, Serialize};
use std::{fs::File, io::BufReader, path::Path};
use vio_features::{CornerResponse, GoodFeatures, KltParams};

/// Which [`OpticalFlowPredictor`](crate::OpticalFlowPredictor) seeds feature tracking.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OpticalFlowPredictorType {
    /// Search where the feature was in the previous frame.
    NoOp,
    /// Compensate the known inter-frame rotation.
    Rotational,
}

/// Settings of the stereo template matcher.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StereoMatchingParams {
    /// The template is a square of side `2 * template_half_size + 1`.
    #[serde(default = "default_template_half_size")]
    pub template_half_size: usize,
    /// Rows above and below the epipolar line that are searched as well.
    #[serde(default = "default_stripe_extra_rows")]
    pub stripe_extra_rows: usize,
    /// Closest accepted depth in metres. Bounds the largest searched disparity.
    #[serde(default = "default_min_point_distance")]
    pub min_point_distance: f64,
    /// Farthest accepted depth in metres. Bounds the smallest searched disparity.
    #[serde(default = "default_max_point_distance")]
    pub max_point_distance: f64,
    /// Largest normalized squared difference accepted as a match.
    #[serde(default = "default_template_matching_tolerance")]
    pub template_matching_tolerance: f64,
    /// Matches the right template back into the left image and rejects the match if it
    /// lands more than a pixel away.
    #[serde(default)]
    pub bidirectional_matching: bool,
    #[serde(default)]
    pub subpixel_refinement: bool,
}

impl Default for StereoMatchingParams {
    fn default() -> Self {
        Self {
            template_half_size: default_template_half_size(),
            stripe_extra_rows: default_stripe_extra_rows(),
            min_point_distance: default_min_point_distance(),
            max_point_distance: default_max_point_distance(),
            template_matching_tolerance: default_template_matching_tolerance(),
            bidirectional_matching: false,
            subpixel_refinement: false,
        }
    }
}

fn default_template_half_size() -> usize {
    5
}

fn default_stripe_extra_rows() -> usize {
    0
}

fn default_min_point_distance() -> f64 {
    0.1
}

fn default_max_point_distance() -> f64 {
    15.0
}

fn default_template_matching_tolerance() -> f64 {
    0.15
}

/// The settings of the [`Tracker`](crate::Tracker).
///
/// Every field has a default, so a JSON file only needs to list what it changes.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TrackerParams {
    /// Detection tops the frame up to this many features.
    #[serde(default = "default_max_features_per_frame")]
    pub max_features_per_frame: usize,
    /// Corners weaker than this fraction of the strongest response are ignored.
    #[serde(default = "default_quality_level")]
    pub quality_level: f64,
    /// Minimum pixel distance between two detected corners, and between a detected corner
    /// and a blocked pixel of the detection mask.
    #[serde(default = "default_min_distance")]
    pub min_distance: f64,
    /// Minimum pixel distance between a new corner and an already tracked feature.
    #[serde(default = "default_min_distance")]
    pub min_distance_btw_tracked_and_detected_features: f64,
    #[serde(default = "default_block_size")]
    pub block_size: usize,
    #[serde(default)]
    pub use_harris_detector: bool,
    #[serde(default = "default_harris_k")]
    pub harris_k: f64,
    #[serde(default)]
    pub subpixel_refinement: bool,

    #[serde(default = "default_klt_window_size")]
    pub klt_window_size: usize,
    #[serde(default = "default_klt_max_level")]
    pub klt_max_level: usize,
    #[serde(default = "default_klt_max_iterations")]
    pub klt_max_iterations: usize,
    #[serde(default = "default_klt_epsilon")]
    pub klt_epsilon: f64,
    #[serde(default = "default_klt_min_eigen_threshold")]
    pub klt_min_eigen_threshold: f64,
    #[serde(default = "default_klt_min_correlation")]
    pub klt_min_correlation: f64,
    /// Features tracked for this many frames are retired.
    #[serde(default = "default_max_feature_age")]
    pub max_feature_age: u32,
    #[serde(default = "default_optical_flow_predictor")]
    pub optical_flow_predictor: OpticalFlowPredictorType,

    #[serde(default = "default_true")]
    pub mono_verification: bool,
    #[serde(default = "default_true")]
    pub stereo_verification: bool,
    /// Inlier threshold on the mean angular cosine distance of a bearing match.
    #[serde(default = "default_ransac_threshold_mono")]
    pub ransac_threshold_mono: f64,
    /// Inlier threshold on the 3d distance of a point match in metres.
    #[serde(default = "default_ransac_threshold_stereo")]
    pub ransac_threshold_stereo: f64,
    /// Inlier threshold on the squared Mahalanobis distance used when the rotation is
    /// known.
    #[serde(default = "default_ransac_mahalanobis_threshold_stereo")]
    pub ransac_mahalanobis_threshold_stereo: f64,
    #[serde(default = "default_ransac_max_iterations")]
    pub ransac_max_iterations: usize,
    #[serde(default = "default_ransac_probability")]
    pub ransac_probability: f64,
    /// Time budget of a single RANSAC run.
    #[serde(default)]
    pub ransac_max_time_ms: Option<u64>,
    /// Seeds RANSAC from entropy instead of `ransac_seed`.
    #[serde(default)]
    pub ransac_randomize: bool,
    #[serde(default)]
    pub ransac_seed: u64,
    /// Polishes the winning hypothesis over its inliers.
    #[serde(default = "default_true")]
    pub ransac_refine: bool,
    #[serde(default = "default_true")]
    pub ransac_use_2point_mono: bool,
    #[serde(default = "default_true")]
    pub ransac_use_1point_stereo: bool,
    #[serde(default = "default_min_nr_mono_inliers")]
    pub min_nr_mono_inliers: usize,
    #[serde(default = "default_min_nr_stereo_inliers")]
    pub min_nr_stereo_inliers: usize,
    /// Standard deviation in pixels of the rectified stereo keypoints.
    #[serde(default = "default_stereo_keypoint_sigma")]
    pub stereo_keypoint_sigma: f64,
    #[serde(default)]
    pub visualize_feature_tracks: bool,

    #[serde(default)]
    pub stereo_matching: StereoMatchingParams,
}

impl Default for TrackerParams {
    fn default() -> Self {
        Self {
            max_features_per_frame: default_max_features_per_frame(),
            quality_level: default_quality_level(),
            min_distance: default_min_distance(),
            min_distance_btw_tracked_and_detected_features: default_min_distance(),
            block_size: default_block_size(),
            use_harris_detector: false,
            harris_k: default_harris_k(),
            subpixel_refinement: false,
            klt_window_size: default_klt_window_size(),
            klt_max_level: default_klt_max_level(),
            klt_max_iterations: default_klt_max_iterations(),
            klt_epsilon: default_klt_epsilon(),
            klt_min_eigen_threshold: default_klt_min_eigen_threshold(),
            klt_min_correlation: default_klt_min_correlation(),
            max_feature_age: default_max_feature_age(),
            optical_flow_predictor: default_optical_flow_predictor(),
            mono_verification: true,
            stereo_verification: true,
            ransac_threshold_mono: default_ransac_threshold_mono(),
            ransac_threshold_stereo: default_ransac_threshold_stereo(),
            ransac_mahalanobis_threshold_stereo: default_ransac_mahalanobis_threshold_stereo(),
            ransac_max_iterations: default_ransac_max_iterations(),
            ransac_probability: default_ransac_probability(),
            ransac_max_time_ms: None,
            ransac_randomize: false,
            ransac_seed: 0,
            ransac_refine: true,
            ransac_use_2point_mono: true,
            ransac_use_1point_stereo: true,
            min_nr_mono_inliers: default_min_nr_mono_inliers(),
            min_nr_stereo_inliers: default_min_nr_stereo_inliers(),
            stereo_keypoint_sigma: default_stereo_keypoint_sigma(),
            visualize_feature_tracks: false,
            stereo_matching: StereoMatchingParams::default(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_max_features_per_frame() -> usize {
    400
}

fn default_quality_level() -> f64 {
    0.001
}

fn default_min_distance() -> f64 {
    10.0
}

fn default_block_size() -> usize {
    3
}

fn default_harris_k() -> f64 {
    0.04
}

fn default_klt_window_size() -> usize {
    21
}

fn default_klt_max_level() -> usize {
    3
}

fn default_klt_max_iterations() -> usize {
    30
}

fn default_klt_epsilon() -> f64 {
    0.01
}

fn default_klt_min_eigen_threshold() -> f64 {
    1e-4
}

fn default_klt_min_correlation() -> f64 {
    0.7
}

fn default_max_feature_age() -> u32 {
    25
}

fn default_optical_flow_predictor() -> OpticalFlowPredictorType {
    OpticalFlowPredictorType::NoOp
}

fn default_ransac_threshold_mono() -> f64 {
    1e-6
}

fn default_ransac_threshold_stereo() -> f64 {
    1.0
}

/// The 95% quantile of the chi-squared distribution with 3 degrees of freedom.
fn default_ransac_mahalanobis_threshold_stereo() -> f64 {
    7.815
}

fn default_ransac_max_iterations() -> usize {
    100
}

fn default_ransac_probability() -> f64 {
    0.995
}

fn default_min_nr_mono_inliers() -> usize {
    10
}

fn default_min_nr_stereo_inliers() -> usize {
    5
}

fn default_stereo_keypoint_sigma() -> f64 {
    1.0
}

fn positive(field: &'static str, value: f64) -> Result<(), ConfigError> {
    if value > 0.0 {
        Ok(())
    } else {
        Err(ConfigError::NotPositive { field, value })
    }
}

fn non_zero(field: &'static str, value: usize) -> Result<(), ConfigError> {
    if value == 0 {
        Err(ConfigError::Zero { field })
    } else {
        Ok(())
    }
}

fn odd(field: &'static str, value: usize) -> Result<(), ConfigError> {
    if value % 2 == 1 {
        Ok(())
    } else {
        Err(ConfigError::Even { field, value })
    }
}

fn in_range(field: &'static str, value: f64, min: f64, max: f64) -> Result<(), ConfigError> {
    if (min..=max).contains(&value) {
        Ok(())
    } else {
        Err(ConfigError::OutOfRange {
            field,
            value,
            min,
            max,
        })
    }
}

impl StereoMatchingParams {
    pub fn validate(&self) -> Result<(), ConfigError> {
        non_zero("template_half_size", self.template_half_size)?;
        positive("min_point_distance", self.min_point_distance)?;
        positive("max_point_distance", self.max_point_distance)?;
        if self.min_point_distance >= self.max_point_distance {
            return Err(ConfigError::DepthRange {
                min: self.min_point_distance,
                max: self.max_point_distance,
            });
        }
        positive(
            "template_matching_tolerance",
            self.template_matching_tolerance,
        )
    }
}

impl TrackerParams {
    /// Parses parameters from JSON, filling in defaults for missing fields.
    pub fn from_json_str(json: &str) -> Result<Self, TrackerError> {
        let params: Self = serde_json::from_str(json)?;
        params.validate()?;
        Ok(params)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, TrackerError> {
        let file = File::open(path)?;
        let params: Self = serde_json::from_reader(BufReader::new(file))?;
        params.validate()?;
        Ok(params)
    }

    /// Checks every value the tracker depends on.
    pub fn validate(&self) -> Result<(), ConfigError> {
        in_range("quality_level", self.quality_level, f64::EPSILON, 1.0)?;
        positive("min_distance", self.min_distance)?;
        positive(
            "min_distance_btw_tracked_and_detected_features",
            self.min_distance_btw_tracked_and_detected_features,
        )?;
        odd("block_size", self.block_size)?;
        if self.use_harris_detector {
            positive("harris_k", self.harris_k)?;
        }
        odd("klt_window_size", self.klt_window_size)?;
        non_zero("klt_max_iterations", self.klt_max_iterations)?;
        positive("klt_epsilon", self.klt_epsilon)?;
        in_range("klt_min_eigen_threshold", self.klt_min_eigen_threshold, 0.0, f64::MAX)?;
        in_range("klt_min_correlation", self.klt_min_correlation, -1.0, 1.0)?;
        non_zero("max_feature_age", self.max_feature_age as usize)?;
        positive("ransac_threshold_mono", self.ransac_threshold_mono)?;
        positive("ransac_threshold_stereo", self.ransac_threshold_stereo)?;
        positive(
            "ransac_mahalanobis_threshold_stereo",
            self.ransac_mahalanobis_threshold_stereo,
        )?;
        non_zero("ransac_max_iterations", self.ransac_max_iterations)?;
        if !(self.ransac_probability > 0.0 && self.ransac_probability < 1.0) {
            return Err(ConfigError::OutOfRange {
                field: "ransac_probability",
                value: self.ransac_probability,
                min: 0.0,
                max: 1.0,
            });
        }
        if let Some(ms) = self.ransac_max_time_ms {
            non_zero("ransac_max_time_ms", ms as usize)?;
        }
        positive("stereo_keypoint_sigma", self.stereo_keypoint_sigma)?;
        self.stereo_matching.validate()
    }

    /// The corner detector for a frame that still needs `need_n_corners` features.
    pub fn corner_detector(&self, need_n_corners: usize) -> GoodFeatures {
        let response = if self.use_harris_detector {
            CornerResponse::Harris { k: self.harris_k }
        } else {
            CornerResponse::MinEigenvalue
        };
        GoodFeatures::new()
            .max_corners(need_n_corners)
            .quality_level(self.quality_level)
            .min_distance(self.min_distance)
            .block_size(self.block_size)
            .response(response)
            .subpixel(self.subpixel_refinement)
    }

    pub fn klt_params(&self) -> KltParams {
        KltParams {
            window_size: self.klt_window_size,
            max_level: self.klt_max_level,
            max_iterations: self.klt_max_iterations,
            epsilon: self.klt_epsilon,
            min_eigen_threshold: self.klt_min_eigen_threshold,
            min_correlation: self.klt_min_correlation,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        assert_eq!(TrackerParams::default().validate(), Ok(()));
    }

    #[test]
    fn empty_json_gives_defaults() {
        let params = TrackerParams::from_json_str("{}").unwrap();
        assert_eq!(params, TrackerParams::default());
    }

    #[test]
    fn json_overrides_nested_fields() {
        let params = TrackerParams::from_json_str(
            r#"{
                "max_features_per_frame": 50,
                "optical_flow_predictor": "Rotational",
                "ransac_max_time_ms": 5,
                "stereo_matching": { "bidirectional_matching": true }
            }"#,
        )
        .unwrap();
        assert_eq!(params.max_features_per_frame, 50);
        assert_eq!(
            params.optical_flow_predictor,
            OpticalFlowPredictorType::Rotational
        );
        assert_eq!(params.ransac_max_time_ms, Some(5));
        assert!(params.stereo_matching.bidirectional_matching);
        assert_eq!(params.stereo_matching.template_half_size, 5);
    }

    #[test]
    fn rejects_bad_values() {
        let bad = [
            TrackerParams {
                min_distance: 0.0,
                ..TrackerParams::default()
            },
            TrackerParams {
                ransac_max_iterations: 0,
                ..TrackerParams::default()
            },
            TrackerParams {
                klt_window_size: 20,
                ..TrackerParams::default()
            },
            TrackerParams {
                ransac_probability: 1.0,
                ..TrackerParams::default()
            },
            TrackerParams {
                stereo_matching: StereoMatchingParams {
                    min_point_distance: 20.0,
                    ..StereoMatchingParams::default()
                },
                ..TrackerParams::default()
            },
        ];
        for params in &bad {
            assert!(params.validate().is_err(), "{:?}", params);
        }
        assert_eq!(
            bad[2].validate(),
            Err(ConfigError::Even {
                field: "klt_window_size",
                value: 20
            })
        );
    }

    #[test]
    fn invalid_json_is_an_error() {
        assert!(matches!(
            TrackerParams::from_json_str("{ \"min_distance\": -1 }"),
            Err(TrackerError::Config(ConfigError::NotPositive { .. }))
        ));
        assert!(matches!(
            TrackerParams::from_json_str("{ \"min_distance\": "),
            Err(TrackerError::Json(_))
        ));
    }
}
