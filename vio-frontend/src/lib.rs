//! # VIO Frontend
//!
//! The feature tracking front end of a visual(-inertial) odometry pipeline. A
//! [`Tracker`] is created once per camera from [`TrackerParams`] and then driven frame by
//! frame:
//!
//! 1. [`Tracker::feature_tracking`] propagates the features of the previous frame into
//!    the new one with pyramidal Lucas-Kanade, seeded by an [`OpticalFlowPredictor`].
//! 2. [`Tracker::feature_detection`] tops the frame up with new corners, each with a
//!    fresh landmark id.
//! 3. [`Tracker::geometric_outlier_rejection_mono`] (bearings, up to scale) or, for
//!    rectified stereo pairs matched by a [`StereoMatcher`],
//!    [`Tracker::geometric_outlier_rejection_stereo`] (metric) estimate the relative
//!    pose with sample consensus and invalidate the landmarks that disagree with it.
//!
//! Frames are owned by the caller and only borrowed. Poses follow the convention of
//! [`vio_core::RelativePose`]: the current camera as seen from the reference camera.
//!
//! Degenerate inputs are reported through [`vio_core::TrackingStatus`] and
//! [`vio_core::KeypointStatus`], never as errors. [`TrackerError`] only covers
//! configuration and I/O problems.
//!
//! With the `rayon` feature, KLT tracking and RANSAC scoring run in parallel.

mod config;
mod diagnostics;
mod display;
mod error;
mod mono;
mod outliers;
mod predictor;
mod stereo;
mod stereo_matcher;
mod tracker;

pub use config::*;
pub use diagnostics::*;
pub use display::*;
pub use error::*;
pub use mono::*;
pub use outliers::*;
pub use predictor::*;
pub use stereo::*;
pub use stereo_matcher::*;
pub use tracker::*;
