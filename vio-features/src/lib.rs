//! Feature detection and tracking for the visual front end.
//!
//! * [`GoodFeatures`] detects corners with a minimum spacing, skipping pixels blocked by
//!   an [`OccupancyMask`]. Each detected corner blocks its own neighbourhood in the
//!   mask, so features that are already tracked can be kept apart from new detections
//!   by blocking them up front.
//! * [`KltTracker`] propagates points into the next image with pyramidal Lucas-Kanade,
//!   rejecting tracks with a degenerate window, that leave the image, or whose final
//!   patches do not correlate.
//!
//! Images come in as 8-bit gray and are converted to [`GrayFloatImage`] internally.
//!
//! With the `rayon` feature, points are tracked in parallel.

mod corners;
mod image;
mod klt;
mod mask;

pub use crate::image::*;
pub use corners::*;
pub use klt::*;
pub use mask::*;
