//! # VIO Core
//!
//! Common types shared by every crate of the tracking front end: keypoints, landmark
//! identifiers, the [`Frame`] and [`StereoFrame`] containers that the tracker fills in,
//! [`KeypointMatches`] between two frames, camera models, and the relative pose type
//! together with the data/model types consumed by sample consensus.
//!
//! ## Conventions
//!
//! Pixel coordinates have their X axis pointing right and their Y axis pointing down.
//! Bearings are unit vectors in the camera frame where X points right, Y points down and
//! Z points forwards out of the optical center.
//!
//! Relative poses always describe the current camera as seen from the reference camera.
//! Given a point `X_cur` in the current camera frame, the corresponding point in the
//! reference camera frame is:
//!
//! ```text
//! X_ref = R * X_cur + t
//! ```
//!
//! When a pose is estimated from bearings alone the length of `t` carries no information
//! and is normalized to `1.0`. When it is estimated from stereo points `t` is metric.
//!
//! ## Frame bookkeeping
//!
//! A [`Frame`] keeps several sequences that are index aligned: the keypoint at index `i`
//! has its score, landmark id, age and status at index `i` of the respective vectors.
//! Every operation that touches a frame preserves this alignment, and
//! [`Frame::is_consistent`] can be used to check it.
//!
//! ```text
//!   keypoints   [ k0   k1   k2   k3 ]
//!   landmarks   [ 7    8    -    11 ]   ('-' is an invalidated landmark)
//!   ages        [ 3    1    2    1  ]
//!   statuses    [ V    V    V    V  ]
//! ```

mod camera;
mod consensus;
mod frame;
mod keypoint;
mod matches;
mod pose;
mod status;
mod stereo_camera;
mod stereo_frame;

pub use camera::*;
pub use consensus::*;
pub use frame::*;
pub use keypoint::*;
pub use matches::*;
pub use nalgebra;
pub use pose::*;
pub use sample_consensus;
pub use status::*;
pub use stereo_camera::*;
pub use stereo_frame::*;

/// Nanoseconds since an arbitrary epoch chosen by the image source.
pub type Timestamp = i64;

/// Identifies the camera that produced a frame.
pub type CameraId = u32;
