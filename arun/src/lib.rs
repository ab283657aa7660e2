//! Motion estimation from triangulated (stereo) points.
//!
//! * [`Arun`] estimates the full rigid transform from three or more point matches.
//! * [`OnePoint`] estimates only the translation when the rotation is known, using the
//!   uncertainty of every triangulated point.
//!
//! Both produce models in the convention of [`vio_core::RelativePose`], mapping points
//! from the current camera into the reference camera.

mod one_point;
mod registration;

pub use one_point::*;
pub use registration::*;
