#[cfg(feature = "serde-serialize")]
use serde::{Deserialize, Serialize};

/// The outcome of one geometric verification attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde-serialize", derive(Serialize, Deserialize))]
pub enum TrackingStatus {
    /// A hypothesis with enough support was found.
    Valid,
    /// There were not enough correspondences (before or after outlier rejection).
    FewMatches,
    /// Sample consensus could not find a supported hypothesis within its budget.
    Invalid,
    /// Verification is switched off in the configuration.
    Disabled,
}

impl TrackingStatus {
    pub fn is_valid(self) -> bool {
        self == TrackingStatus::Valid
    }
}

/// The state of a keypoint, mostly used to describe the right keypoint of a stereo pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde-serialize", derive(Serialize, Deserialize))]
pub enum KeypointStatus {
    Valid,
    /// The template around the left keypoint does not fit inside the rectified image.
    NoLeftRect,
    /// No acceptable match was found in the right rectified image.
    NoRightRect,
    /// A match was found, but its disparity yields no depth in the accepted range.
    NoDepth,
    /// The point could not be triangulated, or it was rejected by 3d outlier rejection.
    FailedTriangulation,
}

impl KeypointStatus {
    pub fn is_valid(self) -> bool {
        self == KeypointStatus::Valid
    }
}
