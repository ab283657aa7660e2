use crate::OpticalFlowPredictorType;
use vio_core::{
    nalgebra::{Matrix3, Rotation3},
    rotation_angle, CameraParams, KeyPoint,
};

/// Guesses where keypoints of the reference frame appear in the current frame.
///
/// The rotation is the orientation of the current camera in the reference camera, so
/// it maps current camera directions into the reference camera.
pub trait OpticalFlowPredictor: Send + Sync {
    /// Returns one guess per reference keypoint, in the same order.
    fn predict(&self, reference: &[KeyPoint], rotation: &Rotation3<f64>) -> Vec<KeyPoint>;
}

/// Predicts that nothing moved.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoOpFlowPredictor;

impl OpticalFlowPredictor for NoOpFlowPredictor {
    fn predict(&self, reference: &[KeyPoint], _rotation: &Rotation3<f64>) -> Vec<KeyPoint> {
        reference.to_vec()
    }
}

/// Predicts the motion of keypoints caused by a pure rotation of the camera.
///
/// Under a pure rotation a pixel moves with the infinite homography `K R^T K^-1`. Lens
/// distortion is ignored since only a seed for tracking is needed.
#[derive(Debug, Clone, PartialEq)]
pub struct RotationalFlowPredictor {
    camera: CameraParams,
    calibration: Matrix3<f64>,
    inverse_calibration: Matrix3<f64>,
}

impl RotationalFlowPredictor {
    pub fn new(camera: CameraParams) -> Self {
        let calibration = camera.intrinsics.matrix();
        let inverse_calibration = calibration.try_inverse().unwrap_or_else(Matrix3::identity);
        Self {
            camera,
            calibration,
            inverse_calibration,
        }
    }
}

impl OpticalFlowPredictor for RotationalFlowPredictor {
    fn predict(&self, reference: &[KeyPoint], rotation: &Rotation3<f64>) -> Vec<KeyPoint> {
        if rotation_angle(rotation) == 0.0 {
            return reference.to_vec();
        }
        let homography =
            self.calibration * rotation.matrix().transpose() * self.inverse_calibration;
        reference
            .iter()
            .map(|keypoint| {
                let mapped = homography * keypoint.coords.push(1.0);
                if mapped.z <= 0.0 {
                    return *keypoint;
                }
                let predicted = KeyPoint::new(mapped.x / mapped.z, mapped.y / mapped.z);
                if self.camera.contains(&predicted) {
                    predicted
                } else {
                    *keypoint
                }
            })
            .collect()
    }
}

/// Creates the predictor selected in the configuration.
pub fn optical_flow_predictor(
    kind: OpticalFlowPredictorType,
    camera: &CameraParams,
) -> Box<dyn OpticalFlowPredictor> {
    match kind {
        OpticalFlowPredictorType::NoOp => Box::new(NoOpFlowPredictor),
        OpticalFlowPredictorType::Rotational => {
            Box::new(RotationalFlowPredictor::new(camera.clone()))
        }
    }
}
