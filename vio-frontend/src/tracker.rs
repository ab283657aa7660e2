use crate::{
    optical_flow_predictor, render_tracks, DisplaySink, OpticalFlowPredictor, TrackerDiagnostics,
    TrackerError, TrackerParams,
};
use adaptive_ransac::Ransac;
use image::{GrayImage, RgbImage};
use log::{debug, info};
use rand::{RngCore, SeedableRng};
use rand_xoshiro::Xoshiro256PlusPlus;
use std::{
    sync::Arc,
    time::{Duration, Instant},
};
use vio_core::{
    nalgebra::Rotation3, CameraParams, Corner, Frame, KeyPoint, KeypointStatus, LandmarkId,
};
use vio_features::{KltTracker, OccupancyMask};

/// Detects and tracks features from frame to frame and verifies their geometry.
///
/// The tracker owns landmark id allocation, the static camera mask, the optical flow
/// predictor and the diagnostics. Frames belong to the caller and are only borrowed.
/// Every mutating operation takes `&mut self`, so one tracker serves one image stream.
pub struct Tracker {
    pub(crate) params: TrackerParams,
    pub(crate) camera: CameraParams,
    pub(crate) camera_mask: OccupancyMask,
    pub(crate) klt: KltTracker,
    pub(crate) predictor: Box<dyn OpticalFlowPredictor>,
    pub(crate) diagnostics: TrackerDiagnostics,
    pub(crate) rng: Xoshiro256PlusPlus,
    next_landmark: u64,
    display: Option<Arc<dyn DisplaySink>>,
}

impl Tracker {
    /// Validates the parameters and sets the tracker up for one camera.
    pub fn new(
        params: TrackerParams,
        camera: CameraParams,
        display: Option<Arc<dyn DisplaySink>>,
    ) -> Result<Self, TrackerError> {
        params.validate()?;
        let seed = if params.ransac_randomize {
            rand::random()
        } else {
            params.ransac_seed
        };
        Ok(Self {
            camera_mask: OccupancyMask::new_free(camera.width(), camera.height()),
            klt: KltTracker::new(params.klt_params()),
            predictor: optical_flow_predictor(params.optical_flow_predictor, &camera),
            diagnostics: TrackerDiagnostics::default(),
            rng: Xoshiro256PlusPlus::seed_from_u64(seed),
            next_landmark: 0,
            params,
            camera,
            display,
        })
    }

    pub fn params(&self) -> &TrackerParams {
        &self.params
    }

    pub fn camera(&self) -> &CameraParams {
        &self.camera
    }

    /// A snapshot of the counters and timings of the latest stages.
    pub fn diagnostics(&self) -> TrackerDiagnostics {
        self.diagnostics
    }

    /// Restricts detection to the non-zero pixels of `mask`, for example to skip a
    /// vignetted border or a part of the vehicle in view.
    pub fn set_camera_mask(&mut self, mask: GrayImage) -> Result<(), TrackerError> {
        let camera = self.camera.image_size;
        if mask.dimensions() != camera {
            return Err(TrackerError::MaskSize {
                mask: mask.dimensions(),
                camera,
            });
        }
        self.camera_mask = OccupancyMask::from_gray(mask);
        Ok(())
    }

    fn allocate_landmark(&mut self) -> LandmarkId {
        let landmark = LandmarkId(self.next_landmark);
        self.next_landmark += 1;
        landmark
    }

    /// Detects up to `need_n_corners` corners at least `min_distance` away from the
    /// blocked pixels of `mask`.
    ///
    /// The pixels of the detected corners are blocked in `mask`, so a later call with the
    /// same mask keeps its corners apart from these. No landmark ids are assigned.
    pub fn detect_corners(
        &self,
        image: &GrayImage,
        mask: &mut OccupancyMask,
        need_n_corners: usize,
    ) -> Vec<Corner> {
        self.params
            .corner_detector(need_n_corners)
            .detect(image, mask)
    }

    /// Tops `frame` up to `max_features_per_frame` features with new corners.
    ///
    /// Corners are kept away from the features already in the frame. Each new feature
    /// gets a fresh landmark id, an age of `1` and a valid status.
    ///
    /// # Panics
    ///
    /// Panics if the frame image does not have the size of the camera images.
    pub fn feature_detection(&mut self, frame: &mut Frame) {
        let start = Instant::now();
        assert_eq!(
            frame.image.dimensions(),
            self.camera.image_size,
            "frame image does not match the camera"
        );
        let need_n_corners = self
            .params
            .max_features_per_frame
            .saturating_sub(frame.len());
        let mut extracted = 0;
        if need_n_corners > 0 {
            let mut mask = self.camera_mask.clone();
            // Detection adds its own `min_distance` on top of the blocked discs.
            let radius = (self.params.min_distance_btw_tracked_and_detected_features
                - self.params.min_distance)
                .max(0.0);
            for keypoint in &frame.keypoints {
                mask.block_disc(keypoint, radius);
            }
            let corners = self.detect_corners(&frame.image, &mut mask, need_n_corners);
            extracted = corners.len();
            for corner in corners {
                let landmark = self.allocate_landmark();
                frame.push_corner(corner, landmark);
            }
        }
        self.diagnostics.need_n_corners = need_n_corners;
        self.diagnostics.extracted_corners = extracted;
        self.diagnostics.detected_features = frame.len();
        self.diagnostics.detection_time = start.elapsed();
        debug!(
            "frame {}: needed {} corners, extracted {}",
            frame.id, need_n_corners, extracted
        );
    }

    /// Propagates the features of `reference` into the empty `current` frame.
    ///
    /// Features with an invalid landmark are skipped and features at
    /// `max_feature_age` are retired. The others are seeded by the optical flow
    /// predictor with `rotation`, the orientation of the current camera in the reference
    /// camera, and refined with Lucas-Kanade. Survivors keep their landmark id and score
    /// and have their age increased.
    ///
    /// # Panics
    ///
    /// Panics if `current` already holds features.
    pub fn feature_tracking(
        &mut self,
        reference: &Frame,
        current: &mut Frame,
        rotation: &Rotation3<f64>,
    ) {
        assert!(
            current.is_empty(),
            "the current frame must not have features before tracking"
        );
        let start = Instant::now();
        let mut retired = 0;
        let candidates: Vec<usize> = reference
            .valid_landmarks()
            .filter(|&(ix, _)| {
                let young = reference.landmark_ages[ix] < self.params.max_feature_age;
                if !young {
                    retired += 1;
                }
                young
            })
            .map(|(ix, _)| ix)
            .collect();
        let points: Vec<KeyPoint> = candidates
            .iter()
            .map(|&ix| reference.keypoints[ix])
            .collect();
        let guesses = self.predictor.predict(&points, rotation);
        let tracked = self.klt.track(
            &self.klt.pyramid(&reference.image),
            &self.klt.pyramid(&current.image),
            &points,
            &guesses,
        );

        let mut lost = retired;
        for (&ix, tracked) in candidates.iter().zip(tracked) {
            match tracked {
                Some(keypoint) => current.push_keypoint(
                    keypoint,
                    reference.scores[ix],
                    reference.landmarks[ix],
                    reference.landmark_ages[ix] + 1,
                    KeypointStatus::Valid,
                ),
                None => lost += 1,
            }
        }
        self.diagnostics.tracked_features = current.len();
        self.diagnostics.lost_features = lost;
        self.diagnostics.tracking_time = start.elapsed();
        debug!(
            "frame {}: tracked {} features, lost {} ({} retired)",
            current.id,
            current.len(),
            lost,
            retired
        );
        if self.params.visualize_feature_tracks {
            self.display(|| render_tracks(reference, current, &[], &[]));
        }
    }

    /// Counts the right keypoints of a stereo frame by status.
    pub fn check_status_right_keypoints(&mut self, statuses: &[KeypointStatus]) {
        self.diagnostics.reset_right_keypoints();
        for &status in statuses {
            self.diagnostics.count_right_keypoint(status);
        }
    }

    /// Draws the tracks from `reference` to `current`, see [`render_tracks`].
    pub fn tracker_image(
        &self,
        reference: &Frame,
        current: &Frame,
        extra_gray: &[KeyPoint],
        extra_blue: &[KeyPoint],
    ) -> RgbImage {
        render_tracks(reference, current, extra_gray, extra_blue)
    }

    /// Renders and pushes an image to the display sink. Without a sink nothing is
    /// rendered.
    pub(crate) fn display(&self, render: impl FnOnce() -> RgbImage) {
        if let Some(display) = &self.display {
            display.push(render());
        }
    }

    /// A RANSAC engine set up from the parameters, seeded from the tracker's generator.
    pub(crate) fn ransac(&mut self, threshold: f64) -> Ransac<Xoshiro256PlusPlus> {
        let rng = Xoshiro256PlusPlus::seed_from_u64(self.rng.next_u64());
        Ransac::new(threshold, rng)
            .max_iterations(self.params.ransac_max_iterations)
            .probability(self.params.ransac_probability)
            .max_time(self.params.ransac_max_time_ms.map(Duration::from_millis))
            .refine(self.params.ransac_refine)
    }

    /// Logs the latest diagnostics at info level.
    pub fn log_diagnostics(&self) {
        info!("{}", self.diagnostics);
    }
}
