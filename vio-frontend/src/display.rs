use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use image::{GrayImage, Rgb, RgbImage};
use imageproc::drawing::{draw_hollow_circle_mut, draw_line_segment_mut};
use log::trace;
use std::{
    collections::HashMap,
    sync::atomic::{AtomicUsize, Ordering},
};
use vio_core::{Frame, KeyPoint, LandmarkId};

const RED: Rgb<u8> = Rgb([255, 0, 0]);
const GREEN: Rgb<u8> = Rgb([0, 255, 0]);
const BLUE: Rgb<u8> = Rgb([0, 0, 255]);
const GRAY: Rgb<u8> = Rgb([128, 128, 128]);
const CYAN: Rgb<u8> = Rgb([0, 255, 255]);
const MARKER_RADIUS: i32 = 3;

/// Receives debug images from the tracker.
///
/// Pushing must not block; a sink that cannot keep up drops images.
pub trait DisplaySink: Send + Sync {
    fn push(&self, image: RgbImage);
}

/// A bounded queue of debug images that drops new images while it is full.
///
/// Any number of trackers may push into it while a viewer thread pops.
pub struct DisplayQueue {
    sender: Sender<RgbImage>,
    receiver: Receiver<RgbImage>,
    dropped: AtomicUsize,
}

impl DisplayQueue {
    pub fn new(capacity: usize) -> Self {
        let (sender, receiver) = bounded(capacity);
        Self {
            sender,
            receiver,
            dropped: AtomicUsize::new(0),
        }
    }

    /// A handle for the consumer side.
    pub fn receiver(&self) -> Receiver<RgbImage> {
        self.receiver.clone()
    }

    pub fn try_pop(&self) -> Option<RgbImage> {
        self.receiver.try_recv().ok()
    }

    pub fn len(&self) -> usize {
        self.receiver.len()
    }

    pub fn is_empty(&self) -> bool {
        self.receiver.is_empty()
    }

    /// How many images were dropped because the queue was full.
    pub fn dropped(&self) -> usize {
        self.dropped.load(Ordering::Relaxed)
    }
}

impl DisplaySink for DisplayQueue {
    fn push(&self, image: RgbImage) {
        match self.sender.try_send(image) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) | Err(TrySendError::Disconnected(_)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                trace!("display queue full, dropping image");
            }
        }
    }
}

fn to_rgb(image: &GrayImage) -> RgbImage {
    RgbImage::from_fn(image.width(), image.height(), |x, y| {
        let v = image[(x, y)][0];
        Rgb([v, v, v])
    })
}

fn marker(canvas: &mut RgbImage, point: &KeyPoint, color: Rgb<u8>) {
    let center = (point.x.round() as i32, point.y.round() as i32);
    draw_hollow_circle_mut(canvas, center, MARKER_RADIUS, color);
}

/// Draws the features of `current` over its image.
///
/// Invalidated features are red. Features that were already in `reference` are green
/// with a line back to where they were, and new features are blue. The extra corners
/// are drawn in gray and cyan.
pub fn render_tracks(
    reference: &Frame,
    current: &Frame,
    extra_gray: &[KeyPoint],
    extra_blue: &[KeyPoint],
) -> RgbImage {
    let mut canvas = to_rgb(&current.image);
    for point in extra_gray {
        marker(&mut canvas, point, GRAY);
    }
    for point in extra_blue {
        marker(&mut canvas, point, CYAN);
    }
    let previous: HashMap<LandmarkId, KeyPoint> = reference
        .valid_landmarks()
        .map(|(ix, landmark)| (landmark, reference.keypoints[ix]))
        .collect();
    for (point, landmark) in current.keypoints.iter().zip(&current.landmarks) {
        let color = match landmark.map(|landmark| previous.get(&landmark)) {
            None => RED,
            Some(Some(before)) => {
                draw_line_segment_mut(
                    &mut canvas,
                    (before.x as f32, before.y as f32),
                    (point.x as f32, point.y as f32),
                    GREEN,
                );
                GREEN
            }
            Some(None) => BLUE,
        };
        marker(&mut canvas, point, color);
    }
    canvas
}
