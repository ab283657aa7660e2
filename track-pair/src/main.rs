use image::ImageOutputFormat;
use log::*;
use std::{
    io::{Cursor, Write},
    path::PathBuf,
};
use structopt::StructOpt;
use vio_core::{
    nalgebra::{Point2, Rotation3, Vector2},
    CameraIntrinsics, CameraParams, Frame,
};
use vio_frontend::{Tracker, TrackerParams};

#[derive(Debug, StructOpt)]
#[structopt(
    name = "track-pair",
    about = "Tracks features from one image into another and verifies them geometrically"
)]
struct Opt {
    /// A JSON file with tracker parameters.
    ///
    /// Missing fields take their default values. Without a file every parameter is
    /// defaulted.
    #[structopt(short, long, parse(from_os_str))]
    settings: Option<PathBuf>,
    /// The x focal length
    #[structopt(long, default_value = "458.654")]
    x_focal: f64,
    /// The y focal length
    #[structopt(long, default_value = "457.296")]
    y_focal: f64,
    /// The x optical center coordinate
    #[structopt(long, default_value = "367.215")]
    x_center: f64,
    /// The y optical center coordinate
    #[structopt(long, default_value = "248.375")]
    y_center: f64,
    /// The output path to write the tracks to (autodetects image type from extension).
    ///
    /// If this is not provided, then the output goes to stdout as a PNG.
    #[structopt(short, long, parse(from_os_str))]
    output: Option<PathBuf>,
    /// The image features are detected in.
    #[structopt(parse(from_os_str))]
    reference: PathBuf,
    /// The image features are tracked into.
    #[structopt(parse(from_os_str))]
    current: PathBuf,
}

fn main() {
    pretty_env_logger::init_timed();
    let opt = Opt::from_args();

    let params = match &opt.settings {
        Some(path) => TrackerParams::from_json_file(path).expect("failed to load settings"),
        None => TrackerParams::default(),
    };
    let reference_image = image::open(&opt.reference)
        .expect("failed to open reference image")
        .to_luma8();
    let current_image = image::open(&opt.current)
        .expect("failed to open current image")
        .to_luma8();
    assert_eq!(
        reference_image.dimensions(),
        current_image.dimensions(),
        "both images must have the same size"
    );

    let intrinsics = CameraIntrinsics::identity()
        .focals(Vector2::new(opt.x_focal, opt.y_focal))
        .principal_point(Point2::new(opt.x_center, opt.y_center));
    let camera = CameraParams::pinhole(0, intrinsics, reference_image.dimensions());
    let mut tracker = Tracker::new(params, camera, None).expect("invalid settings");

    let mut reference = Frame::new(0, 0, 0, reference_image);
    tracker.feature_detection(&mut reference);
    info!("detected {} features", reference.len());

    let mut current = Frame::new(1, 1, 0, current_image);
    tracker.feature_tracking(&reference, &mut current, &Rotation3::identity());
    info!("tracked {} features", current.len());

    let (status, pose) =
        tracker.geometric_outlier_rejection_mono(&mut reference, &mut current, None);
    info!(
        "{:?}: rotation {:.4} rad, translation direction {:?}",
        status,
        pose.rotation_angle(),
        pose.translation().as_slice()
    );
    tracker.log_diagnostics();

    let image = tracker.tracker_image(&reference, &current, &[], &[]);
    if let Some(path) = opt.output {
        image.save(path).expect("failed to write image");
    } else {
        let mut png = Cursor::new(vec![]);
        image
            .write_to(&mut png, ImageOutputFormat::Png)
            .expect("failed to encode image");
        std::io::stdout()
            .lock()
            .write_all(png.get_ref())
            .expect("failed to write image to stdout");
    }
}
