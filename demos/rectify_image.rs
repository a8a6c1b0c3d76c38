//! Image Rectification Example
//!
//! Rectifies an image with a ROS calibration file. Plumb-bob and
//! rational-polynomial calibrations go through the standard model, equidistant
//! calibrations through the fisheye model.
//!
//! Usage:
//! ```bash
//! cargo run --example rectify_image -- \
//!   --calibration samples/equidistant.yaml \
//!   --input raw.png \
//!   --output rectified.png
//! ```

use clap::{Parser, ValueEnum};
use fisheye_rectify::camera::{CameraInfo, CameraModel};
use fisheye_rectify::Interpolation;
use flexi_logger::{colored_detailed_format, detailed_format, Duplicate, FileSpec, Logger};
use log::info;
use nalgebra::Vector2;
use std::path::PathBuf;

#[derive(Debug, Clone, Copy, ValueEnum)]
enum InterpolationArg {
    Nearest,
    Linear,
}

impl From<InterpolationArg> for Interpolation {
    fn from(arg: InterpolationArg) -> Self {
        match arg {
            InterpolationArg::Nearest => Interpolation::Nearest,
            InterpolationArg::Linear => Interpolation::Linear,
        }
    }
}

/// Image rectification tool
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Calibration file, ROS YAML or CameraInfo JSON
    #[arg(short = 'c', long)]
    calibration: PathBuf,

    /// Raw image to rectify
    #[arg(short = 'i', long)]
    input: PathBuf,

    /// Where to write the rectified image
    #[arg(short = 'o', long)]
    output: PathBuf,

    /// Interpolation used when resampling
    #[arg(long, value_enum, default_value = "linear")]
    interpolation: InterpolationArg,
}

fn load_camera_info(path: &PathBuf) -> Result<CameraInfo, Box<dyn std::error::Error>> {
    let path_str = path.to_str().ok_or("Invalid calibration path string")?;
    let info = match path.extension().and_then(|ext| ext.to_str()) {
        Some("json") => CameraInfo::load_from_json(path_str)?,
        _ => CameraInfo::load_from_yaml(path_str)?,
    };
    Ok(info)
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    Logger::try_with_str("info")?
        .log_to_file(
            FileSpec::default()
                .directory("logs")
                .suppress_timestamp()
                .suffix("log"),
        )
        .duplicate_to_stdout(Duplicate::All)
        .format_for_files(detailed_format)
        .format_for_stdout(colored_detailed_format)
        .set_palette("196;208;76;39;178".to_string())
        .start()?;

    let cli = Cli::parse();

    let info = load_camera_info(&cli.calibration)?;
    let model = CameraModel::new(&info)?;
    info!(
        "Loaded {} calibration from {:?}",
        info.distortion_model, cli.calibration
    );

    let raw = image::open(&cli.input)?.to_rgb8();
    info!(
        "Rectifying {:?} ({}x{})",
        cli.input,
        raw.width(),
        raw.height()
    );

    let rectified = model.rectify_image(&raw, cli.interpolation.into())?;
    rectified.save(&cli.output)?;
    info!("Rectified image written to {:?}", cli.output);

    let resolution = model.reduced_resolution()?;
    let center = Vector2::new(
        f64::from(resolution.width) / 2.0,
        f64::from(resolution.height) / 2.0,
    );
    let raw_center = model.unrectify_point(&center)?;
    info!(
        "Rectified center ({:.1}, {:.1}) comes from raw pixel ({:.2}, {:.2})",
        center.x, center.y, raw_center.x, raw_center.y
    );

    Ok(())
}
