//! Fisheye Rectify Library
//!
//! A calibrated pinhole camera model, driven by ROS `CameraInfo` calibration
//! records, that rectifies images and maps points between raw and rectified
//! images for:
//! - the plumb-bob and rational-polynomial distortion families (standard path)
//! - the equidistant fisheye model (fisheye fallback)
//!
//! Rectification maps are built lazily in OpenCV's fixed-point layout, honour
//! binning and the region of interest, and are reused until the calibration
//! changes.

pub mod camera;
pub mod geometry;

// Re-export commonly used types
pub use camera::{
    Attempt, CameraInfo, CameraModel, CameraModelError, DistortionModel, DistortionState,
    FisheyeModel, RegionOfInterest, Resolution, StandardModel,
};

pub use geometry::remap::{Image, Interpolation, RectificationMaps};
