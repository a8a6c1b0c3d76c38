//! Calibrated camera model with a standard and a fisheye rectification path.
//!
//! A [`CameraModel`] is loaded from a [`CameraInfo`] record. Depending on the
//! declared distortion model, image rectification and point (un)rectification
//! are served either by the [`StandardModel`] (plumb-bob and
//! rational-polynomial families) or, when the standard path reports a model
//! mismatch, by the [`FisheyeModel`] (equidistant family).
//!
//! Both models implement the [`DistortionModel`] trait and keep their own
//! lazily built [`MapCache`].

use nalgebra::{Matrix3, Vector2, Vector3};
use serde::{Deserialize, Serialize};

use crate::geometry::remap::{Image, Interpolation, Sample};

pub mod binning;
pub mod calibration;
pub mod camera_info;
pub mod fisheye;
pub mod maps;
pub mod model;
pub mod pinhole;

pub use binning::BinnedIntrinsics;
pub use calibration::Calibration;
pub use camera_info::CameraInfo;
pub use fisheye::FisheyeModel;
pub use maps::MapCache;
pub use model::CameraModel;
pub use pinhole::StandardModel;

/// Names of the distortion models found in `CameraInfo::distortion_model`.
pub mod distortion_models {
    pub const PLUMB_BOB: &str = "plumb_bob";
    pub const RATIONAL_POLYNOMIAL: &str = "rational_polynomial";
    pub const EQUIDISTANT: &str = "equidistant";
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Intrinsics {
    pub fx: f64,
    pub fy: f64,
    pub cx: f64,
    pub cy: f64,
}

impl Intrinsics {
    /// Reads focal lengths and principal point from a 3x3 camera matrix.
    pub fn from_matrix(k: &Matrix3<f64>) -> Self {
        Intrinsics {
            fx: k[(0, 0)],
            fy: k[(1, 1)],
            cx: k[(0, 2)],
            cy: k[(1, 2)],
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

/// Sub-window of the sensor that is actually captured.
///
/// Mirrors `sensor_msgs/RegionOfInterest`. An all-zero region means "the full
/// image" and is normalized by [`Calibration::from_camera_info`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RegionOfInterest {
    #[serde(default)]
    pub x_offset: u32,
    #[serde(default)]
    pub y_offset: u32,
    #[serde(default)]
    pub height: u32,
    #[serde(default)]
    pub width: u32,
    #[serde(default)]
    pub do_rectify: bool,
}

impl RegionOfInterest {
    /// Region covering a whole image of the given resolution.
    pub fn full(resolution: &Resolution) -> Self {
        RegionOfInterest {
            x_offset: 0,
            y_offset: 0,
            height: resolution.height,
            width: resolution.width,
            do_rectify: false,
        }
    }

    /// `true` when offset, width and height are all zero.
    pub fn is_unset(&self) -> bool {
        self.x_offset == 0 && self.y_offset == 0 && self.width == 0 && self.height == 0
    }

    /// `true` when the region starts at the origin and spans the whole image.
    pub fn is_full(&self, resolution: &Resolution) -> bool {
        self.x_offset == 0
            && self.y_offset == 0
            && self.width == resolution.width
            && self.height == resolution.height
    }

    /// Offset and size divided (with truncation) by the binning factors.
    pub fn scaled(&self, binning_x: u32, binning_y: u32) -> Self {
        RegionOfInterest {
            x_offset: self.x_offset / binning_x,
            y_offset: self.y_offset / binning_y,
            height: self.height / binning_y,
            width: self.width / binning_x,
            do_rectify: self.do_rectify,
        }
    }
}

/// Whether the declared distortion model is understood by the standard path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DistortionState {
    /// Recognized model whose coefficients are all zero.
    None,
    /// Recognized model with at least one non-zero coefficient.
    Calibrated,
    /// Model name the standard path does not handle.
    Unknown,
}

/// Outcome of an operation that a distortion model may decline.
///
/// `ModelMismatch` is not an error: it tells the caller that the calibration
/// belongs to another model family and that the next model should be tried.
#[derive(Debug, Clone, PartialEq)]
pub enum Attempt<T> {
    Done(T),
    ModelMismatch,
}

impl<T> Attempt<T> {
    pub fn is_model_mismatch(&self) -> bool {
        matches!(self, Attempt::ModelMismatch)
    }

    pub fn map<U, F: FnOnce(T) -> U>(self, f: F) -> Attempt<U> {
        match self {
            Attempt::Done(value) => Attempt::Done(f(value)),
            Attempt::ModelMismatch => Attempt::ModelMismatch,
        }
    }
}

#[derive(thiserror::Error, Debug)]
pub enum CameraModelError {
    #[error("not a fisheye calibration (distortion model '{distortion_model}')")]
    NotAFisheyeCalibration { distortion_model: String },
    #[error("Camera model has not been initialized from a calibration")]
    NotInitialized,
    #[error("Invalid calibration: {0}")]
    InvalidCalibration(String),
    #[error("z is close to zero, point is at camera center")]
    PointAtCameraCenter,
    #[error("Focal length must be positive")]
    FocalLengthMustBePositive,
    #[error("Principal point must be finite")]
    PrincipalPointMustBeFinite,
    #[error("Invalid camera parameters: {0}")]
    InvalidParams(String),
    #[error("Numerical error in computation: {0}")]
    NumericalError(String),
    #[error("Failed to load YAML: {0}")]
    YamlError(String),
    #[error("Failed to parse JSON: {0}")]
    JsonError(String),
    #[error("IO Error: {0}")]
    IOError(String),
}

impl From<std::io::Error> for CameraModelError {
    fn from(err: std::io::Error) -> Self {
        CameraModelError::IOError(err.to_string())
    }
}

impl From<yaml_rust::ScanError> for CameraModelError {
    fn from(err: yaml_rust::ScanError) -> Self {
        CameraModelError::YamlError(err.to_string())
    }
}

impl From<serde_yaml::Error> for CameraModelError {
    fn from(err: serde_yaml::Error) -> Self {
        CameraModelError::YamlError(err.to_string())
    }
}

impl From<serde_json::Error> for CameraModelError {
    fn from(err: serde_json::Error) -> Self {
        CameraModelError::JsonError(err.to_string())
    }
}

/// A distortion-model family able to rectify images and map points between
/// the raw and the rectified image.
///
/// Every operation returns an [`Attempt`]: a model that does not handle the
/// calibration's family answers [`Attempt::ModelMismatch`] instead of failing,
/// so that [`CameraModel`] can hand the request to the next model. Genuine
/// failures are reported through the `Err` variant and are never retried.
pub trait DistortionModel {
    /// Short name used in log messages.
    fn name(&self) -> &'static str;

    /// Lazily built rectification maps owned by this model.
    fn map_cache(&self) -> &MapCache;

    /// Resamples `raw` into the rectified image of the active region of interest.
    fn try_rectify_image<P>(
        &self,
        calibration: &Calibration,
        raw: &Image<P>,
        interpolation: Interpolation,
    ) -> Result<Attempt<Image<P>>, CameraModelError>
    where
        P: image::Pixel,
        P::Subpixel: Sample;

    /// Maps a rectified pixel to the corresponding raw (distorted) pixel.
    fn try_unrectify_point(
        &self,
        calibration: &Calibration,
        uv_rect: &Vector2<f64>,
    ) -> Result<Attempt<Vector2<f64>>, CameraModelError>;

    /// Maps a raw (distorted) pixel to the corresponding rectified pixel.
    fn try_rectify_point(
        &self,
        calibration: &Calibration,
        uv_raw: &Vector2<f64>,
    ) -> Result<Attempt<Vector2<f64>>, CameraModelError>;
}

/// Common validation functions for camera parameters
pub mod validation {
    use super::*;

    pub fn validate_intrinsics(intrinsics: &Intrinsics) -> Result<(), CameraModelError> {
        if intrinsics.fx <= 0.0 || intrinsics.fy <= 0.0 {
            return Err(CameraModelError::FocalLengthMustBePositive);
        }
        if !intrinsics.cx.is_finite() || !intrinsics.cy.is_finite() {
            return Err(CameraModelError::PrincipalPointMustBeFinite);
        }
        Ok(())
    }

    /// Rejects rays that cannot be projected through a pinhole.
    pub fn validate_ray(ray: &Vector3<f64>) -> Result<(), CameraModelError> {
        if ray.z.abs() < f64::EPSILON.sqrt() {
            return Err(CameraModelError::PointAtCameraCenter);
        }
        Ok(())
    }
}
