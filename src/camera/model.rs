//! The camera model users interact with.
//!
//! [`CameraModel`] owns the validated [`Calibration`] and one instance of each
//! distortion model. Every rectification or point operation is first offered
//! to the [`StandardModel`]; only when it answers [`Attempt::ModelMismatch`]
//! is the request handed to the [`FisheyeModel`].

use log::debug;
use nalgebra::{Matrix3, Matrix3x4, Vector2, Vector3};
use std::sync::Arc;

use crate::camera::{
    Attempt, Calibration, CameraInfo, CameraModelError, DistortionModel, DistortionState,
    FisheyeModel, RegionOfInterest, Resolution, StandardModel,
};
use crate::geometry::remap::{Image, Interpolation, RectificationMaps, Sample};

/// Calibrated camera able to rectify images of either distortion family.
///
/// A default-constructed model holds no calibration and fails every operation
/// with [`CameraModelError::NotInitialized`].
///
/// # Examples
///
/// ```rust
/// use fisheye_rectify::camera::CameraModel;
/// use nalgebra::Vector2;
///
/// let model = CameraModel::load_from_yaml("samples/equidistant.yaml").unwrap();
/// let raw = model.unrectify_point(&Vector2::new(320.0, 240.0)).unwrap();
/// let rectified = model.rectify_point(&raw).unwrap();
/// assert!((rectified - Vector2::new(320.0, 240.0)).norm() < 1e-6);
/// ```
#[derive(Debug, Default)]
pub struct CameraModel {
    calibration: Option<Calibration>,
    standard: StandardModel,
    fisheye: FisheyeModel,
}

impl CameraModel {
    /// Creates a model from a calibration record.
    ///
    /// # Errors
    ///
    /// [`CameraModelError::InvalidCalibration`] if the record does not validate.
    pub fn new(info: &CameraInfo) -> Result<Self, CameraModelError> {
        let mut model = Self::default();
        model.set_camera_info(info)?;
        Ok(model)
    }

    /// Creates a model from a ROS calibration YAML file.
    pub fn load_from_yaml(path: &str) -> Result<Self, CameraModelError> {
        Self::new(&CameraInfo::load_from_yaml(path)?)
    }

    /// Replaces the calibration and returns whether it changed.
    ///
    /// Maps that depend on what changed are invalidated: a new size, model,
    /// coefficient set, matrix or binning invalidates all maps, a new ROI only
    /// the reduced maps. On error the previous calibration stays in place.
    pub fn set_camera_info(&mut self, info: &CameraInfo) -> Result<bool, CameraModelError> {
        let calibration = Calibration::from_camera_info(info)?;

        let changed = match &self.calibration {
            None => true,
            Some(current) if *current == calibration => false,
            Some(current) if current.same_full_map_inputs(&calibration) => {
                debug!("ROI changed, invalidating reduced maps");
                self.standard.map_cache().invalidate_reduced();
                self.fisheye.map_cache().invalidate_reduced();
                true
            }
            Some(_) => {
                debug!("Calibration changed, invalidating all maps");
                self.standard.map_cache().invalidate();
                self.fisheye.map_cache().invalidate();
                true
            }
        };

        self.calibration = Some(calibration);
        Ok(changed)
    }

    pub fn initialized(&self) -> bool {
        self.calibration.is_some()
    }

    /// The active calibration.
    ///
    /// # Errors
    ///
    /// [`CameraModelError::NotInitialized`] before the first successful load.
    pub fn calibration(&self) -> Result<&Calibration, CameraModelError> {
        self.calibration
            .as_ref()
            .ok_or(CameraModelError::NotInitialized)
    }

    pub fn camera_info(&self) -> Result<&CameraInfo, CameraModelError> {
        Ok(self.calibration()?.camera_info())
    }

    pub fn distortion_state(&self) -> Result<DistortionState, CameraModelError> {
        Ok(self.calibration()?.distortion_state())
    }

    pub fn full_resolution(&self) -> Result<Resolution, CameraModelError> {
        Ok(self.calibration()?.full_resolution())
    }

    pub fn reduced_resolution(&self) -> Result<Resolution, CameraModelError> {
        Ok(self.calibration()?.reduced_resolution())
    }

    pub fn binning_x(&self) -> Result<u32, CameraModelError> {
        Ok(self.calibration()?.binning_x())
    }

    pub fn binning_y(&self) -> Result<u32, CameraModelError> {
        Ok(self.calibration()?.binning_y())
    }

    pub fn roi(&self) -> Result<RegionOfInterest, CameraModelError> {
        Ok(*self.calibration()?.roi())
    }

    pub fn full_intrinsic_matrix(&self) -> Result<Matrix3<f64>, CameraModelError> {
        Ok(*self.calibration()?.full_intrinsic_matrix())
    }

    pub fn full_projection_matrix(&self) -> Result<Matrix3x4<f64>, CameraModelError> {
        Ok(*self.calibration()?.full_projection_matrix())
    }

    pub fn intrinsic_matrix(&self) -> Result<Matrix3<f64>, CameraModelError> {
        Ok(*self.calibration()?.intrinsic_matrix())
    }

    pub fn projection_matrix(&self) -> Result<Matrix3x4<f64>, CameraModelError> {
        Ok(*self.calibration()?.projection_matrix())
    }

    pub fn rotation_matrix(&self) -> Result<Matrix3<f64>, CameraModelError> {
        Ok(*self.calibration()?.rotation_matrix())
    }

    pub fn distortion_coeffs(&self) -> Result<&[f64], CameraModelError> {
        Ok(self.calibration()?.distortion_coeffs())
    }

    pub fn fx(&self) -> Result<f64, CameraModelError> {
        Ok(self.calibration()?.fx())
    }

    pub fn fy(&self) -> Result<f64, CameraModelError> {
        Ok(self.calibration()?.fy())
    }

    pub fn cx(&self) -> Result<f64, CameraModelError> {
        Ok(self.calibration()?.cx())
    }

    pub fn cy(&self) -> Result<f64, CameraModelError> {
        Ok(self.calibration()?.cy())
    }

    pub fn tx(&self) -> Result<f64, CameraModelError> {
        Ok(self.calibration()?.tx())
    }

    pub fn ty(&self) -> Result<f64, CameraModelError> {
        Ok(self.calibration()?.ty())
    }

    pub fn standard_model(&self) -> &StandardModel {
        &self.standard
    }

    pub fn fisheye_model(&self) -> &FisheyeModel {
        &self.fisheye
    }

    /// Rectifies a raw image of the active capture window.
    ///
    /// Calibrations of the plumb-bob family are rectified by the standard
    /// model. Equidistant calibrations are rectified through the fisheye maps;
    /// there, pixels without a source are NaN in floating-point images and
    /// zero otherwise.
    ///
    /// # Errors
    ///
    /// * [`CameraModelError::NotInitialized`] if no calibration is loaded.
    /// * [`CameraModelError::NotAFisheyeCalibration`] if neither model handles
    ///   the distortion model.
    /// * Any error raised while building the maps.
    pub fn rectify_image<P>(
        &self,
        raw: &Image<P>,
        interpolation: Interpolation,
    ) -> Result<Image<P>, CameraModelError>
    where
        P: image::Pixel,
        P::Subpixel: Sample,
    {
        self.dispatch(
            "rectify_image",
            |calibration| {
                self.standard
                    .try_rectify_image(calibration, raw, interpolation)
            },
            |calibration| {
                self.fisheye
                    .try_rectify_image(calibration, raw, interpolation)
            },
        )
    }

    /// Maps a rectified pixel to the raw (distorted) pixel it was sampled from.
    pub fn unrectify_point(&self, uv_rect: &Vector2<f64>) -> Result<Vector2<f64>, CameraModelError> {
        self.dispatch(
            "unrectify_point",
            |calibration| self.standard.try_unrectify_point(calibration, uv_rect),
            |calibration| self.fisheye.try_unrectify_point(calibration, uv_rect),
        )
    }

    /// Maps a raw (distorted) pixel into the rectified image.
    pub fn rectify_point(&self, uv_raw: &Vector2<f64>) -> Result<Vector2<f64>, CameraModelError> {
        self.dispatch(
            "rectify_point",
            |calibration| self.standard.try_rectify_point(calibration, uv_raw),
            |calibration| self.fisheye.try_rectify_point(calibration, uv_raw),
        )
    }

    pub fn project_pixel_to_3d_ray(
        &self,
        uv_rect: &Vector2<f64>,
    ) -> Result<Vector3<f64>, CameraModelError> {
        Ok(self.calibration()?.project_pixel_to_3d_ray(uv_rect))
    }

    pub fn project_3d_to_pixel(&self, xyz: &Vector3<f64>) -> Result<Vector2<f64>, CameraModelError> {
        self.calibration()?.project_3d_to_pixel(xyz)
    }

    /// Fisheye maps of the active capture window, built on first use.
    pub fn fisheye_maps(&self) -> Result<Arc<RectificationMaps>, CameraModelError> {
        self.fisheye.reduced_maps(self.calibration()?)
    }

    fn dispatch<T, S, F>(&self, operation: &str, standard: S, fisheye: F) -> Result<T, CameraModelError>
    where
        S: FnOnce(&Calibration) -> Result<Attempt<T>, CameraModelError>,
        F: FnOnce(&Calibration) -> Result<Attempt<T>, CameraModelError>,
    {
        let calibration = self.calibration()?;
        if let Attempt::Done(value) = standard(calibration)? {
            return Ok(value);
        }

        debug!(
            "{operation}: standard model declined '{}', trying the fisheye model",
            calibration.distortion_model()
        );
        match fisheye(calibration)? {
            Attempt::Done(value) => Ok(value),
            Attempt::ModelMismatch => Err(CameraModelError::NotAFisheyeCalibration {
                distortion_model: calibration.distortion_model().to_string(),
            }),
        }
    }
}
