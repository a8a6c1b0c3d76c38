//! Fisheye rectification path for the equidistant distortion model.
//!
//! The [`FisheyeModel`] only accepts calibrations whose distortion model is
//! `equidistant` (which the standard path reports as
//! [`DistortionState::Unknown`](crate::camera::DistortionState::Unknown)).
//! Its rectification maps are built at the binned resolution and cropped to
//! the region of interest on first use.

use log::debug;
use nalgebra::{Vector2, Vector3};
use std::sync::Arc;

use crate::camera::maps::{reduce_maps, warn_on_size_mismatch};
use crate::camera::pinhole::single_point;
use crate::camera::{
    Attempt, BinnedIntrinsics, Calibration, CameraModelError, DistortionModel, MapCache,
};
use crate::geometry::equidistant;
use crate::geometry::remap::{remap, Border, Image, Interpolation, RectificationMaps, Sample};
use crate::geometry::rotation_vector;

#[derive(Debug, Default)]
pub struct FisheyeModel {
    maps: MapCache,
}

impl FisheyeModel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fails with [`CameraModelError::NotAFisheyeCalibration`] unless the
    /// calibration uses the equidistant model.
    pub fn ensure_fisheye(calibration: &Calibration) -> Result<(), CameraModelError> {
        if calibration.is_fisheye() {
            Ok(())
        } else {
            Err(CameraModelError::NotAFisheyeCalibration {
                distortion_model: calibration.distortion_model().to_string(),
            })
        }
    }

    /// Full-resolution (binned) maps, built on first use.
    pub fn full_maps(
        &self,
        calibration: &Calibration,
    ) -> Result<Arc<RectificationMaps>, CameraModelError> {
        Self::ensure_fisheye(calibration)?;
        self.maps.full_maps(|| build_full_maps(calibration))
    }

    /// Maps cropped to the region of interest. Shares the full maps when the
    /// ROI covers the whole image.
    pub fn reduced_maps(
        &self,
        calibration: &Calibration,
    ) -> Result<Arc<RectificationMaps>, CameraModelError> {
        Self::ensure_fisheye(calibration)?;
        self.maps.reduced_maps(
            || build_full_maps(calibration),
            |full| {
                debug!("Reducing fisheye maps to ROI {:?}", calibration.roi());
                reduce_maps(full, calibration)
            },
        )
    }

    /// Resamples `raw` through the reduced maps.
    ///
    /// Pixels without a source inside `raw` become NaN for floating-point
    /// channels and zero otherwise.
    pub fn rectify_image<P>(
        &self,
        calibration: &Calibration,
        raw: &Image<P>,
        interpolation: Interpolation,
    ) -> Result<Image<P>, CameraModelError>
    where
        P: image::Pixel,
        P::Subpixel: Sample,
    {
        let maps = self.reduced_maps(calibration)?;
        warn_on_size_mismatch(self.name(), raw.dimensions(), calibration.reduced_resolution());
        Ok(remap(raw, &maps, interpolation, Border::nan_or_default()))
    }

    /// Back-projects a rectified pixel to a ray and projects it through the
    /// fisheye lens into the raw image.
    pub fn unrectify_point(
        &self,
        calibration: &Calibration,
        uv_rect: &Vector2<f64>,
    ) -> Result<Vector2<f64>, CameraModelError> {
        Self::ensure_fisheye(calibration)?;
        let ray = calibration.project_pixel_to_3d_ray(uv_rect);
        let rvec = rotation_vector(&calibration.rotation_matrix().transpose());
        single_point(equidistant::project_points(
            &[ray],
            &rvec,
            &Vector3::zeros(),
            calibration.intrinsic_matrix(),
            calibration.distortion_coeffs(),
        ))
    }

    /// Maps a raw fisheye pixel into the rectified image.
    pub fn rectify_point(
        &self,
        calibration: &Calibration,
        uv_raw: &Vector2<f64>,
    ) -> Result<Vector2<f64>, CameraModelError> {
        Self::ensure_fisheye(calibration)?;
        single_point(equidistant::undistort_points(
            &[*uv_raw],
            calibration.intrinsic_matrix(),
            calibration.distortion_coeffs(),
            calibration.rotation_matrix(),
            calibration.projection_matrix(),
        )?)
    }
}

fn build_full_maps(calibration: &Calibration) -> Result<RectificationMaps, CameraModelError> {
    let binned = BinnedIntrinsics::from_calibration(calibration);
    debug!(
        "Building fisheye rectification maps at {}x{}",
        binned.resolution.width, binned.resolution.height
    );
    equidistant::init_undistort_rectify_map(
        &binned.k,
        calibration.distortion_coeffs(),
        calibration.rotation_matrix(),
        &binned.p,
        &binned.resolution,
    )
}

impl DistortionModel for FisheyeModel {
    fn name(&self) -> &'static str {
        "fisheye"
    }

    fn map_cache(&self) -> &MapCache {
        &self.maps
    }

    fn try_rectify_image<P>(
        &self,
        calibration: &Calibration,
        raw: &Image<P>,
        interpolation: Interpolation,
    ) -> Result<Attempt<Image<P>>, CameraModelError>
    where
        P: image::Pixel,
        P::Subpixel: Sample,
    {
        if !calibration.is_fisheye() {
            return Ok(Attempt::ModelMismatch);
        }
        self.rectify_image(calibration, raw, interpolation)
            .map(Attempt::Done)
    }

    fn try_unrectify_point(
        &self,
        calibration: &Calibration,
        uv_rect: &Vector2<f64>,
    ) -> Result<Attempt<Vector2<f64>>, CameraModelError> {
        if !calibration.is_fisheye() {
            return Ok(Attempt::ModelMismatch);
        }
        self.unrectify_point(calibration, uv_rect).map(Attempt::Done)
    }

    fn try_rectify_point(
        &self,
        calibration: &Calibration,
        uv_raw: &Vector2<f64>,
    ) -> Result<Attempt<Vector2<f64>>, CameraModelError> {
        if !calibration.is_fisheye() {
            return Ok(Attempt::ModelMismatch);
        }
        self.rectify_point(calibration, uv_raw).map(Attempt::Done)
    }
}
