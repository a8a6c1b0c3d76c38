//! Standard rectification path for the plumb-bob and rational-polynomial
//! distortion families.
//!
//! The [`StandardModel`] serves calibrations whose [`DistortionState`] is
//! `None` or `Calibrated`. For any other calibration it answers
//! [`Attempt::ModelMismatch`] so that the caller can fall back to another
//! model.

use log::debug;
use nalgebra::{Vector2, Vector3};
use std::sync::Arc;

use crate::camera::maps::{reduce_maps, warn_on_size_mismatch};
use crate::camera::{
    Attempt, BinnedIntrinsics, Calibration, CameraModelError, DistortionModel, DistortionState,
    MapCache,
};
use crate::geometry::plumb_bob;
use crate::geometry::remap::{remap, Border, Image, Interpolation, RectificationMaps, Sample};
use crate::geometry::rotation_vector;

/// Pinhole camera with optional plumb-bob or rational-polynomial distortion.
#[derive(Debug, Default)]
pub struct StandardModel {
    maps: MapCache,
}

impl StandardModel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Maps reduced to the region of interest, built on first use.
    ///
    /// Only meaningful for `Calibrated` calibrations. Other calibrations are
    /// rejected with [`CameraModelError::InvalidParams`].
    pub fn reduced_maps(
        &self,
        calibration: &Calibration,
    ) -> Result<Arc<RectificationMaps>, CameraModelError> {
        if calibration.distortion_state() != DistortionState::Calibrated {
            return Err(CameraModelError::InvalidParams(format!(
                "no standard rectification maps for distortion state {:?}",
                calibration.distortion_state()
            )));
        }
        self.maps.reduced_maps(
            || build_full_maps(calibration),
            |full| reduce_maps(full, calibration),
        )
    }
}

fn build_full_maps(calibration: &Calibration) -> Result<RectificationMaps, CameraModelError> {
    let binned = BinnedIntrinsics::from_calibration(calibration);
    debug!(
        "Building {} rectification maps at {}x{}",
        calibration.distortion_model(),
        binned.resolution.width,
        binned.resolution.height
    );
    plumb_bob::init_undistort_rectify_map(
        &binned.k,
        calibration.distortion_coeffs(),
        calibration.rotation_matrix(),
        &binned.p,
        &binned.resolution,
    )
}

impl DistortionModel for StandardModel {
    fn name(&self) -> &'static str {
        "standard"
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
        match calibration.distortion_state() {
            DistortionState::None => Ok(Attempt::Done(raw.clone())),
            DistortionState::Calibrated => {
                let maps = self.reduced_maps(calibration)?;
                warn_on_size_mismatch(
                    self.name(),
                    raw.dimensions(),
                    calibration.reduced_resolution(),
                );
                Ok(Attempt::Done(remap(
                    raw,
                    &maps,
                    interpolation,
                    Border::Default,
                )))
            }
            DistortionState::Unknown => Ok(Attempt::ModelMismatch),
        }
    }

    fn try_unrectify_point(
        &self,
        calibration: &Calibration,
        uv_rect: &Vector2<f64>,
    ) -> Result<Attempt<Vector2<f64>>, CameraModelError> {
        match calibration.distortion_state() {
            DistortionState::None => Ok(Attempt::Done(*uv_rect)),
            DistortionState::Calibrated => {
                let ray = calibration.project_pixel_to_3d_ray(uv_rect);
                let rvec = rotation_vector(&calibration.rotation_matrix().transpose());
                let points = plumb_bob::project_points(
                    &[ray],
                    &rvec,
                    &Vector3::zeros(),
                    calibration.intrinsic_matrix(),
                    calibration.distortion_coeffs(),
                );
                single_point(points).map(Attempt::Done)
            }
            DistortionState::Unknown => Ok(Attempt::ModelMismatch),
        }
    }

    fn try_rectify_point(
        &self,
        calibration: &Calibration,
        uv_raw: &Vector2<f64>,
    ) -> Result<Attempt<Vector2<f64>>, CameraModelError> {
        match calibration.distortion_state() {
            DistortionState::None => Ok(Attempt::Done(*uv_raw)),
            DistortionState::Calibrated => {
                let points = plumb_bob::undistort_points(
                    &[*uv_raw],
                    calibration.intrinsic_matrix(),
                    calibration.distortion_coeffs(),
                    calibration.rotation_matrix(),
                    calibration.projection_matrix(),
                );
                single_point(points).map(Attempt::Done)
            }
            DistortionState::Unknown => Ok(Attempt::ModelMismatch),
        }
    }
}

/// Unwraps the result of a one-point batch projection.
pub(crate) fn single_point(points: Vec<Vector2<f64>>) -> Result<Vector2<f64>, CameraModelError> {
    match points.as_slice() {
        [point] => Ok(*point),
        _ => Err(CameraModelError::NumericalError(format!(
            "expected exactly one projected point, got {}",
            points.len()
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::camera::CameraInfo;
    use approx::assert_relative_eq;
    use image::{ImageBuffer, Luma};

    fn plumb_bob_calibration() -> Calibration {
        let info = CameraInfo::load_from_yaml("samples/plumb_bob.yaml").unwrap();
        Calibration::from_camera_info(&info).unwrap()
    }

    fn undistorted_calibration() -> Calibration {
        let mut info = CameraInfo::load_from_yaml("samples/plumb_bob.yaml").unwrap();
        info.d = vec![0.0; 5];
        Calibration::from_camera_info(&info).unwrap()
    }

    #[test]
    fn test_no_distortion_copies_and_passes_points_through() {
        let model = StandardModel::new();
        let calibration = undistorted_calibration();
        let raw: Image<Luma<u8>> = ImageBuffer::from_fn(659, 494, |x, y| Luma([(x ^ y) as u8]));

        let rectified = model
            .try_rectify_image(&calibration, &raw, Interpolation::Linear)
            .unwrap();
        assert_eq!(rectified, Attempt::Done(raw));

        let point = Vector2::new(12.5, 400.0);
        assert_eq!(
            model.try_unrectify_point(&calibration, &point).unwrap(),
            Attempt::Done(point)
        );
        assert_eq!(
            model.try_rectify_point(&calibration, &point).unwrap(),
            Attempt::Done(point)
        );
        assert!(model.map_cache().is_full_dirty());
    }

    #[test]
    fn test_equidistant_is_a_model_mismatch() {
        let model = StandardModel::new();
        let info = CameraInfo::load_from_yaml("samples/equidistant.yaml").unwrap();
        let calibration = Calibration::from_camera_info(&info).unwrap();
        let raw: Image<Luma<u8>> = ImageBuffer::new(640, 480);

        assert!(model
            .try_rectify_image(&calibration, &raw, Interpolation::Nearest)
            .unwrap()
            .is_model_mismatch());
        assert!(model
            .try_unrectify_point(&calibration, &Vector2::new(1.0, 2.0))
            .unwrap()
            .is_model_mismatch());
        assert!(model
            .try_rectify_point(&calibration, &Vector2::new(1.0, 2.0))
            .unwrap()
            .is_model_mismatch());
        assert!(model.map_cache().is_full_dirty());
        assert!(model.reduced_maps(&calibration).is_err());
    }

    #[test]
    fn test_rectify_point_inverts_unrectify_point() {
        let model = StandardModel::new();
        let calibration = plumb_bob_calibration();

        for uv_rect in [
            Vector2::new(337.0, 225.0),
            Vector2::new(150.0, 100.0),
            Vector2::new(500.0, 400.0),
        ] {
            let Attempt::Done(uv_raw) = model.try_unrectify_point(&calibration, &uv_rect).unwrap()
            else {
                panic!("standard model declined a plumb_bob calibration");
            };
            let Attempt::Done(back) = model.try_rectify_point(&calibration, &uv_raw).unwrap()
            else {
                panic!("standard model declined a plumb_bob calibration");
            };
            assert_relative_eq!(back, uv_rect, epsilon = 1e-5);
        }
    }

    #[test]
    fn test_rectified_image_follows_the_maps() {
        let model = StandardModel::new();
        let calibration = plumb_bob_calibration();
        let raw: Image<Luma<f32>> =
            ImageBuffer::from_fn(659, 494, |x, y| Luma([x as f32 + 1000.0 * y as f32]));

        let Attempt::Done(rectified) = model
            .try_rectify_image(&calibration, &raw, Interpolation::Nearest)
            .unwrap()
        else {
            panic!("standard model declined a plumb_bob calibration");
        };
        assert_eq!(rectified.dimensions(), (659, 494));
        assert!(!model.map_cache().is_full_dirty());
        assert!(!model.map_cache().is_reduced_dirty());

        // The centre pixel lands near the raw pixel given by unrectify_point.
        let uv_rect = Vector2::new(330.0, 240.0);
        let Attempt::Done(uv_raw) = model.try_unrectify_point(&calibration, &uv_rect).unwrap()
        else {
            panic!("standard model declined a plumb_bob calibration");
        };
        let value = rectified.get_pixel(330, 240)[0];
        let x = value % 1000.0;
        let y = (value / 1000.0).floor();
        assert!((f64::from(x) - uv_raw.x).abs() <= 0.5 + 1.0 / 32.0);
        assert!((f64::from(y) - uv_raw.y).abs() <= 0.5 + 1.0 / 32.0);
    }
}
