//! Validated view of a [`CameraInfo`] record.
//!
//! Besides the full-resolution matrices, a [`Calibration`] carries the camera
//! and projection matrices of the active capture window, i.e. with the region
//! of interest offset removed and the binning applied. Rectified images and
//! rectified pixel coordinates always refer to that window.

use log::info;
use nalgebra::{Matrix3, Matrix3x4, Vector2, Vector3};

use crate::camera::binning::apply_binning;
use crate::camera::validation::{validate_intrinsics, validate_ray};
use crate::camera::{
    distortion_models, CameraInfo, CameraModelError, DistortionState, Intrinsics,
    RegionOfInterest, Resolution,
};
use crate::geometry::{equidistant, plumb_bob};

/// Largest coefficient count accepted for the plumb-bob model.
const PLUMB_BOB_COEFFICIENTS: usize = 5;

#[derive(Debug, Clone, PartialEq)]
pub struct Calibration {
    info: CameraInfo,
    resolution: Resolution,
    k_full: Matrix3<f64>,
    p_full: Matrix3x4<f64>,
    r: Matrix3<f64>,
    d: Vec<f64>,
    binning_x: u32,
    binning_y: u32,
    roi: RegionOfInterest,
    k: Matrix3<f64>,
    p: Matrix3x4<f64>,
    distortion_state: DistortionState,
}

impl Calibration {
    /// Validates `info` and derives the adjusted matrices.
    ///
    /// Binning factors of 0 become 1 and an all-zero ROI becomes the full
    /// image.
    ///
    /// # Errors
    ///
    /// [`CameraModelError::InvalidCalibration`] when the image is empty, a
    /// matrix holds non-finite values, a focal length is not positive, the ROI
    /// leaves the image or the coefficient count does not fit the model.
    pub fn from_camera_info(info: &CameraInfo) -> Result<Self, CameraModelError> {
        let resolution = info.resolution();
        if resolution.width == 0 || resolution.height == 0 {
            return Err(invalid(format!(
                "image size {}x{} is empty",
                resolution.width, resolution.height
            )));
        }

        let all_finite = info
            .k
            .iter()
            .chain(info.r.iter())
            .chain(info.p.iter())
            .chain(info.d.iter())
            .all(|v| v.is_finite());
        if !all_finite {
            return Err(invalid("non-finite value in K, R, P or D".to_string()));
        }

        let k_full = Matrix3::from_row_slice(&info.k);
        let p_full = Matrix3x4::from_row_slice(&info.p);
        let r = Matrix3::from_row_slice(&info.r);
        validate_intrinsics(&Intrinsics::from_matrix(&k_full))
            .map_err(|e| invalid(format!("K: {e}")))?;
        validate_intrinsics(&Intrinsics::from_matrix(
            &p_full.fixed_view::<3, 3>(0, 0).into_owned(),
        ))
        .map_err(|e| invalid(format!("P: {e}")))?;

        let max_coefficients = match info.distortion_model.as_str() {
            distortion_models::PLUMB_BOB => Some(PLUMB_BOB_COEFFICIENTS),
            distortion_models::RATIONAL_POLYNOMIAL => Some(plumb_bob::NUM_COEFFICIENTS),
            distortion_models::EQUIDISTANT => Some(equidistant::NUM_COEFFICIENTS),
            _ => None,
        };
        if let Some(max) = max_coefficients {
            if info.d.len() > max {
                return Err(invalid(format!(
                    "{} coefficients given for '{}', at most {max} allowed",
                    info.d.len(),
                    info.distortion_model
                )));
            }
        }

        let binning_x = info.binning_x.max(1);
        let binning_y = info.binning_y.max(1);
        if resolution.width / binning_x == 0 || resolution.height / binning_y == 0 {
            return Err(invalid(format!(
                "binning {binning_x}x{binning_y} leaves no pixel of a {}x{} image",
                resolution.width, resolution.height
            )));
        }

        let roi = if info.roi.is_unset() {
            RegionOfInterest {
                do_rectify: info.roi.do_rectify,
                ..RegionOfInterest::full(&resolution)
            }
        } else {
            info.roi
        };
        let x_end = u64::from(roi.x_offset) + u64::from(roi.width);
        let y_end = u64::from(roi.y_offset) + u64::from(roi.height);
        if roi.width == 0
            || roi.height == 0
            || x_end > u64::from(resolution.width)
            || y_end > u64::from(resolution.height)
        {
            return Err(invalid(format!(
                "ROI {}x{}+{}+{} does not fit a {}x{} image",
                roi.width, roi.height, roi.x_offset, roi.y_offset, resolution.width,
                resolution.height
            )));
        }
        if roi.width / binning_x == 0 || roi.height / binning_y == 0 {
            return Err(invalid(format!(
                "ROI {}x{} is smaller than the binning {binning_x}x{binning_y}",
                roi.width, roi.height
            )));
        }

        let mut k = k_full;
        let mut p = p_full;
        let x_offset = f64::from(roi.x_offset);
        let y_offset = f64::from(roi.y_offset);
        k[(0, 2)] -= x_offset;
        k[(1, 2)] -= y_offset;
        p[(0, 2)] -= x_offset;
        p[(1, 2)] -= y_offset;
        let (k, p) = apply_binning(&k, &p, binning_x, binning_y);

        let distortion_state = match info.distortion_model.as_str() {
            distortion_models::PLUMB_BOB | distortion_models::RATIONAL_POLYNOMIAL => {
                if info.d.iter().all(|&c| c == 0.0) {
                    DistortionState::None
                } else {
                    DistortionState::Calibrated
                }
            }
            _ => DistortionState::Unknown,
        };

        info!(
            "Loaded '{}' calibration: {}x{}, binning {}x{}, ROI {}x{}+{}+{}, distortion {:?}",
            info.distortion_model,
            resolution.width,
            resolution.height,
            binning_x,
            binning_y,
            roi.width,
            roi.height,
            roi.x_offset,
            roi.y_offset,
            distortion_state
        );

        Ok(Calibration {
            info: info.clone(),
            resolution,
            k_full,
            p_full,
            r,
            d: info.d.clone(),
            binning_x,
            binning_y,
            roi,
            k,
            p,
            distortion_state,
        })
    }

    pub fn camera_info(&self) -> &CameraInfo {
        &self.info
    }

    pub fn distortion_model(&self) -> &str {
        &self.info.distortion_model
    }

    pub fn distortion_state(&self) -> DistortionState {
        self.distortion_state
    }

    /// `true` when the calibration belongs to the fisheye family.
    pub fn is_fisheye(&self) -> bool {
        self.distortion_state == DistortionState::Unknown
            && self.info.distortion_model == distortion_models::EQUIDISTANT
    }

    pub fn full_resolution(&self) -> Resolution {
        self.resolution
    }

    /// Size of the rectified output: the ROI divided by the binning.
    pub fn reduced_resolution(&self) -> Resolution {
        Resolution {
            width: self.roi.width / self.binning_x,
            height: self.roi.height / self.binning_y,
        }
    }

    pub fn binning_x(&self) -> u32 {
        self.binning_x
    }

    pub fn binning_y(&self) -> u32 {
        self.binning_y
    }

    /// Region of interest in full-resolution pixels, never all-zero.
    pub fn roi(&self) -> &RegionOfInterest {
        &self.roi
    }

    /// `K` of the full-resolution raw image.
    pub fn full_intrinsic_matrix(&self) -> &Matrix3<f64> {
        &self.k_full
    }

    /// `P` of the full-resolution rectified image.
    pub fn full_projection_matrix(&self) -> &Matrix3x4<f64> {
        &self.p_full
    }

    /// `K` of the active capture window.
    pub fn intrinsic_matrix(&self) -> &Matrix3<f64> {
        &self.k
    }

    /// `P` of the active capture window.
    pub fn projection_matrix(&self) -> &Matrix3x4<f64> {
        &self.p
    }

    pub fn rotation_matrix(&self) -> &Matrix3<f64> {
        &self.r
    }

    pub fn distortion_coeffs(&self) -> &[f64] {
        &self.d
    }

    pub fn fx(&self) -> f64 {
        self.p[(0, 0)]
    }

    pub fn fy(&self) -> f64 {
        self.p[(1, 1)]
    }

    pub fn cx(&self) -> f64 {
        self.p[(0, 2)]
    }

    pub fn cy(&self) -> f64 {
        self.p[(1, 2)]
    }

    pub fn tx(&self) -> f64 {
        self.p[(0, 3)]
    }

    pub fn ty(&self) -> f64 {
        self.p[(1, 3)]
    }

    /// Ray through a rectified pixel, normalized to `z = 1`.
    pub fn project_pixel_to_3d_ray(&self, uv_rect: &Vector2<f64>) -> Vector3<f64> {
        Vector3::new(
            (uv_rect.x - self.cx() - self.tx()) / self.fx(),
            (uv_rect.y - self.cy() - self.ty()) / self.fy(),
            1.0,
        )
    }

    /// Projects a point of the rectified camera frame to a rectified pixel.
    ///
    /// # Errors
    ///
    /// [`CameraModelError::PointAtCameraCenter`] if `z` is close to zero.
    pub fn project_3d_to_pixel(&self, xyz: &Vector3<f64>) -> Result<Vector2<f64>, CameraModelError> {
        validate_ray(xyz)?;
        Ok(Vector2::new(
            (self.fx() * xyz.x + self.tx()) / xyz.z + self.cx(),
            (self.fy() * xyz.y + self.ty()) / xyz.z + self.cy(),
        ))
    }

    /// `true` when both calibrations produce the same full-resolution maps.
    pub(crate) fn same_full_map_inputs(&self, other: &Calibration) -> bool {
        self.resolution == other.resolution
            && self.info.distortion_model == other.info.distortion_model
            && self.d == other.d
            && self.k_full == other.k_full
            && self.p_full == other.p_full
            && self.r == other.r
            && self.binning_x == other.binning_x
            && self.binning_y == other.binning_y
    }
}

fn invalid(reason: String) -> CameraModelError {
    CameraModelError::InvalidCalibration(reason)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn info(model: &str, d: &[f64]) -> CameraInfo {
        CameraInfo::from_matrices(
            Resolution {
                width: 640,
                height: 480,
            },
            model,
            d,
            &Matrix3::new(300.0, 0.0, 320.0, 0.0, 300.0, 240.0, 0.0, 0.0, 1.0),
            &Matrix3::identity(),
            &Matrix3x4::new(
                250.0, 0.0, 321.0, 0.0, 0.0, 260.0, 239.0, 0.0, 0.0, 0.0, 1.0, 0.0,
            ),
        )
    }

    #[test]
    fn test_distortion_state() {
        let state = |model: &str, d: &[f64]| {
            Calibration::from_camera_info(&info(model, d))
                .unwrap()
                .distortion_state()
        };
        assert_eq!(state("plumb_bob", &[]), DistortionState::None);
        assert_eq!(state("plumb_bob", &[0.0; 5]), DistortionState::None);
        assert_eq!(state("plumb_bob", &[0.1, 0.0, 0.0, 0.0, 0.0]), DistortionState::Calibrated);
        assert_eq!(
            state("rational_polynomial", &[0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.01]),
            DistortionState::Calibrated
        );
        assert_eq!(state("equidistant", &[0.0; 4]), DistortionState::Unknown);
        assert_eq!(state("double_sphere", &[0.5]), DistortionState::Unknown);

        let fisheye = Calibration::from_camera_info(&info("equidistant", &[0.1])).unwrap();
        assert!(fisheye.is_fisheye());
        let other = Calibration::from_camera_info(&info("double_sphere", &[0.5])).unwrap();
        assert!(!other.is_fisheye());
    }

    #[test]
    fn test_defaults_are_normalized() {
        let calibration = Calibration::from_camera_info(&info("equidistant", &[])).unwrap();
        assert_eq!(calibration.binning_x(), 1);
        assert_eq!(calibration.binning_y(), 1);
        assert!(calibration.roi().is_full(&calibration.full_resolution()));
        assert_eq!(calibration.reduced_resolution(), calibration.full_resolution());
        assert_eq!(
            calibration.intrinsic_matrix(),
            calibration.full_intrinsic_matrix()
        );
        assert_eq!(
            calibration.projection_matrix(),
            calibration.full_projection_matrix()
        );
    }

    #[test]
    fn test_roi_and_binning_adjust_matrices() {
        let mut record = info("equidistant", &[]);
        record.binning_x = 2;
        record.binning_y = 2;
        record.roi = RegionOfInterest {
            x_offset: 100,
            y_offset: 40,
            height: 300,
            width: 400,
            do_rectify: true,
        };
        let calibration = Calibration::from_camera_info(&record).unwrap();

        let k = calibration.intrinsic_matrix();
        assert_relative_eq!(k[(0, 0)], 150.0);
        assert_relative_eq!(k[(0, 2)], 110.0);
        assert_relative_eq!(k[(1, 2)], 100.0);
        assert_relative_eq!(calibration.fx(), 125.0);
        assert_relative_eq!(calibration.cx(), 110.5);
        assert_relative_eq!(calibration.cy(), 99.5);
        assert_eq!(
            calibration.reduced_resolution(),
            Resolution {
                width: 200,
                height: 150
            }
        );
    }

    #[test]
    fn test_invalid_records() {
        let mut empty = info("plumb_bob", &[]);
        empty.width = 0;
        let mut bad_focal = info("plumb_bob", &[]);
        bad_focal.k[0] = -1.0;
        let mut outside = info("plumb_bob", &[]);
        outside.roi = RegionOfInterest {
            x_offset: 600,
            y_offset: 0,
            height: 10,
            width: 50,
            do_rectify: false,
        };
        let too_many = info("equidistant", &[0.0; 5]);
        let mut nan = info("plumb_bob", &[]);
        nan.p[2] = f64::NAN;

        for record in [empty, bad_focal, outside, too_many, nan] {
            assert!(matches!(
                Calibration::from_camera_info(&record),
                Err(CameraModelError::InvalidCalibration(_))
            ));
        }
    }

    #[test]
    fn test_pixel_ray_round_trip() {
        let mut record = info("plumb_bob", &[]);
        record.p[3] = -25.0;
        let calibration = Calibration::from_camera_info(&record).unwrap();

        let pixel = Vector2::new(100.0, 410.0);
        let ray = calibration.project_pixel_to_3d_ray(&pixel);
        assert_eq!(ray.z, 1.0);
        assert_relative_eq!(ray.x, (100.0 - 321.0 + 25.0) / 250.0);
        let back = calibration.project_3d_to_pixel(&ray).unwrap();
        assert_relative_eq!(back, pixel, epsilon = 1e-9);

        assert!(matches!(
            calibration.project_3d_to_pixel(&Vector3::new(1.0, 1.0, 0.0)),
            Err(CameraModelError::PointAtCameraCenter)
        ));
    }

    #[test]
    fn test_same_full_map_inputs_ignores_roi() {
        let base = Calibration::from_camera_info(&info("equidistant", &[0.1])).unwrap();
        let mut record = info("equidistant", &[0.1]);
        record.roi = RegionOfInterest {
            x_offset: 10,
            y_offset: 10,
            height: 100,
            width: 100,
            do_rectify: false,
        };
        let cropped = Calibration::from_camera_info(&record).unwrap();
        assert!(base.same_full_map_inputs(&cropped));
        assert_ne!(base, cropped);

        let other = Calibration::from_camera_info(&info("equidistant", &[0.2])).unwrap();
        assert!(!base.same_full_map_inputs(&other));
    }
}
