//! Equidistant (fisheye) lens model, compatible with OpenCV's `cv::fisheye`.
//!
//! A normalized point at radius `r` has incidence angle `theta = atan(r)` and
//! is imaged at the distorted angle
//! `theta_d = theta * (1 + k1 theta^2 + k2 theta^4 + k3 theta^6 + k4 theta^8)`.

use nalgebra::{Matrix3, Matrix3x4, Rotation3, Vector2, Vector3};
use std::f64::consts::FRAC_PI_2;

use crate::camera::{CameraModelError, Resolution};
use crate::geometry::remap::RectificationMaps;
use crate::geometry::{rectified_to_camera, to_normalized, to_pixel};

/// Number of coefficients of the equidistant model.
pub const NUM_COEFFICIENTS: usize = 4;

const EPS: f64 = 1e-8;
const MAX_ITERATIONS: usize = 20;

/// `[k1, k2, k3, k4]` from a coefficient slice, missing entries are zero.
pub fn coefficients(d: &[f64]) -> [f64; NUM_COEFFICIENTS] {
    let mut k = [0.0; NUM_COEFFICIENTS];
    for (dst, src) in k.iter_mut().zip(d) {
        *dst = *src;
    }
    k
}

/// Distorts a normalized, undistorted image point.
pub fn distort(point: &Vector2<f64>, k: &[f64; NUM_COEFFICIENTS]) -> Vector2<f64> {
    let r = point.norm();
    let theta = r.atan();
    let theta2 = theta * theta;
    let theta4 = theta2 * theta2;
    let theta6 = theta4 * theta2;
    let theta8 = theta4 * theta4;
    let theta_d = theta * (1.0 + k[0] * theta2 + k[1] * theta4 + k[2] * theta6 + k[3] * theta8);

    let scale = if r > EPS { theta_d / r } else { 1.0 };
    point * scale
}

/// Inverts [`distort`] with Newton iterations on `theta`.
///
/// Returns `None` when the iteration does not converge or converges to the
/// mirrored solution on the other side of the optical axis.
pub fn undistort(point: &Vector2<f64>, k: &[f64; NUM_COEFFICIENTS]) -> Option<Vector2<f64>> {
    // The model only holds up to a 180 degree field of view.
    let theta_d = point.norm().min(FRAC_PI_2);
    if theta_d < EPS {
        return Some(*point);
    }

    let mut theta = theta_d;
    let mut converged = false;
    for _ in 0..MAX_ITERATIONS {
        let theta2 = theta * theta;
        let theta4 = theta2 * theta2;
        let theta6 = theta4 * theta2;
        let theta8 = theta6 * theta2;
        let k0_theta2 = k[0] * theta2;
        let k1_theta4 = k[1] * theta4;
        let k2_theta6 = k[2] * theta6;
        let k3_theta8 = k[3] * theta8;
        let theta_fix = (theta * (1.0 + k0_theta2 + k1_theta4 + k2_theta6 + k3_theta8) - theta_d)
            / (1.0 + 3.0 * k0_theta2 + 5.0 * k1_theta4 + 7.0 * k2_theta6 + 9.0 * k3_theta8);
        theta -= theta_fix;
        if theta_fix.abs() < EPS {
            converged = true;
            break;
        }
    }

    if !converged || theta < 0.0 {
        return None;
    }
    let scale = theta.tan() / point.norm();
    Some(point * scale)
}

/// Builds fixed-point maps from the rectified image (camera `p`, rotation `r`)
/// into the raw fisheye image (camera `k`, coefficients `d`).
pub fn init_undistort_rectify_map(
    k: &Matrix3<f64>,
    d: &[f64],
    r: &Matrix3<f64>,
    p: &Matrix3x4<f64>,
    size: &Resolution,
) -> Result<RectificationMaps, CameraModelError> {
    let coeffs = coefficients(d);
    let inverse = rectified_to_camera(r, p)?;

    Ok(RectificationMaps::from_fn(
        size.width,
        size.height,
        |col, row| {
            let ray = inverse * Vector3::new(f64::from(col), f64::from(row), 1.0);
            if ray.z <= 0.0 {
                return None;
            }
            let distorted = distort(&Vector2::new(ray.x / ray.z, ray.y / ray.z), &coeffs);
            let pixel = to_pixel(k, &distorted);
            Some((pixel.x, pixel.y))
        },
    ))
}

/// Projects 3D points through a rigid transform `(rvec, tvec)` and the
/// equidistant camera `(k, d)`.
pub fn project_points(
    points: &[Vector3<f64>],
    rvec: &Vector3<f64>,
    tvec: &Vector3<f64>,
    k: &Matrix3<f64>,
    d: &[f64],
) -> Vec<Vector2<f64>> {
    let coeffs = coefficients(d);
    let rotation = Rotation3::new(*rvec);
    points
        .iter()
        .map(|point| {
            let camera = rotation * point + tvec;
            let normalized = Vector2::new(camera.x / camera.z, camera.y / camera.z);
            to_pixel(k, &distort(&normalized, &coeffs))
        })
        .collect()
}

/// Maps raw fisheye pixels to rectified pixels of camera `p` after rotation `r`.
pub fn undistort_points(
    points: &[Vector2<f64>],
    k: &Matrix3<f64>,
    d: &[f64],
    r: &Matrix3<f64>,
    p: &Matrix3x4<f64>,
) -> Result<Vec<Vector2<f64>>, CameraModelError> {
    let coeffs = coefficients(d);
    let rr = p.fixed_view::<3, 3>(0, 0) * r;
    points
        .iter()
        .map(|pixel| {
            let undistorted = undistort(&to_normalized(k, pixel), &coeffs).ok_or_else(|| {
                CameraModelError::NumericalError(format!(
                    "fisheye undistortion did not converge for ({}, {})",
                    pixel.x, pixel.y
                ))
            })?;
            let rectified = rr * undistorted.push(1.0);
            Ok(Vector2::new(
                rectified.x / rectified.z,
                rectified.y / rectified.z,
            ))
        })
        .collect()
}
