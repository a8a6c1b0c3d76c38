//! Plumb-bob and rational-polynomial distortion (OpenCV ordering
//! `k1, k2, p1, p2, k3, k4, k5, k6`).
//!
//! Plumb-bob is the rational-polynomial model with `k4 = k5 = k6 = 0`, so one
//! set of routines serves both families.

use nalgebra::{Matrix3, Matrix3x4, Rotation3, Vector2, Vector3};

use crate::camera::{CameraModelError, Resolution};
use crate::geometry::remap::RectificationMaps;
use crate::geometry::{rectified_to_camera, to_normalized, to_pixel};

/// Number of coefficients of the rational-polynomial model.
pub const NUM_COEFFICIENTS: usize = 8;

const EPS: f64 = 1e-10;
const MAX_ITERATIONS: usize = 20;

/// `[k1, k2, p1, p2, k3, k4, k5, k6]` from a coefficient slice, missing
/// entries are zero.
pub fn coefficients(d: &[f64]) -> [f64; NUM_COEFFICIENTS] {
    let mut k = [0.0; NUM_COEFFICIENTS];
    for (dst, src) in k.iter_mut().zip(d) {
        *dst = *src;
    }
    k
}

/// Distorts a normalized, undistorted image point.
pub fn distort(point: &Vector2<f64>, d: &[f64; NUM_COEFFICIENTS]) -> Vector2<f64> {
    let [k1, k2, p1, p2, k3, k4, k5, k6] = *d;
    let x = point.x;
    let y = point.y;

    let r2 = x * x + y * y;
    let r4 = r2 * r2;
    let r6 = r4 * r2;
    let radial = (1.0 + k1 * r2 + k2 * r4 + k3 * r6) / (1.0 + k4 * r2 + k5 * r4 + k6 * r6);

    Vector2::new(
        x * radial + 2.0 * p1 * x * y + p2 * (r2 + 2.0 * x * x),
        y * radial + p1 * (r2 + 2.0 * y * y) + 2.0 * p2 * x * y,
    )
}

/// Inverts [`distort`] by fixed-point iteration.
pub fn undistort(point: &Vector2<f64>, d: &[f64; NUM_COEFFICIENTS]) -> Vector2<f64> {
    let [k1, k2, p1, p2, k3, k4, k5, k6] = *d;
    let x0 = point.x;
    let y0 = point.y;
    let mut x = x0;
    let mut y = y0;

    for _ in 0..MAX_ITERATIONS {
        let r2 = x * x + y * y;
        let icdist = (1.0 + ((k6 * r2 + k5) * r2 + k4) * r2) / (1.0 + ((k3 * r2 + k2) * r2 + k1) * r2);
        if icdist < 0.0 {
            // Outside the region where the model is invertible.
            return *point;
        }
        let delta_x = 2.0 * p1 * x * y + p2 * (r2 + 2.0 * x * x);
        let delta_y = p1 * (r2 + 2.0 * y * y) + 2.0 * p2 * x * y;
        x = (x0 - delta_x) * icdist;
        y = (y0 - delta_y) * icdist;

        if (distort(&Vector2::new(x, y), d) - point).norm() < EPS {
            break;
        }
    }
    Vector2::new(x, y)
}

/// Builds fixed-point maps from the rectified image (camera `p`, rotation `r`)
/// into the raw image (camera `k`, coefficients `d`).
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
            let distorted = distort(&Vector2::new(ray.x / ray.z, ray.y / ray.z), &coeffs);
            let pixel = to_pixel(k, &distorted);
            Some((pixel.x, pixel.y))
        },
    ))
}

/// Projects 3D points through a rigid transform `(rvec, tvec)` and the
/// distorted pinhole camera `(k, d)`.
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

/// Maps raw pixels to rectified pixels of camera `p` after rotation `r`.
pub fn undistort_points(
    points: &[Vector2<f64>],
    k: &Matrix3<f64>,
    d: &[f64],
    r: &Matrix3<f64>,
    p: &Matrix3x4<f64>,
) -> Vec<Vector2<f64>> {
    let coeffs = coefficients(d);
    let rr = p.fixed_view::<3, 3>(0, 0) * r;
    points
        .iter()
        .map(|pixel| {
            let undistorted = undistort(&to_normalized(k, pixel), &coeffs);
            let rectified = rr * undistorted.push(1.0);
            Vector2::new(rectified.x / rectified.z, rectified.y / rectified.z)
        })
        .collect()
}
