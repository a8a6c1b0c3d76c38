//! Numerical routines behind the camera models: distortion functions of both
//! model families, rectification-map generation and the resampling kernel.

use nalgebra::{Matrix3, Matrix3x4, Rotation3, Vector2, Vector3};

use crate::camera::CameraModelError;

pub mod equidistant;
pub mod plumb_bob;
pub mod remap;

/// Converts a rotation matrix into its rotation vector (axis times angle).
pub fn rotation_vector(rotation: &Matrix3<f64>) -> Vector3<f64> {
    Rotation3::from_matrix(rotation).scaled_axis()
}

/// Applies the camera matrix `k` (including skew) to a normalized image point.
pub fn to_pixel(k: &Matrix3<f64>, point: &Vector2<f64>) -> Vector2<f64> {
    let fx = k[(0, 0)];
    let alpha = k[(0, 1)] / fx;
    Vector2::new(
        fx * (point.x + alpha * point.y) + k[(0, 2)],
        k[(1, 1)] * point.y + k[(1, 2)],
    )
}

/// Inverse of [`to_pixel`].
pub fn to_normalized(k: &Matrix3<f64>, pixel: &Vector2<f64>) -> Vector2<f64> {
    let fx = k[(0, 0)];
    let alpha = k[(0, 1)] / fx;
    let y = (pixel.y - k[(1, 2)]) / k[(1, 1)];
    let x = (pixel.x - k[(0, 2)]) / fx - alpha * y;
    Vector2::new(x, y)
}

/// `(P[:, 0..3] * R)^-1`, which maps rectified pixels to rays in the raw
/// camera frame.
pub fn rectified_to_camera(
    r: &Matrix3<f64>,
    p: &Matrix3x4<f64>,
) -> Result<Matrix3<f64>, CameraModelError> {
    let pr = p.fixed_view::<3, 3>(0, 0) * r;
    pr.try_inverse().ok_or_else(|| {
        CameraModelError::NumericalError("rectification matrix P * R is singular".to_string())
    })
}

/// Generate a grid of sample points that are evenly distributed across the image
///
/// # Arguments
///
/// * `width` - The width of the image in pixels
/// * `height` - The height of the image in pixels
/// * `n` - The approximate number of points to generate
///
/// # Returns
///
/// A vector of 2D points representing pixel coordinates
pub fn sample_points(width: f64, height: f64, n: usize) -> Vec<Vector2<f64>> {
    let mut points = Vec::new();

    // Calculate the number of cells in each dimension
    let num_cells_x = (n as f64 * (width / height)).sqrt().round() as i32;
    let num_cells_y = (n as f64 * (height / width)).sqrt().round() as i32;

    // Calculate the dimensions of each cell
    let cell_width = width / num_cells_x as f64;
    let cell_height = height / num_cells_y as f64;

    // Generate a point at the center of each cell
    for i in 0..num_cells_y {
        for j in 0..num_cells_x {
            let x = (j as f64 + 0.5) * cell_width;
            let y = (i as f64 + 0.5) * cell_height;
            points.push(Vector2::new(x, y));
        }
    }

    points
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_sample_points() {
        let width = 800f64;
        let height = 600f64;
        let n = 100;

        let points = sample_points(width, height, n);

        // It might not be exactly n due to rounding
        let expected_count = (n as f64 * 0.8) as usize..=(n as f64 * 1.2) as usize;
        assert!(
            expected_count.contains(&points.len()),
            "Expected around {} points, got {}",
            n,
            points.len()
        );

        for point in &points {
            assert!(point.x >= 0.0 && point.x < width);
            assert!(point.y >= 0.0 && point.y < height);
        }
    }

    #[test]
    fn test_rotation_vector() {
        assert_relative_eq!(
            rotation_vector(&Matrix3::identity()),
            Vector3::zeros(),
            epsilon = 1e-12
        );

        let axis_angle = Vector3::new(0.0, 0.3, 0.0);
        let rotation = Rotation3::new(axis_angle);
        assert_relative_eq!(
            rotation_vector(rotation.matrix()),
            axis_angle,
            epsilon = 1e-9
        );
        // The transpose rotates the other way round.
        assert_relative_eq!(
            rotation_vector(&rotation.matrix().transpose()),
            -axis_angle,
            epsilon = 1e-9
        );
    }

    #[test]
    fn test_pixel_normalized_round_trip_with_skew() {
        let k = Matrix3::new(400.0, 2.0, 320.0, 0.0, 410.0, 240.0, 0.0, 0.0, 1.0);
        let pixel = Vector2::new(100.0, 400.0);
        let normalized = to_normalized(&k, &pixel);
        assert_relative_eq!(to_pixel(&k, &normalized), pixel, epsilon = 1e-9);
    }

    #[test]
    fn test_rectified_to_camera_singular() {
        let p = Matrix3x4::zeros();
        assert!(rectified_to_camera(&Matrix3::identity(), &p).is_err());
    }
}
