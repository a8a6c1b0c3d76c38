//! Intrinsics of a binned sensor readout.

use nalgebra::{Matrix3, Matrix3x4};

use crate::camera::{Calibration, Resolution};

/// Camera and projection matrices scaled to the binned image, together with
/// the binned image size.
#[derive(Debug, Clone, PartialEq)]
pub struct BinnedIntrinsics {
    pub k: Matrix3<f64>,
    pub p: Matrix3x4<f64>,
    pub resolution: Resolution,
}

impl BinnedIntrinsics {
    /// Scales the full-resolution `K` and `P` of `calibration` by its binning
    /// factors. With no binning the matrices are returned unchanged.
    pub fn from_calibration(calibration: &Calibration) -> Self {
        let (k, p) = apply_binning(
            calibration.full_intrinsic_matrix(),
            calibration.full_projection_matrix(),
            calibration.binning_x(),
            calibration.binning_y(),
        );
        let full = calibration.full_resolution();
        BinnedIntrinsics {
            k,
            p,
            resolution: Resolution {
                width: full.width / calibration.binning_x(),
                height: full.height / calibration.binning_y(),
            },
        }
    }
}

/// Divides the x row (resp. y row) of `k` and `p` by `binning_x` (resp.
/// `binning_y`). A factor of 1 leaves its row untouched.
pub(crate) fn apply_binning(
    k: &Matrix3<f64>,
    p: &Matrix3x4<f64>,
    binning_x: u32,
    binning_y: u32,
) -> (Matrix3<f64>, Matrix3x4<f64>) {
    let mut k = *k;
    let mut p = *p;

    if binning_x > 1 {
        let scale = 1.0 / f64::from(binning_x);
        k[(0, 0)] *= scale;
        k[(0, 2)] *= scale;
        p[(0, 0)] *= scale;
        p[(0, 2)] *= scale;
        p[(0, 3)] *= scale;
    }
    if binning_y > 1 {
        let scale = 1.0 / f64::from(binning_y);
        k[(1, 1)] *= scale;
        k[(1, 2)] *= scale;
        p[(1, 1)] *= scale;
        p[(1, 2)] *= scale;
        p[(1, 3)] *= scale;
    }

    (k, p)
}
