//! Lazily built rectification maps.
//!
//! A [`MapCache`] holds the full-resolution maps and the maps reduced to the
//! region of interest. Both start out dirty, are built on first use and are
//! reused until invalidated. The reduced maps are derived from the full maps,
//! so they can only be valid while the full maps are.

use log::warn;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::camera::{Calibration, CameraModelError, Resolution};
use crate::geometry::remap::RectificationMaps;

#[derive(Debug, Default)]
struct CacheState {
    full: Option<Arc<RectificationMaps>>,
    reduced: Option<Arc<RectificationMaps>>,
}

#[derive(Debug, Default)]
pub struct MapCache {
    state: Mutex<CacheState>,
}

impl MapCache {
    /// Creates an empty cache with both maps dirty.
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, CacheState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn is_full_dirty(&self) -> bool {
        self.lock().full.is_none()
    }

    pub fn is_reduced_dirty(&self) -> bool {
        self.lock().reduced.is_none()
    }

    /// Marks both maps dirty.
    pub fn invalidate(&self) {
        let mut state = self.lock();
        state.full = None;
        state.reduced = None;
    }

    /// Marks only the reduced maps dirty.
    pub fn invalidate_reduced(&self) {
        self.lock().reduced = None;
    }

    /// Returns the full maps, calling `build_full` first if they are dirty.
    ///
    /// A failing build leaves the maps dirty and returns its error.
    pub fn full_maps<F>(&self, build_full: F) -> Result<Arc<RectificationMaps>, CameraModelError>
    where
        F: FnOnce() -> Result<RectificationMaps, CameraModelError>,
    {
        let mut state = self.lock();
        Self::ensure_full(&mut state, build_full)
    }

    /// Returns the reduced maps. If they are dirty the full maps are made
    /// current first (with `build_full`) and then handed to `reduce`.
    pub fn reduced_maps<F, R>(
        &self,
        build_full: F,
        reduce: R,
    ) -> Result<Arc<RectificationMaps>, CameraModelError>
    where
        F: FnOnce() -> Result<RectificationMaps, CameraModelError>,
        R: FnOnce(&Arc<RectificationMaps>) -> Result<Arc<RectificationMaps>, CameraModelError>,
    {
        let mut state = self.lock();
        if let Some(reduced) = &state.reduced {
            return Ok(Arc::clone(reduced));
        }
        let full = Self::ensure_full(&mut state, build_full)?;
        let reduced = reduce(&full)?;
        state.reduced = Some(Arc::clone(&reduced));
        Ok(reduced)
    }

    fn ensure_full<F>(
        state: &mut CacheState,
        build_full: F,
    ) -> Result<Arc<RectificationMaps>, CameraModelError>
    where
        F: FnOnce() -> Result<RectificationMaps, CameraModelError>,
    {
        if let Some(full) = &state.full {
            return Ok(Arc::clone(full));
        }
        let full = Arc::new(build_full()?);
        state.full = Some(Arc::clone(&full));
        Ok(full)
    }
}

/// Derives the reduced maps of `calibration` from its full maps.
///
/// A ROI covering the whole image shares the full maps. Otherwise the ROI is
/// scaled by the binning and the full maps are cropped to it.
pub fn reduce_maps(
    full: &Arc<RectificationMaps>,
    calibration: &Calibration,
) -> Result<Arc<RectificationMaps>, CameraModelError> {
    let roi = calibration.roi();
    if roi.is_full(&calibration.full_resolution()) {
        return Ok(Arc::clone(full));
    }
    let scaled = roi.scaled(calibration.binning_x(), calibration.binning_y());
    Ok(Arc::new(full.crop(&scaled)?))
}

/// Logs a warning when a raw image does not have the size the maps expect.
pub(crate) fn warn_on_size_mismatch(model: &str, raw: (u32, u32), expected: Resolution) {
    if raw != (expected.width, expected.height) {
        warn!(
            "{model}: raw image is {}x{} but the calibration expects {}x{}",
            raw.0, raw.1, expected.width, expected.height
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::camera::{CameraInfo, RegionOfInterest};
    use nalgebra::{Matrix3, Matrix3x4};
    use std::cell::RefCell;

    fn maps(width: u32, height: u32) -> RectificationMaps {
        RectificationMaps::from_fn(width, height, |col, row| {
            Some((f64::from(col) + 0.5, f64::from(row) + 0.25))
        })
    }

    fn calibration(roi: RegionOfInterest, binning: u32) -> Calibration {
        let mut info = CameraInfo::from_matrices(
            Resolution {
                width: 40,
                height: 30,
            },
            "equidistant",
            &[],
            &Matrix3::new(20.0, 0.0, 20.0, 0.0, 20.0, 15.0, 0.0, 0.0, 1.0),
            &Matrix3::identity(),
            &Matrix3x4::new(20.0, 0.0, 20.0, 0.0, 0.0, 20.0, 15.0, 0.0, 0.0, 0.0, 1.0, 0.0),
        );
        info.roi = roi;
        info.binning_x = binning;
        info.binning_y = binning;
        Calibration::from_camera_info(&info).unwrap()
    }

    #[test]
    fn test_new_cache_is_dirty() {
        let cache = MapCache::new();
        assert!(cache.is_full_dirty());
        assert!(cache.is_reduced_dirty());
    }

    #[test]
    fn test_full_maps_are_built_before_reduced() {
        let cache = MapCache::new();
        let events = RefCell::new(Vec::new());

        let reduced = cache
            .reduced_maps(
                || {
                    events.borrow_mut().push("full");
                    Ok(maps(4, 3))
                },
                |full| {
                    events.borrow_mut().push("reduced");
                    Ok(Arc::clone(full))
                },
            )
            .unwrap();
        assert_eq!(*events.borrow(), vec!["full", "reduced"]);
        assert!(!cache.is_full_dirty());
        assert!(!cache.is_reduced_dirty());

        // Cached maps are reused without rebuilding.
        let again = cache
            .reduced_maps(
                || panic!("full maps rebuilt"),
                |_| panic!("reduced maps rebuilt"),
            )
            .unwrap();
        assert!(Arc::ptr_eq(&reduced, &again));
    }

    #[test]
    fn test_invalidate_reduced_keeps_full() {
        let cache = MapCache::new();
        let full = cache.full_maps(|| Ok(maps(4, 3))).unwrap();
        assert!(cache.is_reduced_dirty());

        cache
            .reduced_maps(|| panic!("full maps rebuilt"), |full| Ok(Arc::clone(full)))
            .unwrap();
        cache.invalidate_reduced();
        assert!(!cache.is_full_dirty());
        assert!(cache.is_reduced_dirty());

        let reduced = cache
            .reduced_maps(|| panic!("full maps rebuilt"), |full| Ok(Arc::clone(full)))
            .unwrap();
        assert!(Arc::ptr_eq(&full, &reduced));

        cache.invalidate();
        assert!(cache.is_full_dirty());
        assert!(cache.is_reduced_dirty());
    }

    #[test]
    fn test_failed_build_stays_dirty() {
        let cache = MapCache::new();
        let result = cache.full_maps(|| {
            Err(CameraModelError::NumericalError("singular".to_string()))
        });
        assert!(result.is_err());
        assert!(cache.is_full_dirty());

        let result = cache.reduced_maps(
            || Ok(maps(2, 2)),
            |_| Err(CameraModelError::InvalidParams("bad roi".to_string())),
        );
        assert!(result.is_err());
        assert!(!cache.is_full_dirty());
        assert!(cache.is_reduced_dirty());
    }

    #[test]
    fn test_full_roi_shares_the_full_maps() {
        let full = Arc::new(maps(40, 30));
        let reduced = reduce_maps(&full, &calibration(RegionOfInterest::default(), 0)).unwrap();
        assert!(Arc::ptr_eq(&full, &reduced));
    }

    #[test]
    fn test_roi_is_scaled_by_binning_and_cropped() {
        let full = Arc::new(maps(20, 15));
        let roi = RegionOfInterest {
            x_offset: 8,
            y_offset: 6,
            height: 20,
            width: 24,
            do_rectify: true,
        };
        let reduced = reduce_maps(&full, &calibration(roi, 2)).unwrap();
        assert_eq!(
            reduced.resolution(),
            Resolution {
                width: 12,
                height: 10
            }
        );

        let (ox, oy) = (4u32, 3u32);
        for row in 0..10u32 {
            for col in 0..12u32 {
                let local = (row * 12 + col) as usize;
                let global = ((row + oy) * 20 + col + ox) as usize;
                assert_eq!(
                    reduced.map1[local],
                    [
                        full.map1[global][0] - ox as i16,
                        full.map1[global][1] - oy as i16
                    ]
                );
                assert_eq!(reduced.map2[local], full.map2[global]);
            }
        }
    }
}
