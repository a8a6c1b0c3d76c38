//! Fixed-point rectification maps and the resampling kernel that consumes them.
//!
//! A [`RectificationMaps`] stores, for every destination pixel, the source
//! position split into an integer part (`map1`, one `[x, y]` pair of `i16`)
//! and a sub-pixel index (`map2`) into a 32x32 interpolation table. This is the
//! same layout OpenCV uses for `CV_16SC2` + `CV_16UC1` maps, so cropping a map
//! only needs to shift the integer part.

use image::{ImageBuffer, Pixel, Primitive};

use crate::camera::{CameraModelError, RegionOfInterest, Resolution};

/// Number of fractional bits per axis in a fixed-point map.
pub const INTER_BITS: u32 = 5;
/// Size of the sub-pixel interpolation table along one axis.
pub const INTER_TAB_SIZE: i32 = 1 << INTER_BITS;
const INTER_TAB_MASK: i32 = INTER_TAB_SIZE - 1;

/// Owned image buffer of pixel type `P`.
pub type Image<P> = ImageBuffer<P, Vec<<P as Pixel>::Subpixel>>;

/// Channel types the resampler can interpolate.
pub trait Sample: Primitive {
    fn into_f64(self) -> f64;

    /// Converts back from the interpolated value, rounding and saturating
    /// integer types.
    fn saturate_from_f64(value: f64) -> Self;

    /// Quiet NaN for floating-point channels, `None` for integer channels.
    fn quiet_nan() -> Option<Self>;
}

macro_rules! impl_integer_sample {
    ($($t:ty),*) => {
        $(
            impl Sample for $t {
                fn into_f64(self) -> f64 {
                    self as f64
                }

                fn saturate_from_f64(value: f64) -> Self {
                    value.round().clamp(<$t>::MIN as f64, <$t>::MAX as f64) as $t
                }

                fn quiet_nan() -> Option<Self> {
                    None
                }
            }
        )*
    };
}

impl_integer_sample!(u8, u16, u32, i8, i16, i32);

impl Sample for f32 {
    fn into_f64(self) -> f64 {
        self as f64
    }

    fn saturate_from_f64(value: f64) -> Self {
        value as f32
    }

    fn quiet_nan() -> Option<Self> {
        Some(f32::NAN)
    }
}

impl Sample for f64 {
    fn into_f64(self) -> f64 {
        self
    }

    fn saturate_from_f64(value: f64) -> Self {
        value
    }

    fn quiet_nan() -> Option<Self> {
        Some(f64::NAN)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Interpolation {
    Nearest,
    #[default]
    Linear,
}

/// Value used for destination pixels whose source lies outside the image.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Border<T> {
    /// The resampler's default policy: constant zero.
    Default,
    Constant(T),
}

impl<T: Sample> Border<T> {
    /// Constant NaN for floating-point samples, [`Border::Default`] otherwise.
    pub fn nan_or_default() -> Self {
        T::quiet_nan().map_or(Border::Default, Border::Constant)
    }

    fn fill_value(&self) -> f64 {
        match self {
            Border::Default => 0.0,
            Border::Constant(value) => value.into_f64(),
        }
    }
}

/// Per-pixel lookup table from destination pixels to source positions.
#[derive(Debug, Clone, PartialEq)]
pub struct RectificationMaps {
    pub width: u32,
    pub height: u32,
    /// Integer source position `[x, y]`, row-major.
    pub map1: Vec<[i16; 2]>,
    /// Sub-pixel table index `(fy << INTER_BITS) | fx`, row-major.
    pub map2: Vec<u16>,
}

impl RectificationMaps {
    /// Builds a map by evaluating `source(col, row)` for every destination
    /// pixel. `None` marks a pixel without a valid source.
    pub fn from_fn<F>(width: u32, height: u32, mut source: F) -> Self
    where
        F: FnMut(u32, u32) -> Option<(f64, f64)>,
    {
        let len = width as usize * height as usize;
        let mut map1 = Vec::with_capacity(len);
        let mut map2 = Vec::with_capacity(len);
        for row in 0..height {
            for col in 0..width {
                let (xy, index) = match source(col, row) {
                    Some((u, v)) => encode(u, v),
                    None => ([i16::MIN, i16::MIN], 0),
                };
                map1.push(xy);
                map2.push(index);
            }
        }
        RectificationMaps {
            width,
            height,
            map1,
            map2,
        }
    }

    pub fn resolution(&self) -> Resolution {
        Resolution {
            width: self.width,
            height: self.height,
        }
    }

    /// Decoded source position of destination pixel `(col, row)`, accurate to
    /// `1 / INTER_TAB_SIZE` pixel.
    pub fn source(&self, col: u32, row: u32) -> Option<(f64, f64)> {
        if col >= self.width || row >= self.height {
            return None;
        }
        let i = (row * self.width + col) as usize;
        let [x, y] = self.map1[i];
        let index = i32::from(self.map2[i]);
        let scale = INTER_TAB_SIZE as f64;
        Some((
            f64::from(x) + f64::from(index & INTER_TAB_MASK) / scale,
            f64::from(y) + f64::from(index >> INTER_BITS) / scale,
        ))
    }

    /// Crops the map to `roi` and re-bases the integer source positions to the
    /// ROI origin. The sub-pixel indices do not depend on position and are
    /// copied unchanged.
    pub fn crop(&self, roi: &RegionOfInterest) -> Result<Self, CameraModelError> {
        let x_end = u64::from(roi.x_offset) + u64::from(roi.width);
        let y_end = u64::from(roi.y_offset) + u64::from(roi.height);
        if x_end > u64::from(self.width) || y_end > u64::from(self.height) {
            return Err(CameraModelError::InvalidParams(format!(
                "ROI {}x{}+{}+{} exceeds map size {}x{}",
                roi.width, roi.height, roi.x_offset, roi.y_offset, self.width, self.height
            )));
        }

        let ox = roi.x_offset as i32;
        let oy = roi.y_offset as i32;
        let len = roi.width as usize * roi.height as usize;
        let mut map1 = Vec::with_capacity(len);
        let mut map2 = Vec::with_capacity(len);
        for row in roi.y_offset..roi.y_offset + roi.height {
            let start = row as usize * self.width as usize + roi.x_offset as usize;
            let end = start + roi.width as usize;
            map1.extend(self.map1[start..end].iter().map(|&[x, y]| {
                [
                    saturate_i16(i32::from(x) - ox),
                    saturate_i16(i32::from(y) - oy),
                ]
            }));
            map2.extend_from_slice(&self.map2[start..end]);
        }

        Ok(RectificationMaps {
            width: roi.width,
            height: roi.height,
            map1,
            map2,
        })
    }
}

fn saturate_i16(value: i32) -> i16 {
    value.clamp(i32::from(i16::MIN), i32::from(i16::MAX)) as i16
}

fn fixed_point(value: f64) -> i32 {
    if value.is_nan() {
        return i32::MIN;
    }
    (value * INTER_TAB_SIZE as f64)
        .round()
        .clamp(i32::MIN as f64, i32::MAX as f64) as i32
}

/// Encodes a floating-point source position into the fixed-point layout.
pub fn encode(u: f64, v: f64) -> ([i16; 2], u16) {
    let iu = fixed_point(u);
    let iv = fixed_point(v);
    let xy = [saturate_i16(iu >> INTER_BITS), saturate_i16(iv >> INTER_BITS)];
    let index = (iv & INTER_TAB_MASK) * INTER_TAB_SIZE + (iu & INTER_TAB_MASK);
    (xy, index as u16)
}

/// Resamples `src` through `maps`.
///
/// The output has the size of the maps. Source taps outside `src` take the
/// border value; taps with zero interpolation weight are skipped so that a
/// NaN border does not leak into pixels that sit exactly on the last row or
/// column.
pub fn remap<P>(
    src: &Image<P>,
    maps: &RectificationMaps,
    interpolation: Interpolation,
    border: Border<P::Subpixel>,
) -> Image<P>
where
    P: Pixel,
    P::Subpixel: Sample,
{
    let channels = usize::from(P::CHANNEL_COUNT);
    let (src_width, src_height) = src.dimensions();
    let src_data: &[P::Subpixel] = src.as_raw();
    let fill = border.fill_value();

    let fetch = |x: i32, y: i32, channel: usize| -> f64 {
        if x < 0 || y < 0 || x >= src_width as i32 || y >= src_height as i32 {
            fill
        } else {
            let i = (y as usize * src_width as usize + x as usize) * channels + channel;
            src_data[i].into_f64()
        }
    };

    let mut dst: Image<P> = ImageBuffer::new(maps.width, maps.height);
    for (pixel, (&[x, y], &index)) in dst
        .chunks_mut(channels)
        .zip(maps.map1.iter().zip(maps.map2.iter()))
    {
        let x = i32::from(x);
        let y = i32::from(y);
        let fx = i32::from(index) & INTER_TAB_MASK;
        let fy = i32::from(index) >> INTER_BITS;

        match interpolation {
            Interpolation::Nearest => {
                let sx = x + i32::from(fx >= INTER_TAB_SIZE / 2);
                let sy = y + i32::from(fy >= INTER_TAB_SIZE / 2);
                for (channel, out) in pixel.iter_mut().enumerate() {
                    *out = P::Subpixel::saturate_from_f64(fetch(sx, sy, channel));
                }
            }
            Interpolation::Linear => {
                let wx = f64::from(fx) / INTER_TAB_SIZE as f64;
                let wy = f64::from(fy) / INTER_TAB_SIZE as f64;
                let taps = [
                    (x, y, (1.0 - wx) * (1.0 - wy)),
                    (x + 1, y, wx * (1.0 - wy)),
                    (x, y + 1, (1.0 - wx) * wy),
                    (x + 1, y + 1, wx * wy),
                ];
                for (channel, out) in pixel.iter_mut().enumerate() {
                    let value: f64 = taps
                        .iter()
                        .filter(|(_, _, weight)| *weight > 0.0)
                        .map(|&(tx, ty, weight)| weight * fetch(tx, ty, channel))
                        .sum();
                    *out = P::Subpixel::saturate_from_f64(value);
                }
            }
        }
    }
    dst
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Luma, Rgb};

    fn identity_maps(width: u32, height: u32) -> RectificationMaps {
        RectificationMaps::from_fn(width, height, |col, row| Some((col as f64, row as f64)))
    }

    #[test]
    fn test_encode_splits_integer_and_fraction() {
        let (xy, index) = encode(10.25, 3.5);
        assert_eq!(xy, [10, 3]);
        assert_eq!(i32::from(index) & INTER_TAB_MASK, 8);
        assert_eq!(i32::from(index) >> INTER_BITS, 16);

        // Negative positions floor towards minus infinity.
        let (xy, index) = encode(-0.5, -1.0);
        assert_eq!(xy, [-1, -1]);
        assert_eq!(i32::from(index) & INTER_TAB_MASK, 16);
        assert_eq!(i32::from(index) >> INTER_BITS, 0);
    }

    #[test]
    fn test_identity_remap_reproduces_image() {
        let src = ImageBuffer::from_fn(7, 5, |x, y| Rgb([x as u8 * 10, y as u8 * 20, 7u8]));
        for interpolation in [Interpolation::Nearest, Interpolation::Linear] {
            let dst = remap(&src, &identity_maps(7, 5), interpolation, Border::Default);
            assert_eq!(dst, src);
        }
    }

    #[test]
    fn test_linear_interpolates_half_pixel_shift() {
        let src: Image<Luma<f32>> = ImageBuffer::from_fn(4, 1, |x, _| Luma([x as f32 * 2.0]));
        let maps = RectificationMaps::from_fn(3, 1, |col, _| Some((col as f64 + 0.5, 0.0)));
        let dst = remap(&src, &maps, Interpolation::Linear, Border::nan_or_default());
        assert_eq!(dst.get_pixel(0, 0)[0], 1.0);
        assert_eq!(dst.get_pixel(1, 0)[0], 3.0);
        assert_eq!(dst.get_pixel(2, 0)[0], 5.0);
    }

    #[test]
    fn test_out_of_bounds_uses_border() {
        let maps = RectificationMaps::from_fn(2, 1, |col, _| {
            if col == 0 {
                Some((-5.0, -5.0))
            } else {
                None
            }
        });

        let bytes: Image<Luma<u8>> = ImageBuffer::from_pixel(3, 3, Luma([9u8]));
        let dst = remap(&bytes, &maps, Interpolation::Linear, Border::nan_or_default());
        assert_eq!(dst.get_pixel(0, 0)[0], 0);
        assert_eq!(dst.get_pixel(1, 0)[0], 0);

        let floats: Image<Luma<f64>> = ImageBuffer::from_pixel(3, 3, Luma([9.0f64]));
        let dst = remap(&floats, &maps, Interpolation::Nearest, Border::nan_or_default());
        assert!(dst.get_pixel(0, 0)[0].is_nan());
        assert!(dst.get_pixel(1, 0)[0].is_nan());

        let dst = remap(&floats, &maps, Interpolation::Nearest, Border::Constant(-1.0));
        assert_eq!(dst.get_pixel(0, 0)[0], -1.0);
    }

    #[test]
    fn test_crop_rebases_map1_only() {
        let full = RectificationMaps::from_fn(8, 6, |col, row| {
            Some((col as f64 * 1.5 + 0.25, row as f64 * 0.5 + 0.75))
        });
        let roi = RegionOfInterest {
            x_offset: 2,
            y_offset: 1,
            width: 4,
            height: 3,
            do_rectify: false,
        };
        let reduced = full.crop(&roi).unwrap();
        assert_eq!(reduced.resolution(), Resolution { width: 4, height: 3 });

        for row in 0..3u32 {
            for col in 0..4u32 {
                let local = (row * 4 + col) as usize;
                let global = ((row + 1) * 8 + col + 2) as usize;
                assert_eq!(reduced.map1[local][0], full.map1[global][0] - 2);
                assert_eq!(reduced.map1[local][1], full.map1[global][1] - 1);
                assert_eq!(reduced.map2[local], full.map2[global]);
            }
        }

        let too_wide = RegionOfInterest {
            x_offset: 6,
            width: 4,
            ..roi
        };
        assert!(full.crop(&too_wide).is_err());
    }

    #[test]
    fn test_source_decodes_position() {
        let maps = RectificationMaps::from_fn(2, 2, |col, row| {
            Some((col as f64 + 0.125, row as f64 + 0.5))
        });
        assert_eq!(maps.source(1, 1), Some((1.125, 1.5)));
        assert_eq!(maps.source(2, 0), None);
    }
}
