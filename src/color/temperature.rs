//! Color temperature model.
//!
//! Maps a normalized warm↔cool value in [0, 1] to RGB through three anchor
//! colors, and approximates the inverse for repopulating edit state. The
//! inverse is lossy by contract: it picks the nearest anchor and blends,
//! and is only required to land within tolerance at the anchors themselves.

use serde::{Deserialize, Serialize};

use super::{Rgb, lerp_color};

/// Kelvin references for the default anchors.
const WARM_KELVIN: u16 = 2700;
const NEUTRAL_KELVIN: u16 = 4500;
const COOL_KELVIN: u16 = 6500;

/// Minimum visible max-channel level, as a fraction of full scale.
///
/// Devices without a dedicated CCT channel render a dim CCT-derived color
/// as near-black; rescaling to this floor keeps it visible.
const MIN_VISIBLE_LEVEL: f32 = 0.3;

#[allow(clippy::approx_constant)]
const LN_LUT: [f32; 57] = [
    2.302_585, 2.397_895, 2.484_907, 2.564_949, 2.639_057, 2.707_606, 2.772_589, 2.833_213,
    2.890_372, 2.944_438, 2.995_732, 3.044_522, 3.091_042, 3.135_494, 3.178_054, 3.218_876,
    3.258_097, 3.295_837, 3.332_205, 3.367_296, 3.401_197, 3.433_987, 3.465_736, 3.496_508,
    3.526_361, 3.555_348, 3.583_519, 3.610_918, 3.637_586, 3.663_562, 3.688_879, 3.713_572,
    3.737_67, 3.761_2, 3.784_19, 3.806_662, 3.828_641, 3.850_148, 3.871_201, 3.891_82, 3.912_023,
    3.931_825, 3.951_244, 3.970_292, 3.988_984, 4.007_333, 4.025_352, 4.043_051, 4.060_443,
    4.077_537, 4.094_345, 4.110_874, 4.127_134, 4.143_134, 4.158_883, 4.174_387, 4.189_654,
];

/// Convert a Kelvin temperature to an RGB color.
///
/// Supports temperatures between 1000K and 40000K.
#[allow(
    clippy::cast_lossless,
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss
)]
pub fn kelvin_to_rgb(kelvin: u16) -> Rgb {
    let mut temp = (kelvin as f32 / 100.0).clamp(10.0, 400.0);
    let original_temp = temp;

    let red = if temp <= 66.0 {
        255.0
    } else {
        temp -= 60.0;
        let result = 329.698_73 * libm::powf(temp, -0.133_204_76);
        result.clamp(0.0, 255.0)
    };

    let green = if original_temp <= 66.0 {
        let ln = if (original_temp as usize) < LN_LUT.len() {
            LN_LUT[original_temp as usize]
        } else {
            libm::log(original_temp as f64) as f32
        };
        99.470_8 * ln - 161.119_57
    } else {
        temp = original_temp - 60.0;
        288.122_17 * libm::powf(temp, -0.075_514_85)
    }
    .clamp(0.0, 255.0);

    let blue = if original_temp >= 66.0 {
        255.0
    } else if original_temp <= 19.0 {
        0.0
    } else {
        temp = original_temp - 10.0;
        let ln = if (temp as usize) < LN_LUT.len() {
            LN_LUT[temp as usize]
        } else {
            libm::log(temp as f64) as f32
        };
        138.517_73 * ln - 305.044_8
    }
    .clamp(0.0, 255.0);

    Rgb {
        r: red as u8,
        g: green as u8,
        b: blue as u8,
    }
}

/// Encode a normalized temperature as the 0–255 CCT wire value.
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
pub fn temperature_to_cct_byte(t: f64) -> u8 {
    (t.clamp(0.0, 1.0) * 255.0).round() as u8
}

/// The three reference colors the normalized axis interpolates through.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TemperatureAnchors {
    pub warm: Rgb,
    pub neutral: Rgb,
    pub cool: Rgb,
}

impl Default for TemperatureAnchors {
    fn default() -> Self {
        Self {
            warm: kelvin_to_rgb(WARM_KELVIN),
            neutral: kelvin_to_rgb(NEUTRAL_KELVIN),
            cool: kelvin_to_rgb(COOL_KELVIN),
        }
    }
}

impl TemperatureAnchors {
    /// Derive anchors from a device-reported Kelvin range.
    pub fn from_kelvin_range(min_kelvin: u16, max_kelvin: u16) -> Self {
        let (min_kelvin, max_kelvin) = if min_kelvin <= max_kelvin {
            (min_kelvin, max_kelvin)
        } else {
            (max_kelvin, min_kelvin)
        };
        let mid = min_kelvin + (max_kelvin - min_kelvin) / 2;
        Self {
            warm: kelvin_to_rgb(min_kelvin),
            neutral: kelvin_to_rgb(mid),
            cool: kelvin_to_rgb(max_kelvin),
        }
    }
}

/// Normalized CCT ↔ RGB conversion over a set of anchors.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct TemperatureModel {
    anchors: TemperatureAnchors,
}

impl TemperatureModel {
    pub fn new(anchors: TemperatureAnchors) -> Self {
        Self { anchors }
    }

    pub fn anchors(&self) -> TemperatureAnchors {
        self.anchors
    }

    /// Map a normalized temperature to RGB.
    ///
    /// [0, 0.5] interpolates warm→neutral, [0.5, 1] neutral→cool.
    #[allow(clippy::cast_possible_truncation)]
    pub fn temperature_to_rgb(&self, t: f64) -> Rgb {
        let t = t.clamp(0.0, 1.0);
        if t <= 0.5 {
            lerp_color(self.anchors.warm, self.anchors.neutral, (t * 2.0) as f32)
        } else {
            lerp_color(
                self.anchors.neutral,
                self.anchors.cool,
                ((t - 0.5) * 2.0) as f32,
            )
        }
    }

    /// Approximate the normalized temperature a color was derived from.
    ///
    /// Nearest-anchor in normalized RGB space; when the neutral anchor is
    /// nearest, the result blends toward whichever flank is closer. Lossy:
    /// forward→inverse is not guaranteed to reproduce the input.
    pub fn rgb_to_approx_temperature(&self, color: Rgb) -> f64 {
        let d_warm = distance(color, self.anchors.warm);
        let d_neutral = distance(color, self.anchors.neutral);
        let d_cool = distance(color, self.anchors.cool);

        if d_warm <= d_neutral && d_warm <= d_cool {
            if d_warm + d_neutral == 0.0 {
                return 0.0;
            }
            0.5 * f64::from(d_warm / (d_warm + d_neutral))
        } else if d_cool <= d_neutral && d_cool < d_warm {
            if d_cool + d_neutral == 0.0 {
                return 1.0;
            }
            1.0 - 0.5 * f64::from(d_cool / (d_cool + d_neutral))
        } else {
            // Neutral nearest: blend by the ratio of the flank distances.
            // Equidistant colors resolve to the neutral midpoint.
            if d_warm + d_cool == 0.0 {
                return 0.5;
            }
            let skew = f64::from((d_warm - d_cool) / (d_warm + d_cool));
            (0.5 + 0.5 * skew).clamp(0.0, 1.0)
        }
    }

    /// Rescale a derived color so its max channel meets the visibility
    /// floor. Colors already at or above the floor pass through unchanged,
    /// as does pure black (there is nothing to rescale).
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    pub fn ensure_visible_brightness(&self, color: Rgb) -> Rgb {
        let floor = MIN_VISIBLE_LEVEL * 255.0;
        let max = f32::from(color.r.max(color.g).max(color.b));
        if max == 0.0 || max >= floor {
            return color;
        }
        let scale = floor / max;
        let rescale = |c: u8| (f32::from(c) * scale).round().min(255.0) as u8;
        Rgb {
            r: rescale(color.r),
            g: rescale(color.g),
            b: rescale(color.b),
        }
    }
}

/// Euclidean distance between two colors in normalized RGB space.
fn distance(a: Rgb, b: Rgb) -> f32 {
    let dr = (f32::from(a.r) - f32::from(b.r)) / 255.0;
    let dg = (f32::from(a.g) - f32::from(b.g)) / 255.0;
    let db = (f32::from(a.b) - f32::from(b.b)) / 255.0;
    libm::sqrtf(dr * dr + dg * dg + db * db)
}
