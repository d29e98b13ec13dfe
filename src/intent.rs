//! Color intent model.
//!
//! A [`ColorIntent`] is the device-scoped command built from a user edit.
//! Building is pure; dispatch happens in the pipeline.

use derive_more::{Display, From};
use serde::{Deserialize, Serialize};

use crate::color::{Gradient, Rgb, temperature_to_cct_byte};

/// Identifies one controller on the network.
#[derive(
    Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Display, From, Serialize, Deserialize,
)]
pub struct DeviceId(String);

impl DeviceId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for DeviceId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

/// How the segment's color payload is expressed on the wire.
#[derive(Debug, Clone, PartialEq)]
pub enum ColorMode {
    /// One color for the whole segment.
    Solid(Rgb),
    /// One color per LED; length must equal the segment LED count.
    PerLed(Vec<Rgb>),
}

/// A device-scoped color command.
///
/// Power and brightness ride along when the edit carries them; `None`
/// leaves the device value untouched.
#[derive(Debug, Clone, PartialEq)]
pub struct ColorIntent {
    pub device_id: DeviceId,
    pub segment_id: u8,
    pub mode: ColorMode,
    pub cct: Option<u8>,
    pub power: Option<bool>,
    pub brightness: Option<u8>,
}

impl ColorIntent {
    /// A solid color for one segment.
    pub fn solid(device_id: DeviceId, segment_id: u8, color: Rgb) -> Self {
        Self {
            device_id,
            segment_id,
            mode: ColorMode::Solid(color),
            cct: None,
            power: None,
            brightness: None,
        }
    }

    /// A per-LED frame for one segment.
    pub fn per_led(device_id: DeviceId, segment_id: u8, frame: Vec<Rgb>) -> Self {
        Self {
            device_id,
            segment_id,
            mode: ColorMode::PerLed(frame),
            cct: None,
            power: None,
            brightness: None,
        }
    }

    /// A bare power toggle, addressed to the device's main segment.
    pub fn power(device_id: DeviceId, on: bool) -> Self {
        Self {
            device_id,
            segment_id: 0,
            mode: ColorMode::PerLed(Vec::new()),
            cct: None,
            power: Some(on),
            brightness: None,
        }
    }

    /// A bare brightness change.
    pub fn brightness(device_id: DeviceId, brightness: u8) -> Self {
        Self {
            device_id,
            segment_id: 0,
            mode: ColorMode::PerLed(Vec::new()),
            cct: None,
            power: None,
            brightness: Some(brightness),
        }
    }

    pub fn with_brightness(mut self, brightness: u8) -> Self {
        self.brightness = Some(brightness);
        self
    }

    pub fn with_power(mut self, on: bool) -> Self {
        self.power = Some(on);
        self
    }

    /// True when the intent carries no color payload (power/brightness only).
    pub fn is_stateless(&self) -> bool {
        matches!(&self.mode, ColorMode::PerLed(frame) if frame.is_empty())
    }
}

/// Build the intent for a gradient edit on one segment.
///
/// `temperatures` aligns with the gradient's stops when those stops were
/// authored on the CCT axis; `None` (or a misaligned slice) means a plain
/// RGB edit.
///
/// Rules:
/// - single stop, no temperature → solid color;
/// - single stop with a temperature → uniform per-LED frame plus the CCT
///   channel (controllers only accept a simultaneous CCT value alongside a
///   per-LED payload);
/// - multi-stop → per-LED frame; CCT is included only when every stop
///   shares exactly one temperature value, otherwise omitted in favor of
///   pure per-LED RGB.
pub fn build_intent(
    device_id: &DeviceId,
    segment_id: u8,
    led_count: usize,
    gradient: &Gradient,
    temperatures: Option<&[f64]>,
) -> ColorIntent {
    let shared_cct = shared_cct_value(gradient, temperatures);

    if gradient.is_solid() {
        let color = gradient.sample_color(0.0);
        match shared_cct {
            None => ColorIntent::solid(device_id.clone(), segment_id, color),
            Some(cct) => {
                let mut intent =
                    ColorIntent::per_led(device_id.clone(), segment_id, vec![color; led_count]);
                intent.cct = Some(cct);
                intent
            }
        }
    } else {
        let mut intent = ColorIntent::per_led(
            device_id.clone(),
            segment_id,
            gradient.sample_frame(led_count),
        );
        intent.cct = shared_cct;
        intent
    }
}

/// The single CCT wire value shared by every stop, if there is one.
fn shared_cct_value(gradient: &Gradient, temperatures: Option<&[f64]>) -> Option<u8> {
    let temperatures = temperatures?;
    if temperatures.len() != gradient.stops().len() {
        return None;
    }
    let mut encoded = temperatures.iter().map(|&t| temperature_to_cct_byte(t));
    let first = encoded.next()?;
    encoded.all(|b| b == first).then_some(first)
}
