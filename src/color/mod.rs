mod gradient;
mod temperature;

pub use gradient::{ColorStop, Gradient};
pub use temperature::{
    TemperatureAnchors, TemperatureModel, kelvin_to_rgb, temperature_to_cct_byte,
};

pub type Rgb = rgb::RGB8;

/// Linearly interpolate a single channel. `t` is clamped to [0, 1].
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
pub(crate) fn lerp_channel(a: u8, b: u8, t: f32) -> u8 {
    let t = t.clamp(0.0, 1.0);
    let value = f32::from(a) + (f32::from(b) - f32::from(a)) * t;
    value.round().clamp(0.0, 255.0) as u8
}

/// Linearly interpolate two colors channel-wise. `t` is clamped to [0, 1].
pub fn lerp_color(a: Rgb, b: Rgb, t: f32) -> Rgb {
    Rgb {
        r: lerp_channel(a.r, b.r, t),
        g: lerp_channel(a.g, b.g, t),
        b: lerp_channel(a.b, b.b, t),
    }
}

/// Format a color as the six-digit uppercase hex string used in per-LED
/// wire payloads, e.g. `FF8800`.
pub fn to_hex(color: Rgb) -> String {
    format!("{:02X}{:02X}{:02X}", color.r, color.g, color.b)
}

/// Parse a six-digit hex color string, with or without a leading `#`.
pub fn from_hex(s: &str) -> Option<Rgb> {
    let s = s.strip_prefix('#').unwrap_or(s);
    if s.len() != 6 || !s.is_ascii() {
        return None;
    }
    let r = u8::from_str_radix(&s[0..2], 16).ok()?;
    let g = u8::from_str_radix(&s[2..4], 16).ok()?;
    let b = u8::from_str_radix(&s[4..6], 16).ok()?;
    Some(Rgb { r, g, b })
}
