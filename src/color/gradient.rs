//! Gradient model and sampling.
//!
//! A gradient is an ordered list of color stops along the [0, 1] axis of a
//! strip segment. Sampling is pure: the same gradient and position always
//! produce the same color.

use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

use super::{Rgb, lerp_color};

/// Typical gradients carry a handful of stops; keep them inline.
const MAX_INLINE_STOPS: usize = 8;

/// A single color stop: a color pinned at a position in [0, 1].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ColorStop {
    pub id: u32,
    pub position: f32,
    pub color: Rgb,
}

impl ColorStop {
    pub fn new(id: u32, position: f32, color: Rgb) -> Self {
        Self {
            id,
            position: position.clamp(0.0, 1.0),
            color,
        }
    }
}

/// An ordered list of at least one color stop, sorted ascending by position.
///
/// A single-stop gradient denotes a solid color. Construction clamps stop
/// positions to [0, 1], sorts, and resolves duplicate positions last-wins,
/// so sampling never has to handle unordered input.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Gradient {
    stops: SmallVec<[ColorStop; MAX_INLINE_STOPS]>,
}

impl Gradient {
    /// Build a gradient from stops in any order.
    ///
    /// Returns `None` for an empty stop list; a zero-stop gradient is a
    /// caller contract violation, not a runtime state.
    pub fn new(stops: impl IntoIterator<Item = ColorStop>) -> Option<Self> {
        let mut stops: SmallVec<[ColorStop; MAX_INLINE_STOPS]> = stops
            .into_iter()
            .map(|s| ColorStop::new(s.id, s.position, s.color))
            .collect();
        if stops.is_empty() {
            return None;
        }

        // Stable sort keeps submission order among equal positions, so the
        // last submitted stop wins the dedup below.
        stops.sort_by(|a, b| a.position.total_cmp(&b.position));
        let mut deduped: SmallVec<[ColorStop; MAX_INLINE_STOPS]> = SmallVec::new();
        for stop in stops {
            match deduped.last_mut() {
                Some(last) if last.position == stop.position => *last = stop,
                _ => deduped.push(stop),
            }
        }

        Some(Self { stops: deduped })
    }

    /// A single-stop gradient rendering as a solid color.
    pub fn solid(color: Rgb) -> Self {
        Self {
            stops: smallvec::smallvec![ColorStop::new(0, 0.0, color)],
        }
    }

    pub fn stops(&self) -> &[ColorStop] {
        &self.stops
    }

    /// True when the gradient denotes a single solid color.
    pub fn is_solid(&self) -> bool {
        self.stops.len() == 1
    }

    /// Sample the gradient at position `t`.
    ///
    /// `t` is clamped to [0, 1]; positions at or beyond the outermost stops
    /// return the boundary stop's color.
    pub fn sample_color(&self, t: f32) -> Rgb {
        let t = t.clamp(0.0, 1.0);

        let first = self.stops[0];
        let last = self.stops[self.stops.len() - 1];
        if t <= first.position {
            return first.color;
        }
        if t >= last.position {
            return last.color;
        }

        // Find the bracketing pair and interpolate by the fractional
        // distance of t between their positions.
        for pair in self.stops.windows(2) {
            let (lo, hi) = (pair[0], pair[1]);
            if t <= hi.position {
                let span = hi.position - lo.position;
                if span <= f32::EPSILON {
                    return hi.color;
                }
                let frac = (t - lo.position) / span;
                return lerp_color(lo.color, hi.color, frac);
            }
        }
        last.color
    }

    /// Sample one color per LED across the segment.
    ///
    /// LED `i` samples at `i / (led_count - 1)`; a one-LED segment samples
    /// at position 0.
    #[allow(clippy::cast_precision_loss)]
    pub fn sample_frame(&self, led_count: usize) -> Vec<Rgb> {
        if led_count == 0 {
            return Vec::new();
        }
        if led_count == 1 {
            return vec![self.sample_color(0.0)];
        }
        (0..led_count)
            .map(|i| self.sample_color(i as f32 / (led_count - 1) as f32))
            .collect()
    }
}
