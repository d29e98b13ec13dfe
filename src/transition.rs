//! Timed gradient-to-gradient transitions.
//!
//! The engine interpolates brightness and per-LED color between two
//! gradients over a clamped duration, emitting frames at a cadence capped
//! well below the configured frame rate so a long transition cannot flood
//! the device. It is time-injected: the owning worker drives [`poll`] and
//! sleeps until [`next_deadline`].
//!
//! Cancellation is first-class: `cancel` halts ticking immediately and
//! hands back the revert-to-A frame, which the owner must write before
//! doing anything else. The device is never left mid-interpolation.
//!
//! [`poll`]: TransitionEngine::poll
//! [`next_deadline`]: TransitionEngine::next_deadline

use std::time::{Duration, Instant};

use log::{debug, info};
use serde::{Deserialize, Serialize};

use crate::color::{Gradient, Rgb, lerp_channel, lerp_color};

/// Upper bound on writes per second, regardless of configured frame rate.
pub const MAX_DISPATCH_RATE: u32 = 20;

const MIN_DISPATCH_INTERVAL: Duration = Duration::from_millis(1000 / MAX_DISPATCH_RATE as u64);

/// Transition durations are clamped into this range.
pub const MIN_DURATION: Duration = Duration::from_millis(250);
pub const MAX_DURATION: Duration = Duration::from_secs(3600);

/// Everything needed to run one transition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransitionSpec {
    pub gradient_a: Gradient,
    pub brightness_a: u8,
    pub gradient_b: Gradient,
    pub brightness_b: u8,
    pub duration: Duration,
    pub frame_rate: u32,
}

impl TransitionSpec {
    pub fn new(
        gradient_a: Gradient,
        brightness_a: u8,
        gradient_b: Gradient,
        brightness_b: u8,
        duration: Duration,
        frame_rate: u32,
    ) -> Self {
        Self {
            gradient_a,
            brightness_a,
            gradient_b,
            brightness_b,
            duration,
            frame_rate: frame_rate.max(1),
        }
    }

    /// The first-activation form: B starts as a copy of A.
    pub fn symmetric(
        gradient: Gradient,
        brightness: u8,
        duration: Duration,
        frame_rate: u32,
    ) -> Self {
        let copy = gradient.clone();
        Self::new(gradient, brightness, copy, brightness, duration, frame_rate)
    }

    pub fn clamped_duration(&self) -> Duration {
        self.duration.clamp(MIN_DURATION, MAX_DURATION)
    }

    /// Time between dispatched frames: the configured frame rate, capped
    /// at [`MAX_DISPATCH_RATE`].
    pub fn dispatch_interval(&self) -> Duration {
        let configured = Duration::from_secs(1) / self.frame_rate.max(1);
        configured.max(MIN_DISPATCH_INTERVAL)
    }
}

/// Lifecycle of one transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TransitionState {
    #[default]
    Idle,
    Armed,
    Running,
    Cancelled,
    Completed,
}

/// One interpolated frame to write.
#[derive(Debug, Clone, PartialEq)]
pub struct TransitionFrame {
    pub colors: Vec<Rgb>,
    pub brightness: u8,
    pub progress: f32,
}

/// Per-device transition driver. At most one transition runs at a time;
/// the owner cancels (and reverts) before starting another.
#[derive(Debug, Default)]
pub struct TransitionEngine {
    led_count: usize,
    state: TransitionState,
    spec: Option<TransitionSpec>,
    duration: Duration,
    interval: Duration,
    started_at: Option<Instant>,
    next_dispatch: Option<Instant>,
    frames_sent: u32,
}

impl TransitionEngine {
    pub fn new(led_count: usize) -> Self {
        Self {
            led_count,
            ..Self::default()
        }
    }

    /// Update the segment topology (learned from a device read).
    pub fn set_led_count(&mut self, led_count: usize) {
        self.led_count = led_count;
    }

    pub fn state(&self) -> TransitionState {
        self.state
    }

    pub fn is_running(&self) -> bool {
        self.state == TransitionState::Running
    }

    pub fn frames_sent(&self) -> u32 {
        self.frames_sent
    }

    /// Load a spec without starting it. Allowed from `Idle` and from the
    /// terminal states; the owner must cancel a running transition first.
    pub fn arm(&mut self, spec: TransitionSpec) {
        debug_assert!(self.state != TransitionState::Running);
        self.duration = spec.clamped_duration();
        self.interval = spec.dispatch_interval();
        self.spec = Some(spec);
        self.state = TransitionState::Armed;
        self.frames_sent = 0;
        self.started_at = None;
        self.next_dispatch = None;
    }

    /// Begin ticking an armed transition.
    ///
    /// Returns the first frame (A at brightness A) for immediate dispatch.
    pub fn start(&mut self, now: Instant) -> Option<TransitionFrame> {
        if self.state != TransitionState::Armed {
            return None;
        }
        let spec = self.spec.as_ref()?;
        info!(
            "transition start: {:.1}s, every {}ms",
            self.duration.as_secs_f32(),
            self.interval.as_millis()
        );
        self.state = TransitionState::Running;
        self.started_at = Some(now);
        self.next_dispatch = Some(now + self.interval);
        self.frames_sent = 1;
        Some(frame_for(spec, self.led_count, 0.0))
    }

    /// Arm and start in one step.
    pub fn start_with(&mut self, spec: TransitionSpec, now: Instant) -> Option<TransitionFrame> {
        self.arm(spec);
        self.start(now)
    }

    /// Emit the next frame if its dispatch time has arrived.
    ///
    /// The final frame is always exactly B at brightness B; after it the
    /// engine is `Completed` and polls return `None`.
    pub fn poll(&mut self, now: Instant) -> Option<TransitionFrame> {
        if self.state != TransitionState::Running {
            return None;
        }
        let (started_at, due) = (self.started_at?, self.next_dispatch?);
        if now < due {
            return None;
        }
        let spec = self.spec.as_ref()?;

        let elapsed = now.duration_since(started_at);
        let progress = if elapsed >= self.duration {
            1.0
        } else {
            (elapsed.as_secs_f32() / self.duration.as_secs_f32()).min(1.0)
        };
        let frame = frame_for(spec, self.led_count, progress);
        self.frames_sent += 1;

        if progress >= 1.0 {
            debug!("transition complete after {} frames", self.frames_sent);
            self.state = TransitionState::Completed;
            self.next_dispatch = None;
        } else {
            // Keep cadence, but skip the backlog after a stall instead of
            // bursting writes at the device.
            let mut next = due + self.interval;
            if now > next {
                next = now + self.interval;
            }
            // Never schedule past the end; the last poll must land on B.
            self.next_dispatch = Some(next.min(started_at + self.duration));
        }
        Some(frame)
    }

    /// Halt immediately.
    ///
    /// Returns the revert-to-A frame the owner must write synchronously;
    /// `None` when there is nothing to cancel.
    pub fn cancel(&mut self) -> Option<TransitionFrame> {
        match self.state {
            TransitionState::Armed | TransitionState::Running => {
                info!("transition cancelled after {} frames", self.frames_sent);
                self.state = TransitionState::Cancelled;
                self.next_dispatch = None;
                let spec = self.spec.as_ref()?;
                Some(frame_for(spec, self.led_count, 0.0))
            }
            _ => None,
        }
    }

    /// Return a terminal engine to `Idle`.
    pub fn reset(&mut self) {
        if matches!(
            self.state,
            TransitionState::Cancelled | TransitionState::Completed
        ) {
            self.state = TransitionState::Idle;
            self.spec = None;
        }
    }

    /// When the next frame wants dispatching.
    pub fn next_deadline(&self) -> Option<Instant> {
        (self.state == TransitionState::Running)
            .then_some(self.next_dispatch)
            .flatten()
    }
}

/// Interpolate the frame at progress `p`: per LED, blend the colors the two
/// gradients produce at that LED's position; brightness blends as a scalar.
#[allow(clippy::cast_precision_loss)]
fn frame_for(spec: &TransitionSpec, led_count: usize, p: f32) -> TransitionFrame {
    let colors = (0..led_count)
        .map(|i| {
            let position = if led_count > 1 {
                i as f32 / (led_count - 1) as f32
            } else {
                0.0
            };
            lerp_color(
                spec.gradient_a.sample_color(position),
                spec.gradient_b.sample_color(position),
                p,
            )
        })
        .collect();
    TransitionFrame {
        colors,
        brightness: lerp_channel(spec.brightness_a, spec.brightness_b, p),
        progress: p,
    }
}
