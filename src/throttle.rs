//! Rate limiting for continuous interactive edits.
//!
//! Callers report two phases per edit: `Changed` (many times, during a
//! drag) and `Ended` (once, on release). A `Changed` never queues: it
//! replaces whatever dispatch was already pending for that control, so at
//! most one write per control is ever scheduled and stale frames are
//! dropped in favor of fresh ones. `Ended` bypasses the window entirely,
//! which guarantees the final write always carries the release payload.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use log::trace;

use crate::intent::ColorIntent;

/// Quiescence window for a single-control edit.
pub const SINGLE_EDIT_WINDOW: Duration = Duration::from_millis(60);
/// Wider window for dual-gradient (A/B) edits, reflecting doubled load.
pub const DUAL_EDIT_WINDOW: Duration = Duration::from_millis(150);

/// Phase of one interactive edit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EditPhase {
    Changed,
    Ended,
}

/// What kind of control is streaming, which picks the window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EditScope {
    #[default]
    Single,
    DualGradient,
}

impl EditScope {
    pub const fn window(self) -> Duration {
        match self {
            Self::Single => SINGLE_EDIT_WINDOW,
            Self::DualGradient => DUAL_EDIT_WINDOW,
        }
    }
}

#[derive(Debug)]
struct Pending {
    due: Instant,
    intent: ColorIntent,
}

/// Per-control dispatch scheduler.
///
/// Time-injected: the owner passes `now` in and drives [`poll`] from its
/// loop, so scheduling is deterministic under test.
///
/// [`poll`]: StreamThrottler::poll
#[derive(Debug, Default)]
pub struct StreamThrottler {
    pending: HashMap<String, Pending>,
}

impl StreamThrottler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Report an edit event.
    ///
    /// Returns an intent the caller must dispatch immediately (only ever
    /// for `Ended`); `Changed` schedules and returns `None`.
    pub fn submit(
        &mut self,
        control: &str,
        scope: EditScope,
        phase: EditPhase,
        intent: ColorIntent,
        now: Instant,
    ) -> Option<ColorIntent> {
        match phase {
            EditPhase::Changed => {
                let due = now + scope.window();
                if self.pending.insert(control.to_string(), Pending { due, intent }).is_some() {
                    trace!("throttle[{control}]: dropped pending dispatch");
                }
                None
            }
            EditPhase::Ended => {
                self.pending.remove(control);
                trace!("throttle[{control}]: edit ended, dispatching now");
                Some(intent)
            }
        }
    }

    /// Take every dispatch whose window has elapsed, oldest deadline first.
    pub fn poll(&mut self, now: Instant) -> Vec<ColorIntent> {
        let due_controls: Vec<String> = self
            .pending
            .iter()
            .filter(|(_, p)| p.due <= now)
            .map(|(control, _)| control.clone())
            .collect();

        let mut due: Vec<Pending> = due_controls
            .into_iter()
            .filter_map(|control| self.pending.remove(&control))
            .collect();
        due.sort_by_key(|p| p.due);
        due.into_iter().map(|p| p.intent).collect()
    }

    /// Earliest pending deadline, for the owner's wait.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.pending.values().map(|p| p.due).min()
    }

    /// Drop the pending dispatch for one control, if any.
    pub fn cancel(&mut self, control: &str) {
        self.pending.remove(control);
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }
}
