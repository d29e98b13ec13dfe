//! Optimistic state reconciliation.
//!
//! A UI-asserted value is shown immediately and held against confirmed
//! device reads for a bounded window, hiding round-trip latency without
//! letting a failed command pin a wrong value forever.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use log::debug;

use crate::intent::DeviceId;

/// How long an intended value outranks a mismatching confirmed read.
pub const RECONCILE_DEADLINE: Duration = Duration::from_millis(750);

#[derive(Debug, Clone)]
struct OptimisticEntry<T> {
    intended: T,
    registered_at: Instant,
}

/// Merges UI-asserted and device-confirmed state, one entry per device.
///
/// Only the latest intended value per device is retained; the coordinator
/// is the single writer for its map and surfaces read published snapshots.
#[derive(Debug)]
pub struct OptimisticStateCoordinator<T> {
    entries: HashMap<DeviceId, OptimisticEntry<T>>,
    deadline: Duration,
}

impl<T> Default for OptimisticStateCoordinator<T> {
    fn default() -> Self {
        Self {
            entries: HashMap::new(),
            deadline: RECONCILE_DEADLINE,
        }
    }
}

impl<T: Clone + PartialEq> OptimisticStateCoordinator<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_deadline(deadline: Duration) -> Self {
        Self {
            entries: HashMap::new(),
            deadline,
        }
    }

    /// Record what the UI just asserted. Replaces any earlier entry.
    pub fn register(&mut self, device: &DeviceId, intended: T, now: Instant) {
        self.entries.insert(
            device.clone(),
            OptimisticEntry {
                intended,
                registered_at: now,
            },
        );
    }

    /// The currently asserted value, if one is still held.
    pub fn intended(&self, device: &DeviceId) -> Option<&T> {
        self.entries.get(device).map(|e| &e.intended)
    }

    /// Merge a confirmed device read.
    ///
    /// - no entry → confirmed wins;
    /// - entry matches → entry cleared, confirmed wins;
    /// - entry mismatches within the deadline → intended still wins;
    /// - past the deadline → confirmed wins unconditionally and the stale
    ///   entry is dropped.
    pub fn merge(&mut self, device: &DeviceId, confirmed: T, now: Instant) -> T {
        let Some(entry) = self.entries.get(device) else {
            return confirmed;
        };
        if entry.intended == confirmed {
            self.entries.remove(device);
            return confirmed;
        }
        if now.duration_since(entry.registered_at) <= self.deadline {
            return entry.intended.clone();
        }
        debug!("[{device}] optimistic entry expired, confirmed state wins");
        self.entries.remove(device);
        confirmed
    }

    /// Drop the entry for one device.
    pub fn clear(&mut self, device: &DeviceId) {
        self.entries.remove(device);
    }
}
