//! Local-first presets with best-effort device sync.
//!
//! Saving is never blocked by network state: the record is assigned a
//! local id, persisted, and returned immediately. A detached background
//! worker then tries to place the preset into the device's id space and
//! attach the remote id. Sync failures are logged and swallowed; the local
//! record stays authoritative. Deleting is local-only.

use std::collections::BTreeMap;
use std::ops::RangeInclusive;
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};

use log::{debug, info, warn};
use serde::{Deserialize, Serialize};

use crate::color::Gradient;
use crate::intent::DeviceId;
use crate::pipeline::PipelineError;
use crate::store::{self, KvStore};

/// Store key holding the serialized preset list.
pub const PRESETS_KEY: &str = "presets";

/// Device id space for single presets.
pub const SINGLE_PRESET_SLOTS: RangeInclusive<u16> = 1..=250;
/// Device id space for multi-step playlists.
pub const PLAYLIST_SLOTS: RangeInclusive<u16> = 1..=16;

/// What a preset stores.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PresetPayload {
    Color {
        gradient: Gradient,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        cct: Option<f64>,
        brightness: u8,
    },
    Effect {
        effect_id: u16,
        #[serde(default)]
        params: serde_json::Value,
        brightness: u8,
    },
    Transition {
        gradient_a: Gradient,
        brightness_a: u8,
        gradient_b: Gradient,
        brightness_b: u8,
        duration_secs: f32,
        frame_rate: u32,
    },
}

impl PresetPayload {
    /// Transitions live in the playlist id space; everything else is a
    /// single preset.
    pub fn is_playlist(&self) -> bool {
        matches!(self, Self::Transition { .. })
    }
}

/// One saved preset. `remote_id` is attached by background sync and stays
/// `None` while the device has never been reachable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Preset {
    pub local_id: u64,
    pub name: String,
    pub payload: PresetPayload,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remote_id: Option<u16>,
}

/// The device-side half of preset sync.
///
/// Implemented by the color pipeline; the coordinator only needs "place
/// this preset on the device and tell me the id it got".
pub trait PresetDevice: Send + Sync {
    fn device_id(&self) -> &DeviceId;
    fn sync_preset(&self, preset: &Preset) -> Result<u16, PipelineError>;
}

/// Lowest unused slot in `range`, given the device's occupied table.
pub fn lowest_free_slot(
    table: &BTreeMap<u16, serde_json::Value>,
    range: RangeInclusive<u16>,
) -> Option<u16> {
    range.into_iter().find(|slot| !table.contains_key(slot))
}

struct SyncJob {
    local_id: u64,
    device: Arc<dyn PresetDevice>,
}

/// Local-first preset storage plus the background sync worker.
pub struct PresetSyncCoordinator {
    store: Arc<dyn KvStore>,
    presets: Arc<Mutex<Vec<Preset>>>,
    jobs: Option<Sender<SyncJob>>,
    worker: Option<JoinHandle<()>>,
}

impl PresetSyncCoordinator {
    pub fn new(store: Arc<dyn KvStore>) -> Self {
        let presets: Vec<Preset> = match store::read_json(store.as_ref(), PRESETS_KEY) {
            Ok(list) => list.unwrap_or_default(),
            Err(err) => {
                warn!("preset list unreadable, starting empty: {err}");
                Vec::new()
            }
        };
        let presets = Arc::new(Mutex::new(presets));

        let (tx, rx) = mpsc::channel();
        let worker = {
            let presets = Arc::clone(&presets);
            let store = Arc::clone(&store);
            thread::Builder::new()
                .name("preset-sync".into())
                .spawn(move || run_sync_worker(&rx, &presets, store.as_ref()))
                .ok()
        };
        if worker.is_none() {
            warn!("preset sync worker could not start; presets stay local-only");
        }

        Self {
            store,
            presets,
            jobs: Some(tx),
            worker,
        }
    }

    /// Save a preset. Persists and returns immediately; sync to `device`
    /// (when given) happens in the background.
    pub fn save_preset(
        &self,
        name: impl Into<String>,
        payload: PresetPayload,
        device: Option<Arc<dyn PresetDevice>>,
    ) -> Preset {
        let preset = {
            let mut presets = self.lock_presets();
            let local_id = presets.iter().map(|p| p.local_id).max().unwrap_or(0) + 1;
            let preset = Preset {
                local_id,
                name: name.into(),
                payload,
                remote_id: None,
            };
            presets.push(preset.clone());
            self.persist(&presets);
            preset
        };
        info!("preset {} ({:?}) saved locally", preset.local_id, preset.name);

        if let Some(device) = device {
            self.enqueue(preset.local_id, device);
        }
        preset
    }

    /// Published snapshot of the preset list.
    pub fn load_presets(&self) -> Vec<Preset> {
        self.lock_presets().clone()
    }

    /// Remove the local record. Remote cleanup is out of scope by design;
    /// the device keeps whatever slot the preset occupied.
    pub fn delete_preset(&self, local_id: u64) -> bool {
        let mut presets = self.lock_presets();
        let before = presets.len();
        presets.retain(|p| p.local_id != local_id);
        let removed = presets.len() != before;
        if removed {
            self.persist(&presets);
            info!("preset {local_id} deleted locally");
        }
        removed
    }

    /// Re-enqueue every preset that never got a remote id.
    pub fn resync(&self, device: &Arc<dyn PresetDevice>) {
        let unsynced: Vec<u64> = self
            .lock_presets()
            .iter()
            .filter(|p| p.remote_id.is_none())
            .map(|p| p.local_id)
            .collect();
        debug!(
            "[{}] resync: {} preset(s) pending",
            device.device_id(),
            unsynced.len()
        );
        for local_id in unsynced {
            self.enqueue(local_id, Arc::clone(device));
        }
    }

    fn enqueue(&self, local_id: u64, device: Arc<dyn PresetDevice>) {
        if let Some(jobs) = &self.jobs {
            if jobs.send(SyncJob { local_id, device }).is_err() {
                warn!("preset sync worker gone; preset {local_id} stays local-only");
            }
        }
    }

    fn lock_presets(&self) -> std::sync::MutexGuard<'_, Vec<Preset>> {
        self.presets.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Local persistence failure downgrades to a session-only list.
    fn persist(&self, presets: &[Preset]) {
        if let Err(err) = store::write_json(self.store.as_ref(), PRESETS_KEY, &presets) {
            warn!("preset list not persisted: {err}");
        }
    }
}

impl Drop for PresetSyncCoordinator {
    fn drop(&mut self) {
        // Hang up the job channel so the worker drains and exits.
        self.jobs.take();
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

fn run_sync_worker(
    rx: &Receiver<SyncJob>,
    presets: &Mutex<Vec<Preset>>,
    store: &dyn KvStore,
) {
    while let Ok(job) = rx.recv() {
        let preset = {
            let presets = presets.lock().unwrap_or_else(PoisonError::into_inner);
            presets.iter().find(|p| p.local_id == job.local_id).cloned()
        };
        let Some(preset) = preset else {
            continue; // deleted before sync ran
        };
        if preset.remote_id.is_some() {
            continue; // idempotent by local id
        }

        match job.device.sync_preset(&preset) {
            Ok(remote_id) => {
                let mut presets = presets.lock().unwrap_or_else(PoisonError::into_inner);
                if let Some(record) = presets.iter_mut().find(|p| p.local_id == job.local_id) {
                    record.remote_id = Some(remote_id);
                    info!(
                        "[{}] preset {} synced to slot {remote_id}",
                        job.device.device_id(),
                        job.local_id
                    );
                }
                if let Err(err) = store::write_json(store, PRESETS_KEY, &*presets) {
                    warn!("preset list not persisted after sync: {err}");
                }
            }
            // Best-effort: the local record stays unchanged and a later
            // resync can try again.
            Err(err) => warn!(
                "[{}] preset {} sync failed: {err}",
                job.device.device_id(),
                job.local_id
            ),
        }
    }
}
