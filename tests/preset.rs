mod tests {
    use std::collections::BTreeMap;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::{Arc, Mutex};
    use std::thread;
    use std::time::Duration;

    use strand_light_control::DeviceTransport;
    use strand_light_control::color::{ColorStop, Gradient, Rgb};
    use strand_light_control::intent::DeviceId;
    use strand_light_control::pipeline::{ColorPipeline, PipelineError};
    use strand_light_control::preset::{
        PLAYLIST_SLOTS, Preset, PresetDevice, PresetPayload, PresetSyncCoordinator,
        SINGLE_PRESET_SLOTS, lowest_free_slot,
    };
    use strand_light_control::store::{KvStore, MemoryStore};
    use strand_light_control::transport::TransportError;

    fn color_payload() -> PresetPayload {
        PresetPayload::Color {
            gradient: Gradient::solid(Rgb::new(255, 120, 0)),
            cct: None,
            brightness: 180,
        }
    }

    /// Poll until `predicate` holds or two seconds pass.
    fn wait_until(mut predicate: impl FnMut() -> bool) -> bool {
        for _ in 0..200 {
            if predicate() {
                return true;
            }
            thread::sleep(Duration::from_millis(10));
        }
        false
    }

    /// A device that can be taken offline; when online it assigns slot 7.
    struct FlakyDevice {
        id: DeviceId,
        online: AtomicBool,
        synced: Mutex<Vec<u64>>,
    }

    impl FlakyDevice {
        fn new(online: bool) -> Arc<Self> {
            Arc::new(Self {
                id: DeviceId::new("strip-1"),
                online: AtomicBool::new(online),
                synced: Mutex::new(Vec::new()),
            })
        }

        fn sync_count(&self) -> usize {
            self.synced.lock().unwrap().len()
        }
    }

    impl PresetDevice for FlakyDevice {
        fn device_id(&self) -> &DeviceId {
            &self.id
        }

        fn sync_preset(&self, preset: &Preset) -> Result<u16, PipelineError> {
            if !self.online.load(Ordering::SeqCst) {
                return Err(PipelineError::Transport(TransportError::Timeout));
            }
            self.synced.lock().unwrap().push(preset.local_id);
            Ok(7)
        }
    }

    #[test]
    fn test_save_is_local_first_and_survives_connectivity_loss() {
        let store = Arc::new(MemoryStore::new());
        let coordinator = PresetSyncCoordinator::new(store);
        let device = FlakyDevice::new(false);

        let saved = coordinator.save_preset(
            "Sunset",
            color_payload(),
            Some(Arc::clone(&device) as Arc<dyn PresetDevice>),
        );
        // The save returned immediately with a local id, device down.
        assert_eq!(saved.local_id, 1);
        assert_eq!(saved.remote_id, None);
        assert_eq!(coordinator.load_presets().len(), 1);

        // The failed background sync is invisible: no remote id, record
        // otherwise untouched.
        thread::sleep(Duration::from_millis(100));
        let record = &coordinator.load_presets()[0];
        assert_eq!(record.remote_id, None);
        assert_eq!(record.name, "Sunset");

        // Connectivity returns and a manual resync attaches the slot.
        device.online.store(true, Ordering::SeqCst);
        let target: Arc<dyn PresetDevice> = Arc::clone(&device) as Arc<dyn PresetDevice>;
        coordinator.resync(&target);
        assert!(wait_until(|| {
            coordinator.load_presets()[0].remote_id == Some(7)
        }));

        let record = &coordinator.load_presets()[0];
        assert_eq!(record.name, "Sunset");
        assert_eq!(record.payload, color_payload());
    }

    #[test]
    fn test_sync_is_idempotent_by_local_id() {
        let coordinator = PresetSyncCoordinator::new(Arc::new(MemoryStore::new()));
        let device = FlakyDevice::new(true);

        coordinator.save_preset(
            "Sunset",
            color_payload(),
            Some(Arc::clone(&device) as Arc<dyn PresetDevice>),
        );
        assert!(wait_until(|| coordinator.load_presets()[0].remote_id.is_some()));
        assert_eq!(device.sync_count(), 1);

        // A second resync finds nothing unsynced.
        let target: Arc<dyn PresetDevice> = Arc::clone(&device) as Arc<dyn PresetDevice>;
        coordinator.resync(&target);
        thread::sleep(Duration::from_millis(100));
        assert_eq!(device.sync_count(), 1);
    }

    #[test]
    fn test_delete_is_local_only() {
        let coordinator = PresetSyncCoordinator::new(Arc::new(MemoryStore::new()));
        let saved = coordinator.save_preset("Sunset", color_payload(), None);

        assert!(coordinator.delete_preset(saved.local_id));
        assert!(coordinator.load_presets().is_empty());
        // Deleting a missing record reports false.
        assert!(!coordinator.delete_preset(saved.local_id));
    }

    #[test]
    fn test_presets_persist_across_coordinators() {
        let store: Arc<dyn KvStore> = Arc::new(MemoryStore::new());

        let first = PresetSyncCoordinator::new(Arc::clone(&store));
        first.save_preset("Sunset", color_payload(), None);
        first.save_preset("Dawn", color_payload(), None);
        drop(first);

        let second = PresetSyncCoordinator::new(store);
        let names: Vec<String> = second
            .load_presets()
            .iter()
            .map(|p| p.name.clone())
            .collect();
        assert_eq!(names, vec!["Sunset", "Dawn"]);

        // Local ids continue past the restored records.
        let next = second.save_preset("Noon", color_payload(), None);
        assert_eq!(next.local_id, 3);
    }

    #[test]
    fn test_lowest_free_slot_allocation() {
        let mut table: BTreeMap<u16, serde_json::Value> = BTreeMap::new();
        table.insert(1, serde_json::Value::Bool(true));
        table.insert(2, serde_json::Value::Bool(true));
        table.insert(4, serde_json::Value::Bool(true));

        assert_eq!(lowest_free_slot(&table, SINGLE_PRESET_SLOTS), Some(3));
        assert_eq!(lowest_free_slot(&table, PLAYLIST_SLOTS), Some(3));

        let full: BTreeMap<u16, serde_json::Value> = PLAYLIST_SLOTS
            .map(|slot| (slot, serde_json::Value::Bool(true)))
            .collect();
        assert_eq!(lowest_free_slot(&full, PLAYLIST_SLOTS), None);
        assert_eq!(lowest_free_slot(&full, SINGLE_PRESET_SLOTS), Some(17));
    }

    /// Serves a fixed preset table and records every state write.
    struct RecordingTransport {
        table: String,
        posts: Mutex<Vec<String>>,
    }

    impl RecordingTransport {
        fn new(table: &str) -> Arc<Self> {
            Arc::new(Self {
                table: table.to_string(),
                posts: Mutex::new(Vec::new()),
            })
        }
    }

    impl DeviceTransport for RecordingTransport {
        fn get(&self, path: &str) -> Result<String, TransportError> {
            match path {
                "/presets.json" => Ok(self.table.clone()),
                _ => Ok(r#"{"state":{},"info":{"leds":{"count":10}}}"#.to_string()),
            }
        }

        fn post(&self, _path: &str, body: &str) -> Result<String, TransportError> {
            self.posts.lock().unwrap().push(body.to_string());
            Ok("{}".to_string())
        }
    }

    fn preset(payload: PresetPayload) -> Preset {
        Preset {
            local_id: 1,
            name: "Sunset".to_string(),
            payload,
            remote_id: None,
        }
    }

    #[test]
    fn test_pipeline_places_color_preset_in_lowest_free_slot() {
        let transport = RecordingTransport::new(r#"{"1":{"n":"a"},"3":{"n":"b"}}"#);
        let pipeline = ColorPipeline::new(DeviceId::new("strip-1"), Arc::clone(&transport));

        let slot = pipeline.sync_preset(&preset(color_payload())).unwrap();
        assert_eq!(slot, 2);

        let posts = transport.posts.lock().unwrap();
        assert_eq!(posts.len(), 1);
        let body: serde_json::Value = serde_json::from_str(&posts[0]).unwrap();
        assert_eq!(body["psave"], serde_json::json!(2));
        assert_eq!(body["n"], serde_json::json!("Sunset"));
    }

    #[test]
    fn test_pipeline_places_transition_preset_as_playlist() {
        let transport = RecordingTransport::new(r#"{"1":{"n":"a"}}"#);
        let pipeline = ColorPipeline::new(DeviceId::new("strip-1"), Arc::clone(&transport));

        let payload = PresetPayload::Transition {
            gradient_a: Gradient::solid(Rgb::new(255, 0, 0)),
            brightness_a: 255,
            gradient_b: Gradient::new([
                ColorStop::new(0, 0.0, Rgb::new(0, 0, 255)),
                ColorStop::new(1, 1.0, Rgb::new(0, 255, 0)),
            ])
            .unwrap(),
            brightness_b: 128,
            duration_secs: 5.0,
            frame_rate: 20,
        };
        let slot = pipeline.sync_preset(&preset(payload)).unwrap();

        // Endpoints take singles 2 and 3, the playlist lands on 4.
        assert_eq!(slot, 4);
        let posts = transport.posts.lock().unwrap();
        assert_eq!(posts.len(), 3);

        let a: serde_json::Value = serde_json::from_str(&posts[0]).unwrap();
        assert_eq!(a["psave"], serde_json::json!(2));
        let b: serde_json::Value = serde_json::from_str(&posts[1]).unwrap();
        assert_eq!(b["psave"], serde_json::json!(3));

        let playlist: serde_json::Value = serde_json::from_str(&posts[2]).unwrap();
        assert_eq!(playlist["psave"], serde_json::json!(4));
        assert_eq!(playlist["playlist"]["ps"], serde_json::json!([2, 3]));
        assert_eq!(playlist["playlist"]["dur"], serde_json::json!([50, 50]));
    }
}
