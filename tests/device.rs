mod tests {
    use std::sync::{Arc, Mutex};
    use std::thread;
    use std::time::Duration;

    use strand_light_control::DeviceTransport;
    use strand_light_control::color::{ColorStop, Gradient, Rgb};
    use strand_light_control::device::DeviceController;
    use strand_light_control::intent::DeviceId;
    use strand_light_control::store::MemoryStore;
    use strand_light_control::throttle::{EditPhase, EditScope};
    use strand_light_control::transition::TransitionSpec;
    use strand_light_control::transport::TransportError;

    const RED: Rgb = Rgb { r: 255, g: 0, b: 0 };
    const BLUE: Rgb = Rgb { r: 0, g: 0, b: 255 };
    const WHITE: Rgb = Rgb {
        r: 255,
        g: 255,
        b: 255,
    };

    /// Ten-LED, CCT-capable device that records every state write.
    struct FakeDevice {
        status: String,
        posts: Mutex<Vec<String>>,
    }

    impl FakeDevice {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                status: r#"{
                    "state": {"on": true, "bri": 128, "seg": [{"id": 0, "len": 10}]},
                    "info": {"leds": {"count": 10, "cct": true}}
                }"#
                .to_string(),
                posts: Mutex::new(Vec::new()),
            })
        }

        fn post_count(&self) -> usize {
            self.posts.lock().unwrap().len()
        }

        fn last_post(&self) -> Option<serde_json::Value> {
            let posts = self.posts.lock().unwrap();
            posts.last().map(|body| serde_json::from_str(body).unwrap())
        }
    }

    impl DeviceTransport for FakeDevice {
        fn get(&self, _path: &str) -> Result<String, TransportError> {
            Ok(self.status.clone())
        }

        fn post(&self, _path: &str, body: &str) -> Result<String, TransportError> {
            self.posts.lock().unwrap().push(body.to_string());
            Ok("{}".to_string())
        }
    }

    fn wait_until(mut predicate: impl FnMut() -> bool) -> bool {
        for _ in 0..200 {
            if predicate() {
                return true;
            }
            thread::sleep(Duration::from_millis(10));
        }
        false
    }

    fn spawn(device: &Arc<FakeDevice>) -> DeviceController {
        DeviceController::spawn(
            DeviceId::new("strip-1"),
            Arc::clone(device),
            Arc::new(MemoryStore::new()),
        )
    }

    fn stops() -> Vec<ColorStop> {
        vec![
            ColorStop::new(0, 0.0, RED),
            ColorStop::new(1, 1.0, BLUE),
        ]
    }

    #[test]
    fn test_bootstrap_publishes_capabilities() {
        let device = FakeDevice::new();
        let controller = spawn(&device);

        assert!(wait_until(|| controller.snapshot().capabilities.is_some()));
        let snapshot = controller.snapshot();
        assert!(snapshot.capabilities.unwrap().cct);
        assert_eq!(snapshot.power, Some(true));
        assert_eq!(snapshot.brightness, Some(128));
    }

    #[test]
    fn test_released_gradient_edit_reaches_the_wire() {
        let device = FakeDevice::new();
        let controller = spawn(&device);
        assert!(wait_until(|| controller.snapshot().capabilities.is_some()));

        controller
            .apply_gradient(stops(), 0, None, EditScope::Single, EditPhase::Ended)
            .unwrap();

        assert!(wait_until(|| device.post_count() >= 1));
        let body = device.last_post().unwrap();
        let frame = body["seg"][0]["i"].as_array().unwrap();
        assert_eq!(frame.len(), 10);
        assert_eq!(frame[0], serde_json::json!("FF0000"));
        assert_eq!(frame[9], serde_json::json!("0000FF"));

        // The release payload lands in the published snapshot.
        assert!(wait_until(|| controller.snapshot().gradient.is_some()));
        assert_eq!(
            controller.snapshot().gradient,
            Gradient::new(stops())
        );
    }

    #[test]
    fn test_optimistic_power_wins_until_reconciled() {
        let device = FakeDevice::new();
        let controller = spawn(&device);
        assert!(wait_until(|| controller.snapshot().capabilities.is_some()));

        // Device reports on; the UI asserts off.
        controller.set_power(false).unwrap();
        assert_eq!(controller.power_state(), Some(false));

        // A confirmed read disagreeing inside the window does not flip
        // the published value back.
        controller.refresh().unwrap();
        assert!(wait_until(|| device.post_count() >= 1));
        assert_eq!(controller.power_state(), Some(false));
    }

    #[test]
    fn test_transition_runs_to_completion() {
        let device = FakeDevice::new();
        let controller = spawn(&device);
        assert!(wait_until(|| controller.snapshot().capabilities.is_some()));

        let spec = TransitionSpec::new(
            Gradient::solid(RED),
            0,
            Gradient::solid(WHITE),
            255,
            Duration::from_millis(300),
            20,
        );
        controller.start_transition(spec).unwrap();

        // The final frame is exactly B at brightness B.
        assert!(wait_until(|| {
            device.last_post().is_some_and(|body| {
                body["bri"] == serde_json::json!(255)
                    && body["seg"][0]["i"]
                        .as_array()
                        .is_some_and(|f| f.iter().all(|c| c == "FFFFFF"))
            })
        }));

        // More than just the endpoints went out.
        assert!(device.post_count() >= 3);
        assert_eq!(
            controller.snapshot().transition_duration,
            Some(Duration::from_millis(300))
        );
    }

    #[test]
    fn test_cancelled_transition_reverts_and_stops() {
        let device = FakeDevice::new();
        let controller = spawn(&device);
        assert!(wait_until(|| controller.snapshot().capabilities.is_some()));

        let spec = TransitionSpec::new(
            Gradient::solid(RED),
            200,
            Gradient::solid(WHITE),
            255,
            Duration::from_secs(10),
            20,
        );
        controller.start_transition(spec).unwrap();
        assert!(wait_until(|| device.post_count() >= 2));

        controller.cancel_transition().unwrap();

        // Wait for the write stream to go quiet; the revert is the final
        // write and nothing is scheduled after it.
        let mut last_count = device.post_count();
        let mut stable = 0;
        for _ in 0..400 {
            thread::sleep(Duration::from_millis(10));
            let count = device.post_count();
            if count == last_count {
                stable += 1;
                if stable >= 20 {
                    break;
                }
            } else {
                last_count = count;
                stable = 0;
            }
        }
        assert!(stable >= 20, "writes never settled");

        // The revert write is a static A frame at A brightness.
        let body = device.last_post().unwrap();
        assert_eq!(body["bri"], serde_json::json!(200));
        let frame = body["seg"][0]["i"].as_array().unwrap();
        assert!(frame.iter().all(|c| c == "FF0000"));
    }

    #[test]
    fn test_malformed_device_gates_capabilities_off() {
        let device = Arc::new(FakeDevice {
            status: r#"{"state": {}, "info": {}}"#.to_string(),
            posts: Mutex::new(Vec::new()),
        });
        let controller = DeviceController::spawn(
            DeviceId::new("strip-1"),
            Arc::clone(&device),
            Arc::new(MemoryStore::new()),
        );

        assert!(wait_until(|| controller.snapshot().capabilities.is_some()));
        // Unsupported response shape: the feature gates close instead of
        // erroring.
        assert!(!controller.snapshot().capabilities.unwrap().cct);
    }
}
