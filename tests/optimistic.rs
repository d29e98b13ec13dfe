mod tests {
    use std::time::{Duration, Instant};

    use strand_light_control::intent::DeviceId;
    use strand_light_control::optimistic::{OptimisticStateCoordinator, RECONCILE_DEADLINE};

    fn device() -> DeviceId {
        DeviceId::new("strip-1")
    }

    #[test]
    fn test_intended_value_wins_inside_the_deadline() {
        let mut coordinator = OptimisticStateCoordinator::new();
        let t0 = Instant::now();

        coordinator.register(&device(), true, t0);
        // A confirmed read disagreeing 200ms later still reports the
        // intended value.
        let merged = coordinator.merge(&device(), false, t0 + Duration::from_millis(200));
        assert!(merged);
    }

    #[test]
    fn test_confirmed_wins_past_the_deadline() {
        let mut coordinator = OptimisticStateCoordinator::new();
        let t0 = Instant::now();

        coordinator.register(&device(), true, t0);
        let merged = coordinator.merge(&device(), false, t0 + Duration::from_millis(900));
        assert!(!merged);

        // The stale entry is gone; later reads are purely confirmed.
        assert_eq!(coordinator.intended(&device()), None);
        assert!(!coordinator.merge(&device(), false, t0 + Duration::from_secs(2)));
    }

    #[test]
    fn test_matching_confirmation_clears_the_entry() {
        let mut coordinator = OptimisticStateCoordinator::new();
        let t0 = Instant::now();

        coordinator.register(&device(), true, t0);
        assert!(coordinator.merge(&device(), true, t0 + Duration::from_millis(100)));
        assert_eq!(coordinator.intended(&device()), None);

        // With the entry cleared, a mismatching read wins immediately.
        assert!(!coordinator.merge(&device(), false, t0 + Duration::from_millis(150)));
    }

    #[test]
    fn test_no_entry_means_confirmed_wins() {
        let mut coordinator: OptimisticStateCoordinator<bool> = OptimisticStateCoordinator::new();
        assert!(coordinator.merge(&device(), true, Instant::now()));
    }

    #[test]
    fn test_only_the_latest_assertion_is_retained() {
        let mut coordinator = OptimisticStateCoordinator::new();
        let t0 = Instant::now();

        coordinator.register(&device(), true, t0);
        coordinator.register(&device(), false, t0 + Duration::from_millis(10));
        assert_eq!(coordinator.intended(&device()), Some(&false));

        // Confirmed read matching the latest assertion reconciles it.
        assert!(!coordinator.merge(&device(), false, t0 + Duration::from_millis(20)));
        assert_eq!(coordinator.intended(&device()), None);
    }

    #[test]
    fn test_custom_deadline() {
        let mut coordinator = OptimisticStateCoordinator::with_deadline(Duration::from_millis(50));
        let t0 = Instant::now();
        coordinator.register(&device(), 42u8, t0);

        assert_eq!(coordinator.merge(&device(), 0, t0 + Duration::from_millis(40)), 42);
        assert_eq!(coordinator.merge(&device(), 0, t0 + Duration::from_millis(60)), 0);
    }

    #[test]
    fn test_default_deadline_matches_contract() {
        assert_eq!(RECONCILE_DEADLINE, Duration::from_millis(750));
    }
}
