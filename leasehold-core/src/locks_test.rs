#[cfg(test)]
mod tests {
    use crate::clock::FakeClock;
    use crate::error::CoordError;
    use crate::infrastructure::LeaseStore;
    use crate::infrastructure_in_memory::InMemoryLeaseStore;
    use crate::locks::ResourceLockManager;
    use crate::types::LockMode;
    use std::sync::{Arc, Barrier};
    use std::time::Duration;

    const TTL: Duration = Duration::from_secs(30);

    fn manager(holder: &str, store: &Arc<dyn LeaseStore>, clock: &FakeClock) -> ResourceLockManager {
        ResourceLockManager::new(holder, Arc::clone(store), Arc::new(clock.clone()))
    }

    #[test]
    fn test_three_workers_race_for_batch_then_fourth_after_release() {
        let store: Arc<dyn LeaseStore> = Arc::new(InMemoryLeaseStore::new());
        let clock = FakeClock::default();
        let barrier = Arc::new(Barrier::new(3));

        let handles: Vec<_> = ["w1", "w2", "w3"]
            .into_iter()
            .map(|worker| {
                let locks = Arc::new(manager(worker, &store, &clock));
                let barrier = Arc::clone(&barrier);
                std::thread::spawn(move || {
                    barrier.wait();
                    let result = locks.acquire_resource_lock("batch", "b-1", LockMode::Exclusive, TTL);
                    (locks, result)
                })
            })
            .collect();

        let outcomes: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        let winners: Vec<_> = outcomes.iter().filter(|(_, r)| r.is_ok()).collect();
        assert_eq!(winners.len(), 1);
        for (_, result) in outcomes.iter().filter(|(_, r)| r.is_err()) {
            let err = result.as_ref().unwrap_err();
            assert!(err.is_contention());
        }

        let (winner, _) = winners[0];
        winner
            .release_resource_lock("batch", "b-1", LockMode::Exclusive)
            .unwrap();

        let w4 = manager("w4", &store, &clock);
        assert!(w4
            .acquire_resource_lock("batch", "b-1", LockMode::Exclusive, TTL)
            .is_ok());
    }

    #[test]
    fn test_contention_names_current_holder() {
        let store: Arc<dyn LeaseStore> = Arc::new(InMemoryLeaseStore::new());
        let clock = FakeClock::default();
        let w1 = manager("w1", &store, &clock);
        let w2 = manager("w2", &store, &clock);

        w1.acquire_resource_lock("batch", "b-1", LockMode::Exclusive, TTL)
            .unwrap();
        match w2.acquire_resource_lock("batch", "b-1", LockMode::Shared, TTL) {
            Err(CoordError::Contention { resource, held_by }) => {
                assert_eq!(resource, "batch:b-1");
                assert_eq!(held_by.as_deref(), Some("w1"));
            }
            other => panic!("Expected Contention, got {other:?}"),
        }
    }

    #[test]
    fn test_shared_holders_coexist_and_block_exclusive() {
        let store: Arc<dyn LeaseStore> = Arc::new(InMemoryLeaseStore::new());
        let clock = FakeClock::default();
        let readers: Vec<_> = (0..4)
            .map(|i| manager(&format!("r{i}"), &store, &clock))
            .collect();

        for reader in &readers {
            reader
                .acquire_resource_lock("campaign", "c1", LockMode::Shared, TTL)
                .unwrap();
        }
        let writer = manager("writer", &store, &clock);
        assert!(writer
            .acquire_resource_lock("campaign", "c1", LockMode::Exclusive, TTL)
            .unwrap_err()
            .is_contention());

        for reader in &readers[..3] {
            reader
                .release_resource_lock("campaign", "c1", LockMode::Shared)
                .unwrap();
        }
        assert!(writer
            .acquire_resource_lock("campaign", "c1", LockMode::Exclusive, TTL)
            .is_err());

        // The last reader's lease lapses instead of being released
        clock.advance(TTL);
        assert!(writer
            .acquire_resource_lock("campaign", "c1", LockMode::Exclusive, TTL)
            .is_ok());
    }

    #[test]
    fn test_reacquire_renews_same_lease() {
        let store: Arc<dyn LeaseStore> = Arc::new(InMemoryLeaseStore::new());
        let clock = FakeClock::default();
        let w1 = manager("w1", &store, &clock);
        let w2 = manager("w2", &store, &clock);

        let first = w1
            .acquire_resource_lock("batch", "b-1", LockMode::Exclusive, TTL)
            .unwrap();
        clock.advance(Duration::from_secs(20));
        let second = w1
            .acquire_resource_lock("batch", "b-1", LockMode::Exclusive, TTL)
            .unwrap();
        assert_eq!(first, second);

        // Original expiry has passed, renewed one has not
        clock.advance(Duration::from_secs(20));
        assert!(w2
            .acquire_resource_lock("batch", "b-1", LockMode::Exclusive, TTL)
            .is_err());
        assert_eq!(w1.held_leases().len(), 1);
    }

    #[test]
    fn test_zero_ttl_rejected() {
        let store: Arc<dyn LeaseStore> = Arc::new(InMemoryLeaseStore::new());
        let w1 = manager("w1", &store, &FakeClock::default());
        assert!(matches!(
            w1.acquire_resource_lock("batch", "b-1", LockMode::Exclusive, Duration::ZERO),
            Err(CoordError::InvalidArgument(_))
        ));
        assert!(store.active_leases(u64::MAX - 1).unwrap().is_empty());
    }

    #[test]
    fn test_release_is_idempotent_and_scoped_to_holder() {
        let store: Arc<dyn LeaseStore> = Arc::new(InMemoryLeaseStore::new());
        let clock = FakeClock::default();
        let w1 = manager("w1", &store, &clock);
        let w2 = manager("w2", &store, &clock);

        w1.acquire_resource_lock("batch", "b-1", LockMode::Exclusive, TTL)
            .unwrap();
        // Someone else's release leaves the lease in place
        w2.release_resource_lock("batch", "b-1", LockMode::Exclusive)
            .unwrap();
        assert_eq!(w2.active_leases().unwrap().len(), 1);

        w1.release_resource_lock("batch", "b-1", LockMode::Exclusive)
            .unwrap();
        w1.release_resource_lock("batch", "b-1", LockMode::Exclusive)
            .unwrap();
        assert!(w1.active_leases().unwrap().is_empty());
        assert!(w1.held_leases().is_empty());
    }

    #[test]
    fn test_evict_expired_removes_lapsed_rows() {
        let store: Arc<dyn LeaseStore> = Arc::new(InMemoryLeaseStore::new());
        let clock = FakeClock::default();
        let w1 = manager("w1", &store, &clock);

        w1.acquire_resource_lock("batch", "b-1", LockMode::Exclusive, Duration::from_secs(5))
            .unwrap();
        w1.acquire_resource_lock("batch", "b-2", LockMode::Shared, Duration::from_secs(60))
            .unwrap();

        clock.advance(Duration::from_secs(10));
        assert_eq!(w1.evict_expired().unwrap(), 1);
        let held = w1.held_leases();
        assert_eq!(held.len(), 1);
        assert_eq!(held[0].resource.resource_id, "b-2");
    }
}
