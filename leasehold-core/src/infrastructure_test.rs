#[cfg(test)]
mod tests {
    use crate::infrastructure::{LeaseStore, SessionStore};
    use crate::infrastructure_in_memory::{InMemoryLeaseStore, InMemorySessionStore};
    use crate::types::{
        LeaseFailureReason, LeaseRequest, LeaseResult, LockMode, ResourceRef, SessionRecord,
        WorkerRecord, WorkerStatus,
    };

    fn request(holder: &str, mode: LockMode, ttl: u64) -> LeaseRequest {
        LeaseRequest::new(ResourceRef::new("batch", "b1"), mode, holder, ttl)
    }

    #[test]
    fn test_in_memory_store_acquire_and_release() {
        let store = InMemoryLeaseStore::new();

        let lease = match store.try_acquire(&request("w1", LockMode::Exclusive, 5000), 1000).unwrap() {
            LeaseResult::Success { lease, renewed } => {
                assert!(!renewed);
                lease
            }
            other => panic!("Expected Success, got {other:?}"),
        };
        assert!(lease.lease_id.starts_with("lease_"));
        assert_eq!(lease.expires_at, 6000);
        assert_eq!(store.active_leases(1000).unwrap().len(), 1);

        assert!(store.release(&lease.resource, LockMode::Exclusive, "w1").unwrap());
        assert!(store.active_leases(1000).unwrap().is_empty());
        // Second release is a no-op
        assert!(!store.release(&lease.resource, LockMode::Exclusive, "w1").unwrap());
    }

    #[test]
    fn test_in_memory_store_exclusive_conflict() {
        let store = InMemoryLeaseStore::new();
        store.try_acquire(&request("w1", LockMode::Exclusive, 5000), 1000).unwrap();

        let result = store.try_acquire(&request("w2", LockMode::Exclusive, 5000), 1000).unwrap();
        match result {
            LeaseResult::Failure {
                reason,
                existing_lease,
            } => {
                assert_eq!(reason, LeaseFailureReason::ExclusiveHeld);
                assert_eq!(existing_lease.unwrap().holder, "w1");
            }
            other => panic!("Expected Failure, got {other:?}"),
        }
    }

    #[test]
    fn test_in_memory_store_renewal_keeps_lease_id() {
        let store = InMemoryLeaseStore::new();
        let first = match store.try_acquire(&request("w1", LockMode::Exclusive, 5000), 1000).unwrap() {
            LeaseResult::Success { lease, .. } => lease,
            other => panic!("Expected Success, got {other:?}"),
        };
        match store.try_acquire(&request("w1", LockMode::Exclusive, 5000), 3000).unwrap() {
            LeaseResult::Success { lease, renewed } => {
                assert!(renewed);
                assert_eq!(lease.lease_id, first.lease_id);
                assert_eq!(lease.expires_at, 8000);
                assert_eq!(lease.acquired_at, 1000);
            }
            other => panic!("Expected Success, got {other:?}"),
        }
    }

    #[test]
    fn test_in_memory_store_expired_lease_is_reclaimable() {
        let store = InMemoryLeaseStore::new();
        store.try_acquire(&request("w1", LockMode::Exclusive, 5000), 1000).unwrap();

        // expires_at == now counts as expired
        let result = store.try_acquire(&request("w2", LockMode::Exclusive, 5000), 6000).unwrap();
        assert!(matches!(result, LeaseResult::Success { renewed: false, .. }));
        let active = store.active_leases(6000).unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].holder, "w2");
    }

    #[test]
    fn test_in_memory_store_eviction() {
        let store = InMemoryLeaseStore::new();
        store.try_acquire(&request("w1", LockMode::Shared, 5000), 1000).unwrap();

        assert_eq!(store.evict_expired(5000).unwrap(), 0);
        assert_eq!(store.evict_expired(7000).unwrap(), 1);
        assert!(store.active_leases(7000).unwrap().is_empty());
    }

    #[test]
    fn test_worker_upsert_preserves_registration_time() {
        let store = InMemoryLeaseStore::new();
        store.upsert_worker(&WorkerRecord::new("w1", "c1", "dns_validation", 1000)).unwrap();
        store.upsert_worker(&WorkerRecord::new("w1", "c1", "dns_validation", 4000)).unwrap();

        let workers = store.list_workers(Some("c1")).unwrap();
        assert_eq!(workers.len(), 1);
        assert_eq!(workers[0].registered_at, 1000);
        assert_eq!(workers[0].last_heartbeat_at, 4000);
    }

    #[test]
    fn test_worker_touch_and_status() {
        let store = InMemoryLeaseStore::new();
        store.upsert_worker(&WorkerRecord::new("w1", "c1", "gen", 1000)).unwrap();
        store.upsert_worker(&WorkerRecord::new("w1", "c2", "gen", 1000)).unwrap();
        store.upsert_worker(&WorkerRecord::new("w2", "c1", "gen", 1000)).unwrap();

        assert_eq!(store.touch_worker("w1", 2000).unwrap(), 2);
        assert!(store
            .set_worker_status("w2", "c1", WorkerStatus::Working, Some("batch-7"), 2500)
            .unwrap());
        assert!(!store
            .set_worker_status("w2", "c9", WorkerStatus::Working, None, 2500)
            .unwrap());

        assert_eq!(store.list_workers(None).unwrap().len(), 3);
        assert_eq!(store.delete_workers_before(2000).unwrap(), 2);
        let left = store.list_workers(None).unwrap();
        assert_eq!(left.len(), 1);
        assert_eq!(left[0].status, WorkerStatus::Working);
        assert_eq!(left[0].last_operation.as_deref(), Some("batch-7"));
    }

    #[test]
    fn test_session_store_lifecycle() {
        let store = InMemorySessionStore::new();
        let older = SessionRecord::new("s-old".into(), "u1", "10.0.0.1", "agent", 10_000, 1000);
        let newer = SessionRecord::new("s-new".into(), "u1", "10.0.0.1", "agent", 10_000, 2000);
        store.insert(&newer).unwrap();
        store.insert(&older).unwrap();

        let active = store.active_for_user("u1").unwrap();
        assert_eq!(active.iter().map(|s| s.id.as_str()).collect::<Vec<_>>(), ["s-old", "s-new"]);

        assert!(store.touch("s-new", 5000).unwrap());
        assert!(store.set_expiry("s-new", 50_000).unwrap());
        let loaded = store.load("s-new").unwrap().unwrap();
        assert_eq!(loaded.last_activity_at, 5000);
        assert_eq!(loaded.expires_at, 50_000);

        // s-old expired at 11_000
        assert_eq!(store.deactivate_stale(12_000, 100_000).unwrap(), 1);
        assert_eq!(store.deactivate_user("u1").unwrap(), vec!["s-new".to_string()]);
        assert!(store.active_for_user("u1").unwrap().is_empty());
        assert!(!store.touch("s-new", 60_000).unwrap());
        assert!(!store.touch("missing", 60_000).unwrap());
        assert!(store.load("missing").unwrap().is_none());
    }
}
