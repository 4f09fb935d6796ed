#[cfg(test)]
mod tests {
    use crate::cache::CacheBackend;
    use crate::clock::FakeClock;
    use crate::infrastructure::{LeaseStore, SessionStore};
    use crate::infrastructure_sqlite::{SqliteCache, SqliteLeaseStore, SqliteSessionStore};
    use crate::types::{
        LeaseRequest, LeaseResult, LockMode, ResourceRef, SessionRecord, WorkerRecord, WorkerStatus,
    };
    use std::sync::{Arc, Barrier};
    use std::time::Duration;

    fn db_path(dir: &tempfile::TempDir) -> String {
        dir.path().join("coord.db").to_string_lossy().into_owned()
    }

    #[test]
    fn test_separate_connections_race_for_exclusive_lease() {
        let dir = tempfile::tempdir().unwrap();
        let path = db_path(&dir);
        // Create the schema once before racing
        SqliteLeaseStore::open(&path).unwrap();

        let barrier = Arc::new(Barrier::new(3));
        let handles: Vec<_> = ["w1", "w2", "w3"]
            .into_iter()
            .map(|worker| {
                let path = path.clone();
                let barrier = Arc::clone(&barrier);
                std::thread::spawn(move || {
                    let store = SqliteLeaseStore::open(&path).unwrap();
                    let request = LeaseRequest::new(
                        ResourceRef::new("batch", "b-42"),
                        LockMode::Exclusive,
                        worker,
                        30_000,
                    );
                    barrier.wait();
                    store.try_acquire(&request, 1_000).unwrap()
                })
            })
            .collect();

        let results: Vec<LeaseResult> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        let winners = results
            .iter()
            .filter(|r| matches!(r, LeaseResult::Success { .. }))
            .count();
        assert_eq!(winners, 1);

        let observer = SqliteLeaseStore::open(&path).unwrap();
        assert_eq!(observer.active_leases(1_000).unwrap().len(), 1);
    }

    #[test]
    fn test_shared_leases_block_exclusive_until_released() {
        let store = SqliteLeaseStore::in_memory().unwrap();
        let resource = ResourceRef::new("campaign", "c1");

        for reader in ["r1", "r2", "r3"] {
            let request = LeaseRequest::new(resource.clone(), LockMode::Shared, reader, 10_000);
            assert!(matches!(
                store.try_acquire(&request, 1_000).unwrap(),
                LeaseResult::Success { .. }
            ));
        }

        let writer = LeaseRequest::new(resource.clone(), LockMode::Exclusive, "w", 10_000);
        assert!(matches!(
            store.try_acquire(&writer, 1_000).unwrap(),
            LeaseResult::Failure { .. }
        ));

        for reader in ["r1", "r2", "r3"] {
            assert!(store.release(&resource, LockMode::Shared, reader).unwrap());
        }
        assert!(matches!(
            store.try_acquire(&writer, 1_000).unwrap(),
            LeaseResult::Success { .. }
        ));
    }

    #[test]
    fn test_renewal_and_expiry_reclamation() {
        let store = SqliteLeaseStore::in_memory().unwrap();
        let request = |holder: &str| {
            LeaseRequest::new(ResourceRef::new("batch", "b1"), LockMode::Exclusive, holder, 5_000)
        };

        let first = match store.try_acquire(&request("w1"), 1_000).unwrap() {
            LeaseResult::Success { lease, .. } => lease,
            other => panic!("Expected Success, got {other:?}"),
        };
        match store.try_acquire(&request("w1"), 4_000).unwrap() {
            LeaseResult::Success { lease, renewed } => {
                assert!(renewed);
                assert_eq!(lease.lease_id, first.lease_id);
                assert_eq!(lease.expires_at, 9_000);
            }
            other => panic!("Expected Success, got {other:?}"),
        }

        assert!(matches!(
            store.try_acquire(&request("w2"), 8_999).unwrap(),
            LeaseResult::Failure { .. }
        ));
        assert!(matches!(
            store.try_acquire(&request("w2"), 9_000).unwrap(),
            LeaseResult::Success { renewed: false, .. }
        ));
        assert_eq!(store.evict_expired(20_000).unwrap(), 1);
    }

    #[test]
    fn test_worker_rows_persist_across_connections() {
        let dir = tempfile::tempdir().unwrap();
        let path = db_path(&dir);

        {
            let store = SqliteLeaseStore::open(&path).unwrap();
            store.upsert_worker(&WorkerRecord::new("w1", "c1", "gen", 1_000)).unwrap();
            store.upsert_worker(&WorkerRecord::new("w1", "c1", "gen", 2_000)).unwrap();
            store
                .set_worker_status("w1", "c1", WorkerStatus::Error, Some("batch-3"), 2_500)
                .unwrap();
        }

        let store = SqliteLeaseStore::open(&path).unwrap();
        let workers = store.list_workers(Some("c1")).unwrap();
        assert_eq!(workers.len(), 1);
        assert_eq!(workers[0].registered_at, 1_000);
        assert_eq!(workers[0].last_heartbeat_at, 2_500);
        assert_eq!(workers[0].status, WorkerStatus::Error);
        assert!(store.list_workers(Some("c2")).unwrap().is_empty());

        assert_eq!(store.touch_worker("w1", 3_000).unwrap(), 1);
        assert_eq!(store.delete_workers_before(2_999).unwrap(), 0);
        assert_eq!(store.delete_workers_before(3_000).unwrap(), 1);
    }

    #[test]
    fn test_session_store_round_trip() {
        let store = SqliteSessionStore::in_memory().unwrap();
        let session = SessionRecord::new("s1".into(), "u1", "10.0.0.1", "curl", 60_000, 1_000);
        store.insert(&session).unwrap();

        assert_eq!(store.load("s1").unwrap(), Some(session.clone()));
        assert!(store.touch("s1", 5_000).unwrap());
        assert!(store.deactivate("s1").unwrap());
        assert!(!store.load("s1").unwrap().unwrap().is_active);
        // Activity is no longer recorded once revoked
        assert!(!store.touch("s1", 6_000).unwrap());
        assert_eq!(store.load("s1").unwrap().unwrap().last_activity_at, 5_000);
        assert!(store.active_for_user("u1").unwrap().is_empty());
        assert!(!store.deactivate("missing").unwrap());
    }

    #[test]
    fn test_sqlite_cache_is_shared_between_connections() {
        let dir = tempfile::tempdir().unwrap();
        let path = db_path(&dir);
        let clock = FakeClock::default();

        let writer = SqliteCache::open(&path, Arc::new(clock.clone())).unwrap();
        let reader = SqliteCache::open(&path, Arc::new(clock.clone())).unwrap();

        writer.set_with_ttl("session:abc", "{}".into(), 1_000).unwrap();
        assert_eq!(reader.get("session:abc").unwrap().as_deref(), Some("{}"));

        clock.advance(Duration::from_secs(1));
        assert_eq!(reader.get("session:abc").unwrap(), None);
        assert_eq!(reader.purge_expired().unwrap(), 1);
    }
}
