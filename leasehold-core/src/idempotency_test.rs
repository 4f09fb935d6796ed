#[cfg(test)]
mod tests {
    use crate::clock::FakeClock;
    use crate::config::IdempotencyConfig;
    use crate::idempotency::IdempotencyCache;
    use std::sync::Arc;
    use std::time::Duration;

    fn cache(clock: &FakeClock) -> IdempotencyCache<String> {
        IdempotencyCache::new(&IdempotencyConfig::default(), Arc::new(clock.clone()))
    }

    #[test]
    fn test_set_then_get_within_ttl() {
        let clock = FakeClock::default();
        let cache = cache(&clock);

        cache.set("start-campaign-7", Ok("started".to_string()));
        clock.advance(Duration::from_secs(60));

        let entry = cache.get("start-campaign-7").unwrap();
        assert_eq!(entry.outcome, Ok("started".to_string()));
        assert_eq!(entry.expires_at - entry.created_at, 300_000);
    }

    #[test]
    fn test_entry_absent_after_ttl_until_swept() {
        let clock = FakeClock::default();
        let cache = cache(&clock);

        cache.set("k", Err("quota exceeded".into()));
        clock.advance(Duration::from_secs(5 * 60));

        assert!(cache.get("k").is_none());
        assert_eq!(cache.size(), 1);
        assert_eq!(cache.purge_expired(), 1);
        assert_eq!(cache.size(), 0);
    }

    #[test]
    fn test_last_writer_wins() {
        let clock = FakeClock::default();
        let cache = cache(&clock);

        cache.set("k", Ok("first".into()));
        cache.set("k", Ok("second".into()));
        assert_eq!(cache.get("k").unwrap().outcome, Ok("second".to_string()));
        assert_eq!(cache.size(), 1);
        assert!(cache.delete("k"));
        assert!(!cache.delete("k"));
    }

    #[test]
    fn test_empty_key_is_ignored() {
        let cache = cache(&FakeClock::default());
        cache.set("", Ok("x".into()));
        assert_eq!(cache.size(), 0);
        assert!(cache.get("").is_none());
    }

    #[test]
    fn test_run_idempotent_replays_outcome() {
        let clock = FakeClock::default();
        let cache = cache(&clock);
        let mut calls = 0;

        for _ in 0..3 {
            let outcome = cache.run_idempotent("pause-c1", || {
                calls += 1;
                Ok("paused".to_string())
            });
            assert_eq!(outcome, Ok("paused".to_string()));
        }
        assert_eq!(calls, 1);

        clock.advance(Duration::from_secs(301));
        let _ = cache.run_idempotent("pause-c1", || {
            calls += 1;
            Err("already paused".to_string())
        });
        assert_eq!(calls, 2);
        assert_eq!(
            cache.get("pause-c1").unwrap().outcome,
            Err("already paused".to_string())
        );
    }

    #[tokio::test]
    async fn test_sweeper_purges_in_background() {
        let clock = FakeClock::default();
        let config = IdempotencyConfig {
            ttl: Duration::from_secs(1),
            sweep_interval: Duration::from_millis(20),
        };
        let cache: IdempotencyCache<u32> = IdempotencyCache::new(&config, Arc::new(clock.clone()));
        cache.set("a", Ok(1));
        cache.set("b", Ok(2));

        let sweeper = cache.start_sweeper().unwrap();
        clock.advance(Duration::from_secs(2));
        tokio::time::sleep(Duration::from_millis(150)).await;
        assert_eq!(cache.size(), 0);

        sweeper.shutdown().await.unwrap();
    }
}
