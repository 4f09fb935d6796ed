//! Process-local memoization of control-operation outcomes by idempotency key.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use crate::clock::{duration_ms, Clock};
use crate::config::IdempotencyConfig;
use crate::error::CoordResult;
use crate::maintenance::{spawn_periodic, TaskHandle};

/// A remembered outcome. Failures are kept as their message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdempotencyEntry<T> {
    pub key: String,
    pub outcome: Result<T, String>,
    pub created_at: u64,
    pub expires_at: u64,
}

impl<T> IdempotencyEntry<T> {
    pub fn is_live(&self, now: u64) -> bool {
        self.expires_at > now
    }
}

type Entries<T> = HashMap<String, IdempotencyEntry<T>>;
type EntryMap<T> = Arc<Mutex<Entries<T>>>;

fn lock_entries<T>(entries: &Mutex<Entries<T>>) -> MutexGuard<'_, Entries<T>> {
    entries.lock().unwrap_or_else(|e| e.into_inner())
}

fn purge<T>(entries: &Mutex<Entries<T>>, now: u64) -> usize {
    let mut entries = lock_entries(entries);
    let before = entries.len();
    entries.retain(|_, e| e.is_live(now));
    before - entries.len()
}

/// TTL cache of operation outcomes. The empty key is never stored.
pub struct IdempotencyCache<T> {
    entries: EntryMap<T>,
    ttl: u64,
    sweep_interval: Duration,
    clock: Arc<dyn Clock>,
}

impl<T: Clone + Send + 'static> IdempotencyCache<T> {
    pub fn new(config: &IdempotencyConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: Arc::new(Mutex::new(HashMap::new())),
            ttl: duration_ms(config.ttl),
            sweep_interval: config.sweep_interval,
            clock,
        }
    }

    pub fn get(&self, key: &str) -> Option<IdempotencyEntry<T>> {
        if key.is_empty() {
            return None;
        }
        let now = self.clock.now_ms();
        lock_entries(&self.entries)
            .get(key)
            .filter(|e| e.is_live(now))
            .cloned()
    }

    /// Store an outcome, replacing whatever the key held before.
    pub fn set(&self, key: &str, outcome: Result<T, String>) {
        if key.is_empty() {
            return;
        }
        let now = self.clock.now_ms();
        let entry = IdempotencyEntry {
            key: key.to_string(),
            outcome,
            created_at: now,
            expires_at: now.saturating_add(self.ttl),
        };
        lock_entries(&self.entries).insert(key.to_string(), entry);
    }

    pub fn delete(&self, key: &str) -> bool {
        lock_entries(&self.entries).remove(key).is_some()
    }

    /// Stored entries, including expired ones not yet swept.
    pub fn size(&self) -> usize {
        lock_entries(&self.entries).len()
    }

    pub fn purge_expired(&self) -> usize {
        purge(&self.entries, self.clock.now_ms())
    }

    pub fn start_sweeper(&self) -> CoordResult<TaskHandle> {
        let entries = Arc::clone(&self.entries);
        let clock = Arc::clone(&self.clock);
        spawn_periodic("idempotency-sweep", self.sweep_interval, move || {
            let removed = purge(&entries, clock.now_ms());
            if removed > 0 {
                tracing::debug!(removed, "Swept expired idempotency entries");
            }
        })
    }

    /// Return the remembered outcome for `key`, or run `f` and remember its.
    pub fn run_idempotent<F>(&self, key: &str, f: F) -> Result<T, String>
    where
        F: FnOnce() -> Result<T, String>,
    {
        if let Some(entry) = self.get(key) {
            tracing::debug!(key, "Replaying memoized outcome");
            return entry.outcome;
        }
        let outcome = f();
        self.set(key, outcome.clone());
        outcome
    }
}
