//! Key-value cache backends used as session cache tiers.
//!
//! `CacheBackend` is the capability both tiers share. `MemoryCache` lives in
//! one process; `DistributedCache` delegates to an inner backend (an in-memory
//! one by default, or a shared store such as `SqliteCache`) and layers key
//! prefixing, JSON encoding and counters on top.

use serde::Serialize;
use serde::de::DeserializeOwned;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use crate::clock::Clock;
use crate::error::CoordResult;

/// Get / Set-with-TTL / Delete. TTLs are in milliseconds.
pub trait CacheBackend: Send + Sync {
    fn get(&self, key: &str) -> CoordResult<Option<String>>;
    fn set_with_ttl(&self, key: &str, value: String, ttl: u64) -> CoordResult<()>;
    fn delete(&self, key: &str) -> CoordResult<()>;
    /// Drop every expired entry. Reads already ignore them; this reclaims
    /// the space. Returns how many were removed.
    fn purge_expired(&self) -> CoordResult<usize>;
}

struct MemoryEntry {
    value: String,
    expires_at: u64,
}

/// In-process TTL map.
pub struct MemoryCache {
    entries: Mutex<HashMap<String, MemoryEntry>>,
    clock: Arc<dyn Clock>,
}

impl MemoryCache {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            clock,
        }
    }

    fn entries(&self) -> std::sync::MutexGuard<'_, HashMap<String, MemoryEntry>> {
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn len(&self) -> usize {
        self.entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl CacheBackend for MemoryCache {
    fn get(&self, key: &str) -> CoordResult<Option<String>> {
        let now = self.clock.now_ms();
        let entries = self.entries();
        Ok(entries
            .get(key)
            .filter(|e| e.expires_at > now)
            .map(|e| e.value.clone()))
    }

    fn set_with_ttl(&self, key: &str, value: String, ttl: u64) -> CoordResult<()> {
        let expires_at = self.clock.now_ms().saturating_add(ttl);
        self.entries()
            .insert(key.to_string(), MemoryEntry { value, expires_at });
        Ok(())
    }

    fn delete(&self, key: &str) -> CoordResult<()> {
        self.entries().remove(key);
        Ok(())
    }

    fn purge_expired(&self) -> CoordResult<usize> {
        let now = self.clock.now_ms();
        let mut entries = self.entries();
        let before = entries.len();
        entries.retain(|_, e| e.expires_at > now);
        Ok(before - entries.len())
    }
}

/// Counters for the distributed tier
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CacheMetrics {
    pub total_operations: u64,
    pub hits: u64,
    pub misses: u64,
    pub errors: u64,
}

#[derive(Default)]
struct Counters {
    operations: AtomicU64,
    hits: AtomicU64,
    misses: AtomicU64,
    errors: AtomicU64,
}

/// The shared cache tier.
pub struct DistributedCache {
    inner: Arc<dyn CacheBackend>,
    key_prefix: String,
    counters: Counters,
}

impl DistributedCache {
    pub fn new(inner: Arc<dyn CacheBackend>, key_prefix: impl Into<String>) -> Self {
        Self {
            inner,
            key_prefix: key_prefix.into(),
            counters: Counters::default(),
        }
    }

    /// Distributed tier over a process-local map; useful for single-node
    /// deployments and tests.
    pub fn in_memory(clock: Arc<dyn Clock>, key_prefix: impl Into<String>) -> Self {
        Self::new(Arc::new(MemoryCache::new(clock)), key_prefix)
    }

    fn full_key(&self, key: &str) -> String {
        format!("{}{}", self.key_prefix, key)
    }

    fn record<T>(&self, result: &CoordResult<T>) {
        self.counters.operations.fetch_add(1, Ordering::Relaxed);
        if result.is_err() {
            self.counters.errors.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Read and decode a JSON value. Undecodable entries are deleted and
    /// reported as a miss.
    pub fn get_json<T: DeserializeOwned>(&self, key: &str) -> CoordResult<Option<T>> {
        let Some(raw) = self.get(key)? else {
            return Ok(None);
        };
        match serde_json::from_str(&raw) {
            Ok(value) => Ok(Some(value)),
            Err(err) => {
                tracing::warn!(key, error = %err, "Discarding undecodable cache entry");
                self.delete(key)?;
                Ok(None)
            }
        }
    }

    pub fn set_json<T: Serialize>(&self, key: &str, value: &T, ttl: u64) -> CoordResult<()> {
        let raw = serde_json::to_string(value)?;
        self.set_with_ttl(key, raw, ttl)
    }

    pub fn metrics(&self) -> CacheMetrics {
        CacheMetrics {
            total_operations: self.counters.operations.load(Ordering::Relaxed),
            hits: self.counters.hits.load(Ordering::Relaxed),
            misses: self.counters.misses.load(Ordering::Relaxed),
            errors: self.counters.errors.load(Ordering::Relaxed),
        }
    }
}

impl CacheBackend for DistributedCache {
    fn get(&self, key: &str) -> CoordResult<Option<String>> {
        let result = self.inner.get(&self.full_key(key));
        self.record(&result);
        match &result {
            Ok(Some(_)) => self.counters.hits.fetch_add(1, Ordering::Relaxed),
            Ok(None) => self.counters.misses.fetch_add(1, Ordering::Relaxed),
            Err(_) => 0,
        };
        result
    }

    fn set_with_ttl(&self, key: &str, value: String, ttl: u64) -> CoordResult<()> {
        let result = self.inner.set_with_ttl(&self.full_key(key), value, ttl);
        self.record(&result);
        result
    }

    fn delete(&self, key: &str) -> CoordResult<()> {
        let result = self.inner.delete(&self.full_key(key));
        self.record(&result);
        result
    }

    /// Purges the whole inner backend, not only keys under this prefix.
    fn purge_expired(&self) -> CoordResult<usize> {
        let result = self.inner.purge_expired();
        self.record(&result);
        result
    }
}
