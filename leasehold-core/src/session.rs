//! Session validation over three tiers: a process-local cache, an optional
//! distributed cache, and the durable session store.
//!
//! The durable record is authoritative. Cache entries are only honored while
//! they would still pass every check the store path applies; anything else is
//! evicted from both tiers and the store is consulted again. A confirmed miss
//! is cached as a short-lived negative entry so repeated probes with unknown
//! ids do not reach the store.

use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use crate::cache::{CacheBackend, CacheMetrics, DistributedCache};
use crate::clock::{duration_ms, Clock};
use crate::config::SessionConfig;
use crate::error::{CoordError, CoordResult};
use crate::infrastructure::SessionStore;
use crate::maintenance::{spawn_periodic, TaskHandle};
use crate::types::{CachedSessionEntry, SessionRecord};

/// Ids shorter than this are rejected without any lookup
pub const MIN_SESSION_ID_LEN: usize = 32;
/// Length of generated session ids
pub const SESSION_ID_LEN: usize = 64;

const HEX_ALPHABET: [char; 16] = [
    '0', '1', '2', '3', '4', '5', '6', '7', '8', '9', 'a', 'b', 'c', 'd', 'e', 'f',
];

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SessionMetrics {
    pub validations: u64,
    pub tier1_hits: u64,
    pub tier2_hits: u64,
    pub store_loads: u64,
    pub negative_hits: u64,
    pub security_events: u64,
    /// Positive entries currently in tier-1
    pub cached_sessions: usize,
}

#[derive(Default)]
struct Counters {
    validations: AtomicU64,
    tier1_hits: AtomicU64,
    tier2_hits: AtomicU64,
    store_loads: AtomicU64,
    negative_hits: AtomicU64,
    security_events: AtomicU64,
}

fn bump(counter: &AtomicU64) {
    counter.fetch_add(1, Ordering::Relaxed);
}

#[derive(Default)]
struct LocalTier {
    entries: HashMap<String, CachedSessionEntry>,
    // user_id -> session ids with a positive entry
    by_user: HashMap<String, HashSet<String>>,
}

impl LocalTier {
    fn insert(&mut self, session_id: &str, entry: CachedSessionEntry) {
        self.remove(session_id);
        if let Some(session) = &entry.session {
            self.by_user
                .entry(session.user_id.clone())
                .or_default()
                .insert(session_id.to_string());
        }
        self.entries.insert(session_id.to_string(), entry);
    }

    fn remove(&mut self, session_id: &str) -> Option<CachedSessionEntry> {
        let entry = self.entries.remove(session_id)?;
        if let Some(session) = &entry.session {
            if let Some(ids) = self.by_user.get_mut(&session.user_id) {
                ids.remove(session_id);
                if ids.is_empty() {
                    self.by_user.remove(&session.user_id);
                }
            }
        }
        Some(entry)
    }

    fn remove_user(&mut self, user_id: &str) -> Vec<String> {
        let ids: Vec<String> = self
            .by_user
            .remove(user_id)
            .map(|ids| ids.into_iter().collect())
            .unwrap_or_default();
        for id in &ids {
            self.entries.remove(id);
        }
        ids
    }
}

/// Outcome of checking a cached entry against the current request
enum CacheVerdict {
    Valid(SessionRecord),
    Negative,
    Invalid,
}

pub struct SessionService {
    store: Arc<dyn SessionStore>,
    local: Mutex<LocalTier>,
    distributed: Option<DistributedCache>,
    config: SessionConfig,
    clock: Arc<dyn Clock>,
    counters: Counters,
}

impl SessionService {
    /// Tier-2 defaults to an in-process `MemoryCache` when enabled in config;
    /// use [`SessionService::with_distributed_backend`] to share it.
    pub fn new(store: Arc<dyn SessionStore>, config: SessionConfig, clock: Arc<dyn Clock>) -> Self {
        let distributed = config
            .distributed_cache
            .then(|| DistributedCache::in_memory(Arc::clone(&clock), config.key_prefix.clone()));
        Self {
            store,
            local: Mutex::new(LocalTier::default()),
            distributed,
            config,
            clock,
            counters: Counters::default(),
        }
    }

    pub fn with_distributed_backend(mut self, backend: Arc<dyn CacheBackend>) -> Self {
        self.distributed = Some(DistributedCache::new(backend, self.config.key_prefix.clone()));
        self
    }

    pub fn without_distributed_cache(mut self) -> Self {
        self.distributed = None;
        self
    }

    fn local(&self) -> MutexGuard<'_, LocalTier> {
        self.local.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn is_idle(&self, session: &SessionRecord, now: u64) -> bool {
        now.saturating_sub(session.last_activity_at) >= duration_ms(self.config.idle_timeout)
    }

    fn client_matches(&self, session: &SessionRecord, client_ip: &str, user_agent: Option<&str>) -> bool {
        if self.config.require_ip_match && session.ip_address != client_ip {
            return false;
        }
        match user_agent {
            Some(agent) if self.config.require_ua_match => session.user_agent == agent,
            _ => true,
        }
    }

    fn judge(
        &self,
        entry: &CachedSessionEntry,
        client_ip: &str,
        user_agent: Option<&str>,
        now: u64,
    ) -> CacheVerdict {
        let age = now.saturating_sub(entry.cached_at);
        let session = match &entry.session {
            Some(session) if entry.is_valid => session,
            _ => {
                return if age < duration_ms(self.config.negative_cache_ttl) {
                    CacheVerdict::Negative
                } else {
                    CacheVerdict::Invalid
                };
            }
        };

        let honored = session.is_active
            && session.expires_at > now
            && age < duration_ms(self.config.cache_ttl)
            && !self.is_idle(session, now)
            && self.client_matches(session, client_ip, user_agent);
        if honored {
            CacheVerdict::Valid(session.clone())
        } else {
            CacheVerdict::Invalid
        }
    }

    fn put_distributed(&self, session_id: &str, entry: &CachedSessionEntry) {
        let Some(tier2) = &self.distributed else {
            return;
        };
        let ttl = if entry.is_negative() {
            self.config.negative_cache_ttl
        } else {
            self.config.cache_ttl
        };
        if let Err(e) = tier2.set_json(session_id, entry, duration_ms(ttl)) {
            tracing::warn!(error = %e, "Failed to populate distributed session cache");
        }
    }

    fn drop_distributed(&self, session_id: &str) {
        let Some(tier2) = &self.distributed else {
            return;
        };
        if let Err(e) = tier2.delete(session_id) {
            tracing::warn!(error = %e, "Failed to evict distributed session entry");
        }
    }

    fn evict(&self, session_id: &str) {
        self.local().remove(session_id);
        self.drop_distributed(session_id);
    }

    /// Record activity on a session about to be returned, in the store and
    /// tier-1. The store refusing the write means the session was revoked
    /// after the caches or the load saw it; every tier is cleared then.
    fn touch(&self, mut session: SessionRecord, now: u64) -> CoordResult<SessionRecord> {
        session.last_activity_at = now;
        match self.store.touch(&session.id, now) {
            Ok(true) => {}
            Ok(false) => {
                self.evict(&session.id);
                tracing::debug!(user_id = %session.user_id, "Session revoked during validation");
                return Err(CoordError::not_found("session", &session.id));
            }
            Err(e) => tracing::warn!(error = %e, "Failed to record session activity"),
        }
        if let Some(cached) = self
            .local()
            .entries
            .get_mut(&session.id)
            .and_then(|entry| entry.session.as_mut())
        {
            cached.last_activity_at = now;
        }
        Ok(session)
    }

    pub fn validate_session(&self, session_id: &str, client_ip: &str) -> CoordResult<SessionRecord> {
        self.validate_session_for_agent(session_id, client_ip, None)
    }

    /// Validate a session presented by a client. The user agent is only
    /// compared when `require_ua_match` is set and one is supplied.
    pub fn validate_session_for_agent(
        &self,
        session_id: &str,
        client_ip: &str,
        user_agent: Option<&str>,
    ) -> CoordResult<SessionRecord> {
        bump(&self.counters.validations);
        if session_id.len() < MIN_SESSION_ID_LEN {
            return Err(CoordError::not_found("session", session_id));
        }
        let now = self.clock.now_ms();

        let local_entry = self.local().entries.get(session_id).cloned();
        if let Some(entry) = local_entry {
            match self.judge(&entry, client_ip, user_agent, now) {
                CacheVerdict::Valid(session) => {
                    bump(&self.counters.tier1_hits);
                    return self.touch(session, now);
                }
                CacheVerdict::Negative => {
                    bump(&self.counters.negative_hits);
                    return Err(CoordError::not_found("session", session_id));
                }
                CacheVerdict::Invalid => self.evict(session_id),
            }
        }

        if let Some(tier2) = &self.distributed {
            match tier2.get_json::<CachedSessionEntry>(session_id) {
                Ok(Some(entry)) => match self.judge(&entry, client_ip, user_agent, now) {
                    CacheVerdict::Valid(session) => {
                        bump(&self.counters.tier2_hits);
                        self.local().insert(session_id, entry);
                        return self.touch(session, now);
                    }
                    CacheVerdict::Negative => {
                        bump(&self.counters.negative_hits);
                        self.local().insert(session_id, entry);
                        return Err(CoordError::not_found("session", session_id));
                    }
                    CacheVerdict::Invalid => self.evict(session_id),
                },
                Ok(None) => {}
                Err(e) => tracing::warn!(error = %e, "Distributed session cache read failed"),
            }
        }

        bump(&self.counters.store_loads);
        let mut session = match self.store.load(session_id)? {
            Some(session) if session.is_active => session,
            _ => {
                let negative = CachedSessionEntry::negative(now);
                self.put_distributed(session_id, &negative);
                self.local().insert(session_id, negative);
                return Err(CoordError::not_found("session", session_id));
            }
        };

        if session.expires_at <= now || self.is_idle(&session, now) {
            self.evict(session_id);
            if let Err(e) = self.store.deactivate(session_id) {
                tracing::warn!(error = %e, "Failed to deactivate expired session");
            }
            tracing::debug!(user_id = %session.user_id, "Session expired");
            return Err(CoordError::SessionExpired);
        }

        if !self.client_matches(&session, client_ip, user_agent) {
            bump(&self.counters.security_events);
            tracing::warn!(
                user_id = %session.user_id,
                expected_ip = %session.ip_address,
                client_ip,
                "Session presented from a different client"
            );
            if let Err(e) = self.invalidate_session(session_id) {
                tracing::warn!(error = %e, "Failed to invalidate session after security violation");
            }
            return Err(CoordError::SecurityViolation(
                "session does not match the issuing client".into(),
            ));
        }

        // Backfill before the activity write: if an invalidation lands in
        // between, its eviction or the refused touch clears these entries.
        session.last_activity_at = now;
        let entry = CachedSessionEntry::positive(session.clone(), now);
        self.put_distributed(session_id, &entry);
        self.local().insert(session_id, entry);
        self.touch(session, now)
    }

    /// Mark a session inactive in the store, then remove it from every tier.
    pub fn invalidate_session(&self, session_id: &str) -> CoordResult<()> {
        let result = self.store.deactivate(session_id);
        self.evict(session_id);
        result?;
        tracing::debug!("Session invalidated");
        Ok(())
    }

    /// Deactivate every session of the user. Returns how many were active.
    ///
    /// Tier-2 copies are deleted for every id this process knows about;
    /// copies written elsewhere lapse at their TTL.
    pub fn invalidate_all_user_sessions(&self, user_id: &str) -> CoordResult<usize> {
        let deactivated = self.store.deactivate_user(user_id)?;
        let cached = self.local().remove_user(user_id);

        let ids: HashSet<&String> = cached.iter().chain(deactivated.iter()).collect();
        for id in ids {
            self.drop_distributed(id);
        }
        tracing::info!(user_id, count = deactivated.len(), "Invalidated all user sessions");
        Ok(deactivated.len())
    }

    /// Issue a new session, evicting the user's oldest ones beyond the
    /// per-user limit.
    pub fn create_session(
        &self,
        user_id: &str,
        ip_address: &str,
        user_agent: &str,
    ) -> CoordResult<SessionRecord> {
        let active = self.store.active_for_user(user_id)?;
        let max = self.config.max_sessions_per_user.max(1);
        if active.len() >= max {
            let excess = active.len() + 1 - max;
            for oldest in active.iter().take(excess) {
                self.invalidate_session(&oldest.id)?;
                tracing::info!(user_id, "Evicted oldest session over per-user limit");
            }
        }

        let now = self.clock.now_ms();
        let id = nanoid::nanoid!(SESSION_ID_LEN, &HEX_ALPHABET);
        let session = SessionRecord::new(
            id,
            user_id,
            ip_address,
            user_agent,
            duration_ms(self.config.duration),
            now,
        );
        self.store.insert(&session)?;
        self.local()
            .insert(&session.id, CachedSessionEntry::positive(session.clone(), now));

        tracing::info!(user_id, "Session created");
        Ok(session)
    }

    /// Move a session's expiry. Tier-2 copies are dropped so they are
    /// rebuilt from the store.
    pub fn extend_session(&self, session_id: &str, new_expires_at: u64) -> CoordResult<()> {
        if !self.store.set_expiry(session_id, new_expires_at)? {
            return Err(CoordError::not_found("session", session_id));
        }
        if let Some(session) = self
            .local()
            .entries
            .get_mut(session_id)
            .and_then(|entry| entry.session.as_mut())
        {
            session.expires_at = new_expires_at;
        }
        self.drop_distributed(session_id);
        Ok(())
    }

    /// Drop stale tier-1 entries, reclaim expired tier-2 entries and
    /// deactivate expired or idle sessions in the store. Returns the number
    /// of store rows deactivated.
    pub fn purge_expired(&self) -> CoordResult<usize> {
        let now = self.clock.now_ms();
        let cache_ttl = duration_ms(self.config.cache_ttl);
        let negative_ttl = duration_ms(self.config.negative_cache_ttl);

        let dropped = {
            let mut local = self.local();
            let stale: Vec<String> = local
                .entries
                .iter()
                .filter(|(_, entry)| {
                    let age = now.saturating_sub(entry.cached_at);
                    match &entry.session {
                        Some(s) if entry.is_valid => {
                            age >= cache_ttl || s.expires_at <= now || self.is_idle(s, now)
                        }
                        _ => age >= negative_ttl,
                    }
                })
                .map(|(id, _)| id.clone())
                .collect();
            for id in &stale {
                local.remove(id);
            }
            stale.len()
        };

        let shared_dropped = match &self.distributed {
            Some(tier2) => tier2.purge_expired().unwrap_or_else(|e| {
                tracing::warn!(error = %e, "Failed to purge distributed session cache");
                0
            }),
            None => 0,
        };

        let deactivated = self
            .store
            .deactivate_stale(now, duration_ms(self.config.idle_timeout))?;
        if dropped > 0 || shared_dropped > 0 || deactivated > 0 {
            tracing::info!(dropped, shared_dropped, deactivated, "Purged expired sessions");
        }
        Ok(deactivated)
    }

    pub fn start_cleanup(self: &Arc<Self>) -> CoordResult<TaskHandle> {
        let service = Arc::clone(self);
        spawn_periodic("session-cleanup", self.config.cleanup_interval, move || {
            if let Err(e) = service.purge_expired() {
                tracing::warn!(error = %e, "Session cleanup failed");
            }
        })
    }

    pub fn metrics(&self) -> SessionMetrics {
        let cached_sessions = self
            .local()
            .entries
            .values()
            .filter(|e| !e.is_negative())
            .count();
        SessionMetrics {
            validations: self.counters.validations.load(Ordering::Relaxed),
            tier1_hits: self.counters.tier1_hits.load(Ordering::Relaxed),
            tier2_hits: self.counters.tier2_hits.load(Ordering::Relaxed),
            store_loads: self.counters.store_loads.load(Ordering::Relaxed),
            negative_hits: self.counters.negative_hits.load(Ordering::Relaxed),
            security_events: self.counters.security_events.load(Ordering::Relaxed),
            cached_sessions,
        }
    }

    pub fn distributed_metrics(&self) -> Option<CacheMetrics> {
        self.distributed.as_ref().map(DistributedCache::metrics)
    }
}
