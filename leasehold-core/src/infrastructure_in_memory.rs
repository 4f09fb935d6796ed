use crate::conflict::{ConflictEngine, ConflictResult};
use crate::error::CoordResult;
use crate::infrastructure::{LeaseStore, SessionStore};
use crate::types::{
    generate_lease_id, LeaseRequest, LeaseResult, LockMode, ResourceLock, ResourceRef,
    SessionRecord, WorkerRecord, WorkerStatus,
};
use std::collections::HashMap;
use std::sync::Mutex;

#[derive(Default)]
struct LeaseTables {
    // (worker_id, campaign_id) -> record
    workers: HashMap<(String, String), WorkerRecord>,
    // lease_id -> lease
    leases: HashMap<String, ResourceLock>,
}

/// Process-local lease store. Atomicity comes from a single mutex around both
/// tables, so it coordinates threads but not processes.
#[derive(Default)]
pub struct InMemoryLeaseStore {
    tables: Mutex<LeaseTables>,
}

impl InMemoryLeaseStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn tables(&self) -> std::sync::MutexGuard<'_, LeaseTables> {
        self.tables.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl LeaseStore for InMemoryLeaseStore {
    fn upsert_worker(&self, record: &WorkerRecord) -> CoordResult<()> {
        let mut tables = self.tables();
        let key = (record.worker_id.clone(), record.campaign_id.clone());
        let registered_at = tables
            .workers
            .get(&key)
            .map(|existing| existing.registered_at)
            .unwrap_or(record.registered_at);
        let mut row = record.clone();
        row.registered_at = registered_at;
        tables.workers.insert(key, row);
        Ok(())
    }

    fn touch_worker(&self, worker_id: &str, now: u64) -> CoordResult<usize> {
        let mut tables = self.tables();
        let mut touched = 0;
        for worker in tables.workers.values_mut() {
            if worker.worker_id == worker_id {
                worker.last_heartbeat_at = now;
                touched += 1;
            }
        }
        Ok(touched)
    }

    fn set_worker_status(
        &self,
        worker_id: &str,
        campaign_id: &str,
        status: WorkerStatus,
        operation: Option<&str>,
        now: u64,
    ) -> CoordResult<bool> {
        let mut tables = self.tables();
        match tables
            .workers
            .get_mut(&(worker_id.to_string(), campaign_id.to_string()))
        {
            Some(worker) => {
                worker.status = status;
                worker.last_operation = operation.map(str::to_string);
                worker.last_heartbeat_at = now;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn list_workers(&self, campaign_id: Option<&str>) -> CoordResult<Vec<WorkerRecord>> {
        let tables = self.tables();
        Ok(tables
            .workers
            .values()
            .filter(|w| campaign_id.is_none_or(|c| w.campaign_id == c))
            .cloned()
            .collect())
    }

    fn delete_workers_before(&self, cutoff: u64) -> CoordResult<usize> {
        let mut tables = self.tables();
        let before = tables.workers.len();
        tables.workers.retain(|_, w| w.last_heartbeat_at > cutoff);
        Ok(before - tables.workers.len())
    }

    fn try_acquire(&self, request: &LeaseRequest, now: u64) -> CoordResult<LeaseResult> {
        let mut tables = self.tables();

        // Expired rows on this key are reclaimable by anyone
        tables
            .leases
            .retain(|_, l| l.resource != request.resource || l.is_live(now));

        let on_key: Vec<ResourceLock> = tables
            .leases
            .values()
            .filter(|l| l.resource == request.resource)
            .cloned()
            .collect();

        if let ConflictResult::Conflict { reason, existing } = ConflictEngine::check_against_leases(
            &request.holder,
            request.mode,
            &request.resource,
            &on_key,
            now,
        ) {
            return Ok(LeaseResult::Failure {
                reason,
                existing_lease: Some(existing),
            });
        }

        if let Some(own) = tables.leases.values_mut().find(|l| {
            l.resource == request.resource && l.mode == request.mode && l.holder == request.holder
        }) {
            own.expires_at = now.saturating_add(request.ttl);
            return Ok(LeaseResult::Success {
                lease: own.clone(),
                renewed: true,
            });
        }

        let lease = ResourceLock::new(
            generate_lease_id(),
            request.resource.clone(),
            request.mode,
            request.holder.clone(),
            request.ttl,
            now,
        );
        tables.leases.insert(lease.lease_id.clone(), lease.clone());

        Ok(LeaseResult::Success {
            lease,
            renewed: false,
        })
    }

    fn release(&self, resource: &ResourceRef, mode: LockMode, holder: &str) -> CoordResult<bool> {
        let mut tables = self.tables();
        let before = tables.leases.len();
        tables
            .leases
            .retain(|_, l| !(&l.resource == resource && l.mode == mode && l.holder == holder));
        Ok(tables.leases.len() < before)
    }

    fn active_leases(&self, now: u64) -> CoordResult<Vec<ResourceLock>> {
        let tables = self.tables();
        Ok(tables
            .leases
            .values()
            .filter(|l| l.is_live(now))
            .cloned()
            .collect())
    }

    fn evict_expired(&self, now: u64) -> CoordResult<usize> {
        let mut tables = self.tables();
        let before = tables.leases.len();
        tables.leases.retain(|_, l| l.is_live(now));
        Ok(before - tables.leases.len())
    }
}

/// Process-local session store, used in tests and single-node setups.
#[derive(Default)]
pub struct InMemorySessionStore {
    sessions: Mutex<HashMap<String, SessionRecord>>,
}

impl InMemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn sessions(&self) -> std::sync::MutexGuard<'_, HashMap<String, SessionRecord>> {
        self.sessions.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn update(&self, session_id: &str, f: impl FnOnce(&mut SessionRecord)) -> bool {
        match self.sessions().get_mut(session_id) {
            Some(record) => {
                f(record);
                true
            }
            None => false,
        }
    }
}

impl SessionStore for InMemorySessionStore {
    fn insert(&self, record: &SessionRecord) -> CoordResult<()> {
        self.sessions().insert(record.id.clone(), record.clone());
        Ok(())
    }

    fn load(&self, session_id: &str) -> CoordResult<Option<SessionRecord>> {
        Ok(self.sessions().get(session_id).cloned())
    }

    fn active_for_user(&self, user_id: &str) -> CoordResult<Vec<SessionRecord>> {
        let mut sessions: Vec<SessionRecord> = self
            .sessions()
            .values()
            .filter(|s| s.user_id == user_id && s.is_active)
            .cloned()
            .collect();
        sessions.sort_by_key(|s| s.created_at);
        Ok(sessions)
    }

    fn touch(&self, session_id: &str, last_activity_at: u64) -> CoordResult<bool> {
        match self.sessions().get_mut(session_id) {
            Some(record) if record.is_active => {
                record.last_activity_at = last_activity_at;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    fn set_expiry(&self, session_id: &str, expires_at: u64) -> CoordResult<bool> {
        Ok(self.update(session_id, |s| s.expires_at = expires_at))
    }

    fn deactivate(&self, session_id: &str) -> CoordResult<bool> {
        Ok(self.update(session_id, |s| s.is_active = false))
    }

    fn deactivate_user(&self, user_id: &str) -> CoordResult<Vec<String>> {
        let mut ids = Vec::new();
        for session in self.sessions().values_mut() {
            if session.user_id == user_id && session.is_active {
                session.is_active = false;
                ids.push(session.id.clone());
            }
        }
        Ok(ids)
    }

    fn deactivate_stale(&self, now: u64, idle_timeout: u64) -> CoordResult<usize> {
        let mut count = 0;
        for session in self.sessions().values_mut() {
            let idle = now.saturating_sub(session.last_activity_at) >= idle_timeout;
            if session.is_active && (session.expires_at <= now || idle) {
                session.is_active = false;
                count += 1;
            }
        }
        Ok(count)
    }
}
