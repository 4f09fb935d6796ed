use crate::error::CoordResult;
use crate::types::{
    LeaseRequest, LeaseResult, LockMode, ResourceLock, ResourceRef, SessionRecord, WorkerRecord,
    WorkerStatus,
};

/// Defines the contract for the shared lease store: worker liveness rows and
/// resource leases.
///
/// Every method that depends on time takes `now` explicitly so backends never
/// consult a clock of their own. Implementations must make `try_acquire`
/// atomic: the conflict check and the write happen as one step.
pub trait LeaseStore: Send + Sync {
    /// Insert or refresh a worker row keyed by (worker_id, campaign_id)
    fn upsert_worker(&self, record: &WorkerRecord) -> CoordResult<()>;

    /// Renew every row owned by the worker. Returns the number of rows touched.
    fn touch_worker(&self, worker_id: &str, now: u64) -> CoordResult<usize>;

    /// Set status and last operation, also counting as a heartbeat.
    /// Returns false when no such row exists.
    fn set_worker_status(
        &self,
        worker_id: &str,
        campaign_id: &str,
        status: WorkerStatus,
        operation: Option<&str>,
        now: u64,
    ) -> CoordResult<bool>;

    /// All worker rows, optionally filtered by campaign
    fn list_workers(&self, campaign_id: Option<&str>) -> CoordResult<Vec<WorkerRecord>>;

    /// Delete worker rows whose last heartbeat is at or before `cutoff`
    fn delete_workers_before(&self, cutoff: u64) -> CoordResult<usize>;

    /// Attempt to acquire (or renew) a lease
    fn try_acquire(&self, request: &LeaseRequest, now: u64) -> CoordResult<LeaseResult>;

    /// Release a lease held by `holder`. Returns false when nothing matched.
    fn release(&self, resource: &ResourceRef, mode: LockMode, holder: &str) -> CoordResult<bool>;

    /// Get all leases that have not expired at `now`
    fn active_leases(&self, now: u64) -> CoordResult<Vec<ResourceLock>>;

    /// Delete leases that expired at or before `now`
    fn evict_expired(&self, now: u64) -> CoordResult<usize>;
}

/// Durable source of truth for sessions.
pub trait SessionStore: Send + Sync {
    fn insert(&self, record: &SessionRecord) -> CoordResult<()>;

    fn load(&self, session_id: &str) -> CoordResult<Option<SessionRecord>>;

    /// Active sessions for a user, oldest first
    fn active_for_user(&self, user_id: &str) -> CoordResult<Vec<SessionRecord>>;

    /// Record activity on an active session. `false` when the session is
    /// missing or no longer active.
    fn touch(&self, session_id: &str, last_activity_at: u64) -> CoordResult<bool>;

    fn set_expiry(&self, session_id: &str, expires_at: u64) -> CoordResult<bool>;

    fn deactivate(&self, session_id: &str) -> CoordResult<bool>;

    /// Deactivate every session of the user, returning the affected IDs
    fn deactivate_user(&self, user_id: &str) -> CoordResult<Vec<String>>;

    /// Deactivate sessions past expiry or idle for at least `idle_timeout` ms
    fn deactivate_stale(&self, now: u64, idle_timeout: u64) -> CoordResult<usize>;
}
