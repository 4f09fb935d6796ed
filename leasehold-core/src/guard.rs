//! Runs operations under an exclusive lease so that at most one worker
//! executes a given unit at a time.

use serde::Serialize;
use std::collections::HashSet;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use thiserror::Error;

use crate::error::{CoordError, CoordResult};
use crate::locks::ResourceLockManager;
use crate::registry::WorkerRegistry;
use crate::types::{LockMode, WorkerStatus};

/// Resource type of the lease taken by [`OperationGuard::run_exclusive`]
pub const OPERATION_RESOURCE_TYPE: &str = "worker_operation";
/// Resource type of the lease taken by [`OperationGuard::claim_next`]
pub const UNIT_RESOURCE_TYPE: &str = "work_unit";

/// Failure of a guarded operation
#[derive(Debug, Error)]
pub enum GuardError<E> {
    /// The lease could not be taken, so the operation never ran
    #[error("coordination failed: {0}")]
    Coordination(CoordError),
    #[error("operation failed: {0}")]
    Operation(E),
}

impl<E> GuardError<E> {
    pub fn is_contention(&self) -> bool {
        matches!(self, GuardError::Coordination(e) if e.is_contention())
    }
}

/// Supplies the next pending unit of work for a campaign.
pub trait WorkSource: Send + Sync {
    fn next_unit(&self, campaign_id: &str) -> CoordResult<Option<String>>;
}

impl<F> WorkSource for F
where
    F: Fn(&str) -> CoordResult<Option<String>> + Send + Sync,
{
    fn next_unit(&self, campaign_id: &str) -> CoordResult<Option<String>> {
        self(campaign_id)
    }
}

/// Read-only snapshot of this worker's coordination state
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CoordinationStatus {
    pub coordination_enabled: bool,
    pub worker_id: String,
    pub active_workers: usize,
    pub total_workers: usize,
    pub held_leases: usize,
}

pub struct OperationGuard {
    locks: Arc<ResourceLockManager>,
    registry: Option<Arc<WorkerRegistry>>,
    lock_ttl: Duration,
    // "type:id" of operations running in this process. The lease store
    // treats a second acquire by the same holder as a renewal, so local
    // overlap has to be refused here.
    in_flight: Mutex<HashSet<String>>,
}

fn flight_key(resource_type: &str, resource_id: &str) -> String {
    format!("{resource_type}:{resource_id}")
}

/// Releases the lease and settles worker status when dropped, which covers
/// early returns, cancellation of async operations and panics.
struct HeldOperation<'a> {
    guard: &'a OperationGuard,
    resource_type: &'static str,
    resource_id: String,
    campaign_id: Option<String>,
    succeeded: bool,
}

impl Drop for HeldOperation<'_> {
    fn drop(&mut self) {
        if let Err(e) = self.guard.locks.release_resource_lock(
            self.resource_type,
            &self.resource_id,
            LockMode::Exclusive,
        ) {
            tracing::warn!(
                resource_id = %self.resource_id,
                error = %e,
                "Failed to release operation lease; it will lapse at expiry"
            );
        }
        self.guard
            .in_flight()
            .remove(&flight_key(self.resource_type, &self.resource_id));
        if let Some(campaign_id) = &self.campaign_id {
            let status = if self.succeeded {
                WorkerStatus::Idle
            } else {
                WorkerStatus::Error
            };
            self.guard
                .set_status(campaign_id, status, Some(&self.resource_id));
        }
    }
}

impl OperationGuard {
    pub fn new(locks: Arc<ResourceLockManager>, lock_ttl: Duration) -> Self {
        Self {
            locks,
            registry: None,
            lock_ttl,
            in_flight: Mutex::new(HashSet::new()),
        }
    }

    fn in_flight(&self) -> MutexGuard<'_, HashSet<String>> {
        self.in_flight.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Track worker status (working, idle, error) around guarded operations.
    pub fn with_registry(mut self, registry: Arc<WorkerRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    fn set_status(&self, campaign_id: &str, status: WorkerStatus, operation: Option<&str>) {
        let Some(registry) = &self.registry else {
            return;
        };
        match registry.update_worker_status(campaign_id, status, operation) {
            Ok(()) => {}
            Err(e) if e.is_not_found() => {
                tracing::debug!(campaign_id, "Worker not registered for campaign; status not tracked")
            }
            Err(e) => tracing::warn!(campaign_id, %status, error = %e, "Failed to update worker status"),
        }
    }

    fn enter(
        &self,
        resource_type: &'static str,
        resource_id: &str,
        campaign_id: Option<&str>,
    ) -> CoordResult<HeldOperation<'_>> {
        let key = flight_key(resource_type, resource_id);
        if !self.in_flight().insert(key.clone()) {
            return Err(CoordError::Contention {
                resource: key,
                held_by: Some(self.locks.holder().to_string()),
            });
        }
        if let Err(e) = self.locks.acquire_resource_lock(
            resource_type,
            resource_id,
            LockMode::Exclusive,
            self.lock_ttl,
        ) {
            self.in_flight().remove(&key);
            return Err(e);
        }
        if let Some(campaign_id) = campaign_id {
            self.set_status(campaign_id, WorkerStatus::Working, Some(resource_id));
        }
        Ok(HeldOperation {
            guard: self,
            resource_type,
            resource_id: resource_id.to_string(),
            campaign_id: campaign_id.map(str::to_string),
            succeeded: false,
        })
    }

    /// Run `operation` while holding an exclusive lease on
    /// (`worker_operation`, `coordination_key`). The key doubles as the
    /// campaign for status tracking.
    pub fn run_exclusive<T, E, F>(
        &self,
        coordination_key: &str,
        operation: F,
    ) -> Result<T, GuardError<E>>
    where
        F: FnOnce() -> Result<T, E>,
    {
        let mut held = self
            .enter(OPERATION_RESOURCE_TYPE, coordination_key, Some(coordination_key))
            .map_err(GuardError::Coordination)?;
        let result = operation();
        held.succeeded = result.is_ok();
        drop(held);
        result.map_err(GuardError::Operation)
    }

    pub async fn run_exclusive_async<T, E, F, Fut>(
        &self,
        coordination_key: &str,
        operation: F,
    ) -> Result<T, GuardError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let mut held = self
            .enter(OPERATION_RESOURCE_TYPE, coordination_key, Some(coordination_key))
            .map_err(GuardError::Coordination)?;
        let result = operation().await;
        held.succeeded = result.is_ok();
        drop(held);
        result.map_err(GuardError::Operation)
    }

    /// Ask `source` for the campaign's next pending unit and process it under
    /// that unit's exclusive lease. `Ok(None)` means nothing was pending.
    pub fn claim_next<S, T, E, F>(
        &self,
        source: &S,
        campaign_id: &str,
        operation: F,
    ) -> Result<Option<T>, GuardError<E>>
    where
        S: WorkSource + ?Sized,
        F: FnOnce(&str) -> Result<T, E>,
    {
        let Some(unit_id) = source
            .next_unit(campaign_id)
            .map_err(GuardError::Coordination)?
        else {
            return Ok(None);
        };

        let mut held = self
            .enter(UNIT_RESOURCE_TYPE, &unit_id, Some(campaign_id))
            .map_err(GuardError::Coordination)?;
        let result = operation(&unit_id);
        held.succeeded = result.is_ok();
        drop(held);
        result.map(Some).map_err(GuardError::Operation)
    }

    pub fn status(&self) -> CoordinationStatus {
        let (worker_id, active_workers, total_workers) = match &self.registry {
            Some(registry) => {
                let (active, total) = match registry.worker_stats() {
                    Ok(stats) => (stats.active, stats.total),
                    Err(e) => {
                        tracing::warn!(error = %e, "Failed to read worker stats");
                        (0, 0)
                    }
                };
                (registry.worker_id().to_string(), active, total)
            }
            None => (self.locks.holder().to_string(), 0, 0),
        };
        CoordinationStatus {
            coordination_enabled: true,
            worker_id,
            active_workers,
            total_workers,
            held_leases: self.locks.held_leases().len(),
        }
    }
}
