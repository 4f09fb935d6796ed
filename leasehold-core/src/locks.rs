//! Resource leases taken through conditional writes on the lease store.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use crate::clock::{duration_ms, Clock};
use crate::error::{CoordError, CoordResult};
use crate::infrastructure::LeaseStore;
use crate::types::{LeaseRequest, LeaseResult, LockMode, ResourceLock, ResourceRef};

/// Acquires and releases leases on behalf of one holder.
///
/// Acquisition never blocks: a conflicting live lease turns into
/// [`CoordError::Contention`] immediately and the caller decides whether to
/// retry.
pub struct ResourceLockManager {
    holder: String,
    store: Arc<dyn LeaseStore>,
    clock: Arc<dyn Clock>,
    // "type:id:MODE" -> lease, as last granted to this holder
    held: Mutex<HashMap<String, ResourceLock>>,
}

fn held_key(resource: &ResourceRef, mode: LockMode) -> String {
    format!("{}:{mode}", resource.key())
}

impl ResourceLockManager {
    pub fn new(holder: impl Into<String>, store: Arc<dyn LeaseStore>, clock: Arc<dyn Clock>) -> Self {
        Self {
            holder: holder.into(),
            store,
            clock,
            held: Mutex::new(HashMap::new()),
        }
    }

    pub fn holder(&self) -> &str {
        &self.holder
    }

    fn held(&self) -> MutexGuard<'_, HashMap<String, ResourceLock>> {
        self.held.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Take a lease, or renew it if this holder already has it in the same
    /// mode. Returns the lease id.
    pub fn acquire_resource_lock(
        &self,
        resource_type: &str,
        resource_id: &str,
        mode: LockMode,
        ttl: Duration,
    ) -> CoordResult<String> {
        let ttl_ms = duration_ms(ttl);
        if ttl_ms == 0 {
            return Err(CoordError::InvalidArgument(
                "lease ttl must be at least one millisecond".into(),
            ));
        }

        let resource = ResourceRef::new(resource_type, resource_id);
        let request = LeaseRequest::new(resource.clone(), mode, &self.holder, ttl_ms);

        match self.store.try_acquire(&request, self.clock.now_ms())? {
            LeaseResult::Success { lease, renewed } => {
                if renewed {
                    tracing::debug!(lease_id = %lease.lease_id, %resource, "Lease renewed");
                } else {
                    tracing::info!(
                        lease_id = %lease.lease_id,
                        %resource,
                        %mode,
                        holder = %self.holder,
                        "Lease acquired"
                    );
                }
                let lease_id = lease.lease_id.clone();
                self.held().insert(held_key(&resource, mode), lease);
                Ok(lease_id)
            }
            LeaseResult::Failure {
                reason,
                existing_lease,
            } => {
                let held_by = existing_lease.map(|l| l.holder);
                tracing::debug!(
                    %resource,
                    %mode,
                    ?reason,
                    held_by = held_by.as_deref().unwrap_or("unknown"),
                    "Lease contention"
                );
                Err(CoordError::Contention {
                    resource: resource.to_string(),
                    held_by,
                })
            }
        }
    }

    /// Drop this holder's lease. Releasing something not held is not an error.
    pub fn release_resource_lock(
        &self,
        resource_type: &str,
        resource_id: &str,
        mode: LockMode,
    ) -> CoordResult<()> {
        let resource = ResourceRef::new(resource_type, resource_id);
        self.held().remove(&held_key(&resource, mode));
        if self.store.release(&resource, mode, &self.holder)? {
            tracing::info!(%resource, %mode, holder = %self.holder, "Lease released");
        } else {
            tracing::debug!(%resource, %mode, "Release matched no lease");
        }
        Ok(())
    }

    /// Leases this process believes it holds and that have not yet expired.
    pub fn held_leases(&self) -> Vec<ResourceLock> {
        let now = self.clock.now_ms();
        let mut leases: Vec<ResourceLock> = self
            .held()
            .values()
            .filter(|l| l.is_live(now))
            .cloned()
            .collect();
        leases.sort_by_key(|l| l.acquired_at);
        leases
    }

    /// Every live lease in the store, from any holder.
    pub fn active_leases(&self) -> CoordResult<Vec<ResourceLock>> {
        self.store.active_leases(self.clock.now_ms())
    }

    /// Delete expired lease rows from the store.
    pub fn evict_expired(&self) -> CoordResult<usize> {
        let now = self.clock.now_ms();
        self.held().retain(|_, l| l.is_live(now));
        self.store.evict_expired(now)
    }
}
