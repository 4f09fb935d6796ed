use serde::{Deserialize, Serialize};

use super::{LockMode, ResourceRef};

/// A time-bound claim on a resource
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceLock {
    /// Unique lease ID
    pub lease_id: String,
    /// The leased resource
    pub resource: ResourceRef,
    pub mode: LockMode,
    /// Worker holding the lease
    pub holder: String,
    /// When the lease was first acquired
    pub acquired_at: u64,
    /// When the lease lapses unless re-acquired
    pub expires_at: u64,
}

impl ResourceLock {
    pub fn new(
        lease_id: String,
        resource: ResourceRef,
        mode: LockMode,
        holder: String,
        ttl: u64,
        now: u64,
    ) -> Self {
        Self {
            lease_id,
            resource,
            mode,
            holder,
            acquired_at: now,
            expires_at: now.saturating_add(ttl),
        }
    }

    /// A lease at or past its expiry is logically absent.
    pub fn is_live(&self, now: u64) -> bool {
        self.expires_at > now
    }
}

/// Fresh, globally unique lease identifier
pub fn generate_lease_id() -> String {
    format!("lease_{}", nanoid::nanoid!())
}

/// Parameters of a single acquisition attempt
#[derive(Debug, Clone)]
pub struct LeaseRequest {
    pub resource: ResourceRef,
    pub mode: LockMode,
    pub holder: String,
    /// Time-to-live in milliseconds
    pub ttl: u64,
}

impl LeaseRequest {
    pub fn new(resource: ResourceRef, mode: LockMode, holder: impl Into<String>, ttl: u64) -> Self {
        Self {
            resource,
            mode,
            holder: holder.into(),
            ttl,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LeaseFailureReason {
    /// Another holder has an exclusive lease on the resource
    ExclusiveHeld,
    /// Shared leases are held, so an exclusive one cannot be granted
    SharedHeld,
}

/// Result of attempting to acquire a lease
#[derive(Debug, Clone)]
pub enum LeaseResult {
    Success {
        lease: ResourceLock,
        /// True when the caller already held the lease and its TTL was extended
        renewed: bool,
    },
    Failure {
        reason: LeaseFailureReason,
        existing_lease: Option<ResourceLock>,
    },
}
