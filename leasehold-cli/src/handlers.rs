use serde::Serialize;

use leasehold_core::error::{CoordError, CoordResult};
use leasehold_core::types::{LockMode, ResourceLock, WorkerRecord, WorkerStats};

/// Holder and worker identity used by read-only commands
pub const CLI_IDENTITY: &str = "leasehold-cli";

// ─── Validation Helpers ─────────────────────────────────────────────────────

pub fn require(field: &str, value: &str) -> CoordResult<()> {
    if value.trim().is_empty() {
        return Err(CoordError::InvalidArgument(format!("{field} is required")));
    }
    Ok(())
}

pub fn parse_mode(mode: &str) -> CoordResult<LockMode> {
    mode.to_uppercase().parse()
}

// ─── Request Types ──────────────────────────────────────────────────────────

pub struct AcquireLeaseRequest {
    pub holder: String,
    pub resource_type: String,
    pub resource_id: String,
    pub mode: String,
    pub ttl: u64,
}

impl AcquireLeaseRequest {
    /// Checks every field and returns the parsed mode.
    pub fn validate(&self) -> CoordResult<LockMode> {
        require("holder", &self.holder)?;
        require("resource_type", &self.resource_type)?;
        require("resource_id", &self.resource_id)?;
        if self.ttl == 0 {
            return Err(CoordError::InvalidArgument(
                "ttl must be greater than 0".to_string(),
            ));
        }
        parse_mode(&self.mode)
    }
}

// ─── Response Types ─────────────────────────────────────────────────────────

#[derive(Serialize)]
pub struct LeaseResponse {
    pub lease_id: String,
    pub holder: String,
    pub resource: String,
    pub mode: String,
}

#[derive(Serialize)]
pub struct ReleaseResponse {
    pub released: bool,
}

#[derive(Serialize)]
pub struct ActiveLeaseInfo {
    pub lease_id: String,
    pub holder: String,
    pub resource: String,
    pub mode: String,
    pub expires_at: u64,
}

impl From<ResourceLock> for ActiveLeaseInfo {
    fn from(lease: ResourceLock) -> Self {
        Self {
            resource: lease.resource.to_string(),
            mode: lease.mode.to_string(),
            lease_id: lease.lease_id,
            holder: lease.holder,
            expires_at: lease.expires_at,
        }
    }
}

#[derive(Serialize)]
pub struct WorkerInfo {
    pub worker_id: String,
    pub worker_type: String,
    pub status: String,
    pub last_operation: Option<String>,
    pub last_heartbeat_at: u64,
}

impl From<WorkerRecord> for WorkerInfo {
    fn from(worker: WorkerRecord) -> Self {
        Self {
            status: worker.status.to_string(),
            worker_id: worker.worker_id,
            worker_type: worker.worker_type,
            last_operation: worker.last_operation,
            last_heartbeat_at: worker.last_heartbeat_at,
        }
    }
}

#[derive(Serialize)]
pub struct StatsResponse {
    pub workers: WorkerStats,
    pub active_leases: usize,
    pub version: String,
}

pub fn print_json<T: Serialize>(value: &T) -> CoordResult<()> {
    let rendered = serde_json::to_string_pretty(value)?;
    println!("{rendered}");
    Ok(())
}
