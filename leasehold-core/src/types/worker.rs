use serde::{Deserialize, Serialize};

use super::WorkerStatus;

/// Liveness row for one worker in one campaign
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerRecord {
    pub worker_id: String,
    pub campaign_id: String,
    /// Tag such as "domain_generation" or "dns_validation"
    pub worker_type: String,
    pub status: WorkerStatus,
    pub last_operation: Option<String>,
    pub registered_at: u64,
    pub last_heartbeat_at: u64,
}

impl WorkerRecord {
    pub fn new(
        worker_id: impl Into<String>,
        campaign_id: impl Into<String>,
        worker_type: impl Into<String>,
        now: u64,
    ) -> Self {
        Self {
            worker_id: worker_id.into(),
            campaign_id: campaign_id.into(),
            worker_type: worker_type.into(),
            status: WorkerStatus::Idle,
            last_operation: None,
            registered_at: now,
            last_heartbeat_at: now,
        }
    }

    pub fn is_live(&self, now: u64, staleness_window: u64) -> bool {
        now.saturating_sub(self.last_heartbeat_at) < staleness_window
    }
}

/// Aggregate counts across all worker rows
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerStats {
    pub total: usize,
    pub working: usize,
    pub idle: usize,
    pub errored: usize,
    /// Rows still within the staleness window
    pub active: usize,
}
