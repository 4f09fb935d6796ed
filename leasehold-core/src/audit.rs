//! Worker lifecycle audit events.

use crate::types::WorkerStatus;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuditEvent {
    WorkerRegistered {
        worker_id: String,
        campaign_id: String,
        worker_type: String,
    },
    WorkerStatusChanged {
        worker_id: String,
        campaign_id: String,
        status: WorkerStatus,
        operation: Option<String>,
    },
    WorkersReaped {
        count: usize,
    },
}

/// Receives audit events. Implementations must not block for long; they are
/// called inline from coordination paths.
pub trait AuditSink: Send + Sync {
    fn record(&self, event: AuditEvent);
}

/// Writes audit events as `tracing` events under the `audit` target.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingAuditSink;

impl AuditSink for TracingAuditSink {
    fn record(&self, event: AuditEvent) {
        match event {
            AuditEvent::WorkerRegistered {
                worker_id,
                campaign_id,
                worker_type,
            } => tracing::info!(
                target: "audit",
                %worker_id,
                %campaign_id,
                %worker_type,
                "worker_registered"
            ),
            AuditEvent::WorkerStatusChanged {
                worker_id,
                campaign_id,
                status,
                operation,
            } => tracing::info!(
                target: "audit",
                %worker_id,
                %campaign_id,
                %status,
                operation = operation.as_deref().unwrap_or(""),
                "worker_status_changed"
            ),
            AuditEvent::WorkersReaped { count } => {
                tracing::info!(target: "audit", count, "workers_reaped")
            }
        }
    }
}
