//! Worker registry: registration, heartbeats, liveness queries and reaping.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use crate::audit::{AuditEvent, AuditSink, TracingAuditSink};
use crate::clock::{duration_ms, Clock};
use crate::config::CoordinationConfig;
use crate::error::{CoordError, CoordResult};
use crate::infrastructure::LeaseStore;
use crate::maintenance::{spawn_periodic, TaskHandle};
use crate::types::{WorkerRecord, WorkerStats, WorkerStatus};

/// Liveness bookkeeping for one worker identity.
///
/// A worker may be registered in several campaigns at once; the heartbeat
/// renews all of its rows together.
pub struct WorkerRegistry {
    worker_id: String,
    store: Arc<dyn LeaseStore>,
    clock: Arc<dyn Clock>,
    config: CoordinationConfig,
    audit: Arc<dyn AuditSink>,
    heartbeat: Mutex<Option<TaskHandle>>,
}

impl WorkerRegistry {
    pub fn new(
        worker_id: impl Into<String>,
        store: Arc<dyn LeaseStore>,
        clock: Arc<dyn Clock>,
        config: CoordinationConfig,
    ) -> Self {
        Self {
            worker_id: worker_id.into(),
            store,
            clock,
            config,
            audit: Arc::new(TracingAuditSink),
            heartbeat: Mutex::new(None),
        }
    }

    pub fn with_audit_sink(mut self, audit: Arc<dyn AuditSink>) -> Self {
        self.audit = audit;
        self
    }

    pub fn worker_id(&self) -> &str {
        &self.worker_id
    }

    /// `heartbeat_interval × missed_heartbeats`
    pub fn staleness_window(&self) -> Duration {
        self.config.staleness_window()
    }

    fn window_ms(&self) -> u64 {
        duration_ms(self.staleness_window())
    }

    fn heartbeat_slot(&self) -> MutexGuard<'_, Option<TaskHandle>> {
        self.heartbeat.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Insert or refresh this worker's row for the campaign, status idle.
    pub fn register_worker(&self, campaign_id: &str, worker_type: &str) -> CoordResult<()> {
        let now = self.clock.now_ms();
        let record = WorkerRecord::new(&self.worker_id, campaign_id, worker_type, now);
        self.store.upsert_worker(&record)?;

        tracing::info!(
            worker_id = %self.worker_id,
            campaign_id,
            worker_type,
            "Worker registered"
        );
        self.audit.record(AuditEvent::WorkerRegistered {
            worker_id: self.worker_id.clone(),
            campaign_id: campaign_id.to_string(),
            worker_type: worker_type.to_string(),
        });
        Ok(())
    }

    /// Spawn the heartbeat loop, replacing any loop already running.
    pub fn start_heartbeat(&self) -> CoordResult<()> {
        let store = Arc::clone(&self.store);
        let clock = Arc::clone(&self.clock);
        let worker_id = self.worker_id.clone();

        let handle = spawn_periodic("heartbeat", self.config.heartbeat_interval, move || {
            match store.touch_worker(&worker_id, clock.now_ms()) {
                Ok(0) => tracing::warn!(%worker_id, "Heartbeat matched no worker rows"),
                Ok(_) => {}
                Err(e) => tracing::warn!(%worker_id, error = %e, "Heartbeat failed"),
            }
        })?;

        if let Some(previous) = self.heartbeat_slot().replace(handle) {
            previous.stop();
        }
        tracing::debug!(worker_id = %self.worker_id, "Heartbeat started");
        Ok(())
    }

    /// Signal the heartbeat loop to stop. Returns whether one was running.
    /// Leases held by this worker are left in place.
    pub fn stop_heartbeat(&self) -> bool {
        match self.heartbeat_slot().take() {
            Some(handle) => {
                let was_running = handle.stop();
                tracing::debug!(worker_id = %self.worker_id, "Heartbeat stopped");
                was_running
            }
            None => false,
        }
    }

    pub fn is_heartbeat_running(&self) -> bool {
        self.heartbeat_slot()
            .as_ref()
            .is_some_and(TaskHandle::is_running)
    }

    /// Workers of the campaign within the staleness window, most recent first.
    pub fn get_active_workers(&self, campaign_id: &str) -> CoordResult<Vec<WorkerRecord>> {
        let now = self.clock.now_ms();
        let window = self.window_ms();
        let mut workers: Vec<WorkerRecord> = self
            .store
            .list_workers(Some(campaign_id))?
            .into_iter()
            .filter(|w| w.is_live(now, window))
            .collect();
        workers.sort_by(|a, b| b.last_heartbeat_at.cmp(&a.last_heartbeat_at));
        Ok(workers)
    }

    /// Delete every worker row past the staleness window, in any campaign.
    pub fn cleanup_stale_workers(&self) -> CoordResult<usize> {
        let Some(cutoff) = self.clock.now_ms().checked_sub(self.window_ms()) else {
            return Ok(0);
        };
        let removed = self.store.delete_workers_before(cutoff)?;
        if removed > 0 {
            tracing::info!(removed, "Cleaned up stale workers");
            self.audit
                .record(AuditEvent::WorkersReaped { count: removed });
        }
        Ok(removed)
    }

    /// Record what this worker is doing. Also counts as a heartbeat.
    pub fn update_worker_status(
        &self,
        campaign_id: &str,
        status: WorkerStatus,
        operation: Option<&str>,
    ) -> CoordResult<()> {
        let now = self.clock.now_ms();
        let updated =
            self.store
                .set_worker_status(&self.worker_id, campaign_id, status, operation, now)?;
        if !updated {
            return Err(CoordError::not_found(
                "worker",
                format!("{}/{campaign_id}", self.worker_id),
            ));
        }
        self.audit.record(AuditEvent::WorkerStatusChanged {
            worker_id: self.worker_id.clone(),
            campaign_id: campaign_id.to_string(),
            status,
            operation: operation.map(str::to_string),
        });
        Ok(())
    }

    /// Counts across every stored worker row.
    pub fn worker_stats(&self) -> CoordResult<WorkerStats> {
        let now = self.clock.now_ms();
        let window = self.window_ms();
        let mut stats = WorkerStats::default();
        for worker in self.store.list_workers(None)? {
            stats.total += 1;
            match worker.status {
                WorkerStatus::Working => stats.working += 1,
                WorkerStatus::Idle => stats.idle += 1,
                WorkerStatus::Error => stats.errored += 1,
            }
            if worker.is_live(now, window) {
                stats.active += 1;
            }
        }
        Ok(stats)
    }
}

impl Drop for WorkerRegistry {
    fn drop(&mut self) {
        self.stop_heartbeat();
    }
}
