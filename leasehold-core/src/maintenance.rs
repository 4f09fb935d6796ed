//! Cancellable periodic background tasks and the stale-resource reaper.
//!
//! Every loop owns its own `tokio::time::interval` and its own `watch` stop
//! channel, so stopping one never disturbs another.

use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::error::{CoordError, CoordResult};
use crate::locks::ResourceLockManager;
use crate::registry::WorkerRegistry;

/// Handle to a running periodic task.
///
/// Dropping the handle signals the task to stop.
pub struct TaskHandle {
    name: String,
    stop: watch::Sender<bool>,
    join: Option<JoinHandle<()>>,
}

impl TaskHandle {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Signal the task to stop without waiting for it. Safe to call any
    /// number of times; returns true only for the call that stopped it.
    pub fn stop(&self) -> bool {
        !self.stop.send_replace(true)
    }

    pub fn is_running(&self) -> bool {
        !*self.stop.borrow() && self.join.as_ref().is_some_and(|j| !j.is_finished())
    }

    /// Stop the task and wait for its loop to exit.
    pub async fn shutdown(mut self) -> CoordResult<()> {
        self.stop();
        if let Some(join) = self.join.take() {
            join.await
                .map_err(|e| CoordError::Runtime(format!("task {} failed: {e}", self.name)))?;
        }
        Ok(())
    }
}

impl Drop for TaskHandle {
    fn drop(&mut self) {
        self.stop.send_replace(true);
    }
}

/// Run `tick` every `period` on the current tokio runtime. The first tick
/// fires one full period after spawning.
///
/// Ticks do store I/O, so each one runs on the blocking pool. A panicking
/// tick is logged and the schedule continues.
pub fn spawn_periodic<F>(name: &str, period: Duration, tick: F) -> CoordResult<TaskHandle>
where
    F: FnMut() + Send + 'static,
{
    if period.is_zero() {
        return Err(CoordError::InvalidArgument(format!(
            "{name}: interval must be greater than zero"
        )));
    }
    let runtime = tokio::runtime::Handle::try_current()
        .map_err(|e| CoordError::Runtime(format!("{name}: no tokio runtime: {e}")))?;

    let (stop_tx, mut stop_rx) = watch::channel(false);
    let task_name = name.to_string();
    let tick = Arc::new(Mutex::new(tick));
    let join = runtime.spawn(async move {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // Skip initial immediate tick
        ticker.tick().await;

        loop {
            tokio::select! {
                changed = stop_rx.changed() => {
                    if changed.is_err() || *stop_rx.borrow() {
                        break;
                    }
                }
                _ = ticker.tick() => {
                    let tick = Arc::clone(&tick);
                    let run = tokio::task::spawn_blocking(move || {
                        let mut tick = tick.lock().unwrap_or_else(|e| e.into_inner());
                        (&mut *tick)()
                    });
                    if let Err(e) = run.await {
                        tracing::warn!(task = %task_name, error = %e, "Periodic tick failed");
                    }
                }
            }
        }
        tracing::debug!(task = %task_name, "Periodic task stopped");
    });

    tracing::debug!(task = %name, period_ms = period.as_millis() as u64, "Periodic task started");
    Ok(TaskHandle {
        name: name.to_string(),
        stop: stop_tx,
        join: Some(join),
    })
}

/// Counts removed by one reaper pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReapReport {
    pub workers: usize,
    pub locks: usize,
}

/// Evicts stale worker rows and expired lock rows.
pub struct Reaper {
    registry: Arc<WorkerRegistry>,
    locks: Arc<ResourceLockManager>,
}

impl Reaper {
    pub fn new(registry: Arc<WorkerRegistry>, locks: Arc<ResourceLockManager>) -> Self {
        Self { registry, locks }
    }

    /// One pass. Failures are logged and the other half still runs.
    pub fn run_once(&self) -> ReapReport {
        let mut report = ReapReport::default();

        match self.registry.cleanup_stale_workers() {
            Ok(count) => report.workers = count,
            Err(e) => tracing::warn!(error = %e, "Stale worker cleanup failed"),
        }
        match self.locks.evict_expired() {
            Ok(count) => report.locks = count,
            Err(e) => tracing::warn!(error = %e, "Expired lock eviction failed"),
        }

        if report.workers > 0 || report.locks > 0 {
            tracing::info!(
                workers = report.workers,
                locks = report.locks,
                "Reaped stale coordination rows"
            );
        }
        report
    }

    pub fn start(self: Arc<Self>, period: Duration) -> CoordResult<TaskHandle> {
        spawn_periodic("reaper", period, move || {
            self.run_once();
        })
    }
}
