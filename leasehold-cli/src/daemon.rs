use leasehold_core::client::Coordinator;
use leasehold_core::config::Config;
use leasehold_core::error::{CoordError, CoordResult};

/// Open the coordinator over SQLite when a database path is given, otherwise
/// over process-local stores.
pub fn open_coordinator(db: Option<&str>, worker_id: &str, config: Config) -> CoordResult<Coordinator> {
    match db {
        None => {
            tracing::warn!("No --db given; using in-memory storage (state ends with this process)");
            Ok(Coordinator::in_memory(worker_id, config))
        }
        Some(path) => {
            #[cfg(feature = "sqlite")]
            {
                tracing::info!(path, "Storage backend: SQLite");
                Coordinator::with_sqlite(path, worker_id, config)
            }
            #[cfg(not(feature = "sqlite"))]
            {
                let _ = (worker_id, config);
                Err(CoordError::Config(format!(
                    "database '{path}' requested but the `sqlite` feature is not enabled"
                )))
            }
        }
    }
}

async fn wait_for_shutdown() -> CoordResult<()> {
    tokio::signal::ctrl_c()
        .await
        .map_err(|e| CoordError::Runtime(format!("failed to listen for Ctrl-C: {e}")))
}

pub async fn run_reaper(coordinator: &Coordinator, once: bool) -> CoordResult<()> {
    let reaper = coordinator.reaper();
    if once {
        let report = reaper.run_once();
        println!("Reaped {} workers, {} locks", report.workers, report.locks);
        return Ok(());
    }

    let period = coordinator.config().coordination.reap_interval;
    tracing::info!(interval = ?period, "Reaper started");
    // First pass right away so a restarted reaper catches up
    reaper.run_once();
    let task = reaper.start(period)?;

    wait_for_shutdown().await?;
    tracing::info!("Shutting down reaper");
    task.shutdown().await
}

pub async fn run_worker(coordinator: &Coordinator, campaign_id: &str, worker_type: &str) -> CoordResult<()> {
    let registry = coordinator.registry();
    registry.register_worker(campaign_id, worker_type)?;
    registry.start_heartbeat()?;
    tracing::info!(
        worker_id = registry.worker_id(),
        campaign_id,
        interval = ?coordinator.config().coordination.heartbeat_interval,
        "Worker heartbeating; press Ctrl-C to stop"
    );

    wait_for_shutdown().await?;
    registry.stop_heartbeat();
    tracing::info!(worker_id = registry.worker_id(), "Worker stopped; row remains until reaped");
    Ok(())
}
