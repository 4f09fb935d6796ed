//! High-level facade that wires storage, configuration and a clock into the
//! coordination components for one worker process. The CLI delegates to this.

use std::sync::Arc;

use crate::clock::{Clock, SystemClock};
use crate::config::Config;
use crate::guard::OperationGuard;
use crate::idempotency::IdempotencyCache;
use crate::infrastructure::{LeaseStore, SessionStore};
use crate::infrastructure_in_memory::{InMemoryLeaseStore, InMemorySessionStore};
use crate::locks::ResourceLockManager;
use crate::maintenance::Reaper;
use crate::registry::WorkerRegistry;
use crate::session::SessionService;

/// Every coordination component for a single worker identity, sharing one
/// store and one clock.
pub struct Coordinator {
    config: Config,
    clock: Arc<dyn Clock>,
    registry: Arc<WorkerRegistry>,
    locks: Arc<ResourceLockManager>,
    guard: OperationGuard,
    sessions: Arc<SessionService>,
}

impl Coordinator {
    /// Process-local stores. Coordinates threads, not processes.
    pub fn in_memory(worker_id: &str, config: Config) -> Self {
        Self::with_stores(
            worker_id,
            config,
            Arc::new(InMemoryLeaseStore::new()),
            Arc::new(InMemorySessionStore::new()),
            Arc::new(SystemClock),
        )
    }

    /// Stores backed by the SQLite file at `path`. Every process pointing at
    /// the same file shares workers, leases and tier-2 session entries.
    #[cfg(feature = "sqlite")]
    pub fn with_sqlite(path: &str, worker_id: &str, config: Config) -> crate::error::CoordResult<Self> {
        use crate::infrastructure_sqlite::{SqliteCache, SqliteLeaseStore, SqliteSessionStore};

        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let lease_store: Arc<dyn LeaseStore> = Arc::new(SqliteLeaseStore::open(path)?);
        let session_store: Arc<dyn SessionStore> = Arc::new(SqliteSessionStore::open(path)?);

        let mut coordinator = Self::with_stores(
            worker_id,
            config,
            lease_store,
            Arc::clone(&session_store),
            Arc::clone(&clock),
        );
        // Tier-2 lives in the same file so other processes see it
        if coordinator.config.session.distributed_cache {
            let cache = SqliteCache::open(path, Arc::clone(&clock))?;
            coordinator.sessions = Arc::new(
                SessionService::new(session_store, coordinator.config.session.clone(), clock)
                    .with_distributed_backend(Arc::new(cache)),
            );
        }
        tracing::debug!(path, worker_id, "Opened SQLite coordination stores");
        Ok(coordinator)
    }

    pub fn with_stores(
        worker_id: &str,
        config: Config,
        lease_store: Arc<dyn LeaseStore>,
        session_store: Arc<dyn SessionStore>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let registry = Arc::new(WorkerRegistry::new(
            worker_id,
            Arc::clone(&lease_store),
            Arc::clone(&clock),
            config.coordination.clone(),
        ));
        let locks = Arc::new(ResourceLockManager::new(
            worker_id,
            lease_store,
            Arc::clone(&clock),
        ));
        let guard = OperationGuard::new(Arc::clone(&locks), config.coordination.operation_lock_ttl)
            .with_registry(Arc::clone(&registry));
        let sessions = Arc::new(SessionService::new(
            session_store,
            config.session.clone(),
            Arc::clone(&clock),
        ));

        Self {
            config,
            clock,
            registry,
            locks,
            guard,
            sessions,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    pub fn registry(&self) -> &Arc<WorkerRegistry> {
        &self.registry
    }

    pub fn locks(&self) -> &Arc<ResourceLockManager> {
        &self.locks
    }

    pub fn guard(&self) -> &OperationGuard {
        &self.guard
    }

    pub fn sessions(&self) -> &Arc<SessionService> {
        &self.sessions
    }

    /// A reaper over this coordinator's stores
    pub fn reaper(&self) -> Arc<Reaper> {
        Arc::new(Reaper::new(
            Arc::clone(&self.registry),
            Arc::clone(&self.locks),
        ))
    }

    /// A fresh idempotency cache using the configured TTL and sweep interval.
    pub fn idempotency_cache<T: Clone + Send + 'static>(&self) -> IdempotencyCache<T> {
        IdempotencyCache::new(&self.config.idempotency, Arc::clone(&self.clock))
    }
}
