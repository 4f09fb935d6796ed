//! # leasehold-core
//!
//! Coordination substrate for worker processes that share one relational
//! store: worker liveness and reaping, EXCLUSIVE/SHARED resource leases,
//! guarded operations, idempotency memoization and tiered session caching.

pub mod audit;
pub mod cache;
pub mod client;
pub mod clock;
pub mod config;
pub mod conflict;
pub mod error;
pub mod guard;
pub mod idempotency;
pub mod infrastructure;
#[path = "infrastructure_in_memory.rs"]
pub mod infrastructure_in_memory;
#[cfg(feature = "sqlite")]
#[path = "infrastructure_sqlite.rs"]
pub mod infrastructure_sqlite;
pub mod locks;
pub mod maintenance;
pub mod registry;
pub mod session;
pub mod types;

#[cfg(test)]
mod config_test;
#[cfg(test)]
mod idempotency_test;
#[cfg(test)]
#[path = "infrastructure_test.rs"]
mod infrastructure_test;
#[cfg(all(test, feature = "sqlite"))]
#[path = "infrastructure_sqlite_test.rs"]
mod infrastructure_sqlite_test;
#[cfg(test)]
mod locks_test;
