//! SQLite-backed stores.
//! The database file is the shared coordination medium: every worker process
//! opens its own connection to the same file, and write races are arbitrated
//! by `BEGIN IMMEDIATE` transactions.
//!
//! Enable with the `sqlite` feature flag (on by default):
//! ```toml
//! leasehold-core = { path = "../leasehold-core", features = ["sqlite"] }
//! ```

use rusqlite::{params, Connection, OptionalExtension, TransactionBehavior};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use crate::cache::CacheBackend;
use crate::clock::Clock;
use crate::conflict::{ConflictEngine, ConflictResult};
use crate::error::CoordResult;
use crate::infrastructure::{LeaseStore, SessionStore};
use crate::types::*;

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Open a connection tuned for several processes sharing one file.
fn open_connection(path: &str) -> CoordResult<Connection> {
    let conn = Connection::open(path)?;
    conn.busy_timeout(BUSY_TIMEOUT)?;

    // WAL lets readers proceed while a writer holds the lock
    if path != ":memory:" {
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;
    }
    Ok(conn)
}

fn lock_conn(conn: &Mutex<Connection>) -> MutexGuard<'_, Connection> {
    conn.lock().unwrap_or_else(|e| e.into_inner())
}

/// A persistent lease store backed by SQLite.
pub struct SqliteLeaseStore {
    conn: Mutex<Connection>,
}

impl SqliteLeaseStore {
    /// Open (or create) a SQLite database at the given path.
    pub fn open(path: &str) -> CoordResult<Self> {
        let conn = open_connection(path)?;

        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS workers (
                worker_id         TEXT NOT NULL,
                campaign_id       TEXT NOT NULL,
                worker_type       TEXT NOT NULL,
                status            TEXT NOT NULL DEFAULT 'idle',
                last_operation    TEXT,
                registered_at     INTEGER NOT NULL,
                last_heartbeat_at INTEGER NOT NULL,
                PRIMARY KEY (worker_id, campaign_id)
            );
            CREATE INDEX IF NOT EXISTS idx_workers_heartbeat ON workers(last_heartbeat_at);

            CREATE TABLE IF NOT EXISTS resource_locks (
                lease_id      TEXT PRIMARY KEY,
                resource_type TEXT NOT NULL,
                resource_id   TEXT NOT NULL,
                mode          TEXT NOT NULL,
                holder        TEXT NOT NULL,
                acquired_at   INTEGER NOT NULL,
                expires_at    INTEGER NOT NULL,
                UNIQUE (resource_type, resource_id, mode, holder)
            );
            CREATE INDEX IF NOT EXISTS idx_locks_resource ON resource_locks(resource_type, resource_id);
            CREATE INDEX IF NOT EXISTS idx_locks_expiry ON resource_locks(expires_at);",
        )?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn in_memory() -> CoordResult<Self> {
        Self::open(":memory:")
    }

    fn row_to_worker(row: &rusqlite::Row) -> rusqlite::Result<WorkerRecord> {
        let status: String = row.get(3)?;
        Ok(WorkerRecord {
            worker_id: row.get(0)?,
            campaign_id: row.get(1)?,
            worker_type: row.get(2)?,
            status: WorkerStatus::parse(&status),
            last_operation: row.get(4)?,
            registered_at: row.get(5)?,
            last_heartbeat_at: row.get(6)?,
        })
    }

    fn row_to_lock(row: &rusqlite::Row) -> rusqlite::Result<ResourceLock> {
        let mode: String = row.get(3)?;
        Ok(ResourceLock {
            lease_id: row.get(0)?,
            resource: ResourceRef::new(row.get::<_, String>(1)?, row.get::<_, String>(2)?),
            // An unreadable mode is treated as the most restrictive one
            mode: mode.parse().unwrap_or(LockMode::Exclusive),
            holder: row.get(4)?,
            acquired_at: row.get(5)?,
            expires_at: row.get(6)?,
        })
    }
}

const WORKER_COLUMNS: &str =
    "worker_id, campaign_id, worker_type, status, last_operation, registered_at, last_heartbeat_at";

const LOCK_COLUMNS: &str =
    "lease_id, resource_type, resource_id, mode, holder, acquired_at, expires_at";

impl LeaseStore for SqliteLeaseStore {
    fn upsert_worker(&self, record: &WorkerRecord) -> CoordResult<()> {
        lock_conn(&self.conn).execute(
            "INSERT INTO workers (worker_id, campaign_id, worker_type, status, last_operation, registered_at, last_heartbeat_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
             ON CONFLICT (worker_id, campaign_id) DO UPDATE SET
                worker_type = excluded.worker_type,
                status = excluded.status,
                last_operation = excluded.last_operation,
                last_heartbeat_at = excluded.last_heartbeat_at",
            params![
                record.worker_id,
                record.campaign_id,
                record.worker_type,
                record.status.as_str(),
                record.last_operation,
                record.registered_at,
                record.last_heartbeat_at,
            ],
        )?;
        Ok(())
    }

    fn touch_worker(&self, worker_id: &str, now: u64) -> CoordResult<usize> {
        let rows = lock_conn(&self.conn).execute(
            "UPDATE workers SET last_heartbeat_at = ?1 WHERE worker_id = ?2",
            params![now, worker_id],
        )?;
        Ok(rows)
    }

    fn set_worker_status(
        &self,
        worker_id: &str,
        campaign_id: &str,
        status: WorkerStatus,
        operation: Option<&str>,
        now: u64,
    ) -> CoordResult<bool> {
        let rows = lock_conn(&self.conn).execute(
            "UPDATE workers SET status = ?1, last_operation = ?2, last_heartbeat_at = ?3
             WHERE worker_id = ?4 AND campaign_id = ?5",
            params![status.as_str(), operation, now, worker_id, campaign_id],
        )?;
        Ok(rows > 0)
    }

    fn list_workers(&self, campaign_id: Option<&str>) -> CoordResult<Vec<WorkerRecord>> {
        let conn = lock_conn(&self.conn);
        let mut stmt = conn.prepare(&format!(
            "SELECT {WORKER_COLUMNS} FROM workers
             WHERE (?1 IS NULL OR campaign_id = ?1)
             ORDER BY last_heartbeat_at DESC"
        ))?;
        let rows = stmt.query_map(params![campaign_id], Self::row_to_worker)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    fn delete_workers_before(&self, cutoff: u64) -> CoordResult<usize> {
        let rows = lock_conn(&self.conn).execute(
            "DELETE FROM workers WHERE last_heartbeat_at <= ?1",
            params![cutoff],
        )?;
        Ok(rows)
    }

    fn try_acquire(&self, request: &LeaseRequest, now: u64) -> CoordResult<LeaseResult> {
        let mut conn = lock_conn(&self.conn);
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let resource = &request.resource;

        tx.execute(
            "DELETE FROM resource_locks
             WHERE resource_type = ?1 AND resource_id = ?2 AND expires_at <= ?3",
            params![resource.resource_type, resource.resource_id, now],
        )?;

        let on_key = {
            let mut stmt = tx.prepare(&format!(
                "SELECT {LOCK_COLUMNS} FROM resource_locks
                 WHERE resource_type = ?1 AND resource_id = ?2"
            ))?;
            let rows = stmt.query_map(
                params![resource.resource_type, resource.resource_id],
                Self::row_to_lock,
            )?;
            rows.collect::<Result<Vec<_>, _>>()?
        };

        if let ConflictResult::Conflict { reason, existing } = ConflictEngine::check_against_leases(
            &request.holder,
            request.mode,
            resource,
            &on_key,
            now,
        ) {
            tx.commit()?;
            return Ok(LeaseResult::Failure {
                reason,
                existing_lease: Some(existing),
            });
        }

        let expires_at = now.saturating_add(request.ttl);
        let renewed = tx.execute(
            "UPDATE resource_locks SET expires_at = ?1
             WHERE resource_type = ?2 AND resource_id = ?3 AND mode = ?4 AND holder = ?5",
            params![
                expires_at,
                resource.resource_type,
                resource.resource_id,
                request.mode.as_str(),
                request.holder,
            ],
        )? > 0;

        let lease = if renewed {
            tx.query_row(
                &format!(
                    "SELECT {LOCK_COLUMNS} FROM resource_locks
                     WHERE resource_type = ?1 AND resource_id = ?2 AND mode = ?3 AND holder = ?4"
                ),
                params![
                    resource.resource_type,
                    resource.resource_id,
                    request.mode.as_str(),
                    request.holder,
                ],
                Self::row_to_lock,
            )?
        } else {
            let lease = ResourceLock::new(
                generate_lease_id(),
                resource.clone(),
                request.mode,
                request.holder.clone(),
                request.ttl,
                now,
            );
            tx.execute(
                "INSERT INTO resource_locks (lease_id, resource_type, resource_id, mode, holder, acquired_at, expires_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    lease.lease_id,
                    resource.resource_type,
                    resource.resource_id,
                    lease.mode.as_str(),
                    lease.holder,
                    lease.acquired_at,
                    lease.expires_at,
                ],
            )?;
            lease
        };

        tx.commit()?;
        Ok(LeaseResult::Success { lease, renewed })
    }

    fn release(&self, resource: &ResourceRef, mode: LockMode, holder: &str) -> CoordResult<bool> {
        let rows = lock_conn(&self.conn).execute(
            "DELETE FROM resource_locks
             WHERE resource_type = ?1 AND resource_id = ?2 AND mode = ?3 AND holder = ?4",
            params![resource.resource_type, resource.resource_id, mode.as_str(), holder],
        )?;
        Ok(rows > 0)
    }

    fn active_leases(&self, now: u64) -> CoordResult<Vec<ResourceLock>> {
        let conn = lock_conn(&self.conn);
        let mut stmt = conn.prepare(&format!(
            "SELECT {LOCK_COLUMNS} FROM resource_locks WHERE expires_at > ?1 ORDER BY acquired_at"
        ))?;
        let rows = stmt.query_map(params![now], Self::row_to_lock)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    fn evict_expired(&self, now: u64) -> CoordResult<usize> {
        let rows = lock_conn(&self.conn).execute(
            "DELETE FROM resource_locks WHERE expires_at <= ?1",
            params![now],
        )?;
        Ok(rows)
    }
}

/// Durable session table.
pub struct SqliteSessionStore {
    conn: Mutex<Connection>,
}

const SESSION_COLUMNS: &str = "id, user_id, ip_address, user_agent, fingerprint, created_at, last_activity_at, expires_at, is_active";

impl SqliteSessionStore {
    pub fn open(path: &str) -> CoordResult<Self> {
        let conn = open_connection(path)?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS sessions (
                id               TEXT PRIMARY KEY,
                user_id          TEXT NOT NULL,
                ip_address       TEXT NOT NULL DEFAULT '',
                user_agent       TEXT NOT NULL DEFAULT '',
                fingerprint      TEXT NOT NULL DEFAULT '',
                created_at       INTEGER NOT NULL,
                last_activity_at INTEGER NOT NULL,
                expires_at       INTEGER NOT NULL,
                is_active        INTEGER NOT NULL DEFAULT 1
            );
            CREATE INDEX IF NOT EXISTS idx_sessions_user ON sessions(user_id, is_active);",
        )?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn in_memory() -> CoordResult<Self> {
        Self::open(":memory:")
    }

    fn row_to_session(row: &rusqlite::Row) -> rusqlite::Result<SessionRecord> {
        Ok(SessionRecord {
            id: row.get(0)?,
            user_id: row.get(1)?,
            ip_address: row.get(2)?,
            user_agent: row.get(3)?,
            fingerprint: row.get(4)?,
            created_at: row.get(5)?,
            last_activity_at: row.get(6)?,
            expires_at: row.get(7)?,
            is_active: row.get(8)?,
        })
    }
}

impl SessionStore for SqliteSessionStore {
    fn insert(&self, record: &SessionRecord) -> CoordResult<()> {
        lock_conn(&self.conn).execute(
            &format!("INSERT INTO sessions ({SESSION_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)"),
            params![
                record.id,
                record.user_id,
                record.ip_address,
                record.user_agent,
                record.fingerprint,
                record.created_at,
                record.last_activity_at,
                record.expires_at,
                record.is_active,
            ],
        )?;
        Ok(())
    }

    fn load(&self, session_id: &str) -> CoordResult<Option<SessionRecord>> {
        let record = lock_conn(&self.conn)
            .query_row(
                &format!("SELECT {SESSION_COLUMNS} FROM sessions WHERE id = ?1"),
                params![session_id],
                Self::row_to_session,
            )
            .optional()?;
        Ok(record)
    }

    fn active_for_user(&self, user_id: &str) -> CoordResult<Vec<SessionRecord>> {
        let conn = lock_conn(&self.conn);
        let mut stmt = conn.prepare(&format!(
            "SELECT {SESSION_COLUMNS} FROM sessions
             WHERE user_id = ?1 AND is_active = 1
             ORDER BY created_at"
        ))?;
        let rows = stmt.query_map(params![user_id], Self::row_to_session)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    fn touch(&self, session_id: &str, last_activity_at: u64) -> CoordResult<bool> {
        let rows = lock_conn(&self.conn).execute(
            "UPDATE sessions SET last_activity_at = ?1 WHERE id = ?2 AND is_active = 1",
            params![last_activity_at, session_id],
        )?;
        Ok(rows > 0)
    }

    fn set_expiry(&self, session_id: &str, expires_at: u64) -> CoordResult<bool> {
        let rows = lock_conn(&self.conn).execute(
            "UPDATE sessions SET expires_at = ?1 WHERE id = ?2",
            params![expires_at, session_id],
        )?;
        Ok(rows > 0)
    }

    fn deactivate(&self, session_id: &str) -> CoordResult<bool> {
        let rows = lock_conn(&self.conn).execute(
            "UPDATE sessions SET is_active = 0 WHERE id = ?1",
            params![session_id],
        )?;
        Ok(rows > 0)
    }

    fn deactivate_user(&self, user_id: &str) -> CoordResult<Vec<String>> {
        let mut conn = lock_conn(&self.conn);
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let ids = {
            let mut stmt =
                tx.prepare("SELECT id FROM sessions WHERE user_id = ?1 AND is_active = 1")?;
            let rows = stmt.query_map(params![user_id], |row| row.get::<_, String>(0))?;
            rows.collect::<Result<Vec<_>, _>>()?
        };
        tx.execute(
            "UPDATE sessions SET is_active = 0 WHERE user_id = ?1 AND is_active = 1",
            params![user_id],
        )?;
        tx.commit()?;
        Ok(ids)
    }

    fn deactivate_stale(&self, now: u64, idle_timeout: u64) -> CoordResult<usize> {
        let rows = lock_conn(&self.conn).execute(
            "UPDATE sessions SET is_active = 0
             WHERE is_active = 1 AND (expires_at <= ?1 OR ?1 - last_activity_at >= ?2)",
            params![now, idle_timeout],
        )?;
        Ok(rows)
    }
}

/// Cache backend stored in a shared SQLite file, so several processes see the
/// same tier-2 entries. Expiry is lazy on read plus `purge_expired`.
pub struct SqliteCache {
    conn: Mutex<Connection>,
    clock: Arc<dyn Clock>,
}

impl SqliteCache {
    pub fn open(path: &str, clock: Arc<dyn Clock>) -> CoordResult<Self> {
        let conn = open_connection(path)?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS cache_entries (
                key        TEXT PRIMARY KEY,
                value      TEXT NOT NULL,
                expires_at INTEGER NOT NULL
            );",
        )?;
        Ok(Self {
            conn: Mutex::new(conn),
            clock,
        })
    }
}

impl CacheBackend for SqliteCache {
    fn get(&self, key: &str) -> CoordResult<Option<String>> {
        let value = lock_conn(&self.conn)
            .query_row(
                "SELECT value FROM cache_entries WHERE key = ?1 AND expires_at > ?2",
                params![key, self.clock.now_ms()],
                |row| row.get::<_, String>(0),
            )
            .optional()?;
        Ok(value)
    }

    fn set_with_ttl(&self, key: &str, value: String, ttl: u64) -> CoordResult<()> {
        let expires_at = self.clock.now_ms().saturating_add(ttl);
        lock_conn(&self.conn).execute(
            "INSERT OR REPLACE INTO cache_entries (key, value, expires_at) VALUES (?1, ?2, ?3)",
            params![key, value, expires_at],
        )?;
        Ok(())
    }

    fn delete(&self, key: &str) -> CoordResult<()> {
        lock_conn(&self.conn).execute("DELETE FROM cache_entries WHERE key = ?1", params![key])?;
        Ok(())
    }

    fn purge_expired(&self) -> CoordResult<usize> {
        let rows = lock_conn(&self.conn).execute(
            "DELETE FROM cache_entries WHERE expires_at <= ?1",
            params![self.clock.now_ms()],
        )?;
        Ok(rows)
    }
}
