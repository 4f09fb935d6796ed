//! TOML configuration. Durations are written the humantime way ("10s", "5m").
//!
//! ```toml
//! [coordination]
//! heartbeat_interval = "10s"
//! missed_heartbeats = 3
//!
//! [session]
//! idle_timeout = "30m"
//! require_ip_match = true
//! ```

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::error::{CoordError, CoordResult};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub coordination: CoordinationConfig,
    pub idempotency: IdempotencyConfig,
    pub session: SessionConfig,
}

impl Config {
    pub fn from_toml_str(content: &str) -> CoordResult<Self> {
        let config: Config = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> CoordResult<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| CoordError::Config(format!("{}: {e}", path.display())))?;
        Self::from_toml_str(&content)
    }

    pub fn validate(&self) -> CoordResult<()> {
        let c = &self.coordination;
        non_zero("coordination.heartbeat_interval", c.heartbeat_interval)?;
        non_zero("coordination.reap_interval", c.reap_interval)?;
        non_zero("coordination.lock_ttl", c.lock_ttl)?;
        non_zero("coordination.operation_lock_ttl", c.operation_lock_ttl)?;
        // With a single interval a healthy worker is stale at every tick
        if c.missed_heartbeats < 2 {
            return Err(CoordError::Config(
                "coordination.missed_heartbeats must be at least 2".into(),
            ));
        }
        non_zero("idempotency.ttl", self.idempotency.ttl)?;
        non_zero("idempotency.sweep_interval", self.idempotency.sweep_interval)?;
        let s = &self.session;
        non_zero("session.duration", s.duration)?;
        non_zero("session.idle_timeout", s.idle_timeout)?;
        non_zero("session.cleanup_interval", s.cleanup_interval)?;
        non_zero("session.cache_ttl", s.cache_ttl)?;
        if s.max_sessions_per_user == 0 {
            return Err(CoordError::Config(
                "session.max_sessions_per_user must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

fn non_zero(field: &str, value: Duration) -> CoordResult<()> {
    if value.is_zero() {
        return Err(CoordError::Config(format!("{field} must be greater than zero")));
    }
    Ok(())
}

/// Heartbeat, reaping and lease timings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoordinationConfig {
    #[serde(with = "humantime_serde")]
    pub heartbeat_interval: Duration,
    /// Heartbeats a worker may miss before it counts as stale
    pub missed_heartbeats: u32,
    #[serde(with = "humantime_serde")]
    pub reap_interval: Duration,
    /// Default lease TTL for ad-hoc locks
    #[serde(with = "humantime_serde")]
    pub lock_ttl: Duration,
    /// TTL of the lease taken around a guarded operation
    #[serde(with = "humantime_serde")]
    pub operation_lock_ttl: Duration,
}

impl CoordinationConfig {
    pub fn staleness_window(&self) -> Duration {
        self.heartbeat_interval
            .saturating_mul(self.missed_heartbeats)
    }
}

impl Default for CoordinationConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval: Duration::from_secs(10),
            missed_heartbeats: 3,
            reap_interval: Duration::from_secs(60),
            lock_ttl: Duration::from_secs(30),
            operation_lock_ttl: Duration::from_secs(120),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IdempotencyConfig {
    #[serde(with = "humantime_serde")]
    pub ttl: Duration,
    #[serde(with = "humantime_serde")]
    pub sweep_interval: Duration,
}

impl Default for IdempotencyConfig {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(5 * 60),
            sweep_interval: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Lifetime of a newly created session
    #[serde(with = "humantime_serde")]
    pub duration: Duration,
    #[serde(with = "humantime_serde")]
    pub idle_timeout: Duration,
    #[serde(with = "humantime_serde")]
    pub cleanup_interval: Duration,
    pub max_sessions_per_user: usize,
    pub require_ip_match: bool,
    pub require_ua_match: bool,
    /// How long a positive cache entry is trusted
    #[serde(with = "humantime_serde")]
    pub cache_ttl: Duration,
    #[serde(with = "humantime_serde")]
    pub negative_cache_ttl: Duration,
    /// Prefix for tier-2 keys
    pub key_prefix: String,
    /// Whether to run a tier-2 cache at all
    pub distributed_cache: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            duration: Duration::from_secs(2 * 60 * 60),
            idle_timeout: Duration::from_secs(30 * 60),
            cleanup_interval: Duration::from_secs(5 * 60),
            max_sessions_per_user: 5,
            require_ip_match: false,
            require_ua_match: false,
            cache_ttl: Duration::from_secs(5 * 60),
            negative_cache_ttl: Duration::from_secs(30),
            key_prefix: "session:".to_string(),
            distributed_cache: true,
        }
    }
}
