use serde::{Deserialize, Serialize};
use std::str::FromStr;

use crate::error::CoordError;

/// Lease modes. The wire form is exactly `EXCLUSIVE` or `SHARED`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LockMode {
    /// Single holder, incompatible with every other lease on the resource
    Exclusive,
    /// Many holders, incompatible only with an exclusive lease
    Shared,
}

impl LockMode {
    /// Returns the numeric index for O(1) matrix lookup
    pub fn to_index(self) -> usize {
        match self {
            LockMode::Exclusive => 0,
            LockMode::Shared => 1,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            LockMode::Exclusive => "EXCLUSIVE",
            LockMode::Shared => "SHARED",
        }
    }
}

impl std::fmt::Display for LockMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LockMode {
    type Err = CoordError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "EXCLUSIVE" => Ok(LockMode::Exclusive),
            "SHARED" => Ok(LockMode::Shared),
            other => Err(CoordError::InvalidArgument(format!(
                "invalid lock mode '{other}'. Must be one of: EXCLUSIVE, SHARED"
            ))),
        }
    }
}

/// A reference to a lockable resource. Both parts are opaque to the core.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ResourceRef {
    /// e.g. "batch", "campaign", "worker_operation"
    pub resource_type: String,
    pub resource_id: String,
}

impl ResourceRef {
    pub fn new(resource_type: impl Into<String>, resource_id: impl Into<String>) -> Self {
        Self {
            resource_type: resource_type.into(),
            resource_id: resource_id.into(),
        }
    }

    /// Creates a canonical string key for the resource (used for hash-based lookups)
    pub fn key(&self) -> String {
        format!("{}:{}", self.resource_type, self.resource_id)
    }
}

impl std::fmt::Display for ResourceRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.resource_type, self.resource_id)
    }
}

/// What a registered worker is currently doing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerStatus {
    Idle,
    Working,
    Error,
}

impl WorkerStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            WorkerStatus::Idle => "idle",
            WorkerStatus::Working => "working",
            WorkerStatus::Error => "error",
        }
    }

    /// Unknown values read back from storage degrade to `Idle`.
    pub fn parse(s: &str) -> Self {
        match s {
            "working" => WorkerStatus::Working,
            "error" => WorkerStatus::Error,
            _ => WorkerStatus::Idle,
        }
    }
}

impl std::fmt::Display for WorkerStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
