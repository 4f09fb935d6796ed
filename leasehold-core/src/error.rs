//! Error taxonomy shared by every coordination component.

use thiserror::Error;

/// Errors surfaced by the coordination substrate.
///
/// Contention and absence are distinct variants so callers can branch on
/// them instead of treating every failure as fatal.
#[derive(Debug, Error)]
pub enum CoordError {
    /// A conflicting, unexpired lease is held by someone else.
    #[error("resource {resource} is locked{}", holder_suffix(.held_by))]
    Contention {
        resource: String,
        held_by: Option<String>,
    },

    /// A worker, session or key does not exist.
    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },

    /// The durable store failed.
    #[error("persistence error: {0}")]
    Persistence(String),

    /// Session presented from a different client than the one it was issued to.
    #[error("session security violation: {0}")]
    SecurityViolation(String),

    #[error("session expired")]
    SessionExpired,

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// A background task could not be spawned or joined.
    #[error("runtime error: {0}")]
    Runtime(String),

    #[error("configuration error: {0}")]
    Config(String),
}

impl CoordError {
    pub fn not_found(kind: &'static str, id: impl Into<String>) -> Self {
        CoordError::NotFound {
            kind,
            id: id.into(),
        }
    }

    pub fn is_contention(&self) -> bool {
        matches!(self, CoordError::Contention { .. })
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, CoordError::NotFound { .. })
    }
}

#[cfg(feature = "sqlite")]
impl From<rusqlite::Error> for CoordError {
    fn from(err: rusqlite::Error) -> Self {
        CoordError::Persistence(err.to_string())
    }
}

impl From<serde_json::Error> for CoordError {
    fn from(err: serde_json::Error) -> Self {
        CoordError::Persistence(format!("encoding failed: {err}"))
    }
}

impl From<toml::de::Error> for CoordError {
    fn from(err: toml::de::Error) -> Self {
        CoordError::Config(err.to_string())
    }
}

fn holder_suffix(held_by: &Option<String>) -> String {
    held_by
        .as_deref()
        .map(|h| format!(" by {h}"))
        .unwrap_or_default()
}

pub type CoordResult<T> = Result<T, CoordError>;
