use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Durable session row. The store's copy is authoritative.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionRecord {
    pub id: String,
    pub user_id: String,
    pub ip_address: String,
    pub user_agent: String,
    pub fingerprint: String,
    pub created_at: u64,
    pub last_activity_at: u64,
    pub expires_at: u64,
    pub is_active: bool,
}

impl SessionRecord {
    pub fn new(
        id: String,
        user_id: impl Into<String>,
        ip_address: impl Into<String>,
        user_agent: impl Into<String>,
        duration: u64,
        now: u64,
    ) -> Self {
        let ip_address = ip_address.into();
        let user_agent = user_agent.into();
        Self {
            fingerprint: fingerprint(&ip_address, &user_agent),
            id,
            user_id: user_id.into(),
            ip_address,
            user_agent,
            created_at: now,
            last_activity_at: now,
            expires_at: now.saturating_add(duration),
            is_active: true,
        }
    }
}

/// Hex SHA-256 of the client address and user agent.
pub fn fingerprint(ip_address: &str, user_agent: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(ip_address.as_bytes());
    hasher.update(b"|");
    hasher.update(user_agent.as_bytes());
    hasher
        .finalize()
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect()
}

/// A session as held by a cache tier.
///
/// `is_valid == false` is a negative entry: the store confirmed the session
/// does not exist or is inactive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CachedSessionEntry {
    pub session: Option<SessionRecord>,
    pub cached_at: u64,
    pub is_valid: bool,
}

impl CachedSessionEntry {
    pub fn positive(session: SessionRecord, now: u64) -> Self {
        Self {
            session: Some(session),
            cached_at: now,
            is_valid: true,
        }
    }

    pub fn negative(now: u64) -> Self {
        Self {
            session: None,
            cached_at: now,
            is_valid: false,
        }
    }

    pub fn is_negative(&self) -> bool {
        !self.is_valid || self.session.is_none()
    }
}
