use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::types::{SessionId, SessionUser};

/// Session data from a successful credential exchange.
///
/// Passed to [`SessionStore::create`](super::SessionStore::create) for the consumer to persist.
/// A session never implies a Gmail grant; those are authorized separately.
#[derive(Debug, Clone)]
pub struct NewSession {
    /// User returned by [`UserStore::find_or_create`](super::UserStore::find_or_create).
    pub user: SessionUser,
    pub expires_at: OffsetDateTime,
    /// Client `User-Agent` header value.
    pub user_agent: Option<String>,
    /// Client IP address.
    pub ip_address: Option<String>,
}

/// A stored server session, keyed by the opaque token in the session cookie.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub id: SessionId,
    pub user: SessionUser,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub expires_at: OffsetDateTime,
    #[serde(default)]
    pub user_agent: Option<String>,
    #[serde(default)]
    pub ip_address: Option<String>,
}

impl Session {
    /// Materialize `new` under `id`, created at `now`.
    #[must_use]
    pub fn from_new(id: SessionId, new: NewSession, now: OffsetDateTime) -> Self {
        Self {
            id,
            user: new.user,
            created_at: now,
            expires_at: new.expires_at,
            user_agent: new.user_agent,
            ip_address: new.ip_address,
        }
    }

    #[must_use]
    pub fn is_expired(&self, now: OffsetDateTime) -> bool {
        self.expires_at <= now
    }
}
