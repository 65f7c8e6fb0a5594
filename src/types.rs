use std::collections::BTreeSet;

use derive_more::{Display, From, Into};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

/// Application user identifier (opaque string).
///
/// Issued by [`UserStore::find_or_create`](crate::middleware::UserStore::find_or_create).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Display, From, Into)]
#[serde(transparent)]
pub struct UserId(pub String);

/// Opaque session token carried in the session cookie.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, Display, From, Into)]
#[serde(transparent)]
pub struct SessionId(pub String);

impl UserId {
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl SessionId {
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Verified claim of who the user is, taken from an identity credential.
///
/// Lives for one sign-in event; only the user reference outlives it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    /// Stable subject identifier from the identity provider (`sub`).
    pub subject: String,
    pub email: String,
    #[serde(default)]
    pub name: Option<String>,
}

/// User record returned to the client after sign-in and by the session probe.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionUser {
    pub id: UserId,
    pub email: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

/// Delegated Gmail credential for one user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderGrant {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(with = "time::serde::rfc3339")]
    pub expires_at: OffsetDateTime,
    #[serde(default)]
    pub scopes: BTreeSet<String>,
}

impl ProviderGrant {
    /// Whether the access token is expired, or will be within `skew`.
    #[must_use]
    pub fn needs_refresh(&self, now: OffsetDateTime, skew: time::Duration) -> bool {
        self.expires_at <= now + skew
    }

    /// Whether every scope in `required` was granted.
    #[must_use]
    pub fn covers(&self, required: &[String]) -> bool {
        required.iter().all(|s| self.scopes.contains(s))
    }
}

/// One row of the inbox listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageSummary {
    pub id: String,
    pub thread_id: String,
    #[serde(default)]
    pub subject: Option<String>,
    #[serde(default)]
    pub from: Option<String>,
    #[serde(default)]
    pub date: Option<String>,
    #[serde(default)]
    pub snippet: String,
    #[serde(default)]
    pub unread: bool,
}

/// A page of mailbox items as served by the messages endpoint.
///
/// `needs_reauth` is set when the provider rejected the grant; the items are
/// then empty and must not be read as an empty inbox.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessagePage {
    pub items: Vec<MessageSummary>,
    pub total_count: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_page: Option<String>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub needs_reauth: bool,
}

impl MessagePage {
    pub(crate) fn reauth_required() -> Self {
        Self {
            needs_reauth: true,
            ..Self::default()
        }
    }
}

/// Identifiers Gmail assigned to a sent message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendReceipt {
    pub provider_message_id: String,
    pub thread_id: String,
}

// ── Wire bodies shared by server and client ───────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CredentialRequest {
    pub credential: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignedInResponse {
    pub user: SessionUser,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionStatus {
    pub authenticated: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<SessionUser>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthUrlResponse {
    pub auth_url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SendRequest {
    pub raw: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiErrorBody {
    pub error: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

/// `error` value of a 403 that means "authorize Gmail", not "sign in".
pub const TOKEN_MISSING: &str = "token_missing";

#[cfg(test)]
mod tests {
    use super::*;

    fn grant(expires_in_secs: i64) -> ProviderGrant {
        ProviderGrant {
            access_token: "at".into(),
            refresh_token: Some("rt".into()),
            expires_at: OffsetDateTime::now_utc() + time::Duration::seconds(expires_in_secs),
            scopes: ["a".to_string(), "b".to_string()].into_iter().collect(),
        }
    }

    #[test]
    fn grant_refresh_window_includes_skew() {
        let now = OffsetDateTime::now_utc();
        assert!(grant(-1).needs_refresh(now, time::Duration::ZERO));
        assert!(grant(30).needs_refresh(now, time::Duration::seconds(60)));
        assert!(!grant(600).needs_refresh(now, time::Duration::seconds(60)));
    }

    #[test]
    fn grant_covers_requires_every_scope() {
        let g = grant(600);
        assert!(g.covers(&["a".into()]));
        assert!(g.covers(&["a".into(), "b".into()]));
        assert!(!g.covers(&["a".into(), "c".into()]));
    }

    #[test]
    fn page_wire_format_is_camel_case() {
        let json = r#"{"items":[],"totalCount":0,"needsReauth":true}"#;
        let page: MessagePage = serde_json::from_str(json).unwrap();
        assert!(page.needs_reauth);
        assert!(page.items.is_empty());

        let ok = serde_json::to_string(&MessagePage::default()).unwrap();
        assert_eq!(ok, r#"{"items":[],"totalCount":0}"#);
    }

    #[test]
    fn session_user_omits_missing_name() {
        let user = SessionUser {
            id: UserId::from("u1".to_string()),
            email: "a@example.com".into(),
            name: None,
        };
        let json = serde_json::to_string(&user).unwrap();
        assert_eq!(json, r#"{"id":"u1","email":"a@example.com"}"#);
    }
}
