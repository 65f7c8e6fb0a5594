use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use axum_extra::extract::PrivateCookieJar;
use axum_extra::extract::cookie::Key;
use time::OffsetDateTime;

use super::error::AuthError;
use super::state::ApiState;
use super::traits::SessionStoreDyn;
use crate::types::{SessionId, SessionUser};

/// Authenticated user extracted from the session cookie.
///
/// Rejects with `401 Unauthorized` if no valid session exists.
///
/// ```rust,ignore
/// async fn protected(user: AuthUser) -> impl IntoResponse {
///     format!("Hello, {}", user.user.email)
/// }
/// ```
#[derive(Debug, Clone)]
pub struct AuthUser {
    /// Session token (from cookie).
    pub session_id: SessionId,
    pub user: SessionUser,
}

impl FromRequestParts<ApiState> for AuthUser {
    type Rejection = AuthError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &ApiState,
    ) -> Result<Self, Self::Rejection> {
        let jar: PrivateCookieJar<Key> = PrivateCookieJar::from_request_parts(parts, state)
            .await
            .map_err(|_| AuthError::Unauthenticated)?;

        resolve_session(
            state.sessions.as_ref(),
            &jar,
            &state.settings.session_cookie_name,
        )
        .await
    }
}

/// Look up the session named by the cookie `cookie_name`.
///
/// An expired session is deleted and reported as [`AuthError::SessionExpired`].
pub(crate) async fn resolve_session(
    sessions: &dyn SessionStoreDyn,
    jar: &PrivateCookieJar,
    cookie_name: &str,
) -> Result<AuthUser, AuthError> {
    let session_id = jar
        .get(cookie_name)
        .map(|c| SessionId::from(c.value().to_string()))
        .ok_or(AuthError::Unauthenticated)?;

    let session = sessions
        .find_dyn(&session_id)
        .await
        .map_err(|e| AuthError::Store(e.to_string()))?
        .ok_or(AuthError::SessionExpired)?;

    if session.is_expired(OffsetDateTime::now_utc()) {
        tracing::debug!(user_id = %session.user.id, "Session expired; deleting");
        if let Err(e) = sessions.delete_dyn(&session_id).await {
            tracing::warn!(error = %e, "Expired session deletion failed");
        }
        return Err(AuthError::SessionExpired);
    }

    Ok(AuthUser {
        session_id,
        user: session.user,
    })
}
