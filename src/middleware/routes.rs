use std::future::Future;
use std::sync::Arc;

use axum::extract::{Query, State};
use axum::http::{HeaderMap, header::USER_AGENT};
use axum::response::{IntoResponse, Redirect, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use axum_extra::extract::PrivateCookieJar;
use serde::Deserialize;
use time::OffsetDateTime;

use super::config::ServerConfig;
use super::cookies;
use super::error::AuthError;
use super::extractor::{AuthUser, resolve_session};
use super::state::ApiState;
use super::traits::{SessionStore, UserStore};
use super::types::NewSession;
use crate::error::Error;
use crate::gmail::DEFAULT_PAGE_SIZE;
use crate::grant::{GmailAuthorizationManager, GrantStore};
use crate::identity::{CredentialVerifierDyn, GoogleIdTokenVerifier};
use crate::types::{
    AuthUrlResponse, CredentialRequest, MessagePage, ProviderGrant, SendReceipt, SendRequest,
    SessionId, SessionStatus, SignedInResponse, UserId,
};

/// Create the router serving sign-in, session and Gmail endpoints.
///
/// Sign-in and Gmail authorization stay independent: a new session never
/// creates a grant, and every Gmail call re-checks the stored grant.
pub fn api_routes<U, S, G>(config: ServerConfig, users: U, sessions: S, grants: G) -> Router
where
    U: UserStore,
    S: SessionStore,
    G: GrantStore,
{
    let ServerConfig {
        client,
        gmail,
        verifier,
        settings,
    } = config;

    let verifier: Arc<dyn CredentialVerifierDyn> = verifier.unwrap_or_else(|| {
        Arc::new(GoogleIdTokenVerifier::new(client.config()).with_http_client(client.http().clone()))
    });
    let required_scopes = client.config().scopes().to_vec();
    let grants = GmailAuthorizationManager::new(grants, client).with_required_scopes(required_scopes);

    let auth_path = settings.auth_path.clone();
    let gmail_path = settings.gmail_path.clone();

    let state = ApiState {
        verifier,
        users: Arc::new(users),
        sessions: Arc::new(sessions),
        grants: Arc::new(grants),
        gmail,
        settings,
    };

    Router::new()
        .route(&format!("{auth_path}/google"), post(sign_in))
        .route(&format!("{auth_path}/session"), get(session_status))
        .route(&format!("{auth_path}/logout"), post(logout))
        .route(&format!("{gmail_path}/auth-url"), get(auth_url))
        .route(&format!("{gmail_path}/callback"), get(callback))
        .route(&format!("{gmail_path}/messages"), get(messages))
        .route(&format!("{gmail_path}/send"), post(send))
        .with_state(state)
}

// ── Sign-in ────────────────────────────────────────────────────────

async fn sign_in(
    State(state): State<ApiState>,
    jar: PrivateCookieJar,
    headers: HeaderMap,
    Json(request): Json<CredentialRequest>,
) -> Result<(PrivateCookieJar, Json<SignedInResponse>), AuthError> {
    let identity = state
        .verifier
        .verify_dyn(&request.credential)
        .await
        .map_err(|e| {
            tracing::warn!(error = %e, "Credential exchange failed");
            AuthError::from(e)
        })?;

    let user = state
        .users
        .find_or_create_dyn(&identity)
        .await
        .map_err(|e| AuthError::Store(e.to_string()))?;

    // One session per browser: drop whatever the cookie pointed at before
    if let Some(cookie) = jar.get(&state.settings.session_cookie_name) {
        let previous = SessionId::from(cookie.value().to_string());
        if let Err(e) = state.sessions.delete_dyn(&previous).await {
            tracing::warn!(error = %e, "Previous session deletion failed");
        }
    }

    let session = state
        .sessions
        .create_dyn(NewSession {
            user: user.clone(),
            expires_at: OffsetDateTime::now_utc()
                + time::Duration::days(state.settings.session_ttl_days),
            user_agent: extract_user_agent(&headers),
            ip_address: extract_client_ip(&headers),
        })
        .await
        .map_err(|e| AuthError::Store(e.to_string()))?;

    let session_cookie = cookies::session_cookie(
        &state.settings.session_cookie_name,
        session.id.as_str(),
        state.settings.session_ttl_days,
        state.settings.secure_cookies,
    );

    tracing::info!(user_id = %user.id, "Sign-in successful");

    Ok((jar.add(session_cookie), Json(SignedInResponse { user })))
}

// ── Session status ─────────────────────────────────────────────────

async fn session_status(
    State(state): State<ApiState>,
    jar: PrivateCookieJar,
) -> Result<(PrivateCookieJar, Json<SessionStatus>), AuthError> {
    let signed_out = SessionStatus {
        authenticated: false,
        user: None,
    };
    let name = &state.settings.session_cookie_name;
    match resolve_session(state.sessions.as_ref(), &jar, name).await {
        Ok(auth) => Ok((
            jar,
            Json(SessionStatus {
                authenticated: true,
                user: Some(auth.user),
            }),
        )),
        Err(AuthError::Unauthenticated) => Ok((jar, Json(signed_out))),
        Err(AuthError::SessionExpired) => {
            let jar = jar.remove(cookies::clear_session_cookie(name));
            Ok((jar, Json(signed_out)))
        }
        Err(e) => Err(e),
    }
}

// ── Logout ─────────────────────────────────────────────────────────

async fn logout(
    State(state): State<ApiState>,
    jar: PrivateCookieJar,
) -> (PrivateCookieJar, Json<serde_json::Value>) {
    if let Some(cookie) = jar.get(&state.settings.session_cookie_name) {
        let session_id = SessionId::from(cookie.value().to_string());
        if let Err(e) = state.sessions.delete_dyn(&session_id).await {
            tracing::warn!(error = %e, "Session deletion failed during logout");
        }
    }

    let clear_cookie = cookies::clear_session_cookie(&state.settings.session_cookie_name);
    (jar.remove(clear_cookie), Json(serde_json::json!({ "ok": true })))
}

// ── Gmail consent ──────────────────────────────────────────────────

async fn auth_url(
    State(state): State<ApiState>,
    user: AuthUser,
    jar: PrivateCookieJar,
) -> (PrivateCookieJar, Json<AuthUrlResponse>) {
    let request = state.grants.begin_authorization();

    let (pkce_cookie, state_cookie) = cookies::pkce_cookies(
        &request.code_verifier,
        &request.state,
        state.settings.secure_cookies,
        &state.settings.gmail_path,
    );

    tracing::debug!(user_id = %user.user.id, "Gmail consent requested");

    (
        jar.add(pkce_cookie).add(state_cookie),
        Json(AuthUrlResponse {
            auth_url: request.url,
        }),
    )
}

#[derive(Deserialize)]
struct CallbackParams {
    code: Option<String>,
    state: Option<String>,
    error: Option<String>,
}

async fn callback(
    State(state): State<ApiState>,
    jar: PrivateCookieJar,
    Query(params): Query<CallbackParams>,
) -> Result<(PrivateCookieJar, Redirect), Response> {
    let error_redirect = &state.settings.error_redirect;

    if let Some(error) = &params.error {
        tracing::warn!(error = %error, "Gmail consent refused");
        return Err(login_error(error_redirect, error));
    }

    let user = resolve_session(
        state.sessions.as_ref(),
        &jar,
        &state.settings.session_cookie_name,
    )
    .await
    .map_err(|_| login_error(error_redirect, "session_required"))?;

    let code = params
        .code
        .ok_or_else(|| login_error(error_redirect, "missing_code"))?;

    let received_state = params
        .state
        .ok_or_else(|| login_error(error_redirect, "state_mismatch"))?;

    let stored_state =
        cookies::get_state(&jar).ok_or_else(|| login_error(error_redirect, "state_mismatch"))?;

    if received_state != stored_state {
        tracing::warn!("OAuth state mismatch");
        return Err(login_error(error_redirect, "state_mismatch"));
    }

    let code_verifier = cookies::get_pkce_verifier(&jar)
        .ok_or_else(|| login_error(error_redirect, "missing_verifier"))?;

    let user_id = &user.user.id;
    match state
        .grants
        .complete_authorization(user_id, &code, &code_verifier)
        .await
    {
        Ok(_) => {}
        Err(Error::GmailScopeMissing) => {
            return Err(login_error(error_redirect, "insufficient_scope"));
        }
        Err(e) => {
            tracing::error!(error = %e, user_id = %user_id, "Gmail code exchange failed");
            return Err(login_error(error_redirect, "token_exchange_failed"));
        }
    }

    let (clear_pkce, clear_state) = cookies::clear_pkce_cookies(&state.settings.gmail_path);

    tracing::info!(user_id = %user_id, "Gmail authorization complete");

    Ok((
        jar.add(clear_pkce).add(clear_state),
        Redirect::to(&state.settings.app_redirect),
    ))
}

// ── Gmail data ─────────────────────────────────────────────────────

#[derive(Deserialize)]
struct MessagesQuery {
    page: Option<String>,
    #[serde(rename = "pageSize")]
    page_size: Option<u32>,
}

async fn messages(
    State(state): State<ApiState>,
    user: AuthUser,
    Query(query): Query<MessagesQuery>,
) -> Result<Json<MessagePage>, AuthError> {
    let user_id = &user.user.id;
    let grant = state.grants.ensure_grant(user_id).await?;

    let gmail = &state.gmail;
    let page = query.page.as_deref();
    let page_size = query.page_size.unwrap_or(DEFAULT_PAGE_SIZE);
    let result = call_with_refresh(&state, user_id, grant, move |token| async move {
        gmail.list_messages(&token, page, page_size).await
    })
    .await;

    match result {
        Ok(page) => Ok(Json(page)),
        Err(Error::GmailScopeMissing) => {
            tracing::warn!(user_id = %user_id, "Gmail refused the grant; client must re-authorize");
            Ok(Json(MessagePage::reauth_required()))
        }
        Err(e) => Err(e.into()),
    }
}

async fn send(
    State(state): State<ApiState>,
    user: AuthUser,
    Json(request): Json<SendRequest>,
) -> Result<Json<SendReceipt>, AuthError> {
    if request.raw.trim().is_empty() {
        return Err(AuthError::BadRequest("raw message is empty".into()));
    }
    let user_id = &user.user.id;
    let grant = state.grants.ensure_grant(user_id).await?;

    let gmail = &state.gmail;
    let raw = request.raw.as_str();
    let receipt = call_with_refresh(&state, user_id, grant, move |token| async move {
        gmail.send_raw(&token, raw).await
    })
    .await?;

    Ok(Json(receipt))
}

/// Run `call` with the grant's access token. If Gmail rejects the token,
/// refresh once (single-flight) and retry; a second rejection means the
/// grant is unusable.
async fn call_with_refresh<T, F, Fut>(
    state: &ApiState,
    user_id: &UserId,
    grant: ProviderGrant,
    call: F,
) -> Result<T, Error>
where
    F: Fn(String) -> Fut,
    Fut: Future<Output = Result<T, Error>>,
{
    match call(grant.access_token.clone()).await {
        Err(Error::GmailTokenExpired) => {}
        other => return other,
    }

    tracing::info!(user_id = %user_id, "Gmail rejected the access token; forcing a refresh");
    let fresh = state
        .grants
        .refresh_rejected_token(user_id, &grant.access_token)
        .await?;

    match call(fresh.access_token).await {
        Err(Error::GmailTokenExpired) => Err(Error::GmailScopeMissing),
        other => other,
    }
}

// ── Helpers ────────────────────────────────────────────────────────

fn login_error(error_redirect: &str, code: &str) -> Response {
    let encoded = urlencoding::encode(code);
    Redirect::to(&format!("{error_redirect}?error={encoded}")).into_response()
}

fn extract_user_agent(headers: &HeaderMap) -> Option<String> {
    headers
        .get(USER_AGENT)
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string())
}

fn extract_client_ip(headers: &HeaderMap) -> Option<String> {
    headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.split(',').next())
        .map(|s| s.trim().to_string())
        .or_else(|| {
            headers
                .get("x-real-ip")
                .and_then(|v| v.to_str().ok())
                .map(|s| s.to_string())
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn login_error_encodes_code() {
        let response = login_error("/login", "access denied");
        assert_eq!(
            response.headers()["location"],
            "/login?error=access%20denied"
        );
    }

    #[test]
    fn client_ip_prefers_forwarded_for() {
        let mut headers = HeaderMap::new();
        headers.insert("x-real-ip", "10.0.0.2".parse().unwrap());
        assert_eq!(extract_client_ip(&headers).as_deref(), Some("10.0.0.2"));

        headers.insert("x-forwarded-for", "203.0.113.7, 10.0.0.1".parse().unwrap());
        assert_eq!(extract_client_ip(&headers).as_deref(), Some("203.0.113.7"));
    }
}
