use axum_extra::extract::PrivateCookieJar;
use axum_extra::extract::cookie::{Cookie, SameSite};
use time::Duration;

const PKCE_COOKIE_NAME: &str = "__inboxkit_pkce";
const STATE_COOKIE_NAME: &str = "__inboxkit_state";

/// Short-lived cookie scoped to the Gmail consent round trip.
fn consent_cookie(name: &'static str, value: &str, secure: bool, path: &str) -> Cookie<'static> {
    Cookie::build((name, value.to_string()))
        .http_only(true)
        .secure(secure)
        .same_site(SameSite::Lax)
        .path(path.to_string())
        .max_age(Duration::minutes(10))
        .build()
}

/// Create PKCE verifier + state cookies for the Gmail consent request.
pub(super) fn pkce_cookies(
    code_verifier: &str,
    state: &str,
    secure: bool,
    gmail_path: &str,
) -> (Cookie<'static>, Cookie<'static>) {
    (
        consent_cookie(PKCE_COOKIE_NAME, code_verifier, secure, gmail_path),
        consent_cookie(STATE_COOKIE_NAME, state, secure, gmail_path),
    )
}

/// Create removal cookies for PKCE verifier + state.
pub(super) fn clear_pkce_cookies(gmail_path: &str) -> (Cookie<'static>, Cookie<'static>) {
    let removal = |name: &'static str| {
        Cookie::build((name, ""))
            .path(gmail_path.to_string())
            .max_age(Duration::ZERO)
            .build()
    };
    (removal(PKCE_COOKIE_NAME), removal(STATE_COOKIE_NAME))
}

pub(super) fn session_cookie(
    name: &str,
    session_id: &str,
    ttl_days: i64,
    secure: bool,
) -> Cookie<'static> {
    Cookie::build((name.to_string(), session_id.to_string()))
        .http_only(true)
        .secure(secure)
        .same_site(SameSite::Lax)
        .path("/".to_string())
        .max_age(Duration::days(ttl_days))
        .build()
}

pub(super) fn clear_session_cookie(name: &str) -> Cookie<'static> {
    Cookie::build((name.to_string(), ""))
        .path("/".to_string())
        .max_age(Duration::ZERO)
        .build()
}

pub(super) fn get_pkce_verifier(jar: &PrivateCookieJar) -> Option<String> {
    jar.get(PKCE_COOKIE_NAME).map(|c| c.value().to_string())
}

pub(super) fn get_state(jar: &PrivateCookieJar) -> Option<String> {
    jar.get(STATE_COOKIE_NAME).map(|c| c.value().to_string())
}
