use std::sync::Arc;

use axum_extra::extract::cookie::Key;
use url::Url;

use super::error::AuthError;
use crate::gmail::GmailApi;
use crate::identity::{CredentialVerifier, CredentialVerifierDyn};
use crate::oauth::{AuthClient, OAuthConfig};

/// Shared settings used by both config and runtime state.
#[derive(Clone)]
pub(crate) struct AuthSettings {
    pub(crate) cookie_key: Key,
    pub(crate) session_cookie_name: String,
    pub(crate) session_ttl_days: i64,
    pub(crate) secure_cookies: bool,
    pub(crate) auth_path: String,
    pub(crate) gmail_path: String,
    pub(crate) app_redirect: String,
    pub(crate) error_redirect: String,
}

impl AuthSettings {
    fn defaults() -> Self {
        Self {
            cookie_key: Key::generate(),
            session_cookie_name: "__inboxkit_session".into(),
            session_ttl_days: 30,
            secure_cookies: true,
            auth_path: "/api/auth".into(),
            gmail_path: "/api/gmail".into(),
            app_redirect: "/".into(),
            error_redirect: "/login".into(),
        }
    }
}

/// Server configuration.
///
/// The required field (`client`) is a constructor parameter, so there are no
/// runtime "missing field" errors.
///
/// Use [`from_env()`](ServerConfig::from_env) for convention-based setup,
/// or [`new()`](ServerConfig::new) with `with_*` methods for full control.
pub struct ServerConfig {
    pub(super) client: AuthClient,
    pub(super) gmail: GmailApi,
    pub(super) verifier: Option<Arc<dyn CredentialVerifierDyn>>,
    pub(super) settings: AuthSettings,
}

impl ServerConfig {
    /// Create config with the required Google `AuthClient`.
    ///
    /// Credentials are verified with Google's `tokeninfo` endpoint unless
    /// [`with_credential_verifier`](Self::with_credential_verifier) says otherwise.
    #[must_use]
    pub fn new(client: AuthClient) -> Self {
        Self {
            client,
            gmail: GmailApi::default(),
            verifier: None,
            settings: AuthSettings::defaults(),
        }
    }

    /// Create config from environment variables.
    ///
    /// # Required env vars
    /// - `GOOGLE_CLIENT_ID`, `GOOGLE_CLIENT_SECRET`: OAuth2 client credentials
    /// - `GOOGLE_REDIRECT_URI`: Gmail consent callback URI (must be a valid URL)
    ///
    /// # Optional env vars
    /// - `GOOGLE_AUTH_URL`, `GOOGLE_TOKEN_URL`, `GOOGLE_TOKENINFO_URL`: Override Google endpoints
    /// - `GMAIL_API_URL`: Override the Gmail API root
    /// - `GMAIL_SCOPES`: Comma-separated scopes to request and require
    /// - `DEV_AUTH`: Set to `"1"` or `"true"` to allow cookies over plain HTTP
    /// - `COOKIE_KEY`: Cookie encryption key bytes
    /// - `SESSION_TTL_DAYS`: Session lifetime in days
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::Config`] if required env vars are missing or values are invalid.
    pub fn from_env() -> Result<Self, AuthError> {
        let client_id = required_var("GOOGLE_CLIENT_ID")?;
        let client_secret = required_var("GOOGLE_CLIENT_SECRET")?;
        let redirect_uri = parse_url("GOOGLE_REDIRECT_URI", &required_var("GOOGLE_REDIRECT_URI")?)?;

        let mut oauth = OAuthConfig::new(client_id, client_secret, redirect_uri);
        if let Some(url) = optional_url("GOOGLE_AUTH_URL")? {
            oauth = oauth.with_auth_url(url);
        }
        if let Some(url) = optional_url("GOOGLE_TOKEN_URL")? {
            oauth = oauth.with_token_url(url);
        }
        if let Some(url) = optional_url("GOOGLE_TOKENINFO_URL")? {
            oauth = oauth.with_tokeninfo_url(url);
        }
        if let Ok(scopes) = std::env::var("GMAIL_SCOPES") {
            oauth = oauth.with_scopes(
                scopes
                    .split(',')
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .collect(),
            );
        }

        let dev_auth = matches!(std::env::var("DEV_AUTH").as_deref(), Ok("1") | Ok("true"));

        let cookie_key = match std::env::var("COOKIE_KEY") {
            Ok(k) => Key::try_from(k.as_bytes()).map_err(|_| {
                AuthError::Config(
                    "COOKIE_KEY is set but invalid (must be at least 64 bytes). \
                     Remove the env var to use an ephemeral key, or provide a valid key."
                        .into(),
                )
            })?,
            Err(_) => Key::generate(),
        };

        let mut config = Self::new(AuthClient::new(oauth))
            .with_cookie_key(cookie_key)
            .with_secure_cookies(!dev_auth);

        if let Some(url) = optional_url("GMAIL_API_URL")? {
            config = config.with_gmail_api(GmailApi::new(url));
        }
        if let Ok(days) = std::env::var("SESSION_TTL_DAYS") {
            let days = days
                .parse::<i64>()
                .ok()
                .filter(|d| *d > 0)
                .ok_or_else(|| AuthError::Config(format!("SESSION_TTL_DAYS: invalid value {days:?}")))?;
            config = config.with_session_ttl_days(days);
        }
        Ok(config)
    }

    #[must_use]
    pub fn with_gmail_api(mut self, gmail: GmailApi) -> Self {
        self.gmail = gmail;
        self
    }

    /// Replace the `tokeninfo` verifier (e.g. with local JWT verification).
    #[must_use]
    pub fn with_credential_verifier<V: CredentialVerifier>(mut self, verifier: V) -> Self {
        self.verifier = Some(Arc::new(verifier));
        self
    }

    #[must_use]
    pub fn with_cookie_key(mut self, key: Key) -> Self {
        self.settings.cookie_key = key;
        self
    }

    #[must_use]
    pub fn with_session_cookie_name(mut self, name: impl Into<String>) -> Self {
        self.settings.session_cookie_name = name.into();
        self
    }

    #[must_use]
    pub fn with_session_ttl_days(mut self, days: i64) -> Self {
        self.settings.session_ttl_days = days;
        self
    }

    #[must_use]
    pub fn with_secure_cookies(mut self, secure: bool) -> Self {
        self.settings.secure_cookies = secure;
        self
    }

    /// Mount point of the sign-in endpoints (default `/api/auth`).
    #[must_use]
    pub fn with_auth_path(mut self, path: impl Into<String>) -> Self {
        self.settings.auth_path = path.into();
        self
    }

    /// Mount point of the Gmail endpoints (default `/api/gmail`).
    #[must_use]
    pub fn with_gmail_path(mut self, path: impl Into<String>) -> Self {
        self.settings.gmail_path = path.into();
        self
    }

    /// Where the Gmail consent callback lands on success.
    #[must_use]
    pub fn with_app_redirect(mut self, path: impl Into<String>) -> Self {
        self.settings.app_redirect = path.into();
        self
    }

    /// Sign-in page the callback redirects to with `?error=`.
    #[must_use]
    pub fn with_error_redirect(mut self, path: impl Into<String>) -> Self {
        self.settings.error_redirect = path.into();
        self
    }
}

fn required_var(name: &str) -> Result<String, AuthError> {
    std::env::var(name).map_err(|_| AuthError::Config(format!("{name} is required")))
}

fn parse_url(name: &str, value: &str) -> Result<Url, AuthError> {
    value
        .parse()
        .map_err(|e| AuthError::Config(format!("{name}: {e}")))
}

fn optional_url(name: &str) -> Result<Option<Url>, AuthError> {
    match std::env::var(name) {
        Ok(value) => parse_url(name, &value).map(Some),
        Err(_) => Ok(None),
    }
}
