use std::collections::BTreeSet;
use std::future::Future;

use serde::Deserialize;
use time::OffsetDateTime;
use url::Url;

use crate::error::Error;
use crate::pkce;
use crate::types::ProviderGrant;

/// Read access to the mailbox.
pub const GMAIL_READONLY_SCOPE: &str = "https://www.googleapis.com/auth/gmail.readonly";
/// Permission to send on the user's behalf.
pub const GMAIL_SEND_SCOPE: &str = "https://www.googleapis.com/auth/gmail.send";

/// Google `OAuth2` client configuration.
///
/// Required fields are constructor parameters; endpoints and scopes default to
/// Google's production values and can be overridden by chaining.
///
/// ```rust,ignore
/// let config = OAuthConfig::new("id.apps.googleusercontent.com", "secret", redirect)
///     .with_token_url("http://127.0.0.1:9000/token".parse()?);
/// ```
#[derive(Debug, Clone)]
#[non_exhaustive]
pub struct OAuthConfig {
    pub(crate) client_id: String,
    pub(crate) client_secret: String,
    pub(crate) auth_url: Url,
    pub(crate) token_url: Url,
    pub(crate) tokeninfo_url: Url,
    pub(crate) redirect_uri: Url,
    pub(crate) scopes: Vec<String>,
}

impl OAuthConfig {
    #[must_use]
    pub fn new(
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
        redirect_uri: Url,
    ) -> Self {
        Self {
            client_id: client_id.into(),
            client_secret: client_secret.into(),
            redirect_uri,
            auth_url: "https://accounts.google.com/o/oauth2/v2/auth"
                .parse()
                .expect("valid default URL"),
            token_url: "https://oauth2.googleapis.com/token"
                .parse()
                .expect("valid default URL"),
            tokeninfo_url: "https://oauth2.googleapis.com/tokeninfo"
                .parse()
                .expect("valid default URL"),
            scopes: vec![GMAIL_READONLY_SCOPE.into(), GMAIL_SEND_SCOPE.into()],
        }
    }

    #[must_use]
    pub fn with_auth_url(mut self, url: Url) -> Self {
        self.auth_url = url;
        self
    }

    #[must_use]
    pub fn with_token_url(mut self, url: Url) -> Self {
        self.token_url = url;
        self
    }

    /// Override the ID-token verification endpoint.
    #[must_use]
    pub fn with_tokeninfo_url(mut self, url: Url) -> Self {
        self.tokeninfo_url = url;
        self
    }

    /// Override the Gmail scopes requested at consent time.
    #[must_use]
    pub fn with_scopes(mut self, scopes: Vec<String>) -> Self {
        self.scopes = scopes;
        self
    }

    #[must_use]
    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    #[must_use]
    pub fn auth_url(&self) -> &Url {
        &self.auth_url
    }

    #[must_use]
    pub fn token_url(&self) -> &Url {
        &self.token_url
    }

    #[must_use]
    pub fn tokeninfo_url(&self) -> &Url {
        &self.tokeninfo_url
    }

    #[must_use]
    pub fn redirect_uri(&self) -> &Url {
        &self.redirect_uri
    }

    #[must_use]
    pub fn scopes(&self) -> &[String] {
        &self.scopes
    }
}

/// Consent URL plus the values the callback must see again.
#[derive(Debug, Clone)]
#[non_exhaustive]
pub struct AuthorizationRequest {
    pub url: String,
    pub state: String,
    pub code_verifier: String,
}

/// Token endpoint response.
#[derive(Debug, Clone, Deserialize)]
#[non_exhaustive]
pub struct TokenResponse {
    pub access_token: String,
    #[serde(default)]
    pub token_type: Option<String>,
    #[serde(default)]
    pub expires_in: Option<u64>,
    #[serde(default)]
    pub refresh_token: Option<String>,
    /// Space-separated scopes actually granted.
    #[serde(default)]
    pub scope: Option<String>,
}

impl TokenResponse {
    #[must_use]
    pub fn new(access_token: impl Into<String>, expires_in: u64) -> Self {
        Self {
            access_token: access_token.into(),
            token_type: Some("Bearer".into()),
            expires_in: Some(expires_in),
            refresh_token: None,
            scope: None,
        }
    }

    #[must_use]
    pub fn with_refresh_token(mut self, token: impl Into<String>) -> Self {
        self.refresh_token = Some(token.into());
        self
    }

    #[must_use]
    pub fn with_scope(mut self, scope: impl Into<String>) -> Self {
        self.scope = Some(scope.into());
        self
    }

    /// Turns the response into a grant issued at `now`.
    ///
    /// Falls back to `previous` for the refresh token and scopes when the
    /// provider leaves them out, as Google does on refresh.
    #[must_use]
    pub fn into_grant(self, now: OffsetDateTime, previous: Option<&ProviderGrant>) -> ProviderGrant {
        let scopes: BTreeSet<String> = match &self.scope {
            Some(s) => s.split_whitespace().map(str::to_owned).collect(),
            None => previous.map(|g| g.scopes.clone()).unwrap_or_default(),
        };
        // Google's default access token lifetime
        let lifetime = self.expires_in.unwrap_or(3600);
        ProviderGrant {
            access_token: self.access_token,
            refresh_token: self
                .refresh_token
                .or_else(|| previous.and_then(|g| g.refresh_token.clone())),
            expires_at: now + time::Duration::seconds(i64::try_from(lifetime).unwrap_or(i64::MAX)),
            scopes,
        }
    }
}

/// Outcome of a refresh-token exchange the provider answered.
#[derive(Debug, Clone)]
pub enum RefreshOutcome {
    Refreshed(TokenResponse),
    /// The provider refused the refresh token (`invalid_grant` and friends).
    Rejected(String),
}

/// The provider's token endpoint, as seen by the grant manager.
///
/// Implemented by [`AuthClient`]; tests substitute counting fakes.
pub trait TokenProvider: Send + Sync + 'static {
    /// Build a consent URL with fresh `state` and PKCE values.
    fn authorization_request(&self) -> AuthorizationRequest;

    /// Exchange an authorization code (PKCE) for tokens.
    fn exchange_code(
        &self,
        code: &str,
        code_verifier: &str,
    ) -> impl Future<Output = Result<TokenResponse, Error>> + Send;

    /// Exchange a refresh token for a new access token.
    ///
    /// `Err` means the provider could not be reached or answered with
    /// anything but a refusal (server error, rate limit, timeout); a refusal
    /// is `Ok(RefreshOutcome::Rejected)`.
    fn refresh(&self, refresh_token: &str)
    -> impl Future<Output = Result<RefreshOutcome, Error>> + Send;
}

/// Google `OAuth2` client.
pub struct AuthClient {
    config: OAuthConfig,
    http: reqwest::Client,
}

impl AuthClient {
    #[must_use]
    pub fn new(config: OAuthConfig) -> Self {
        Self {
            config,
            http: reqwest::Client::new(),
        }
    }

    /// Use a custom HTTP client (for connection pool reuse or testing).
    #[must_use]
    pub fn with_http_client(mut self, client: reqwest::Client) -> Self {
        self.http = client;
        self
    }

    #[must_use]
    pub fn config(&self) -> &OAuthConfig {
        &self.config
    }

    pub(crate) fn http(&self) -> &reqwest::Client {
        &self.http
    }

    /// Checks HTTP response status; returns the response on success or an error with details.
    pub(crate) async fn ensure_success(
        response: reqwest::Response,
        operation: &'static str,
    ) -> Result<reqwest::Response, Error> {
        if response.status().is_success() {
            return Ok(response);
        }
        let status = response.status().as_u16();
        let body = response.text().await.unwrap_or_default();
        Err(Error::OAuth {
            operation,
            status: Some(status),
            detail: body,
        })
    }
}

impl TokenProvider for AuthClient {
    fn authorization_request(&self) -> AuthorizationRequest {
        let state = pkce::generate_state();
        let code_verifier = pkce::generate_code_verifier();
        let code_challenge = pkce::generate_code_challenge(&code_verifier);
        let scope = self.config.scopes.join(" ");

        let mut url = self.config.auth_url.clone();
        url.query_pairs_mut()
            .append_pair("response_type", "code")
            .append_pair("client_id", &self.config.client_id)
            .append_pair("redirect_uri", self.config.redirect_uri.as_str())
            .append_pair("scope", &scope)
            .append_pair("state", &state)
            .append_pair("code_challenge", &code_challenge)
            .append_pair("code_challenge_method", "S256")
            // offline + consent so Google hands out a refresh token every time
            .append_pair("access_type", "offline")
            .append_pair("prompt", "consent")
            .append_pair("include_granted_scopes", "true");

        AuthorizationRequest {
            url: url.into(),
            state,
            code_verifier,
        }
    }

    async fn exchange_code(&self, code: &str, code_verifier: &str) -> Result<TokenResponse, Error> {
        let params = [
            ("grant_type", "authorization_code"),
            ("code", code),
            ("redirect_uri", self.config.redirect_uri.as_str()),
            ("client_id", self.config.client_id.as_str()),
            ("client_secret", self.config.client_secret.as_str()),
            ("code_verifier", code_verifier),
        ];

        let response = self
            .http
            .post(self.config.token_url.clone())
            .form(&params)
            .send()
            .await?;

        let response = Self::ensure_success(response, "code exchange").await?;
        response.json::<TokenResponse>().await.map_err(Into::into)
    }

    async fn refresh(&self, refresh_token: &str) -> Result<RefreshOutcome, Error> {
        let params = [
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh_token),
            ("client_id", self.config.client_id.as_str()),
            ("client_secret", self.config.client_secret.as_str()),
        ];

        let response = self
            .http
            .post(self.config.token_url.clone())
            .form(&params)
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            return Ok(RefreshOutcome::Refreshed(response.json().await?));
        }
        let body = response.text().await.unwrap_or_default();
        if is_refusal(status, &body) {
            tracing::warn!(status = status.as_u16(), "Refresh token rejected by provider");
            return Ok(RefreshOutcome::Rejected(body));
        }
        Err(Error::OAuth {
            operation: "token refresh",
            status: Some(status.as_u16()),
            detail: body,
        })
    }
}

/// `error` codes meaning the refresh token itself is no longer usable.
const REFUSAL_CODES: &[&str] = &["invalid_grant", "unauthorized_client"];

#[derive(Deserialize)]
struct TokenErrorBody {
    error: String,
}

/// A refusal is a 400/401 naming a dead grant. Anything else (429, 408, a
/// 400 without a recognizable code) leaves the refresh token in place.
fn is_refusal(status: reqwest::StatusCode, body: &str) -> bool {
    if !matches!(status.as_u16(), 400 | 401) {
        return false;
    }
    serde_json::from_str::<TokenErrorBody>(body)
        .is_ok_and(|b| REFUSAL_CODES.contains(&b.error.as_str()))
}
