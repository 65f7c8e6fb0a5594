use std::time::Duration;

use url::Url;

/// Exponential backoff for transient fetch failures.
///
/// The delay before retry `n` (0-based) is `min(base_delay * 2^n, max_delay)`;
/// at most `max_retries` retries follow the first attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub max_retries: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            max_retries: 3,
        }
    }
}

impl RetryPolicy {
    /// Backoff before retry number `retry` (0 for the first retry).
    #[must_use]
    pub fn delay_for(&self, retry: u32) -> Duration {
        let factor = 2u32.checked_pow(retry).unwrap_or(u32::MAX);
        self.base_delay
            .checked_mul(factor)
            .map_or(self.max_delay, |d| d.min(self.max_delay))
    }

    /// Never retry.
    #[must_use]
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }
}

/// Client configuration.
///
/// Required fields are constructor parameters; everything else has a default
/// and a `with_*` override.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub(crate) base_url: Url,
    pub(crate) identity_client_id: String,
    pub(crate) retry: RetryPolicy,
    pub(crate) sdk_load_timeout: Duration,
    pub(crate) request_timeout: Duration,
    pub(crate) sign_in_route: String,
    pub(crate) redirect_marker_ttl: Duration,
    pub(crate) auth_path: String,
    pub(crate) gmail_path: String,
}

impl ClientConfig {
    /// `base_url` is the server origin; `identity_client_id` is the Google
    /// client id the identity SDK is initialized with.
    #[must_use]
    pub fn new(base_url: Url, identity_client_id: impl Into<String>) -> Self {
        Self {
            base_url,
            identity_client_id: identity_client_id.into(),
            retry: RetryPolicy::default(),
            sdk_load_timeout: Duration::from_secs(5),
            request_timeout: Duration::from_secs(15),
            sign_in_route: "/login".into(),
            redirect_marker_ttl: Duration::from_secs(10),
            auth_path: "/api/auth".into(),
            gmail_path: "/api/gmail".into(),
        }
    }

    #[must_use]
    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    #[must_use]
    pub fn with_sdk_load_timeout(mut self, timeout: Duration) -> Self {
        self.sdk_load_timeout = timeout;
        self
    }

    /// Per-attempt network timeout.
    #[must_use]
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_sign_in_route(mut self, route: impl Into<String>) -> Self {
        self.sign_in_route = route.into();
        self
    }

    /// How long a redirect to sign-in suppresses further redirects.
    #[must_use]
    pub fn with_redirect_marker_ttl(mut self, ttl: Duration) -> Self {
        self.redirect_marker_ttl = ttl;
        self
    }

    #[must_use]
    pub fn with_auth_path(mut self, path: impl Into<String>) -> Self {
        self.auth_path = path.into();
        self
    }

    #[must_use]
    pub fn with_gmail_path(mut self, path: impl Into<String>) -> Self {
        self.gmail_path = path.into();
        self
    }

    #[must_use]
    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    #[must_use]
    pub fn retry_policy(&self) -> RetryPolicy {
        self.retry
    }

    #[must_use]
    pub fn sign_in_route(&self) -> &str {
        &self.sign_in_route
    }
}
