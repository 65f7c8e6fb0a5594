use std::future::Future;
use std::sync::Arc;

use futures::FutureExt;
use futures::future::BoxFuture;
use serde::Serialize;
use serde::de::DeserializeOwned;
use url::Url;

use super::config::ClientConfig;
use crate::error::Error;
use crate::types::{ApiErrorBody, TOKEN_MISSING};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
}

/// A request against the inboxkit server, relative to its origin.
#[derive(Debug, Clone, PartialEq)]
pub struct ApiRequest {
    pub method: Method,
    pub path: String,
    pub query: Vec<(String, String)>,
    pub body: Option<serde_json::Value>,
}

impl ApiRequest {
    #[must_use]
    pub fn get(path: impl Into<String>) -> Self {
        Self {
            method: Method::Get,
            path: path.into(),
            query: Vec::new(),
            body: None,
        }
    }

    #[must_use]
    pub fn post(path: impl Into<String>) -> Self {
        Self {
            method: Method::Post,
            ..Self::get(path)
        }
    }

    #[must_use]
    pub fn with_query(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((name.into(), value.into()));
        self
    }

    /// Attach a JSON body.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Decode`] if `body` cannot be represented as JSON.
    pub fn with_json<T: Serialize>(mut self, body: &T) -> Result<Self, Error> {
        self.body = Some(serde_json::to_value(body).map_err(|e| Error::Decode(e.to_string()))?);
        Ok(self)
    }
}

/// Status and body of a settled request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiResponse {
    pub status: u16,
    pub body: Vec<u8>,
}

impl ApiResponse {
    #[must_use]
    pub fn new(status: u16, body: impl Into<Vec<u8>>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }

    /// Response with a JSON body.
    #[must_use]
    pub fn json(status: u16, body: &serde_json::Value) -> Self {
        Self::new(status, body.to_string())
    }

    #[must_use]
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Decode the body.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Decode`] if the body does not match `T`.
    pub fn parse<T: DeserializeOwned>(&self) -> Result<T, Error> {
        serde_json::from_slice(&self.body)
            .map_err(|e| Error::Decode(format!("HTTP {} body: {e}", self.status)))
    }

    /// The server's `{error}` message, if the body carries one.
    #[must_use]
    pub fn error_message(&self) -> Option<String> {
        serde_json::from_slice::<ApiErrorBody>(&self.body)
            .ok()
            .map(|b| b.error)
            .filter(|m| !m.is_empty())
    }

    /// The provider's own explanation (`details`), falling back to `error`.
    fn error_detail(&self) -> Option<String> {
        let body = serde_json::from_slice::<ApiErrorBody>(&self.body).ok()?;
        body.details
            .filter(|d| !d.is_empty())
            .or(Some(body.error))
            .filter(|m| !m.is_empty())
    }

    /// Classify a non-2xx response from a protected endpoint.
    ///
    /// 401 is a dead session and 403 `token_missing` a missing Gmail grant.
    /// Anything else is reported as a provider error carrying the provider's
    /// `details` when the server relayed them.
    #[must_use]
    pub fn into_error(self) -> Error {
        match self.status {
            401 => Error::SessionExpired,
            403 if self.error_message().as_deref() == Some(TOKEN_MISSING) => {
                Error::GmailScopeMissing
            }
            status => {
                let detail = self
                    .error_detail()
                    .unwrap_or_else(|| String::from_utf8_lossy(&self.body).into_owned());
                Error::ProviderApiError { status, detail }
            }
        }
    }
}

/// How the client reaches the server. `Err` means the request never
/// produced an HTTP response (connect failure, timeout).
pub trait Transport: Send + Sync + 'static {
    fn send(&self, request: ApiRequest) -> impl Future<Output = Result<ApiResponse, Error>> + Send;
}

impl<T: Transport> Transport for Arc<T> {
    fn send(&self, request: ApiRequest) -> impl Future<Output = Result<ApiResponse, Error>> + Send {
        (**self).send(request)
    }
}

/// Object-safe wrapper for Transport (needed for `Arc<dyn>`).
pub(crate) trait TransportDyn: Send + Sync {
    fn send_dyn(&self, request: ApiRequest) -> BoxFuture<'_, Result<ApiResponse, Error>>;
}

impl<T: Transport> TransportDyn for T {
    fn send_dyn(&self, request: ApiRequest) -> BoxFuture<'_, Result<ApiResponse, Error>> {
        self.send(request).boxed()
    }
}

/// `reqwest` transport with a cookie jar, so the session cookie set by
/// sign-in rides along on later requests.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    base_url: String,
    http: reqwest::Client,
}

impl HttpTransport {
    /// Build a client with a cookie store and the configured per-request timeout.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Http`] if the TLS backend cannot be initialized.
    pub fn new(config: &ClientConfig) -> Result<Self, Error> {
        let http = reqwest::Client::builder()
            .cookie_store(true)
            .timeout(config.request_timeout)
            .build()?;
        Ok(Self::with_http_client(config.base_url.clone(), http))
    }

    /// Use a custom HTTP client. It should have a cookie store enabled.
    #[must_use]
    pub fn with_http_client(base_url: Url, http: reqwest::Client) -> Self {
        Self {
            base_url: base_url.as_str().trim_end_matches('/').to_owned(),
            http,
        }
    }
}

impl Transport for HttpTransport {
    async fn send(&self, request: ApiRequest) -> Result<ApiResponse, Error> {
        let url = format!("{}{}", self.base_url, request.path);
        let mut builder = match request.method {
            Method::Get => self.http.get(url),
            Method::Post => self.http.post(url),
        };
        if !request.query.is_empty() {
            builder = builder.query(&request.query);
        }
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        let response = builder.send().await?;
        let status = response.status().as_u16();
        let body = response.bytes().await?;
        Ok(ApiResponse::new(status, body.to_vec()))
    }
}
