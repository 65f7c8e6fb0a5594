//! Server-side verification of Google identity credentials.

use std::future::Future;

use futures::FutureExt;
use futures::future::BoxFuture;
use serde::Deserialize;
use time::OffsetDateTime;
use url::Url;

use crate::error::Error;
use crate::oauth::OAuthConfig;
use crate::types::Identity;

const GOOGLE_ISSUERS: [&str; 2] = ["accounts.google.com", "https://accounts.google.com"];

/// Turns a raw identity credential (a Google ID token) into an [`Identity`].
///
/// Every failure is an [`Error::CredentialExchangeFailure`] carrying a
/// message suitable for the client.
pub trait CredentialVerifier: Send + Sync + 'static {
    fn verify(&self, credential: &str) -> impl Future<Output = Result<Identity, Error>> + Send;
}

/// Object-safe wrapper for CredentialVerifier (needed for `Arc<dyn>`).
pub(crate) trait CredentialVerifierDyn: Send + Sync {
    fn verify_dyn<'a>(&'a self, credential: &'a str) -> BoxFuture<'a, Result<Identity, Error>>;
}

impl<T: CredentialVerifier> CredentialVerifierDyn for T {
    fn verify_dyn<'a>(&'a self, credential: &'a str) -> BoxFuture<'a, Result<Identity, Error>> {
        self.verify(credential).boxed()
    }
}

/// Verifies ID tokens through Google's `tokeninfo` endpoint.
///
/// Checks audience (must be our client id), issuer, expiry and that the
/// email address is verified.
#[derive(Debug, Clone)]
pub struct GoogleIdTokenVerifier {
    client_id: String,
    tokeninfo_url: Url,
    http: reqwest::Client,
}

impl GoogleIdTokenVerifier {
    #[must_use]
    pub fn new(config: &OAuthConfig) -> Self {
        Self {
            client_id: config.client_id().to_owned(),
            tokeninfo_url: config.tokeninfo_url().clone(),
            http: reqwest::Client::new(),
        }
    }

    /// Use a custom HTTP client (for connection pool reuse or testing).
    #[must_use]
    pub fn with_http_client(mut self, client: reqwest::Client) -> Self {
        self.http = client;
        self
    }

    fn check(&self, info: TokenInfo, now: OffsetDateTime) -> Result<Identity, Error> {
        if info.aud != self.client_id {
            tracing::warn!(aud = %info.aud, "ID token issued for another client");
            return Err(rejected("credential was issued for another application"));
        }
        if !GOOGLE_ISSUERS.contains(&info.iss.as_str()) {
            tracing::warn!(iss = %info.iss, "ID token from unexpected issuer");
            return Err(rejected("credential issuer is not Google"));
        }
        let exp = info.exp.as_i64().ok_or_else(|| rejected("credential has no expiry"))?;
        if exp <= now.unix_timestamp() {
            return Err(rejected("credential has expired"));
        }
        let email = info.email.ok_or_else(|| rejected("credential carries no email"))?;
        if !info.email_verified.is_some_and(|v| v.as_bool()) {
            return Err(rejected("email address is not verified"));
        }
        Ok(Identity {
            subject: info.sub,
            email,
            name: info.name,
        })
    }
}

impl CredentialVerifier for GoogleIdTokenVerifier {
    async fn verify(&self, credential: &str) -> Result<Identity, Error> {
        if credential.trim().is_empty() {
            return Err(rejected("missing credential"));
        }
        let response = self
            .http
            .get(self.tokeninfo_url.clone())
            .query(&[("id_token", credential)])
            .send()
            .await
            .map_err(|e| {
                tracing::error!(error = %e, "tokeninfo request failed");
                Error::IdentityServiceUnavailable(e.to_string())
            })?;

        let status = response.status();
        if status.is_server_error() {
            return Err(Error::IdentityServiceUnavailable(format!(
                "tokeninfo returned {status}"
            )));
        }
        if !status.is_success() {
            return Err(rejected("invalid credential"));
        }
        let info: TokenInfo = response
            .json()
            .await
            .map_err(|e| Error::Decode(format!("tokeninfo: {e}")))?;
        self.check(info, OffsetDateTime::now_utc())
    }
}

fn rejected(message: &str) -> Error {
    Error::CredentialExchangeFailure(message.to_owned())
}

/// `tokeninfo` claims. Google encodes numbers and booleans as strings.
#[derive(Debug, Deserialize)]
struct TokenInfo {
    aud: String,
    iss: String,
    sub: String,
    exp: Lenient,
    #[serde(default)]
    email: Option<String>,
    #[serde(default)]
    email_verified: Option<Lenient>,
    #[serde(default)]
    name: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Lenient {
    Bool(bool),
    Int(i64),
    Str(String),
}

impl Lenient {
    fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Int(n) => Some(*n),
            Self::Str(s) => s.parse().ok(),
            Self::Bool(_) => None,
        }
    }

    fn as_bool(&self) -> bool {
        match self {
            Self::Bool(b) => *b,
            Self::Str(s) => s == "true",
            Self::Int(n) => *n != 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn verifier(tokeninfo: &str) -> GoogleIdTokenVerifier {
        let config = OAuthConfig::new(
            "inbox-client",
            "secret",
            "https://mail.example.com/api/gmail/callback".parse().unwrap(),
        )
        .with_tokeninfo_url(tokeninfo.parse().unwrap());
        GoogleIdTokenVerifier::new(&config)
    }

    fn claims(exp: i64) -> serde_json::Value {
        serde_json::json!({
            "aud": "inbox-client",
            "iss": "https://accounts.google.com",
            "sub": "1234567890",
            "exp": exp.to_string(),
            "email": "ada@example.com",
            "email_verified": "true",
            "name": "Ada",
        })
    }

    fn future_exp() -> i64 {
        OffsetDateTime::now_utc().unix_timestamp() + 3600
    }

    #[tokio::test]
    async fn valid_credential_yields_identity() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/tokeninfo"))
            .and(query_param("id_token", "good-token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(claims(future_exp())))
            .expect(1)
            .mount(&server)
            .await;

        let identity = verifier(&format!("{}/tokeninfo", server.uri()))
            .verify("good-token")
            .await
            .unwrap();
        assert_eq!(identity.subject, "1234567890");
        assert_eq!(identity.email, "ada@example.com");
        assert_eq!(identity.name.as_deref(), Some("Ada"));
    }

    #[tokio::test]
    async fn rejected_token_is_a_credential_failure() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(400).set_body_json(serde_json::json!({"error": "invalid_token"})),
            )
            .mount(&server)
            .await;

        let err = verifier(&format!("{}/tokeninfo", server.uri()))
            .verify("bad")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::CredentialExchangeFailure(_)));
    }

    #[tokio::test]
    async fn tokeninfo_outage_is_unavailable() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let err = verifier(&format!("{}/tokeninfo", server.uri()))
            .verify("tok")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::IdentityServiceUnavailable(_)));
    }

    #[test]
    fn claims_are_checked() {
        let v = verifier("http://127.0.0.1:1/tokeninfo");
        let now = OffsetDateTime::now_utc();
        let parse = |value: serde_json::Value| -> TokenInfo { serde_json::from_value(value).unwrap() };

        let mut wrong_aud = claims(future_exp());
        wrong_aud["aud"] = "someone-else".into();
        assert!(v.check(parse(wrong_aud), now).is_err());

        let mut wrong_iss = claims(future_exp());
        wrong_iss["iss"] = "https://evil.example.com".into();
        assert!(v.check(parse(wrong_iss), now).is_err());

        let expired = claims(now.unix_timestamp() - 10);
        assert!(v.check(parse(expired), now).is_err());

        let mut unverified = claims(future_exp());
        unverified["email_verified"] = "false".into();
        assert!(v.check(parse(unverified), now).is_err());

        let mut native_types = claims(future_exp());
        native_types["email_verified"] = true.into();
        native_types["exp"] = future_exp().into();
        native_types["iss"] = "accounts.google.com".into();
        assert!(v.check(parse(native_types), now).is_ok());
    }

    #[tokio::test]
    async fn empty_credential_is_rejected_without_a_request() {
        let err = verifier("http://127.0.0.1:1/tokeninfo")
            .verify("  ")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::CredentialExchangeFailure(_)));
    }
}
