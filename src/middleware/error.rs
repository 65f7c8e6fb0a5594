use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

use crate::error::Error;
use crate::types::{ApiErrorBody, TOKEN_MISSING};

/// Errors returned by the HTTP layer, each with a fixed status code.
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    /// No session cookie.
    #[error("Not authenticated")]
    Unauthenticated,

    /// Session cookie present but the session is gone or expired.
    #[error("Session expired")]
    SessionExpired,

    /// The identity credential was refused.
    #[error("{0}")]
    CredentialRejected(String),

    /// No usable Gmail grant; the client must run the consent flow.
    #[error("Gmail access has not been granted")]
    TokenMissing,

    /// Gmail answered with an error, passed through with its status.
    #[error("Gmail API error")]
    Provider { status: u16, detail: String },

    /// Google could not be reached or answered unexpectedly.
    #[error("Upstream unavailable: {0}")]
    Unavailable(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Session store error: {0}")]
    Store(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let (status, body) = match &self {
            Self::Unauthenticated | Self::SessionExpired | Self::CredentialRejected(_) => {
                (StatusCode::UNAUTHORIZED, body(self.to_string(), None))
            }
            Self::TokenMissing => (StatusCode::FORBIDDEN, body(TOKEN_MISSING.into(), None)),
            Self::Provider { status, detail } => (
                StatusCode::from_u16(*status).unwrap_or(StatusCode::BAD_GATEWAY),
                body(self.to_string(), Some(detail.clone())),
            ),
            Self::Unavailable(_) => {
                tracing::warn!(error = %self, "Upstream failure");
                (StatusCode::BAD_GATEWAY, body(self.to_string(), None))
            }
            Self::BadRequest(_) => (StatusCode::BAD_REQUEST, body(self.to_string(), None)),
            Self::Store(_) | Self::Config(_) | Self::Internal(_) => {
                tracing::error!(error = %self, "Internal error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    body("Internal error".into(), None),
                )
            }
        };
        (status, Json(body)).into_response()
    }
}

fn body(error: String, details: Option<String>) -> ApiErrorBody {
    ApiErrorBody { error, details }
}

impl From<Error> for AuthError {
    fn from(e: Error) -> Self {
        match e {
            Error::CredentialExchangeFailure(msg) => Self::CredentialRejected(msg),
            Error::SessionExpired => Self::SessionExpired,
            Error::GmailScopeMissing | Error::GmailTokenExpired => Self::TokenMissing,
            Error::ProviderApiError { status, detail } => Self::Provider { status, detail },
            Error::InvalidMessage(msg) => Self::BadRequest(msg),
            Error::Store(msg) => Self::Store(msg),
            e @ (Error::TransientNetworkError { .. }
            | Error::IdentityServiceUnavailable(_)
            | Error::OAuth { .. }
            | Error::Http(_)
            | Error::Decode(_)) => Self::Unavailable(e.to_string()),
            e => Self::Internal(e.to_string()),
        }
    }
}
