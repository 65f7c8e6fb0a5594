/// Error type returned by consumer-implemented stores.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Failure taxonomy shared by the server and client halves.
///
/// Each variant selects exactly one remediation; see [`Error::affordance`].
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// The identity credential could not be exchanged for a session.
    #[error("Sign-in failed: {0}")]
    CredentialExchangeFailure(String),

    /// The server no longer recognizes the session cookie.
    #[error("Session expired")]
    SessionExpired,

    /// No usable Gmail grant: never authorized, scope withdrawn, or refresh rejected.
    #[error("Gmail access has not been granted")]
    GmailScopeMissing,

    /// Gmail rejected an access token. Recovered by a refresh, never surfaced
    /// when that refresh succeeds.
    #[error("Gmail access token expired")]
    GmailTokenExpired,

    #[error("Network error after {attempts} attempt(s): {detail}")]
    TransientNetworkError { attempts: u32, detail: String },

    #[error("Could not read attachment {filename}: {source}")]
    AttachmentReadError {
        filename: String,
        #[source]
        source: std::io::Error,
    },

    /// Quota, 5xx or other provider failure passed through to the caller.
    #[error("Gmail API error ({status}): {detail}")]
    ProviderApiError { status: u16, detail: String },

    #[error("Identity service unavailable: {0}")]
    IdentityServiceUnavailable(String),

    #[error("Request cancelled")]
    Cancelled,

    #[error("Invalid message: {0}")]
    InvalidMessage(String),

    #[error("OAuth2 {operation} failed: {detail}")]
    OAuth {
        operation: &'static str,
        status: Option<u16>,
        detail: String,
    },

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Store error: {0}")]
    Store(String),

    #[error("Unexpected response: {0}")]
    Decode(String),
}

/// The user-facing remediation a failure calls for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Affordance {
    /// Run sign-in again.
    SignIn,
    /// Send the user through the Gmail consent screen.
    AuthorizeMailbox,
    /// Offer a retry; the failure may clear on its own.
    TryAgain,
    /// Report the failure as-is.
    ShowError,
}

impl Error {
    /// Chooses the remediation for this failure.
    ///
    /// Authentication failures never fall through to [`Affordance::ShowError`].
    #[must_use]
    pub fn affordance(&self) -> Affordance {
        match self {
            Self::SessionExpired | Self::CredentialExchangeFailure(_) => Affordance::SignIn,
            Self::GmailScopeMissing | Self::GmailTokenExpired => Affordance::AuthorizeMailbox,
            Self::TransientNetworkError { .. }
            | Self::Http(_)
            | Self::IdentityServiceUnavailable(_) => Affordance::TryAgain,
            _ => Affordance::ShowError,
        }
    }

    pub(crate) fn store(e: impl std::fmt::Display) -> Self {
        Self::Store(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn auth_failures_never_show_generic_error() {
        assert_eq!(Error::SessionExpired.affordance(), Affordance::SignIn);
        assert_eq!(
            Error::GmailScopeMissing.affordance(),
            Affordance::AuthorizeMailbox
        );
        assert_eq!(
            Error::GmailTokenExpired.affordance(),
            Affordance::AuthorizeMailbox
        );
    }

    #[test]
    fn exhausted_retries_offer_try_again() {
        let err = Error::TransientNetworkError {
            attempts: 4,
            detail: "503".into(),
        };
        assert_eq!(err.affordance(), Affordance::TryAgain);
        assert_eq!(err.to_string(), "Network error after 4 attempt(s): 503");
    }

    #[test]
    fn provider_errors_are_reported() {
        let err = Error::ProviderApiError {
            status: 429,
            detail: "quota".into(),
        };
        assert_eq!(err.affordance(), Affordance::ShowError);
    }
}
