#![doc = include_str!("../README.md")]

pub mod error;
pub mod gmail;
pub mod grant;
pub mod identity;
pub mod mime;
pub mod oauth;
pub(crate) mod persist;
pub mod pkce;
pub mod types;

#[cfg(feature = "client")]
pub mod client;
#[cfg(feature = "server")]
pub mod middleware;
#[cfg(feature = "server")]
pub mod session;

// Re-exports for convenient access
pub use error::{Affordance, BoxError, Error};
pub use gmail::GmailApi;
pub use grant::{FileGrantStore, GmailAuthorizationManager, GrantStore, InMemoryGrantStore};
pub use identity::{CredentialVerifier, GoogleIdTokenVerifier};
pub use mime::{AttachmentRef, ComposePayload, EncodedMessage, build_message};
pub use oauth::{AuthClient, AuthorizationRequest, OAuthConfig, TokenProvider, TokenResponse};
pub use pkce::{generate_code_challenge, generate_code_verifier, generate_state};
#[cfg(feature = "server")]
pub use session::{FileSessionStore, FileUserStore, InMemorySessionStore, InMemoryUserStore};
pub use types::{
    Identity, MessagePage, MessageSummary, ProviderGrant, SendReceipt, SessionId, SessionUser,
    UserId,
};
