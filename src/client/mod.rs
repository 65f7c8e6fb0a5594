//! Client half: sign-in, session reconciliation, mailbox fetch and send.
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use inboxkit::client::{ClientConfig, InboxClient, MemoryIdentityCache};
//! use tokio_util::sync::CancellationToken;
//!
//! let config = ClientConfig::new("https://mail.example.com".parse()?, "123.apps.googleusercontent.com");
//! let client = InboxClient::new(config, my_sdk, my_router, MemoryIdentityCache::new())?;
//!
//! // Render immediately from the cache, then confirm with the server
//! let snapshot = client.reconciler().check().await;
//! if !snapshot.authenticated() {
//!     client.sign_in().await?;
//! }
//!
//! let page = client.fetcher().fetch_page(None, &CancellationToken::new()).await?;
//! ```

mod cache;
mod config;
mod fetch;
mod identity;
mod mail;
mod session;
#[cfg(test)]
mod testing;
mod transport;

use std::sync::Arc;

pub use cache::{CachedIdentity, FileIdentityCache, IdentityCache, MemoryIdentityCache, PageCache};
pub use config::{ClientConfig, RetryPolicy};
pub use fetch::{FetchAttemptState, RetryingFetchOrchestrator};
pub use identity::{
    CREDENTIAL_RETURNED, CredentialCallback, IdentityBroker, IdentitySdk, LoadCallback,
    MomentCallback, PromptMoment, SDK_ELEMENT_ID, SdkLoader, SdkState,
};
pub use mail::MailClient;
pub use session::{AuthSnapshot, AuthState, Navigator, SessionReconciler};
pub use transport::{ApiRequest, ApiResponse, HttpTransport, Method, Transport};

use crate::error::Error;
use crate::types::SessionUser;
use transport::TransportDyn;

/// The client components wired to one transport, identity cache and page
/// cache.
pub struct InboxClient {
    broker: IdentityBroker,
    reconciler: Arc<SessionReconciler>,
    fetcher: RetryingFetchOrchestrator,
    mail: MailClient,
}

impl InboxClient {
    /// Wire the client over an [`HttpTransport`] built from `config`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Http`] if the HTTP client cannot be built.
    pub fn new<S, N, C>(config: ClientConfig, sdk: S, navigator: N, cache: C) -> Result<Self, Error>
    where
        S: IdentitySdk,
        N: Navigator,
        C: IdentityCache,
    {
        let transport = HttpTransport::new(&config)?;
        Ok(Self::with_transport(
            &config,
            Arc::new(sdk),
            Arc::new(transport),
            Arc::new(navigator),
            Arc::new(cache),
        ))
    }

    pub(crate) fn with_transport(
        config: &ClientConfig,
        sdk: Arc<dyn IdentitySdk>,
        transport: Arc<dyn TransportDyn>,
        navigator: Arc<dyn Navigator>,
        cache: Arc<dyn IdentityCache>,
    ) -> Self {
        let loader = if config.sdk_load_timeout == SdkLoader::global().timeout() {
            SdkLoader::global()
        } else {
            Arc::new(SdkLoader::new(config.sdk_load_timeout))
        };
        let broker = IdentityBroker::from_parts(
            sdk,
            transport.clone(),
            cache.clone(),
            config.identity_client_id.clone(),
        )
        .with_loader(loader)
        .with_auth_path(&config.auth_path);

        let reconciler = Arc::new(
            SessionReconciler::from_parts(
                transport.clone(),
                cache,
                navigator,
                Arc::new(PageCache::new()),
            )
            .with_sign_in_route(config.sign_in_route.clone())
            .with_redirect_marker_ttl(config.redirect_marker_ttl)
            .with_auth_path(config.auth_path.clone()),
        );
        let fetcher = RetryingFetchOrchestrator::from_parts(transport.clone(), reconciler.clone())
            .with_retry_policy(config.retry)
            .with_gmail_path(config.gmail_path.clone());
        let mail = MailClient::from_parts(transport, reconciler.clone())
            .with_gmail_path(config.gmail_path.clone());

        Self {
            broker,
            reconciler,
            fetcher,
            mail,
        }
    }

    /// Sign in through the identity SDK and publish the new session.
    ///
    /// # Errors
    ///
    /// See [`IdentityBroker::sign_in`].
    pub async fn sign_in(&self) -> Result<SessionUser, Error> {
        let user = self.broker.sign_in().await?;
        self.reconciler.signed_in(user.clone());
        Ok(user)
    }

    /// Sign out locally and on the server; see [`SessionReconciler::sign_out`].
    pub async fn sign_out(&self) {
        self.reconciler.sign_out().await;
    }

    #[must_use]
    pub fn broker(&self) -> &IdentityBroker {
        &self.broker
    }

    #[must_use]
    pub fn reconciler(&self) -> &Arc<SessionReconciler> {
        &self.reconciler
    }

    #[must_use]
    pub fn fetcher(&self) -> &RetryingFetchOrchestrator {
        &self.fetcher
    }

    #[must_use]
    pub fn mail(&self) -> &MailClient {
        &self.mail
    }
}
