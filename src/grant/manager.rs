use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use futures::FutureExt;
use futures::future::{BoxFuture, Shared};
use time::OffsetDateTime;

use super::store::{GrantStore, GrantStoreDyn};
use crate::error::Error;
use crate::oauth::{
    AuthorizationRequest, GMAIL_READONLY_SCOPE, GMAIL_SEND_SCOPE, RefreshOutcome, TokenProvider,
    TokenResponse,
};
use crate::types::{ProviderGrant, UserId};

/// Why a shared refresh produced no grant. Cloneable so every waiter gets a copy.
#[derive(Debug, Clone)]
enum RefreshFailure {
    NoGrant,
    NoRefreshToken,
    Rejected,
    Unavailable(String),
    Store(String),
}

impl From<RefreshFailure> for Error {
    fn from(failure: RefreshFailure) -> Self {
        match failure {
            RefreshFailure::NoGrant | RefreshFailure::NoRefreshToken | RefreshFailure::Rejected => {
                Error::GmailScopeMissing
            }
            RefreshFailure::Unavailable(detail) => Error::TransientNetworkError {
                attempts: 1,
                detail,
            },
            RefreshFailure::Store(detail) => Error::Store(detail),
        }
    }
}

type RefreshTask = Shared<BoxFuture<'static, Result<ProviderGrant, RefreshFailure>>>;

struct InFlight {
    id: u64,
    task: RefreshTask,
}

/// Object-safe wrapper for TokenProvider (needed for `Arc<dyn>`).
trait TokenProviderDyn: Send + Sync {
    fn authorization_request_dyn(&self) -> AuthorizationRequest;

    fn exchange_code_dyn<'a>(
        &'a self,
        code: &'a str,
        code_verifier: &'a str,
    ) -> BoxFuture<'a, Result<TokenResponse, Error>>;

    fn refresh_dyn<'a>(&'a self, refresh_token: &'a str)
    -> BoxFuture<'a, Result<RefreshOutcome, Error>>;
}

impl<T: TokenProvider> TokenProviderDyn for T {
    fn authorization_request_dyn(&self) -> AuthorizationRequest {
        self.authorization_request()
    }

    fn exchange_code_dyn<'a>(
        &'a self,
        code: &'a str,
        code_verifier: &'a str,
    ) -> BoxFuture<'a, Result<TokenResponse, Error>> {
        self.exchange_code(code, code_verifier).boxed()
    }

    fn refresh_dyn<'a>(
        &'a self,
        refresh_token: &'a str,
    ) -> BoxFuture<'a, Result<RefreshOutcome, Error>> {
        self.refresh(refresh_token).boxed()
    }
}

/// Keeps one valid Gmail grant per user.
///
/// Refreshes are single-flight per user: while a refresh for a user is in
/// flight, every other caller for that user awaits the same result instead
/// of sending its own refresh request. Google may rotate refresh tokens, so a
/// second concurrent refresh could invalidate the first one's token.
pub struct GmailAuthorizationManager {
    store: Arc<dyn GrantStoreDyn>,
    provider: Arc<dyn TokenProviderDyn>,
    required_scopes: Vec<String>,
    refresh_skew: time::Duration,
    inflight: Mutex<HashMap<UserId, InFlight>>,
    next_flight: AtomicU64,
}

impl GmailAuthorizationManager {
    /// Create a manager requiring read and send scopes, refreshing 60 s early.
    #[must_use]
    pub fn new<G: GrantStore, P: TokenProvider>(store: G, provider: P) -> Self {
        Self {
            store: Arc::new(store),
            provider: Arc::new(provider),
            required_scopes: vec![GMAIL_READONLY_SCOPE.into(), GMAIL_SEND_SCOPE.into()],
            refresh_skew: time::Duration::seconds(60),
            inflight: Mutex::new(HashMap::new()),
            next_flight: AtomicU64::new(0),
        }
    }

    /// Scopes a grant must cover to be usable.
    #[must_use]
    pub fn with_required_scopes(mut self, scopes: Vec<String>) -> Self {
        self.required_scopes = scopes;
        self
    }

    /// Refresh when the access token expires within `skew`.
    #[must_use]
    pub fn with_refresh_skew(mut self, skew: time::Duration) -> Self {
        self.refresh_skew = skew;
        self
    }

    #[must_use]
    pub fn required_scopes(&self) -> &[String] {
        &self.required_scopes
    }

    /// Consent URL for the provider, with `state` and PKCE verifier the
    /// callback must present again.
    #[must_use]
    pub fn begin_authorization(&self) -> AuthorizationRequest {
        self.provider.authorization_request_dyn()
    }

    /// Exchange the callback's code and persist the resulting grant.
    ///
    /// # Errors
    ///
    /// [`Error::OAuth`]/[`Error::Http`] if the exchange fails,
    /// [`Error::GmailScopeMissing`] if the user granted fewer scopes than
    /// required (the partial grant is still stored).
    pub async fn complete_authorization(
        &self,
        user_id: &UserId,
        code: &str,
        code_verifier: &str,
    ) -> Result<ProviderGrant, Error> {
        let tokens = self.provider.exchange_code_dyn(code, code_verifier).await?;
        let previous = self.store.load_dyn(user_id).await.map_err(Error::store)?;
        let grant = tokens.into_grant(OffsetDateTime::now_utc(), previous.as_ref());

        self.store
            .save_dyn(user_id, grant.clone())
            .await
            .map_err(Error::store)?;

        if !grant.covers(&self.required_scopes) {
            tracing::warn!(user_id = %user_id, "Gmail consent granted only part of the required scopes");
            return Err(Error::GmailScopeMissing);
        }
        tracing::info!(user_id = %user_id, "Gmail grant issued");
        Ok(grant)
    }

    /// Load the user's grant, refreshing it first if it is (about to be) expired.
    ///
    /// # Errors
    ///
    /// - [`Error::GmailScopeMissing`] if there is no grant, it lacks a required
    ///   scope, it has no refresh token, or the provider rejects the refresh.
    /// - [`Error::TransientNetworkError`] if the provider cannot be reached.
    /// - [`Error::Store`] on persistence failure.
    pub async fn ensure_grant(&self, user_id: &UserId) -> Result<ProviderGrant, Error> {
        let Some(grant) = self.store.load_dyn(user_id).await.map_err(Error::store)? else {
            tracing::debug!(user_id = %user_id, "No Gmail grant on record");
            return Err(Error::GmailScopeMissing);
        };
        if !grant.covers(&self.required_scopes) {
            tracing::debug!(user_id = %user_id, "Gmail grant lacks a required scope");
            return Err(Error::GmailScopeMissing);
        }
        if !grant.needs_refresh(OffsetDateTime::now_utc(), self.refresh_skew) {
            return Ok(grant);
        }
        self.refresh_single_flight(user_id, grant.access_token).await
    }

    /// Replace an access token the provider refused although the clock
    /// said it was still valid.
    ///
    /// Joins an in-flight refresh, and returns the stored grant unchanged if
    /// another caller already replaced `rejected_access_token`.
    ///
    /// # Errors
    ///
    /// Same as [`ensure_grant`](Self::ensure_grant).
    pub async fn refresh_rejected_token(
        &self,
        user_id: &UserId,
        rejected_access_token: &str,
    ) -> Result<ProviderGrant, Error> {
        self.refresh_single_flight(user_id, rejected_access_token.to_owned())
            .await
    }

    /// Forget the user's grant.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Store`] on persistence failure.
    pub async fn revoke(&self, user_id: &UserId) -> Result<(), Error> {
        self.store.remove_dyn(user_id).await.map_err(Error::store)?;
        tracing::info!(user_id = %user_id, "Gmail grant removed");
        Ok(())
    }

    async fn refresh_single_flight(
        &self,
        user_id: &UserId,
        stale_access_token: String,
    ) -> Result<ProviderGrant, Error> {
        let (id, task) = {
            let mut inflight = self.inflight.lock().unwrap_or_else(PoisonError::into_inner);
            match inflight.get(user_id) {
                Some(flight) if flight.task.peek().is_none() => {
                    tracing::debug!(user_id = %user_id, "Joining in-flight Gmail token refresh");
                    (flight.id, flight.task.clone())
                }
                _ => {
                    let id = self.next_flight.fetch_add(1, Ordering::Relaxed);
                    let task = refresh_grant(
                        self.store.clone(),
                        self.provider.clone(),
                        user_id.clone(),
                        stale_access_token,
                        self.refresh_skew,
                    )
                    .boxed()
                    .shared();
                    inflight.insert(
                        user_id.clone(),
                        InFlight {
                            id,
                            task: task.clone(),
                        },
                    );
                    (id, task)
                }
            }
        };

        let result = task.await;

        let mut inflight = self.inflight.lock().unwrap_or_else(PoisonError::into_inner);
        if inflight.get(user_id).is_some_and(|flight| flight.id == id) {
            inflight.remove(user_id);
        }
        drop(inflight);

        result.map_err(Error::from)
    }
}

/// The one refresh shared by all waiters for a user.
///
/// Re-reads the grant first: a caller that loaded the grant just before an
/// earlier refresh completed must not trigger a second one.
async fn refresh_grant(
    store: Arc<dyn GrantStoreDyn>,
    provider: Arc<dyn TokenProviderDyn>,
    user_id: UserId,
    stale_access_token: String,
    skew: time::Duration,
) -> Result<ProviderGrant, RefreshFailure> {
    let store_failure = |e: crate::error::BoxError| RefreshFailure::Store(e.to_string());

    let current = store
        .load_dyn(&user_id)
        .await
        .map_err(store_failure)?
        .ok_or(RefreshFailure::NoGrant)?;

    if current.access_token != stale_access_token
        && !current.needs_refresh(OffsetDateTime::now_utc(), skew)
    {
        return Ok(current);
    }

    let Some(refresh_token) = current.refresh_token.clone() else {
        tracing::info!(user_id = %user_id, "Gmail grant expired without a refresh token");
        return Err(RefreshFailure::NoRefreshToken);
    };

    tracing::info!(user_id = %user_id, "Refreshing Gmail access token");
    match provider.refresh_dyn(&refresh_token).await {
        Ok(RefreshOutcome::Refreshed(tokens)) => {
            let grant = tokens.into_grant(OffsetDateTime::now_utc(), Some(&current));
            store
                .save_dyn(&user_id, grant.clone())
                .await
                .map_err(store_failure)?;
            Ok(grant)
        }
        Ok(RefreshOutcome::Rejected(detail)) => {
            tracing::warn!(user_id = %user_id, detail = %detail, "Gmail refresh token rejected");
            let revoked = ProviderGrant {
                refresh_token: None,
                ..current
            };
            store
                .save_dyn(&user_id, revoked)
                .await
                .map_err(store_failure)?;
            Err(RefreshFailure::Rejected)
        }
        Err(e) => {
            tracing::warn!(user_id = %user_id, error = %e, "Gmail token refresh failed");
            Err(RefreshFailure::Unavailable(e.to_string()))
        }
    }
}
