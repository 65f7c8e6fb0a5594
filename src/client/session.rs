//! One authoritative "signed in?" answer for the protected surface.
//!
//! Three sources disagree at times: the cached identity (fast, possibly
//! stale), the server's session probe, and 401s from protected calls.
//! [`SessionReconciler`] folds them into an [`AuthSnapshot`] published on a
//! watch channel; UI code subscribes instead of polling.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::Instant;

use super::cache::{CachedIdentity, IdentityCache, PageCache};
use super::transport::{ApiRequest, Transport, TransportDyn};
use crate::error::Error;
use crate::types::{SessionStatus, SessionUser};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthState {
    /// Nothing checked yet.
    Unknown,
    /// The cached identity says signed in; the server has not confirmed.
    ProvisionallyAuthenticated,
    /// Confirmed by the server or a fresh sign-in.
    Authenticated,
    Unauthenticated,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthSnapshot {
    pub state: AuthState,
    pub user: Option<SessionUser>,
    /// The probe said "signed out" while the cache said "signed in". The
    /// provisional state is kept until a protected call answers 401.
    pub probe_disagrees: bool,
}

impl AuthSnapshot {
    fn new(state: AuthState, user: Option<SessionUser>) -> Self {
        Self {
            state,
            user,
            probe_disagrees: false,
        }
    }

    /// The boolean collaborators render from.
    #[must_use]
    pub fn authenticated(&self) -> bool {
        matches!(
            self.state,
            AuthState::Authenticated | AuthState::ProvisionallyAuthenticated
        )
    }
}

/// Page navigation, implemented by the embedding app's router.
pub trait Navigator: Send + Sync + 'static {
    fn current_route(&self) -> String;
    fn navigate(&self, route: &str);
}

pub struct SessionReconciler {
    transport: Arc<dyn TransportDyn>,
    cache: Arc<dyn IdentityCache>,
    navigator: Arc<dyn Navigator>,
    pages: Arc<PageCache>,
    snapshot: watch::Sender<AuthSnapshot>,
    redirected_at: Mutex<Option<Instant>>,
    marker_ttl: Duration,
    sign_in_route: String,
    auth_path: String,
}

impl SessionReconciler {
    pub fn new<T, C, N>(transport: T, cache: C, navigator: N) -> Self
    where
        T: Transport,
        C: IdentityCache,
        N: Navigator,
    {
        Self::from_parts(
            Arc::new(transport),
            Arc::new(cache),
            Arc::new(navigator),
            Arc::new(PageCache::new()),
        )
    }

    pub(crate) fn from_parts(
        transport: Arc<dyn TransportDyn>,
        cache: Arc<dyn IdentityCache>,
        navigator: Arc<dyn Navigator>,
        pages: Arc<PageCache>,
    ) -> Self {
        let (snapshot, _) = watch::channel(AuthSnapshot::new(AuthState::Unknown, None));
        Self {
            transport,
            cache,
            navigator,
            pages,
            snapshot,
            redirected_at: Mutex::new(None),
            marker_ttl: Duration::from_secs(10),
            sign_in_route: "/login".into(),
            auth_path: "/api/auth".into(),
        }
    }

    /// Page cache emptied on sign-out and demotion.
    #[must_use]
    pub fn with_page_cache(mut self, pages: Arc<PageCache>) -> Self {
        self.pages = pages;
        self
    }

    #[must_use]
    pub fn with_sign_in_route(mut self, route: impl Into<String>) -> Self {
        self.sign_in_route = route.into();
        self
    }

    /// How long one redirect to sign-in suppresses the next.
    #[must_use]
    pub fn with_redirect_marker_ttl(mut self, ttl: Duration) -> Self {
        self.marker_ttl = ttl;
        self
    }

    #[must_use]
    pub fn with_auth_path(mut self, path: impl Into<String>) -> Self {
        self.auth_path = path.into();
        self
    }

    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<AuthSnapshot> {
        self.snapshot.subscribe()
    }

    #[must_use]
    pub fn snapshot(&self) -> AuthSnapshot {
        self.snapshot.borrow().clone()
    }

    #[must_use]
    pub fn page_cache(&self) -> &Arc<PageCache> {
        &self.pages
    }

    /// Reconcile the cached identity with the server's session probe.
    ///
    /// A cached identity makes the state provisional immediately. The probe
    /// then confirms it, or is recorded as disagreeing without demoting. With
    /// no signed-in source at all the user is sent to sign-in, at most once
    /// per marker lifetime and never from the sign-in route itself.
    pub async fn check(&self) -> AuthSnapshot {
        if self.snapshot.borrow().state == AuthState::Unknown {
            if let Some(cached) = self.cache.load().filter(|c| c.authenticated) {
                tracing::debug!(user_id = %cached.user.id, "Rendering from cached identity");
                self.publish(AuthSnapshot::new(
                    AuthState::ProvisionallyAuthenticated,
                    Some(cached.user),
                ));
            }
        }

        let user = match self.probe().await {
            Ok(SessionStatus {
                authenticated: true,
                user: Some(user),
            }) => Some(user),
            Ok(_) => None,
            Err(e) => {
                tracing::warn!(error = %e, "Session probe failed");
                None
            }
        };

        let provisional = self.snapshot.borrow().state == AuthState::ProvisionallyAuthenticated;
        match user {
            Some(user) => self.confirm(user),
            None if provisional => {
                tracing::info!("Session probe disagrees with cached identity; keeping provisional state");
                self.snapshot.send_modify(|s| s.probe_disagrees = true);
            }
            None => {
                self.publish(AuthSnapshot::new(AuthState::Unauthenticated, None));
                self.redirect_to_sign_in();
            }
        }
        self.snapshot()
    }

    /// Record a completed sign-in.
    pub fn signed_in(&self, user: SessionUser) {
        self.confirm(user);
    }

    /// A protected call answered 401: the session is gone whatever the
    /// cache or an earlier probe said.
    pub fn protected_call_unauthorized(&self) {
        let was = self.snapshot.borrow().state;
        if was != AuthState::Unauthenticated {
            tracing::info!(previous = ?was, "Protected call rejected; demoting session");
        }
        self.cache.clear();
        self.pages.clear();
        self.publish(AuthSnapshot::new(AuthState::Unauthenticated, None));
        self.redirect_to_sign_in();
    }

    /// Sign out locally first, then tell the server (best effort).
    ///
    /// The client-visible state is signed out even if the server call fails.
    pub async fn sign_out(&self) {
        self.cache.clear();
        self.publish(AuthSnapshot::new(AuthState::Unauthenticated, None));

        let logout = ApiRequest::post(format!("{}/logout", self.auth_path));
        match self.transport.send_dyn(logout).await {
            Ok(response) if response.is_success() => {}
            Ok(response) => {
                tracing::warn!(status = response.status, "Server sign-out refused; continuing");
            }
            Err(e) => tracing::warn!(error = %e, "Server sign-out failed; continuing"),
        }

        self.pages.clear();
        self.mark_redirect();
        self.navigator.navigate(&self.sign_in_route);
        tracing::info!("Signed out");
    }

    async fn probe(&self) -> Result<SessionStatus, Error> {
        let response = self
            .transport
            .send_dyn(ApiRequest::get(format!("{}/session", self.auth_path)))
            .await?;
        if !response.is_success() {
            return Err(response.into_error());
        }
        response.parse()
    }

    fn confirm(&self, user: SessionUser) {
        self.cache.store(&CachedIdentity::signed_in(user.clone()));
        self.clear_redirect_marker();
        self.publish(AuthSnapshot::new(AuthState::Authenticated, Some(user)));
    }

    fn publish(&self, snapshot: AuthSnapshot) {
        self.snapshot.send_if_modified(|current| {
            let changed = *current != snapshot;
            *current = snapshot;
            changed
        });
    }

    /// Navigate to sign-in unless already there or recently sent there.
    fn redirect_to_sign_in(&self) -> bool {
        let route = self.navigator.current_route();
        let path = route.split(['?', '#']).next().unwrap_or_default();
        if path == self.sign_in_route {
            return false;
        }
        {
            let mut marker = self.redirected_at.lock().unwrap_or_else(PoisonError::into_inner);
            if marker.is_some_and(|at| at.elapsed() < self.marker_ttl) {
                tracing::debug!("Redirect to sign-in suppressed; one is already under way");
                return false;
            }
            *marker = Some(Instant::now());
        }
        self.navigator.navigate(&self.sign_in_route);
        true
    }

    fn mark_redirect(&self) {
        *self.redirected_at.lock().unwrap_or_else(PoisonError::into_inner) = Some(Instant::now());
    }

    fn clear_redirect_marker(&self) {
        self.redirected_at
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
    }
}
