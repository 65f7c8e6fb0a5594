use std::sync::Arc;

use axum::extract::FromRef;
use axum_extra::extract::cookie::Key;

use super::config::AuthSettings;
use super::traits::{SessionStoreDyn, UserStoreDyn};
use crate::gmail::GmailApi;
use crate::grant::GmailAuthorizationManager;
use crate::identity::CredentialVerifierDyn;

/// Shared state for route handlers. Stores are type-erased so handlers are
/// not generic.
#[derive(Clone)]
pub(crate) struct ApiState {
    pub(super) verifier: Arc<dyn CredentialVerifierDyn>,
    pub(super) users: Arc<dyn UserStoreDyn>,
    pub(super) sessions: Arc<dyn SessionStoreDyn>,
    pub(super) grants: Arc<GmailAuthorizationManager>,
    pub(super) gmail: GmailApi,
    pub(super) settings: AuthSettings,
}

// PrivateCookieJar requires Key to be extractable from state
impl FromRef<ApiState> for Key {
    fn from_ref(state: &ApiState) -> Self {
        state.settings.cookie_key.clone()
    }
}
