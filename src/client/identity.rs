//! Identity SDK lifecycle and the credential-for-session exchange.
//!
//! The embedding environment implements [`IdentitySdk`] over Google's
//! callback-driven identity library. [`SdkLoader`] injects it once per
//! process; [`IdentityBroker`] turns its callbacks into one awaited
//! credential and exchanges that credential with the server.

use std::sync::{Arc, Mutex, OnceLock, PoisonError};
use std::time::Duration;

use tokio::sync::{mpsc, oneshot, watch};

use super::cache::{CachedIdentity, IdentityCache};
use super::transport::{ApiRequest, Transport, TransportDyn};
use crate::error::Error;
use crate::types::{CredentialRequest, SessionUser, SignedInResponse};

/// Element id the SDK script is injected under. Injection is skipped when an
/// element with this id already exists.
pub const SDK_ELEMENT_ID: &str = "google-identity-sdk";

/// Dismissal reason the SDK reports when the prompt closed because it
/// produced a credential.
pub const CREDENTIAL_RETURNED: &str = "credential_returned";

const GENERIC_SIGN_IN_FAILURE: &str = "Sign-in failed. Please try again.";

/// Notification from the one-tap prompt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PromptMoment {
    Displayed,
    /// Not shown (browser unsupported, cooldown, no session, ...). Carries the SDK reason.
    NotDisplayed(String),
    Skipped(String),
    Dismissed(String),
}

pub type LoadCallback = Box<dyn FnOnce(Result<(), String>) + Send>;
pub type CredentialCallback = Arc<dyn Fn(String) + Send + Sync>;
pub type MomentCallback = Box<dyn Fn(PromptMoment) + Send + Sync>;

/// Google's identity library as seen from Rust. Every result arrives through
/// a callback, possibly from another thread.
pub trait IdentitySdk: Send + Sync + 'static {
    /// Whether an element with `element_id` is already in the document.
    fn script_present(&self, element_id: &str) -> bool;

    /// Insert the SDK script under `element_id`; `on_load` fires once.
    fn inject_script(&self, element_id: &str, on_load: LoadCallback);

    /// Register the client id and the callback receiving credentials from
    /// both the prompt and the button.
    fn initialize(&self, client_id: &str, on_credential: CredentialCallback);

    /// Show the one-tap prompt. `on_moment` may fire several times.
    fn prompt(&self, on_moment: MomentCallback);

    /// Render the explicit sign-in button.
    fn render_button(&self);
}

/// SDK script lifecycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SdkState {
    Uninitialized,
    Loading,
    Ready,
    Failed(String),
}

/// Loads the identity SDK at most once and lets any number of callers await it.
pub struct SdkLoader {
    state: Arc<watch::Sender<SdkState>>,
    timeout: Duration,
}

impl SdkLoader {
    #[must_use]
    pub fn new(timeout: Duration) -> Self {
        let (state, _) = watch::channel(SdkState::Uninitialized);
        Self {
            state: Arc::new(state),
            timeout,
        }
    }

    /// The process-wide loader (5 s timeout).
    #[must_use]
    pub fn global() -> Arc<SdkLoader> {
        static LOADER: OnceLock<Arc<SdkLoader>> = OnceLock::new();
        LOADER
            .get_or_init(|| Arc::new(SdkLoader::new(Duration::from_secs(5))))
            .clone()
    }

    #[must_use]
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    #[must_use]
    pub fn state(&self) -> SdkState {
        self.state.borrow().clone()
    }

    /// Wait until the SDK is usable, starting the load if nobody has.
    ///
    /// # Errors
    ///
    /// Returns [`Error::IdentityServiceUnavailable`] if the script failed to
    /// load or did not load within the timeout.
    pub async fn ready(&self, sdk: &dyn IdentitySdk) -> Result<(), Error> {
        let mut rx = self.state.subscribe();

        let mut starter = false;
        self.state.send_if_modified(|state| {
            if *state == SdkState::Uninitialized {
                *state = SdkState::Loading;
                starter = true;
            }
            starter
        });

        if starter {
            if sdk.script_present(SDK_ELEMENT_ID) {
                tracing::debug!("Identity SDK already present");
                self.state.send_replace(SdkState::Ready);
            } else {
                tracing::debug!("Injecting identity SDK");
                let state = self.state.clone();
                sdk.inject_script(
                    SDK_ELEMENT_ID,
                    Box::new(move |result| {
                        state.send_replace(match result {
                            Ok(()) => SdkState::Ready,
                            Err(reason) => SdkState::Failed(reason),
                        });
                    }),
                );
            }
        }

        let settled = rx.wait_for(|s| matches!(s, SdkState::Ready | SdkState::Failed(_)));
        let outcome = match tokio::time::timeout(self.timeout, settled).await {
            Ok(Ok(state)) => state.clone(),
            Ok(Err(_)) => SdkState::Failed("loader dropped".into()),
            Err(_) => {
                let reason = format!("identity SDK did not load within {:?}", self.timeout);
                self.state.send_if_modified(|state| {
                    let loading = *state == SdkState::Loading;
                    if loading {
                        *state = SdkState::Failed(reason.clone());
                    }
                    loading
                });
                SdkState::Failed(reason)
            }
        };

        match outcome {
            SdkState::Ready => Ok(()),
            SdkState::Failed(reason) => {
                tracing::warn!(reason = %reason, "Identity SDK unavailable");
                Err(Error::IdentityServiceUnavailable(reason))
            }
            SdkState::Uninitialized | SdkState::Loading => Err(
                Error::IdentityServiceUnavailable("identity SDK never settled".into()),
            ),
        }
    }
}

type PendingCredential = Arc<Mutex<Option<oneshot::Sender<String>>>>;

/// Signs the user in with Google and establishes a server session.
pub struct IdentityBroker {
    sdk: Arc<dyn IdentitySdk>,
    loader: Arc<SdkLoader>,
    transport: Arc<dyn TransportDyn>,
    cache: Arc<dyn IdentityCache>,
    client_id: String,
    exchange_path: String,
    pending: PendingCredential,
    initialized: OnceLock<()>,
    turn: tokio::sync::Mutex<()>,
}

impl IdentityBroker {
    /// Broker using the process-wide [`SdkLoader`].
    pub fn new<S, T, C>(sdk: S, transport: T, cache: C, client_id: impl Into<String>) -> Self
    where
        S: IdentitySdk,
        T: Transport,
        C: IdentityCache,
    {
        Self::from_parts(
            Arc::new(sdk),
            Arc::new(transport),
            Arc::new(cache),
            client_id.into(),
        )
    }

    pub(crate) fn from_parts(
        sdk: Arc<dyn IdentitySdk>,
        transport: Arc<dyn TransportDyn>,
        cache: Arc<dyn IdentityCache>,
        client_id: String,
    ) -> Self {
        Self {
            sdk,
            loader: SdkLoader::global(),
            transport,
            cache,
            client_id,
            exchange_path: "/api/auth/google".into(),
            pending: Arc::default(),
            initialized: OnceLock::new(),
            turn: tokio::sync::Mutex::new(()),
        }
    }

    /// Use a dedicated loader instead of the process-wide one.
    #[must_use]
    pub fn with_loader(mut self, loader: Arc<SdkLoader>) -> Self {
        self.loader = loader;
        self
    }

    /// Mount point of the sign-in endpoints (default `/api/auth`).
    #[must_use]
    pub fn with_auth_path(mut self, auth_path: &str) -> Self {
        self.exchange_path = format!("{auth_path}/google");
        self
    }

    /// Run the full sign-in: one-tap first, the button if one-tap is not
    /// shown, then the credential exchange.
    ///
    /// Concurrent calls queue; the SDK only ever runs one sign-in at a time.
    /// Navigation afterwards is the caller's job.
    ///
    /// # Errors
    ///
    /// - [`Error::IdentityServiceUnavailable`] if the SDK cannot be loaded.
    /// - [`Error::CredentialExchangeFailure`] if the server refuses the credential.
    /// - [`Error::Http`] / [`Error::TransientNetworkError`] if the server is unreachable.
    pub async fn sign_in(&self) -> Result<SessionUser, Error> {
        let _turn = self.turn.lock().await;
        self.loader.ready(self.sdk.as_ref()).await?;
        self.initialize_once();
        let credential = self.obtain_credential().await?;
        self.exchange_credential(&credential).await
    }

    /// Exchange a raw credential for a server session and cache the user.
    ///
    /// # Errors
    ///
    /// Same as [`sign_in`](Self::sign_in), minus SDK failures.
    pub async fn exchange_credential(&self, credential: &str) -> Result<SessionUser, Error> {
        let request = ApiRequest::post(self.exchange_path.clone()).with_json(&CredentialRequest {
            credential: credential.to_owned(),
        })?;
        let response = self.transport.send_dyn(request).await?;

        if !response.is_success() {
            let message = response
                .error_message()
                .unwrap_or_else(|| GENERIC_SIGN_IN_FAILURE.to_owned());
            tracing::warn!(status = response.status, message = %message, "Credential exchange refused");
            return Err(Error::CredentialExchangeFailure(message));
        }

        let SignedInResponse { user } = response
            .parse()
            .map_err(|_| Error::CredentialExchangeFailure(GENERIC_SIGN_IN_FAILURE.to_owned()))?;
        self.cache.store(&CachedIdentity::signed_in(user.clone()));
        tracing::info!(user_id = %user.id, "Signed in");
        Ok(user)
    }

    fn initialize_once(&self) {
        self.initialized.get_or_init(|| {
            let pending = self.pending.clone();
            self.sdk.initialize(
                &self.client_id,
                Arc::new(move |credential| {
                    let waiter = pending.lock().unwrap_or_else(PoisonError::into_inner).take();
                    match waiter {
                        Some(tx) => {
                            let _ = tx.send(credential);
                        }
                        None => tracing::warn!("Credential arrived with no sign-in waiting"),
                    }
                }),
            );
        });
    }

    /// Adapter from the SDK's callbacks to a single credential.
    async fn obtain_credential(&self) -> Result<String, Error> {
        let (tx, mut credential) = oneshot::channel();
        *self.pending.lock().unwrap_or_else(PoisonError::into_inner) = Some(tx);

        let (moment_tx, mut moments) = mpsc::unbounded_channel();
        self.sdk.prompt(Box::new(move |moment| {
            let _ = moment_tx.send(moment);
        }));

        loop {
            tokio::select! {
                biased;
                result = &mut credential => return result.map_err(|_| sdk_dropped()),
                moment = moments.recv() => match moment {
                    Some(PromptMoment::Displayed) => {}
                    Some(PromptMoment::Dismissed(reason)) if reason == CREDENTIAL_RETURNED => {
                        return credential.await.map_err(|_| sdk_dropped());
                    }
                    other => {
                        tracing::debug!(moment = ?other, "One-tap unavailable; rendering sign-in button");
                        break;
                    }
                },
            }
        }

        self.sdk.render_button();
        credential.await.map_err(|_| sdk_dropped())
    }
}

fn sdk_dropped() -> Error {
    Error::IdentityServiceUnavailable("identity SDK abandoned the sign-in".into())
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::client::cache::MemoryIdentityCache;
    use crate::client::testing::ScriptedTransport;

    #[derive(Clone, Copy, PartialEq)]
    enum OneTap {
        Credential,
        NotDisplayed,
        DismissedByUser,
    }

    enum Load {
        Succeed,
        Fail,
        Never,
    }

    /// SDK double. Loads on a spawned task, as the browser would.
    struct FakeSdk {
        one_tap: OneTap,
        load: Load,
        injections: AtomicUsize,
        buttons: AtomicUsize,
        on_credential: Mutex<Option<CredentialCallback>>,
    }

    impl FakeSdk {
        fn new(one_tap: OneTap, load: Load) -> Arc<Self> {
            Arc::new(Self {
                one_tap,
                load,
                injections: AtomicUsize::new(0),
                buttons: AtomicUsize::new(0),
                on_credential: Mutex::new(None),
            })
        }

        fn emit(&self, credential: &str) {
            let callback = self.on_credential.lock().unwrap().clone().unwrap();
            callback(credential.to_owned());
        }
    }

    impl IdentitySdk for Arc<FakeSdk> {
        fn script_present(&self, _element_id: &str) -> bool {
            false
        }

        fn inject_script(&self, element_id: &str, on_load: LoadCallback) {
            assert_eq!(element_id, SDK_ELEMENT_ID);
            self.injections.fetch_add(1, Ordering::SeqCst);
            let result = match self.load {
                Load::Succeed => Ok(()),
                Load::Fail => Err("blocked by extension".to_owned()),
                Load::Never => return,
            };
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(50)).await;
                on_load(result);
            });
        }

        fn initialize(&self, client_id: &str, on_credential: CredentialCallback) {
            assert_eq!(client_id, "web-client");
            *self.on_credential.lock().unwrap() = Some(on_credential);
        }

        fn prompt(&self, on_moment: MomentCallback) {
            on_moment(PromptMoment::Displayed);
            match self.one_tap {
                OneTap::Credential => {
                    self.emit("one-tap-credential");
                    on_moment(PromptMoment::Dismissed(CREDENTIAL_RETURNED.into()));
                }
                OneTap::NotDisplayed => on_moment(PromptMoment::NotDisplayed("opt_out_or_no_session".into())),
                OneTap::DismissedByUser => on_moment(PromptMoment::Dismissed("cancel_called".into())),
            }
        }

        fn render_button(&self) {
            self.buttons.fetch_add(1, Ordering::SeqCst);
            self.emit("button-credential");
        }
    }

    fn signed_in_body(id: &str) -> serde_json::Value {
        serde_json::json!({"user": {"id": id, "email": "ada@example.com"}})
    }

    fn broker(
        sdk: &Arc<FakeSdk>,
        transport: &Arc<ScriptedTransport>,
        cache: &Arc<MemoryIdentityCache>,
    ) -> IdentityBroker {
        IdentityBroker::new(sdk.clone(), transport.clone(), cache.clone(), "web-client")
            .with_loader(Arc::new(SdkLoader::new(Duration::from_secs(5))))
    }

    fn credential_sent(transport: &ScriptedTransport, index: usize) -> serde_json::Value {
        transport.requests()[index].body.clone().unwrap()["credential"].clone()
    }

    #[tokio::test]
    async fn one_tap_credential_is_exchanged_and_cached() {
        let sdk = FakeSdk::new(OneTap::Credential, Load::Succeed);
        let transport = Arc::new(ScriptedTransport::new());
        transport.reply(200, signed_in_body("u1"));
        let cache = Arc::new(MemoryIdentityCache::new());

        let user = broker(&sdk, &transport, &cache).sign_in().await.unwrap();

        assert_eq!(user.id.as_str(), "u1");
        assert_eq!(credential_sent(&transport, 0), "one-tap-credential");
        assert_eq!(transport.requests()[0].path, "/api/auth/google");
        assert_eq!(sdk.buttons.load(Ordering::SeqCst), 0);
        assert_eq!(cache.load().unwrap().user, user);
    }

    #[tokio::test]
    async fn falls_back_to_button_when_one_tap_is_not_shown() {
        for one_tap in [OneTap::NotDisplayed, OneTap::DismissedByUser] {
            let sdk = FakeSdk::new(one_tap, Load::Succeed);
            let transport = Arc::new(ScriptedTransport::new());
            transport.reply(200, signed_in_body("u1"));
            let cache = Arc::new(MemoryIdentityCache::new());

            broker(&sdk, &transport, &cache).sign_in().await.unwrap();

            assert_eq!(sdk.buttons.load(Ordering::SeqCst), 1);
            assert_eq!(credential_sent(&transport, 0), "button-credential");
        }
    }

    #[tokio::test]
    async fn server_refusal_surfaces_its_message() {
        let sdk = FakeSdk::new(OneTap::Credential, Load::Succeed);
        let transport = Arc::new(ScriptedTransport::new());
        transport.reply(401, serde_json::json!({"error": "email address is not verified"}));
        let cache = Arc::new(MemoryIdentityCache::new());

        let err = broker(&sdk, &transport, &cache).sign_in().await.unwrap_err();
        match err {
            Error::CredentialExchangeFailure(msg) => assert_eq!(msg, "email address is not verified"),
            other => panic!("unexpected {other:?}"),
        }
        assert!(cache.load().is_none());
    }

    #[tokio::test]
    async fn refusal_without_message_is_generic() {
        let sdk = FakeSdk::new(OneTap::Credential, Load::Succeed);
        let transport = Arc::new(ScriptedTransport::new());
        transport.reply(500, serde_json::json!("oops"));
        let cache = Arc::new(MemoryIdentityCache::new());

        match broker(&sdk, &transport, &cache).sign_in().await {
            Err(Error::CredentialExchangeFailure(msg)) => assert_eq!(msg, GENERIC_SIGN_IN_FAILURE),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn concurrent_sign_ins_inject_once_and_queue() {
        let sdk = FakeSdk::new(OneTap::Credential, Load::Succeed);
        let transport = Arc::new(ScriptedTransport::new());
        transport.reply(200, signed_in_body("u1"));
        transport.reply(200, signed_in_body("u1"));
        let cache = Arc::new(MemoryIdentityCache::new());
        let broker = broker(&sdk, &transport, &cache);

        let (a, b) = tokio::join!(broker.sign_in(), broker.sign_in());
        a.unwrap();
        b.unwrap();

        assert_eq!(sdk.injections.load(Ordering::SeqCst), 1);
        assert_eq!(transport.request_count(), 2);
    }

    #[tokio::test]
    async fn concurrent_loaders_share_one_injection() {
        let sdk = FakeSdk::new(OneTap::Credential, Load::Succeed);
        let loader = SdkLoader::new(Duration::from_secs(5));

        let results = futures::future::join_all((0..5).map(|_| loader.ready(&sdk))).await;

        assert!(results.iter().all(Result::is_ok));
        assert_eq!(sdk.injections.load(Ordering::SeqCst), 1);
        assert_eq!(loader.state(), SdkState::Ready);
    }

    #[tokio::test]
    async fn failed_load_is_unavailable() {
        let sdk = FakeSdk::new(OneTap::Credential, Load::Fail);
        let loader = SdkLoader::new(Duration::from_secs(5));

        assert!(matches!(
            loader.ready(&sdk).await,
            Err(Error::IdentityServiceUnavailable(_))
        ));
        assert_eq!(loader.state(), SdkState::Failed("blocked by extension".into()));
        // Settled: a second caller fails without another injection
        assert!(loader.ready(&sdk).await.is_err());
        assert_eq!(sdk.injections.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn load_timeout_is_unavailable() {
        let sdk = FakeSdk::new(OneTap::Credential, Load::Never);
        let loader = SdkLoader::new(Duration::from_secs(5));

        let started = tokio::time::Instant::now();
        let err = loader.ready(&sdk).await.unwrap_err();

        assert!(matches!(err, Error::IdentityServiceUnavailable(_)));
        assert_eq!(started.elapsed(), Duration::from_secs(5));
        assert!(matches!(loader.state(), SdkState::Failed(_)));
    }
}
