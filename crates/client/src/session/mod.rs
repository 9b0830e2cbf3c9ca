//! Client session and token lifecycle.
//!
//! [`SessionManager`] holds the signed-in identity and its current ID
//! token, keeps the token fresh on a schedule, and wraps API calls so a
//! single 401 triggers exactly one refresh and one retry.
//!
//! # State machine
//!
//! ```text
//! Unauthenticated ──sign_in──▶ Authenticating ──token──▶ Authenticated
//!        ▲                          │                      │      ▲
//!        │                       failure                refresh   │
//!        │                          ▼                      ▼      │
//!        └──────────────────── sign_out ◀──failure── Refreshing ──┘
//! ```
//!
//! State is published on a `watch` channel; lifecycle events go out on a
//! `broadcast` channel. No lock is held across a network call.

mod error;
mod refresh;
mod state;

pub use error::SessionError;
pub use refresh::RefreshHandle;
pub use state::{SessionContext, SessionEvent, SessionState, TenantScope};

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::runtime::Handle;
use tokio::sync::{RwLock, broadcast, watch};
use tracing::{debug, info, instrument, warn};

use zone_editor_core::{Identity, IdentityId};
use zone_editor_core::limits::{AUTH_READY_TIMEOUT, TOKEN_REFRESH_PERIOD};

use crate::config::ClientConfig;
use crate::identity::{IdentityProvider, IdentityProviderError};
use crate::token::IdToken;
use crate::transport::{AUTHORIZATION_HEADER, ApiRequest, ApiResponse, HttpTransport};

const EVENT_CHANNEL_CAPACITY: usize = 32;

/// Tunables for a [`SessionManager`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionOptions {
    pub login_path: String,
    pub refresh_period: Duration,
    pub ready_timeout: Duration,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            login_path: "/login".to_string(),
            refresh_period: TOKEN_REFRESH_PERIOD,
            ready_timeout: AUTH_READY_TIMEOUT,
        }
    }
}

impl From<&ClientConfig> for SessionOptions {
    fn from(config: &ClientConfig) -> Self {
        Self {
            login_path: config.login_path.clone(),
            refresh_period: config.refresh_period,
            ready_timeout: config.ready_timeout,
        }
    }
}

#[derive(Default)]
struct Session {
    identity: Option<Identity>,
    token: Option<IdToken>,
}

/// Coordinates sign-in, token refresh and authorized API calls.
///
/// Cheap to clone; clones share one session.
#[derive(Clone)]
pub struct SessionManager {
    inner: Arc<SessionInner>,
}

struct SessionInner {
    provider: Arc<dyn IdentityProvider>,
    transport: Arc<dyn HttpTransport>,
    options: SessionOptions,
    session: RwLock<Session>,
    state: watch::Sender<SessionState>,
    ready: watch::Sender<bool>,
    events: broadcast::Sender<SessionEvent>,
    last_error: Mutex<Option<String>>,
}

impl SessionManager {
    #[must_use]
    pub fn new(
        provider: Arc<dyn IdentityProvider>,
        transport: Arc<dyn HttpTransport>,
        options: SessionOptions,
    ) -> Self {
        let (state, _) = watch::channel(SessionState::Unauthenticated);
        let (ready, _) = watch::channel(false);
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);

        Self {
            inner: Arc::new(SessionInner {
                provider,
                transport,
                options,
                session: RwLock::new(Session::default()),
                state,
                ready,
                events,
                last_error: Mutex::new(None),
            }),
        }
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Run the first auth state check: resume a persisted identity if the
    /// provider has one, then mark the manager ready.
    ///
    /// # Errors
    ///
    /// Returns the restore or token error; the session is left
    /// `Unauthenticated` and the manager is still marked ready.
    #[instrument(skip(self))]
    pub async fn initialize(&self) -> Result<SessionState, SessionError> {
        let result = match self.inner.provider.restore().await {
            Ok(Some(identity)) => {
                self.set_state(SessionState::Authenticating);
                self.inner.session.write().await.identity = Some(identity);
                match self.fetch_token().await {
                    Ok(_) => {
                        info!("restored previous session");
                        Ok(SessionState::Authenticated)
                    }
                    Err(e) => {
                        self.reset_local().await;
                        Err(e)
                    }
                }
            }
            Ok(None) => Ok(SessionState::Unauthenticated),
            Err(e) => {
                warn!(error = %e, "could not restore session");
                Err(SessionError::SignInFailed(e))
            }
        };

        self.inner.ready.send_replace(true);
        result
    }

    /// Wait until [`SessionManager::initialize`] has finished.
    ///
    /// Returns `false` if `timeout` elapses first; callers treat that as
    /// signed out.
    pub async fn wait_until_ready(&self, timeout: Duration) -> bool {
        let mut ready = self.inner.ready.subscribe();
        matches!(
            tokio::time::timeout(timeout, ready.wait_for(|ready| *ready)).await,
            Ok(Ok(_))
        )
    }

    /// [`SessionManager::wait_until_ready`] with the configured timeout.
    pub async fn wait_until_ready_default(&self) -> bool {
        self.wait_until_ready(self.inner.options.ready_timeout).await
    }

    /// Interactive sign-in followed by an immediate token fetch.
    ///
    /// # Errors
    ///
    /// - `UserCancelled` when the user closed or the browser blocked the flow
    /// - `SignInFailed` for any other provider failure
    /// - the token error when the follow-up fetch fails
    ///
    /// In every case the session ends `Unauthenticated`.
    #[instrument(skip(self))]
    pub async fn sign_in(&self) -> Result<Identity, SessionError> {
        self.set_state(SessionState::Authenticating);

        let identity = match self.inner.provider.sign_in().await {
            Ok(identity) => identity,
            Err(IdentityProviderError::Cancelled(reason)) => {
                info!(?reason, "sign-in cancelled by user");
                self.reset_local().await;
                self.record_error(reason.user_message());
                return Err(SessionError::UserCancelled(reason));
            }
            Err(e) => {
                warn!(error = %e, "sign-in failed");
                self.reset_local().await;
                let err = SessionError::SignInFailed(e);
                self.record_error(&err.user_message());
                return Err(err);
            }
        };

        self.inner.session.write().await.identity = Some(identity.clone());
        if let Err(e) = self.fetch_token().await {
            warn!(error = %e, "token fetch after sign-in failed");
            self.reset_local().await;
            self.record_error(&e.user_message());
            return Err(e);
        }

        self.clear_error();
        info!(uid = %identity.uid, "signed in");
        self.emit(SessionEvent::SignedIn {
            uid: identity.uid.clone(),
        });
        Ok(identity)
    }

    /// Force a freshly signed token and read its tenant claim.
    ///
    /// # Errors
    ///
    /// `TokenFetch` when no identity is held or the provider fails;
    /// `InvalidToken` when the token payload cannot be read.
    #[instrument(skip(self))]
    pub async fn fetch_token(&self) -> Result<IdToken, SessionError> {
        let identity = self
            .inner
            .session
            .read()
            .await
            .identity
            .clone()
            .ok_or(SessionError::TokenFetch(IdentityProviderError::NotSignedIn))?;

        let raw = self
            .inner
            .provider
            .id_token(&identity, true)
            .await
            .map_err(SessionError::TokenFetch)?;
        let token = IdToken::parse(raw)?;

        {
            let mut session = self.inner.session.write().await;
            // A sign-out may have landed while the provider was minting.
            let still_signed_in = session
                .identity
                .as_ref()
                .is_some_and(|held| held.uid == identity.uid);
            if !still_signed_in {
                return Err(SessionError::TokenFetch(IdentityProviderError::NotSignedIn));
            }
            session.token = Some(token.clone());
            // Published under the lock so a concurrent sign-out lands after it.
            self.set_state(SessionState::Authenticated);
        }

        debug!(tenant_id = ?token.tenant_id(), expires_at = ?token.expires_at(), "token fetched");
        Ok(token)
    }

    /// Re-fetch the token. A failure signs the session out.
    ///
    /// With no identity held this does nothing.
    ///
    /// # Errors
    ///
    /// The fetch error, after the forced sign-out. A session that was
    /// signed out while the fetch ran is not signed out again.
    #[instrument(skip(self))]
    pub async fn refresh_token(&self) -> Result<(), SessionError> {
        let Some(uid) = self.current_uid().await else {
            debug!("no identity held; skipping token refresh");
            return Ok(());
        };

        self.set_state(SessionState::Refreshing);
        let e = match self.fetch_token().await {
            Ok(_) => {
                self.emit(SessionEvent::TokenRefreshed);
                return Ok(());
            }
            Err(e) => e,
        };

        if self.current_uid().await.as_ref() != Some(&uid) {
            // Signed out while the fetch was in flight; that sign-out
            // already cleared the session and told the UI.
            debug!(error = %e, "session ended during token refresh");
            let session = self.inner.session.write().await;
            if session.identity.is_none() {
                self.set_state(SessionState::Unauthenticated);
            }
            return Err(e);
        }

        warn!(error = %e, "token refresh failed; signing out");
        self.record_error(&e.user_message());
        self.sign_out().await;
        Err(e)
    }

    /// Clear the local session and ask the UI to go to the login page.
    ///
    /// Local state is cleared even when the provider's sign-out fails.
    #[instrument(skip(self))]
    pub async fn sign_out(&self) {
        if let Err(e) = self.inner.provider.sign_out().await {
            warn!(error = %e, "provider sign-out failed; clearing local session anyway");
        }

        self.reset_local().await;
        info!("signed out");
        self.emit(SessionEvent::SignedOut);
        self.emit(SessionEvent::RedirectToLogin {
            path: self.inner.options.login_path.clone(),
        });
    }

    /// Start refreshing the token every refresh period.
    ///
    /// Returns `None` unless the session is `Authenticated` and a tokio
    /// runtime is running. The schedule stops when the handle is dropped and
    /// when the session becomes `Unauthenticated`.
    #[must_use]
    pub fn start_token_refresh(&self) -> Option<RefreshHandle> {
        if self.state() != SessionState::Authenticated {
            return None;
        }
        let runtime = Handle::try_current().ok()?;

        let task = runtime.spawn(refresh::run(
            Arc::downgrade(&self.inner),
            self.inner.state.subscribe(),
            self.inner.options.refresh_period,
        ));
        debug!(period = ?self.inner.options.refresh_period, "token refresh scheduled");
        Some(RefreshHandle::new(task))
    }

    // =========================================================================
    // Authorized calls
    // =========================================================================

    /// Send `request` with the bearer token attached.
    ///
    /// A 401 while a token is held triggers one forced refresh and one
    /// retry. If either fails the session is signed out and the latest
    /// error returned.
    ///
    /// # Errors
    ///
    /// - `NoTokenAvailable` if no token is held (nothing is sent)
    /// - `AuthExpired` for a 401 that recovery could not fix
    /// - `Transport` for any other failed call
    #[instrument(skip(self, request), fields(method = %request.method, path = %request.path))]
    pub async fn call_authorized(&self, mut request: ApiRequest) -> Result<ApiResponse, SessionError> {
        request.set_header(AUTHORIZATION_HEADER, self.bearer().await?);

        let rejected = match self.inner.transport.send(&request).await {
            Ok(response) => return Ok(response),
            Err(e) => e,
        };

        if rejected.is_auth_expired() && self.has_token().await {
            return self.recover_once(request, rejected.into()).await;
        }
        Err(rejected.into())
    }

    /// The single refresh-and-retry after a 401. Never loops.
    async fn recover_once(
        &self,
        mut request: ApiRequest,
        rejected: SessionError,
    ) -> Result<ApiResponse, SessionError> {
        info!(error = %rejected, "token rejected; refreshing and retrying once");

        // refresh_token signs out on failure.
        self.refresh_token().await?;

        let bearer = match self.bearer().await {
            Ok(bearer) => bearer,
            Err(e) => {
                self.sign_out().await;
                return Err(e);
            }
        };
        request.set_header(AUTHORIZATION_HEADER, bearer);

        match self.inner.transport.send(&request).await {
            Ok(response) => Ok(response),
            Err(e) => {
                warn!(error = %e, "retry after refresh failed; signing out");
                let err = SessionError::from(e);
                self.record_error(&err.user_message());
                self.sign_out().await;
                Err(err)
            }
        }
    }

    /// `(Authorization, Bearer <token>)` for the held token.
    ///
    /// # Errors
    ///
    /// `NoTokenAvailable` if no token is held.
    pub async fn auth_header(&self) -> Result<(&'static str, String), SessionError> {
        Ok((AUTHORIZATION_HEADER, self.bearer().await?))
    }

    async fn bearer(&self) -> Result<String, SessionError> {
        self.inner
            .session
            .read()
            .await
            .token
            .as_ref()
            .map(IdToken::bearer)
            .ok_or(SessionError::NoTokenAvailable)
    }

    async fn current_uid(&self) -> Option<IdentityId> {
        self.inner
            .session
            .read()
            .await
            .identity
            .as_ref()
            .map(|identity| identity.uid.clone())
    }

    async fn has_token(&self) -> bool {
        self.inner.session.read().await.token.is_some()
    }

    // =========================================================================
    // Observation
    // =========================================================================

    /// Snapshot of the identity, tenant and token.
    pub async fn context(&self) -> SessionContext {
        let session = self.inner.session.read().await;
        SessionContext {
            identity: session.identity.clone(),
            tenant_id: session
                .token
                .as_ref()
                .and_then(|token| token.tenant_id().cloned()),
            token: session.token.clone(),
        }
    }

    #[must_use]
    pub fn state(&self) -> SessionState {
        *self.inner.state.borrow()
    }

    #[must_use]
    pub fn subscribe_state(&self) -> watch::Receiver<SessionState> {
        self.inner.state.subscribe()
    }

    #[must_use]
    pub fn subscribe_events(&self) -> broadcast::Receiver<SessionEvent> {
        self.inner.events.subscribe()
    }

    /// User-facing message from the last failure, if not cleared.
    #[must_use]
    pub fn last_error(&self) -> Option<String> {
        self.inner
            .last_error
            .lock()
            .ok()
            .and_then(|guard| guard.clone())
    }

    pub fn clear_error(&self) {
        if let Ok(mut guard) = self.inner.last_error.lock() {
            *guard = None;
        }
    }

    // =========================================================================
    // Internals
    // =========================================================================

    fn set_state(&self, state: SessionState) {
        let previous = self.inner.state.send_replace(state);
        if previous != state {
            debug!(from = %previous, to = %state, "session state changed");
        }
    }

    fn emit(&self, event: SessionEvent) {
        // No subscribers is fine.
        let _ = self.inner.events.send(event);
    }

    fn record_error(&self, message: &str) {
        if let Ok(mut guard) = self.inner.last_error.lock() {
            *guard = Some(message.to_string());
        }
    }

    async fn reset_local(&self) {
        let mut session = self.inner.session.write().await;
        session.identity = None;
        session.token = None;
        self.set_state(SessionState::Unauthenticated);
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use serde_json::json;
    use tokio::sync::Notify;

    use zone_editor_core::TenantId;

    use super::*;
    use crate::identity::CancelReason;
    use crate::token::encode_unsigned;
    use crate::transport::TransportError;

    // -------------------------------------------------------------------------
    // Fakes
    // -------------------------------------------------------------------------

    #[derive(Default)]
    struct FakeProvider {
        restore: Option<Identity>,
        sign_in_error: Mutex<Option<IdentityProviderError>>,
        token_failures: AtomicUsize,
        token_calls: AtomicUsize,
        sign_out_fails: bool,
        sign_out_calls: AtomicUsize,
        /// Held by the next token call: signals the first, waits on the second.
        token_gate: Mutex<Option<(Arc<Notify>, Arc<Notify>)>>,
    }

    impl FakeProvider {
        fn failing_sign_in(error: IdentityProviderError) -> Self {
            Self {
                sign_in_error: Mutex::new(Some(error)),
                ..Self::default()
            }
        }

        fn fail_next_tokens(&self, n: usize) {
            self.token_failures.store(n, Ordering::SeqCst);
        }

        fn token_calls(&self) -> usize {
            self.token_calls.load(Ordering::SeqCst)
        }

        fn sign_out_calls(&self) -> usize {
            self.sign_out_calls.load(Ordering::SeqCst)
        }

        /// Pause the next token call until `release` is notified.
        fn gate_next_token(&self) -> (Arc<Notify>, Arc<Notify>) {
            let entered = Arc::new(Notify::new());
            let release = Arc::new(Notify::new());
            *self.token_gate.lock().unwrap() = Some((entered.clone(), release.clone()));
            (entered, release)
        }
    }

    #[async_trait]
    impl IdentityProvider for FakeProvider {
        async fn restore(&self) -> Result<Option<Identity>, IdentityProviderError> {
            Ok(self.restore.clone())
        }

        async fn sign_in(&self) -> Result<Identity, IdentityProviderError> {
            match self.sign_in_error.lock().unwrap().take() {
                Some(error) => Err(error),
                None => Ok(Identity::new("u1").with_email("u1@example.test")),
            }
        }

        async fn id_token(
            &self,
            identity: &Identity,
            force_refresh: bool,
        ) -> Result<String, IdentityProviderError> {
            assert!(force_refresh);
            let gate = self.token_gate.lock().unwrap().take();
            if let Some((entered, release)) = gate {
                entered.notify_one();
                release.notified().await;
            }
            let call = self.token_calls.fetch_add(1, Ordering::SeqCst);
            let failed = self
                .token_failures
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok();
            if failed {
                return Err(IdentityProviderError::Rejected {
                    code: "TOKEN_EXPIRED".into(),
                    message: "refresh token revoked".into(),
                });
            }
            Ok(encode_unsigned(&json!({
                "sub": identity.uid.as_str(),
                "tenantId": "t1",
                "n": call,
            })))
        }

        async fn sign_out(&self) -> Result<(), IdentityProviderError> {
            self.sign_out_calls.fetch_add(1, Ordering::SeqCst);
            if self.sign_out_fails {
                Err(IdentityProviderError::Transport("offline".into()))
            } else {
                Ok(())
            }
        }
    }

    /// Replies from a script; once the script runs out every call succeeds.
    #[derive(Default)]
    struct ScriptedTransport {
        script: Mutex<VecDeque<Result<ApiResponse, TransportError>>>,
        sent: Mutex<Vec<ApiRequest>>,
    }

    impl ScriptedTransport {
        fn with_script(script: Vec<Result<ApiResponse, TransportError>>) -> Self {
            Self {
                script: Mutex::new(script.into()),
                sent: Mutex::default(),
            }
        }

        fn sent(&self) -> Vec<ApiRequest> {
            self.sent.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl HttpTransport for ScriptedTransport {
        async fn send(&self, request: &ApiRequest) -> Result<ApiResponse, TransportError> {
            self.sent.lock().unwrap().push(request.clone());
            self.script.lock().unwrap().pop_front().unwrap_or_else(ok)
        }
    }

    fn ok() -> Result<ApiResponse, TransportError> {
        Ok(ApiResponse {
            status: 200,
            body: b"{}".to_vec(),
        })
    }

    fn status(code: u16) -> Result<ApiResponse, TransportError> {
        Err(TransportError::Status {
            status: code,
            body: String::new(),
        })
    }

    fn manager(
        provider: FakeProvider,
        transport: ScriptedTransport,
    ) -> (SessionManager, Arc<FakeProvider>, Arc<ScriptedTransport>) {
        let provider = Arc::new(provider);
        let transport = Arc::new(transport);
        let manager = SessionManager::new(
            provider.clone(),
            transport.clone(),
            SessionOptions::default(),
        );
        (manager, provider, transport)
    }

    fn drain(events: &mut broadcast::Receiver<SessionEvent>) -> Vec<SessionEvent> {
        std::iter::from_fn(|| events.try_recv().ok()).collect()
    }

    // -------------------------------------------------------------------------
    // Sign-in / sign-out
    // -------------------------------------------------------------------------

    #[tokio::test]
    async fn test_sign_in_fetches_token_and_tenant() {
        let (manager, provider, _) = manager(FakeProvider::default(), ScriptedTransport::default());
        let mut events = manager.subscribe_events();

        let identity = manager.sign_in().await.unwrap();

        assert_eq!(identity.uid.as_str(), "u1");
        assert_eq!(manager.state(), SessionState::Authenticated);
        assert_eq!(provider.token_calls(), 1);
        let context = manager.context().await;
        assert_eq!(context.tenant_id, Some(TenantId::new("t1")));
        assert_eq!(
            context.tenant_scope().unwrap().zones().as_str(),
            "tenants/t1/zones"
        );
        assert_eq!(
            drain(&mut events),
            vec![SessionEvent::SignedIn { uid: "u1".into() }]
        );
    }

    #[tokio::test]
    async fn test_cancelled_sign_in_is_recoverable() {
        for reason in [
            CancelReason::PopupClosedByUser,
            CancelReason::PopupBlocked,
            CancelReason::CancelledPopupRequest,
        ] {
            let (manager, _, _) = manager(
                FakeProvider::failing_sign_in(IdentityProviderError::Cancelled(reason)),
                ScriptedTransport::default(),
            );

            let err = manager.sign_in().await.unwrap_err();

            assert!(err.is_recoverable());
            assert_eq!(manager.state(), SessionState::Unauthenticated);
            assert_eq!(manager.last_error().as_deref(), Some(reason.user_message()));
        }
    }

    #[tokio::test]
    async fn test_failed_sign_in_stays_unauthenticated() {
        let (manager, _, _) = manager(
            FakeProvider::failing_sign_in(IdentityProviderError::Rejected {
                code: "USER_DISABLED".into(),
                message: "disabled".into(),
            }),
            ScriptedTransport::default(),
        );

        let err = manager.sign_in().await.unwrap_err();

        assert!(matches!(err, SessionError::SignInFailed(_)));
        assert_eq!(manager.state(), SessionState::Unauthenticated);
        assert!(manager.auth_header().await.is_err());
    }

    #[tokio::test]
    async fn test_token_failure_after_sign_in_clears_session() {
        let provider = FakeProvider::default();
        provider.fail_next_tokens(1);
        let (manager, _, _) = manager(provider, ScriptedTransport::default());

        let err = manager.sign_in().await.unwrap_err();

        assert!(matches!(err, SessionError::TokenFetch(_)));
        assert_eq!(manager.state(), SessionState::Unauthenticated);
        assert!(manager.context().await.identity.is_none());
    }

    #[tokio::test]
    async fn test_sign_out_clears_even_when_provider_fails() {
        let (manager, provider, _) = manager(
            FakeProvider {
                sign_out_fails: true,
                ..FakeProvider::default()
            },
            ScriptedTransport::default(),
        );
        manager.sign_in().await.unwrap();
        let mut events = manager.subscribe_events();

        manager.sign_out().await;

        assert_eq!(provider.sign_out_calls.load(Ordering::SeqCst), 1);
        assert_eq!(manager.state(), SessionState::Unauthenticated);
        let context = manager.context().await;
        assert!(context.identity.is_none());
        assert!(context.token.is_none());
        assert!(context.tenant_id.is_none());
        assert_eq!(
            drain(&mut events),
            vec![
                SessionEvent::SignedOut,
                SessionEvent::RedirectToLogin {
                    path: "/login".into()
                },
            ]
        );
    }

    #[tokio::test]
    async fn test_refresh_without_identity_is_noop() {
        let (manager, provider, _) = manager(FakeProvider::default(), ScriptedTransport::default());

        manager.refresh_token().await.unwrap();

        assert_eq!(provider.token_calls(), 0);
        assert_eq!(provider.sign_out_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_failed_refresh_signs_out() {
        let (manager, provider, _) = manager(FakeProvider::default(), ScriptedTransport::default());
        manager.sign_in().await.unwrap();
        provider.fail_next_tokens(1);

        let err = manager.refresh_token().await.unwrap_err();

        assert!(matches!(err, SessionError::TokenFetch(_)));
        assert_eq!(manager.state(), SessionState::Unauthenticated);
        assert_eq!(provider.sign_out_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_refresh_racing_sign_out_signs_out_once() {
        let (manager, provider, _) = manager(FakeProvider::default(), ScriptedTransport::default());
        manager.sign_in().await.unwrap();
        let (entered, release) = provider.gate_next_token();
        let mut events = manager.subscribe_events();

        let refreshing = tokio::spawn({
            let manager = manager.clone();
            async move { manager.refresh_token().await }
        });
        entered.notified().await;
        manager.sign_out().await;
        release.notify_one();
        let err = refreshing.await.unwrap().unwrap_err();

        assert!(matches!(
            err,
            SessionError::TokenFetch(IdentityProviderError::NotSignedIn)
        ));
        assert_eq!(provider.sign_out_calls(), 1);
        assert_eq!(manager.state(), SessionState::Unauthenticated);
        assert!(manager.auth_header().await.is_err());
        assert_eq!(
            drain(&mut events),
            vec![
                SessionEvent::SignedOut,
                SessionEvent::RedirectToLogin {
                    path: "/login".into()
                },
            ]
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_state_matches_token_after_concurrent_refresh_and_sign_out() {
        for _ in 0..200 {
            let (manager, _, _) = manager(FakeProvider::default(), ScriptedTransport::default());
            manager.sign_in().await.unwrap();

            let refreshing = tokio::spawn({
                let manager = manager.clone();
                async move { manager.refresh_token().await }
            });
            let signing_out = tokio::spawn({
                let manager = manager.clone();
                async move { manager.sign_out().await }
            });
            let _ = refreshing.await.unwrap();
            signing_out.await.unwrap();

            assert_eq!(manager.state(), SessionState::Unauthenticated);
            assert!(manager.auth_header().await.is_err());
        }
    }

    // -------------------------------------------------------------------------
    // Initialization
    // -------------------------------------------------------------------------

    #[tokio::test]
    async fn test_initialize_restores_identity() {
        let (manager, _, _) = manager(
            FakeProvider {
                restore: Some(Identity::new("u7")),
                ..FakeProvider::default()
            },
            ScriptedTransport::default(),
        );

        let state = manager.initialize().await.unwrap();

        assert_eq!(state, SessionState::Authenticated);
        assert!(manager.wait_until_ready(Duration::from_millis(1)).await);
        assert!(manager.auth_header().await.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_until_ready_times_out() {
        let (manager, _, _) = manager(FakeProvider::default(), ScriptedTransport::default());
        assert!(!manager.wait_until_ready_default().await);

        manager.initialize().await.unwrap();
        assert!(manager.wait_until_ready_default().await);
        assert_eq!(manager.state(), SessionState::Unauthenticated);
    }

    // -------------------------------------------------------------------------
    // Authorized calls
    // -------------------------------------------------------------------------

    #[tokio::test]
    async fn test_call_without_token_sends_nothing() {
        let (manager, _, transport) = manager(FakeProvider::default(), ScriptedTransport::default());

        let err = manager
            .call_authorized(ApiRequest::get("/zones"))
            .await
            .unwrap_err();

        assert!(matches!(err, SessionError::NoTokenAvailable));
        assert!(transport.sent().is_empty());
    }

    #[tokio::test]
    async fn test_call_attaches_bearer() {
        let (manager, _, transport) = manager(FakeProvider::default(), ScriptedTransport::default());
        manager.sign_in().await.unwrap();

        manager
            .call_authorized(ApiRequest::get("/zones"))
            .await
            .unwrap();

        let sent = transport.sent();
        assert_eq!(sent.len(), 1);
        let (_, expected) = manager.auth_header().await.unwrap();
        assert_eq!(
            sent.first().unwrap().header_value(AUTHORIZATION_HEADER),
            Some(expected.as_str())
        );
    }

    #[tokio::test]
    async fn test_single_401_refreshes_once_and_retries_once() {
        let (manager, provider, transport) = manager(
            FakeProvider::default(),
            ScriptedTransport::with_script(vec![status(401), ok()]),
        );
        manager.sign_in().await.unwrap();
        let tokens_before = provider.token_calls();

        let response = manager
            .call_authorized(ApiRequest::get("/zones"))
            .await
            .unwrap();

        assert_eq!(response.status, 200);
        assert_eq!(provider.token_calls() - tokens_before, 1);
        let sent = transport.sent();
        assert_eq!(sent.len(), 2);
        assert_ne!(
            sent.first().unwrap().header_value(AUTHORIZATION_HEADER),
            sent.last().unwrap().header_value(AUTHORIZATION_HEADER)
        );
        assert_eq!(manager.state(), SessionState::Authenticated);
    }

    #[tokio::test]
    async fn test_repeated_401_signs_out_without_further_retries() {
        let (manager, provider, transport) = manager(
            FakeProvider::default(),
            ScriptedTransport::with_script(vec![status(401), status(401), ok()]),
        );
        manager.sign_in().await.unwrap();
        let mut events = manager.subscribe_events();

        let err = manager
            .call_authorized(ApiRequest::get("/zones"))
            .await
            .unwrap_err();

        assert!(matches!(err, SessionError::AuthExpired(_)));
        assert_eq!(transport.sent().len(), 2);
        assert_eq!(provider.token_calls(), 2);
        assert_eq!(manager.state(), SessionState::Unauthenticated);
        assert!(drain(&mut events).contains(&SessionEvent::SignedOut));
    }

    #[tokio::test]
    async fn test_refresh_failure_during_recovery_signs_out() {
        let (manager, provider, transport) = manager(
            FakeProvider::default(),
            ScriptedTransport::with_script(vec![status(401)]),
        );
        manager.sign_in().await.unwrap();
        provider.fail_next_tokens(1);

        let err = manager
            .call_authorized(ApiRequest::get("/zones"))
            .await
            .unwrap_err();

        assert!(matches!(err, SessionError::TokenFetch(_)));
        assert_eq!(transport.sent().len(), 1);
        assert_eq!(manager.state(), SessionState::Unauthenticated);
    }

    #[tokio::test]
    async fn test_other_statuses_are_not_retried() {
        let (manager, provider, transport) = manager(
            FakeProvider::default(),
            ScriptedTransport::with_script(vec![status(403)]),
        );
        manager.sign_in().await.unwrap();

        let err = manager
            .call_authorized(ApiRequest::get("/zones"))
            .await
            .unwrap_err();

        assert!(matches!(err, SessionError::Transport(TransportError::Status { status: 403, .. })));
        assert_eq!(transport.sent().len(), 1);
        assert_eq!(provider.token_calls(), 1);
        assert_eq!(manager.state(), SessionState::Authenticated);
    }

    // -------------------------------------------------------------------------
    // Scheduled refresh
    // -------------------------------------------------------------------------

    #[tokio::test]
    async fn test_refresh_requires_authenticated_session() {
        let (manager, _, _) = manager(FakeProvider::default(), ScriptedTransport::default());
        assert!(manager.start_token_refresh().is_none());
    }

    #[test]
    fn test_refresh_requires_runtime() {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        let (manager, _, _) = manager(FakeProvider::default(), ScriptedTransport::default());
        runtime.block_on(manager.sign_in()).unwrap();

        assert!(manager.start_token_refresh().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_scheduled_refresh_fires_each_period() {
        let (manager, provider, _) = manager(FakeProvider::default(), ScriptedTransport::default());
        manager.sign_in().await.unwrap();
        let _handle = manager.start_token_refresh().unwrap();

        tokio::time::sleep(TOKEN_REFRESH_PERIOD - Duration::from_secs(1)).await;
        assert_eq!(provider.token_calls(), 1);

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(provider.token_calls(), 2);

        tokio::time::sleep(TOKEN_REFRESH_PERIOD).await;
        assert_eq!(provider.token_calls(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_refresh_after_sign_out() {
        let (manager, provider, _) = manager(FakeProvider::default(), ScriptedTransport::default());
        manager.sign_in().await.unwrap();
        let handle = manager.start_token_refresh().unwrap();

        manager.sign_out().await;
        tokio::time::sleep(TOKEN_REFRESH_PERIOD * 4).await;

        assert_eq!(provider.token_calls(), 1);
        assert!(handle.is_finished());
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropping_handle_stops_refresh() {
        let (manager, provider, _) = manager(FakeProvider::default(), ScriptedTransport::default());
        manager.sign_in().await.unwrap();
        let handle = manager.start_token_refresh().unwrap();

        handle.cancel();
        tokio::time::sleep(TOKEN_REFRESH_PERIOD * 3).await;

        assert_eq!(provider.token_calls(), 1);
        assert_eq!(manager.state(), SessionState::Authenticated);
    }
}
