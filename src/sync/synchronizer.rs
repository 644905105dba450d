//! Facade wiring listener, validator and store together.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use futures_util::stream::BoxStream;
use tracing::{debug, info, warn};

use super::{detached, ListenerHandle, NotificationListener, Validator};
use crate::config::{Config, ProviderEndpoint};
use crate::error::SyncError;
use crate::provider::IdentityProvider;
use crate::session::{AuthState, Session, SessionStore, UpdateEvent, UserIdentity};
use crate::Result;

/// Owns the authenticated-session truth for the rest of the app.
///
/// Construct one at startup, call [`start`](Self::start), and hand
/// [`store`](Self::store) or the synchronizer itself to whatever needs to
/// read session state or attach bearer tokens.
pub struct SessionSynchronizer {
    provider: Arc<dyn IdentityProvider>,
    store: Arc<SessionStore>,
    validator: Validator,
    endpoint: ProviderEndpoint,
    sign_out_timeout_ms: u64,
    validate_on_start: bool,
    listener: Mutex<Option<ListenerHandle>>,
}

impl SessionSynchronizer {
    /// Create a synchronizer with a fresh store.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::Config`] if the provider endpoint is missing or
    /// malformed. Nothing is started in that case.
    pub fn new(config: &Config, provider: Arc<dyn IdentityProvider>) -> Result<Self> {
        Self::with_store(config, provider, Arc::new(SessionStore::new()))
    }

    /// Create a synchronizer around an existing store.
    pub fn with_store(
        config: &Config,
        provider: Arc<dyn IdentityProvider>,
        store: Arc<SessionStore>,
    ) -> Result<Self> {
        let endpoint = config.provider_endpoint()?;
        info!(url = %endpoint.url, "session synchronizer configured");

        Ok(Self {
            validator: Validator::new(Arc::clone(&provider), Arc::clone(&store)),
            provider,
            store,
            endpoint,
            sign_out_timeout_ms: config.sync.sign_out_timeout_ms,
            validate_on_start: config.sync.validate_on_start,
            listener: Mutex::new(None),
        })
    }

    /// Validate any stored session, then start listening for provider changes.
    ///
    /// A failed startup validation is not an error: it just leaves the app
    /// logged out.
    pub async fn start(&self) {
        if self.validate_on_start {
            match self.validator.validate().await {
                Ok(session) => info!(user_id = session.user_id(), "restored session"),
                Err(SyncError::NoActiveSession) => debug!("no stored session at startup"),
                Err(e) => warn!(error = %e, "stored session could not be restored"),
            }
        }

        self.reconnect_listener();
    }

    /// Start a session-change listener unless one is already running.
    ///
    /// Returns whether a new listener was started.
    pub fn reconnect_listener(&self) -> bool {
        let mut slot = self.listener.lock().unwrap_or_else(PoisonError::into_inner);
        if slot.as_ref().is_some_and(|h| !h.is_finished()) {
            debug!("session listener already running");
            return false;
        }

        let listener = NotificationListener::new(Arc::clone(&self.provider), Arc::clone(&self.store));
        *slot = Some(listener.spawn());
        info!("session listener started");
        true
    }

    /// Whether the session-change listener is running.
    pub fn listener_running(&self) -> bool {
        self.listener
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .is_some_and(|h| !h.is_finished())
    }

    /// Stop the session-change listener.
    pub fn shutdown(&self) {
        if let Some(handle) = self
            .listener
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            handle.abort();
            info!("session listener stopped");
        }
    }

    /// Register a new account.
    ///
    /// # Errors
    ///
    /// - [`SyncError::SignUpIncomplete`] if the provider registered the user
    ///   but issued no session (e.g. e-mail confirmation pending).
    /// - [`SyncError::SignUpRejected`] / [`SyncError::ProviderUnavailable`]
    ///   if the provider call failed.
    /// - [`SyncError::NoActiveSession`] if a sign-out happened while the
    ///   provider call was in flight.
    /// - Validation errors from the follow-up consistency check.
    pub async fn sign_up(
        &self,
        email: &str,
        password: &str,
        display_name: &str,
    ) -> Result<UserIdentity> {
        let provider = Arc::clone(&self.provider);
        let store = Arc::clone(&self.store);
        let gate = self.validator.gate();
        let epoch = self.validator.epoch();
        let issued = epoch.current();
        let (email, password, display_name) =
            (email.to_string(), password.to_string(), display_name.to_string());

        let outcome = detached(
            async move {
                let _guard = gate.lock_owned().await;
                let outcome = provider
                    .sign_up(&email, &password, &display_name)
                    .await
                    .map_err(SyncError::from_sign_up)?;

                if let Some(ref session) = outcome.session {
                    let event = UpdateEvent::Validated(session.clone());
                    if epoch.apply_if_current(issued, &store, event).is_none() {
                        return Err(SyncError::NoActiveSession);
                    }
                }
                Ok(outcome)
            },
            SyncError::ProviderUnavailable,
        )
        .await?;

        if outcome.session.is_none() {
            info!(user_id = %outcome.user.id, "sign-up pending confirmation");
            return Err(SyncError::SignUpIncomplete);
        }

        self.validator.validate().await?;
        info!(user_id = %outcome.user.id, "signed up");
        Ok(outcome.user)
    }

    /// Sign in with e-mail and password.
    ///
    /// # Errors
    ///
    /// - [`SyncError::InvalidCredentials`] for any credential failure.
    /// - [`SyncError::ProviderUnavailable`] if the provider was unreachable.
    /// - [`SyncError::NoActiveSession`] if a sign-out happened while the
    ///   provider call was in flight.
    /// - Validation errors from the follow-up consistency check.
    pub async fn sign_in(&self, email: &str, password: &str) -> Result<Session> {
        let provider = Arc::clone(&self.provider);
        let store = Arc::clone(&self.store);
        let gate = self.validator.gate();
        let epoch = self.validator.epoch();
        let issued = epoch.current();
        let (email, password) = (email.to_string(), password.to_string());

        detached(
            async move {
                let _guard = gate.lock_owned().await;
                let session = provider.sign_in(&email, &password).await.map_err(|e| {
                    debug!(error = %e, "sign-in refused by provider");
                    SyncError::from_sign_in(e)
                })?;
                epoch
                    .apply_if_current(issued, &store, UpdateEvent::Validated(session))
                    .ok_or(SyncError::NoActiveSession)?;
                Ok(())
            },
            SyncError::ProviderUnavailable,
        )
        .await?;

        let session = self.validator.validate().await?;
        info!(user_id = session.user_id(), "signed in");
        Ok(session)
    }

    /// Sign out remotely, then locally.
    ///
    /// The local half always happens, even if the provider is unreachable
    /// or does not answer within the configured timeout. Sign-up, sign-in
    /// and validation round trips issued before this call never apply
    /// their results afterwards.
    pub async fn sign_out(&self) {
        let provider = Arc::clone(&self.provider);
        let store = Arc::clone(&self.store);
        let epoch = self.validator.epoch();
        let timeout_ms = self.sign_out_timeout_ms;

        epoch.advance();

        let task = tokio::spawn({
            let epoch = epoch.clone();
            async move {
                let timeout = Duration::from_millis(timeout_ms);
                match tokio::time::timeout(timeout, provider.sign_out()).await {
                    Ok(Ok(())) => debug!("remote sign-out succeeded"),
                    Ok(Err(e)) => warn!(error = %e, "remote sign-out failed, signing out locally"),
                    Err(_) => warn!(timeout_ms, "remote sign-out timed out, signing out locally"),
                }
                epoch.advance_and_apply(&store, UpdateEvent::Observed(None));
            }
        });

        if let Err(e) = task.await {
            warn!(error = %e, "sign-out task failed, signing out locally");
            epoch.advance_and_apply(&self.store, UpdateEvent::Observed(None));
        }
        info!("signed out");
    }

    /// Bearer token for the current session.
    ///
    /// Falls back to a validation round trip when the held session is
    /// missing or expired.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::NoActiveSession`] if no valid session can be produced.
    pub async fn access_token(&self) -> Result<String> {
        if let Some(session) = self.store.valid_session() {
            return Ok(session.access_token().to_string());
        }

        debug!("no valid session held, validating");
        match self.validator.validate().await {
            Ok(session) => Ok(session.access_token().to_string()),
            Err(e) => {
                debug!(error = %e, "token fallback validation failed");
                Err(SyncError::NoActiveSession)
            }
        }
    }

    /// Id of the current user, if any.
    pub fn user_id(&self) -> Option<String> {
        self.store
            .snapshot()
            .current_session()
            .map(|s| s.user_id().to_string())
    }

    /// Current user identity, if any.
    pub fn current_user(&self) -> Option<UserIdentity> {
        self.store.snapshot().current_user().cloned()
    }

    /// Whether the current state is authenticated.
    pub fn is_authenticated(&self) -> bool {
        self.store.snapshot().is_authenticated()
    }

    /// Current authentication state.
    pub fn snapshot(&self) -> AuthState {
        self.store.snapshot()
    }

    /// Stream of authentication states, starting with the current one.
    pub fn subscribe(&self) -> BoxStream<'static, AuthState> {
        self.store.subscribe()
    }

    /// Run a validation round trip now.
    pub async fn validate(&self) -> Result<Session> {
        self.validator.validate().await
    }

    /// The shared session store.
    pub fn store(&self) -> Arc<SessionStore> {
        Arc::clone(&self.store)
    }

    /// The validated provider endpoint.
    pub fn endpoint(&self) -> &ProviderEndpoint {
        &self.endpoint
    }
}

impl Drop for SessionSynchronizer {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl std::fmt::Debug for SessionSynchronizer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionSynchronizer")
            .field("endpoint", &self.endpoint.url)
            .field("state", &self.store.snapshot())
            .finish_non_exhaustive()
    }
}
