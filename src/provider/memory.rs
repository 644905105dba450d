//! In-memory identity provider for tests and local development.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration as StdDuration;

use async_trait::async_trait;
use chrono::{Duration, Utc};
use futures_util::StreamExt;
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;

use super::{
    ChangeKind, IdentityProvider, ProviderError, SessionChange, SessionChanges, SignUpOutcome,
    DISPLAY_NAME_KEY,
};
use crate::session::{Session, UserIdentity};

type ChangeSender = mpsc::UnboundedSender<Result<SessionChange, ProviderError>>;

#[derive(Debug, Clone)]
struct Account {
    password: String,
    user: UserIdentity,
}

#[derive(Default)]
struct Inner {
    accounts: HashMap<String, Account>,
    current: Option<Session>,
    listeners: Vec<ChangeSender>,
}

/// Scriptable identity provider that keeps everything in memory.
///
/// Besides behaving like a real provider for sign-up, sign-in, sign-out and
/// refresh, it can be switched offline, made to fail refreshes, made to
/// hang, or made to require e-mail confirmation.
pub struct InMemoryProvider {
    inner: Mutex<Inner>,
    token_ttl: Mutex<Duration>,
    latency: Mutex<Option<StdDuration>>,
    next_id: AtomicU64,
    offline: AtomicBool,
    hanging: AtomicBool,
    refresh_fails: AtomicBool,
    require_confirmation: AtomicBool,
    current_session_calls: AtomicUsize,
}

impl InMemoryProvider {
    /// Create an empty provider issuing one-hour sessions.
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            token_ttl: Mutex::new(Duration::hours(1)),
            latency: Mutex::new(None),
            next_id: AtomicU64::new(1),
            offline: AtomicBool::new(false),
            hanging: AtomicBool::new(false),
            refresh_fails: AtomicBool::new(false),
            require_confirmation: AtomicBool::new(false),
            current_session_calls: AtomicUsize::new(0),
        }
    }

    /// Register an account directly, bypassing sign-up.
    pub fn add_account(&self, email: &str, password: &str, display_name: &str) -> UserIdentity {
        let user = self.new_user(email, display_name);
        self.lock().accounts.insert(
            email.to_string(),
            Account {
                password: password.to_string(),
                user: user.clone(),
            },
        );
        user
    }

    /// Set the lifetime of sessions issued from now on.
    pub fn set_token_ttl(&self, ttl: Duration) {
        *self.token_ttl.lock().unwrap_or_else(PoisonError::into_inner) = ttl;
    }

    /// Delay every remote call by `latency`.
    pub fn set_latency(&self, latency: Option<StdDuration>) {
        *self.latency.lock().unwrap_or_else(PoisonError::into_inner) = latency;
    }

    /// Make every remote call fail with a network error.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Make every remote call wait forever.
    pub fn set_hanging(&self, hanging: bool) {
        self.hanging.store(hanging, Ordering::SeqCst);
    }

    /// Make refresh of an expired session fail.
    pub fn set_refresh_fails(&self, fails: bool) {
        self.refresh_fails.store(fails, Ordering::SeqCst);
    }

    /// Withhold the session at sign-up until the e-mail is confirmed.
    pub fn set_require_confirmation(&self, required: bool) {
        self.require_confirmation.store(required, Ordering::SeqCst);
    }

    /// Replace the stored session without emitting a change.
    pub fn set_current_session(&self, session: Option<Session>) {
        self.lock().current = session;
    }

    /// The session the provider currently holds.
    pub fn stored_session(&self) -> Option<Session> {
        self.lock().current.clone()
    }

    /// Issue a session for `user` expiring after `ttl`.
    pub fn issue_session(&self, user: &UserIdentity, ttl: Duration) -> Session {
        let n = self.next_id.fetch_add(1, Ordering::Relaxed);
        Session::new(format!("token-{n}"), Utc::now() + ttl, user.clone())
    }

    /// Push a change to every subscriber.
    pub fn emit(&self, change: SessionChange) {
        self.broadcast(Ok(change));
    }

    /// Push an error to every subscriber and drop them.
    pub fn fail_streams(&self, err: ProviderError) {
        let mut inner = self.lock();
        for tx in inner.listeners.drain(..) {
            let _ = tx.send(Err(err.clone()));
        }
    }

    /// End every subscriber's stream.
    pub fn close_streams(&self) {
        self.lock().listeners.clear();
    }

    /// Number of open change streams.
    pub fn listener_count(&self) -> usize {
        self.lock()
            .listeners
            .iter()
            .filter(|tx| !tx.is_closed())
            .count()
    }

    /// How many times `current_session` was called.
    pub fn current_session_calls(&self) -> usize {
        self.current_session_calls.load(Ordering::SeqCst)
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn ttl(&self) -> Duration {
        *self.token_ttl.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn new_user(&self, email: &str, display_name: &str) -> UserIdentity {
        let n = self.next_id.fetch_add(1, Ordering::Relaxed);
        UserIdentity::new(format!("user-{n}"))
            .with_email(email)
            .with_display_name(display_name)
            .with_metadata(DISPLAY_NAME_KEY, serde_json::json!(display_name))
    }

    fn broadcast(&self, item: Result<SessionChange, ProviderError>) {
        self.lock()
            .listeners
            .retain(|tx| tx.send(item.clone()).is_ok());
    }

    async fn remote_call(&self) -> Result<(), ProviderError> {
        let latency = *self.latency.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
        if self.hanging.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        if self.offline.load(Ordering::SeqCst) {
            return Err(ProviderError::Network("host unreachable".to_string()));
        }
        Ok(())
    }
}

impl Default for InMemoryProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl IdentityProvider for InMemoryProvider {
    async fn sign_up(
        &self,
        email: &str,
        password: &str,
        display_name: &str,
    ) -> Result<SignUpOutcome, ProviderError> {
        self.remote_call().await?;

        if self.lock().accounts.contains_key(email) {
            return Err(ProviderError::UserAlreadyExists);
        }

        let user = self.add_account(email, password, display_name);
        if self.require_confirmation.load(Ordering::SeqCst) {
            return Ok(SignUpOutcome {
                user,
                session: None,
            });
        }

        let session = self.issue_session(&user, self.ttl());
        self.lock().current = Some(session.clone());
        self.emit(SessionChange::new(ChangeKind::SignedIn, Some(session.clone())));

        Ok(SignUpOutcome {
            user,
            session: Some(session),
        })
    }

    async fn sign_in(&self, email: &str, password: &str) -> Result<Session, ProviderError> {
        self.remote_call().await?;

        let account = self
            .lock()
            .accounts
            .get(email)
            .cloned()
            .ok_or(ProviderError::UserNotFound)?;

        if account.password != password {
            return Err(ProviderError::InvalidCredentials);
        }

        let session = self.issue_session(&account.user, self.ttl());
        self.lock().current = Some(session.clone());
        self.emit(SessionChange::new(ChangeKind::SignedIn, Some(session.clone())));
        Ok(session)
    }

    async fn sign_out(&self) -> Result<(), ProviderError> {
        self.remote_call().await?;

        self.lock().current = None;
        self.emit(SessionChange::new(ChangeKind::SignedOut, None));
        Ok(())
    }

    async fn current_session(&self) -> Result<Session, ProviderError> {
        self.current_session_calls.fetch_add(1, Ordering::SeqCst);
        self.remote_call().await?;

        let current = self.lock().current.clone().ok_or(ProviderError::NoSession)?;
        if current.expires_at() > Utc::now() {
            return Ok(current);
        }

        if self.refresh_fails.load(Ordering::SeqCst) {
            self.lock().current = None;
            return Err(ProviderError::RefreshFailed(
                "refresh token revoked".to_string(),
            ));
        }

        let refreshed = self.issue_session(current.user(), self.ttl());
        self.lock().current = Some(refreshed.clone());
        self.emit(SessionChange::new(
            ChangeKind::TokenRefreshed,
            Some(refreshed.clone()),
        ));
        Ok(refreshed)
    }

    fn session_changes(&self) -> SessionChanges {
        let (tx, rx) = mpsc::unbounded_channel();
        {
            let mut inner = self.lock();
            let initial = SessionChange::new(ChangeKind::InitialSession, inner.current.clone());
            let _ = tx.send(Ok(initial));
            inner.listeners.push(tx);
        }

        UnboundedReceiverStream::new(rx).boxed()
    }
}
