//! Process-wide holder of the authentication state.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};

use futures_util::stream::{self, BoxStream, StreamExt};
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tracing::{debug, info};

use super::clock::{is_expired, Clock, SystemClock};
use super::{AuthState, Session, UpdateEvent};

type Subscribers = Vec<mpsc::UnboundedSender<AuthState>>;

/// Thread-safe owner of the current [`AuthState`].
///
/// All mutation goes through [`SessionStore::apply`]. Writers are
/// serialized by an internal mutex; readers only contend with the short
/// swap of the published value.
pub struct SessionStore {
    state: RwLock<AuthState>,
    // Held for the whole of `apply`, which gives writes a total order.
    writer: Mutex<Subscribers>,
    clock: Arc<dyn Clock>,
}

impl SessionStore {
    /// Create a store in the logged-out state using the system clock.
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    /// Create a store that reads time from `clock`.
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            state: RwLock::new(AuthState::default()),
            writer: Mutex::new(Vec::new()),
            clock,
        }
    }

    /// Apply an update and return the state it produced.
    ///
    /// Sessions are re-checked for expiry against the store's clock, so a
    /// session delivered late is never published as authenticated.
    pub fn apply(&self, event: UpdateEvent) -> AuthState {
        let mut subscribers = self.lock_writer();
        let kind = event.kind();
        let now = self.clock.now();

        let (previous, revision) = {
            let current = self.state.read().unwrap_or_else(PoisonError::into_inner);
            (current.phase(), current.revision() + 1)
        };

        let next = match event {
            UpdateEvent::Observed(Some(session)) | UpdateEvent::Validated(session) => {
                if is_expired(&session, now) {
                    debug!(
                        user_id = session.user_id(),
                        expires_at = %session.expires_at(),
                        "discarding expired session"
                    );
                    AuthState::logged_out(revision)
                } else {
                    AuthState::logged_in(session, revision)
                }
            }
            UpdateEvent::Observed(None) | UpdateEvent::ValidationFailed => {
                AuthState::logged_out(revision)
            }
        };

        *self.state.write().unwrap_or_else(PoisonError::into_inner) = next.clone();

        subscribers.retain(|tx| tx.send(next.clone()).is_ok());

        debug!(kind, revision, phase = %next.phase(), "session state applied");
        if previous != next.phase() {
            info!(
                from = %previous,
                to = %next.phase(),
                user_id = next.current_user().map(|u| u.id.as_str()),
                "authentication state changed"
            );
        }

        next
    }

    /// Get the current state.
    pub fn snapshot(&self) -> AuthState {
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// The current session if it has not expired by the store's clock.
    pub fn valid_session(&self) -> Option<Session> {
        let now = self.clock.now();
        self.snapshot()
            .current_session()
            .filter(|s| !is_expired(s, now))
            .cloned()
    }

    /// Revision of the current state.
    pub fn revision(&self) -> u64 {
        self.state
            .read()
            .map(|s| s.revision())
            .unwrap_or_else(|e| e.into_inner().revision())
    }

    /// Stream every state the store passes through, starting with the current one.
    ///
    /// The stream ends only when the store is dropped.
    pub fn subscribe(&self) -> BoxStream<'static, AuthState> {
        let (tx, rx) = mpsc::unbounded_channel();

        // Registering under the writer lock means no apply can slip in
        // between the snapshot and the first forwarded update.
        let current = {
            let mut subscribers = self.lock_writer();
            subscribers.push(tx);
            self.snapshot()
        };

        stream::once(async move { current })
            .chain(UnboundedReceiverStream::new(rx))
            .boxed()
    }

    /// Number of subscribers whose stream is still alive.
    pub fn subscriber_count(&self) -> usize {
        self.lock_writer().iter().filter(|tx| !tx.is_closed()).count()
    }

    fn lock_writer(&self) -> MutexGuard<'_, Subscribers> {
        // State is only ever replaced whole, so a poisoned lock still guards
        // a consistent value.
        self.writer.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for SessionStore {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for SessionStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionStore")
            .field("state", &self.snapshot())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::clock::FixedClock;
    use crate::session::UserIdentity;
    use chrono::{Duration, Utc};

    fn session_in(user: &str, ttl: Duration) -> Session {
        Session::new(
            format!("tok-{user}"),
            Utc::now() + ttl,
            UserIdentity::new(user).with_email(format!("{user}@example.com")),
        )
    }

    #[test]
    fn test_fresh_store_is_logged_out() {
        let store = SessionStore::new();
        let state = store.snapshot();

        assert!(state.current_session().is_none());
        assert!(!state.is_authenticated());
        assert!(state.current_user().is_none());
        assert_eq!(store.revision(), 0);
    }

    #[test]
    fn test_observed_valid_session_logs_in() {
        let store = SessionStore::new();
        let s = session_in("u-1", Duration::hours(1));

        let state = store.apply(UpdateEvent::Observed(Some(s.clone())));

        assert!(state.is_authenticated());
        assert_eq!(state.current_user(), Some(s.user()));
        assert_eq!(store.snapshot(), state);
    }

    #[test]
    fn test_expired_session_logs_out() {
        let store = SessionStore::new();
        let expired = session_in("u-1", Duration::seconds(-1));

        let observed = store.apply(UpdateEvent::Observed(Some(expired.clone())));
        assert!(!observed.is_authenticated());
        assert!(observed.current_session().is_none());

        let validated = store.apply(UpdateEvent::Validated(expired));
        assert!(!validated.is_authenticated());
    }

    #[test]
    fn test_expiry_uses_store_clock() {
        let now = Utc::now();
        let clock = Arc::new(FixedClock::new(now));
        let store = SessionStore::with_clock(clock.clone());
        let s = Session::new("tok", now + Duration::seconds(30), UserIdentity::new("u-1"));

        assert!(store.apply(UpdateEvent::Validated(s.clone())).is_authenticated());

        clock.advance(Duration::seconds(30));
        assert!(!store.apply(UpdateEvent::Validated(s)).is_authenticated());
    }

    #[test]
    fn test_valid_session_rechecks_expiry() {
        let now = Utc::now();
        let clock = Arc::new(FixedClock::new(now));
        let store = SessionStore::with_clock(clock.clone());
        let s = Session::new("tok", now + Duration::seconds(10), UserIdentity::new("u-1"));
        store.apply(UpdateEvent::Observed(Some(s.clone())));

        assert_eq!(store.valid_session(), Some(s));

        clock.advance(Duration::seconds(10));
        assert!(store.valid_session().is_none());
        // Published state is untouched until the next apply.
        assert!(store.snapshot().is_authenticated());
    }

    #[test]
    fn test_validation_failed_always_logs_out() {
        let store = SessionStore::new();
        assert!(!store.apply(UpdateEvent::ValidationFailed).is_authenticated());

        store.apply(UpdateEvent::Validated(session_in("u-1", Duration::hours(1))));
        let state = store.apply(UpdateEvent::ValidationFailed);

        assert!(!state.is_authenticated());
        assert!(state.current_user().is_none());
    }

    #[test]
    fn test_observed_none_logs_out() {
        let store = SessionStore::new();
        store.apply(UpdateEvent::Observed(Some(session_in("u-1", Duration::hours(1)))));

        let state = store.apply(UpdateEvent::Observed(None));
        assert!(!state.is_authenticated());
    }

    #[test]
    fn test_apply_is_idempotent_apart_from_revision() {
        let store = SessionStore::new();
        let s = session_in("u-1", Duration::hours(1));

        let first = store.apply(UpdateEvent::Observed(Some(s.clone())));
        let second = store.apply(UpdateEvent::Observed(Some(s)));

        assert_eq!(first.current_session(), second.current_session());
        assert_eq!(first.current_user(), second.current_user());
        assert_eq!(first.is_authenticated(), second.is_authenticated());
        assert_eq!(second.revision(), first.revision() + 1);
    }

    #[test]
    fn test_later_apply_wins() {
        let store = SessionStore::new();
        let a = session_in("u-a", Duration::hours(1));
        let b = session_in("u-b", Duration::hours(1));

        store.apply(UpdateEvent::Observed(Some(a)));
        store.apply(UpdateEvent::Validated(b.clone()));

        assert_eq!(store.snapshot().current_session(), Some(&b));
    }

    #[test]
    fn test_concurrent_applies_are_never_torn() {
        use std::thread;

        let store = Arc::new(SessionStore::new());
        let mut handles = vec![];

        for i in 0..8 {
            let store = Arc::clone(&store);
            handles.push(thread::spawn(move || {
                for j in 0..100 {
                    let event = if (i + j) % 3 == 0 {
                        UpdateEvent::ValidationFailed
                    } else {
                        UpdateEvent::Observed(Some(session_in(&format!("u-{i}"), Duration::hours(1))))
                    };
                    store.apply(event);

                    let state = store.snapshot();
                    match state.current_session() {
                        Some(s) => {
                            assert!(state.is_authenticated());
                            assert_eq!(state.current_user(), Some(s.user()));
                        }
                        None => {
                            assert!(!state.is_authenticated());
                            assert!(state.current_user().is_none());
                        }
                    }
                }
            }));
        }

        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(store.revision(), 800);
    }

    #[tokio::test]
    async fn test_subscribe_yields_current_then_updates() {
        let store = SessionStore::new();
        let s = session_in("u-1", Duration::hours(1));
        store.apply(UpdateEvent::Observed(Some(s.clone())));

        let mut updates = store.subscribe();
        store.apply(UpdateEvent::ValidationFailed);
        store.apply(UpdateEvent::Validated(s));

        let first = updates.next().await.unwrap();
        assert_eq!(first.revision(), 1);
        assert!(first.is_authenticated());

        let second = updates.next().await.unwrap();
        assert_eq!(second.revision(), 2);
        assert!(!second.is_authenticated());

        let third = updates.next().await.unwrap();
        assert_eq!(third.revision(), 3);
        assert!(third.is_authenticated());
    }

    #[tokio::test]
    async fn test_subscriber_sees_every_transition() {
        let store = SessionStore::new();
        let mut updates = store.subscribe();

        for _ in 0..50 {
            store.apply(UpdateEvent::ValidationFailed);
        }

        let revisions: Vec<u64> = updates
            .by_ref()
            .take(51)
            .map(|s| s.revision())
            .collect()
            .await;
        assert_eq!(revisions, (0..=50).collect::<Vec<_>>());
    }

    #[test]
    fn test_subscriber_waits_for_next_apply() {
        use tokio_test::{assert_pending, assert_ready, task};

        let store = SessionStore::new();
        let mut updates = task::spawn(store.subscribe());

        assert_ready!(updates.poll_next());
        assert_pending!(updates.poll_next());

        store.apply(UpdateEvent::ValidationFailed);
        assert!(updates.is_woken());
        let next = assert_ready!(updates.poll_next());
        assert_eq!(next.map(|s| s.revision()), Some(1));
    }

    #[tokio::test]
    async fn test_dropped_subscribers_are_pruned() {
        let store = SessionStore::new();
        let first = store.subscribe();
        let _second = store.subscribe();
        assert_eq!(store.subscriber_count(), 2);

        drop(first);
        store.apply(UpdateEvent::ValidationFailed);
        assert_eq!(store.subscriber_count(), 1);
    }

    #[tokio::test]
    async fn test_stream_ends_when_store_dropped() {
        let store = SessionStore::new();
        let mut updates = store.subscribe();
        drop(store);

        assert!(updates.next().await.is_some());
        assert!(updates.next().await.is_none());
    }
}
