//! Session synchronization.
//!
//! Two producers feed the [`SessionStore`](crate::session::SessionStore):
//!
//! - **NotificationListener**: pushes every provider session change.
//! - **Validator**: explicit "current session, refreshed if needed" round trips.
//!
//! [`SessionSynchronizer`] wires both to one store and exposes the
//! sign-up / sign-in / sign-out / token operations to the rest of the app.

mod listener;
mod synchronizer;
mod validator;

pub use listener::{ListenerExit, ListenerHandle, NotificationListener};
pub use synchronizer::SessionSynchronizer;
pub use validator::Validator;

use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::{debug, error};

use crate::error::SyncError;
use crate::session::{AuthState, SessionStore, UpdateEvent};
use crate::Result;

/// Sign-out generation shared by sign-out and every explicit round trip.
///
/// A round trip reads the generation when it is issued and may only apply
/// its result while the generation is unchanged. Sign-out advances it, so
/// a result issued before a sign-out never lands after it. Comparing and
/// applying happen under one lock, which is never held across an await.
#[derive(Debug, Clone, Default)]
pub(crate) struct SignOutEpoch(Arc<Mutex<u64>>);

impl SignOutEpoch {
    /// Current generation.
    pub(crate) fn current(&self) -> u64 {
        *self.lock()
    }

    /// Apply `event` unless a sign-out happened since `issued`.
    pub(crate) fn apply_if_current(
        &self,
        issued: u64,
        store: &SessionStore,
        event: UpdateEvent,
    ) -> Option<AuthState> {
        let epoch = self.lock();
        if *epoch != issued {
            debug!(
                issued,
                current = *epoch,
                kind = event.kind(),
                "dropping result issued before sign-out"
            );
            return None;
        }
        Some(store.apply(event))
    }

    /// Invalidate every round trip issued so far.
    pub(crate) fn advance(&self) {
        *self.lock() += 1;
    }

    /// Invalidate every round trip issued so far and apply `event`.
    pub(crate) fn advance_and_apply(&self, store: &SessionStore, event: UpdateEvent) -> AuthState {
        let mut epoch = self.lock();
        *epoch += 1;
        store.apply(event)
    }

    fn lock(&self) -> MutexGuard<'_, u64> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Run `fut` on its own task and wait for it.
///
/// Dropping the returned future stops the wait, not the task: once the
/// provider answers, its result still reaches the store.
pub(crate) async fn detached<T, F>(fut: F, on_panic: fn(String) -> SyncError) -> Result<T>
where
    T: Send + 'static,
    F: Future<Output = Result<T>> + Send + 'static,
{
    match tokio::spawn(fut).await {
        Ok(result) => result,
        Err(e) => {
            error!(error = %e, "session task failed");
            Err(on_panic(e.to_string()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::UserIdentity;
    use crate::Session;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;

    fn session() -> Session {
        Session::new(
            "token",
            chrono::Utc::now() + chrono::Duration::hours(1),
            UserIdentity::new("u-1"),
        )
    }

    #[test]
    fn test_epoch_applies_current_result() {
        let epoch = SignOutEpoch::default();
        let store = SessionStore::new();
        let issued = epoch.current();

        let state = epoch.apply_if_current(issued, &store, UpdateEvent::Validated(session()));

        assert!(state.is_some_and(|s| s.is_authenticated()));
        assert_eq!(store.revision(), 1);
    }

    #[test]
    fn test_epoch_drops_result_issued_before_sign_out() {
        let epoch = SignOutEpoch::default();
        let store = SessionStore::new();
        let issued = epoch.current();

        epoch.advance_and_apply(&store, UpdateEvent::Observed(None));
        let state = epoch.apply_if_current(issued, &store, UpdateEvent::Validated(session()));

        assert!(state.is_none());
        assert!(!store.snapshot().is_authenticated());
        assert_eq!(store.revision(), 1);
    }

    #[test]
    fn test_epoch_shared_between_clones() {
        let epoch = SignOutEpoch::default();
        let other = epoch.clone();

        other.advance();
        assert_eq!(epoch.current(), 1);
    }

    #[tokio::test]
    async fn test_detached_returns_result() {
        let value = detached(async { Ok(7) }, SyncError::RefreshFailed).await.unwrap();
        assert_eq!(value, 7);
    }

    #[tokio::test]
    async fn test_detached_maps_panic() {
        let result: Result<()> = detached(
            async {
                if true {
                    panic!("provider blew up");
                }
                Ok(())
            },
            SyncError::RefreshFailed,
        )
        .await;
        assert!(matches!(result, Err(SyncError::RefreshFailed(_))));
    }

    #[tokio::test]
    async fn test_detached_survives_dropped_caller() {
        let done = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&done);

        let wait = detached(
            async move {
                tokio::time::sleep(Duration::from_millis(20)).await;
                flag.store(true, Ordering::SeqCst);
                Ok(())
            },
            SyncError::RefreshFailed,
        );
        let _ = tokio::time::timeout(Duration::from_millis(1), wait).await;

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(done.load(Ordering::SeqCst));
    }
}
