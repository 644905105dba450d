//! Pull path: explicit "current session, refreshed if needed" round trips.

use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{debug, error, warn};

use super::SignOutEpoch;
use crate::error::SyncError;
use crate::provider::IdentityProvider;
use crate::session::{Session, SessionStore, UpdateEvent};
use crate::Result;

/// Confirms or refreshes the current session against the provider.
///
/// Every outcome is applied to the store: a session as `Validated`, any
/// failure as `ValidationFailed`. Outcomes of round trips issued before a
/// sign-out are dropped instead.
#[derive(Clone)]
pub struct Validator {
    provider: Arc<dyn IdentityProvider>,
    store: Arc<SessionStore>,
    gate: Arc<Mutex<()>>,
    epoch: SignOutEpoch,
}

impl Validator {
    /// Create a validator feeding `store`.
    pub fn new(provider: Arc<dyn IdentityProvider>, store: Arc<SessionStore>) -> Self {
        Self {
            provider,
            store,
            gate: Arc::new(Mutex::new(())),
            epoch: SignOutEpoch::default(),
        }
    }

    /// Lock shared by every explicit provider round trip.
    ///
    /// Holding it across "call provider, apply result" keeps explicit
    /// round trips from overtaking one another.
    pub(crate) fn gate(&self) -> Arc<Mutex<()>> {
        Arc::clone(&self.gate)
    }

    /// Sign-out generation checked before any result is applied.
    pub(crate) fn epoch(&self) -> SignOutEpoch {
        self.epoch.clone()
    }

    /// Fetch the current session from the provider and publish the outcome.
    ///
    /// # Errors
    ///
    /// - [`SyncError::NoActiveSession`] if the provider holds no session, or
    ///   a sign-out happened while the round trip was in flight.
    /// - [`SyncError::RefreshFailed`] if the session could not be refreshed,
    ///   or the provider returned one that is already expired.
    pub async fn validate(&self) -> Result<Session> {
        let provider = Arc::clone(&self.provider);
        let store = Arc::clone(&self.store);
        let gate = self.gate();
        let epoch = self.epoch();
        let issued = epoch.current();

        let task = tokio::spawn(async move {
            let _guard = gate.lock_owned().await;

            match provider.current_session().await {
                Ok(session) => {
                    let event = UpdateEvent::Validated(session.clone());
                    let Some(state) = epoch.apply_if_current(issued, &store, event) else {
                        return Err(SyncError::NoActiveSession);
                    };
                    if !state.is_authenticated() {
                        warn!(user_id = session.user_id(), "provider returned an expired session");
                        return Err(SyncError::RefreshFailed(
                            "provider returned an expired session".to_string(),
                        ));
                    }
                    debug!(user_id = session.user_id(), "session validated");
                    Ok(session)
                }
                Err(e) => {
                    let err = SyncError::from_validation(e);
                    warn!(error = %err, "session validation failed");
                    epoch.apply_if_current(issued, &store, UpdateEvent::ValidationFailed);
                    Err(err)
                }
            }
        });

        // Dropping this future detaches the task; its result is still applied.
        match task.await {
            Ok(result) => result,
            Err(e) => {
                error!(error = %e, "validation task failed");
                self.store.apply(UpdateEvent::ValidationFailed);
                Err(SyncError::RefreshFailed(e.to_string()))
            }
        }
    }
}

impl std::fmt::Debug for Validator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Validator").finish_non_exhaustive()
    }
}
