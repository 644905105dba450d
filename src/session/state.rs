//! Published authentication state and the events that change it.

use std::fmt;

use super::{Session, UserIdentity};

/// Coarse authentication phase.
///
/// Valid transitions:
/// - LoggedOut -> LoggedIn (sign-in, observed session, validated session)
/// - LoggedIn -> LoggedOut (sign-out, expiry detected, validation failure)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AuthPhase {
    /// No usable session.
    #[default]
    LoggedOut,
    /// A non-expired session is held.
    LoggedIn,
}

impl fmt::Display for AuthPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::LoggedOut => f.write_str("logged-out"),
            Self::LoggedIn => f.write_str("logged-in"),
        }
    }
}

/// The session store's published value.
///
/// The session, the authenticated flag and the user are always derived
/// together; there is no way to build an `AuthState` where they disagree.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct AuthState {
    current_session: Option<Session>,
    is_authenticated: bool,
    current_user: Option<UserIdentity>,
    revision: u64,
}

impl AuthState {
    pub(crate) fn logged_out(revision: u64) -> Self {
        Self {
            current_session: None,
            is_authenticated: false,
            current_user: None,
            revision,
        }
    }

    pub(crate) fn logged_in(session: Session, revision: u64) -> Self {
        Self {
            current_user: Some(session.user().clone()),
            current_session: Some(session),
            is_authenticated: true,
            revision,
        }
    }

    /// The current session, if any.
    pub fn current_session(&self) -> Option<&Session> {
        self.current_session.as_ref()
    }

    /// Whether a session was present and unexpired when this state was set.
    pub fn is_authenticated(&self) -> bool {
        self.is_authenticated
    }

    /// The current session's user, if any.
    pub fn current_user(&self) -> Option<&UserIdentity> {
        self.current_user.as_ref()
    }

    /// Number of updates applied before this state was published.
    ///
    /// The initial state has revision 0.
    pub fn revision(&self) -> u64 {
        self.revision
    }

    /// Coarse phase of this state.
    pub fn phase(&self) -> AuthPhase {
        if self.is_authenticated {
            AuthPhase::LoggedIn
        } else {
            AuthPhase::LoggedOut
        }
    }
}

/// An update submitted to the session store.
#[derive(Debug, Clone, PartialEq)]
pub enum UpdateEvent {
    /// Session pushed by the provider's change stream, or cleared locally.
    Observed(Option<Session>),
    /// Session confirmed by an explicit round trip.
    Validated(Session),
    /// An explicit round trip could not produce a session.
    ValidationFailed,
}

impl UpdateEvent {
    /// Short name for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Observed(Some(_)) => "observed",
            Self::Observed(None) => "observed-none",
            Self::Validated(_) => "validated",
            Self::ValidationFailed => "validation-failed",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};

    fn session() -> Session {
        Session::new(
            "tok",
            Utc::now() + Duration::hours(1),
            UserIdentity::new("u-1").with_email("a@b.com"),
        )
    }

    #[test]
    fn test_default_is_logged_out() {
        let state = AuthState::default();
        assert!(state.current_session().is_none());
        assert!(!state.is_authenticated());
        assert!(state.current_user().is_none());
        assert_eq!(state.revision(), 0);
        assert_eq!(state.phase(), AuthPhase::LoggedOut);
    }

    #[test]
    fn test_logged_in_derives_user() {
        let s = session();
        let state = AuthState::logged_in(s.clone(), 3);

        assert!(state.is_authenticated());
        assert_eq!(state.current_session(), Some(&s));
        assert_eq!(state.current_user(), Some(s.user()));
        assert_eq!(state.revision(), 3);
        assert_eq!(state.phase(), AuthPhase::LoggedIn);
    }

    #[test]
    fn test_logged_out_clears_everything() {
        let state = AuthState::logged_out(7);
        assert_eq!(state, AuthState { revision: 7, ..AuthState::default() });
    }

    #[test]
    fn test_event_kind() {
        assert_eq!(UpdateEvent::Observed(Some(session())).kind(), "observed");
        assert_eq!(UpdateEvent::Observed(None).kind(), "observed-none");
        assert_eq!(UpdateEvent::Validated(session()).kind(), "validated");
        assert_eq!(UpdateEvent::ValidationFailed.kind(), "validation-failed");
    }

    #[test]
    fn test_phase_display() {
        assert_eq!(AuthPhase::LoggedIn.to_string(), "logged-in");
        assert_eq!(AuthPhase::LoggedOut.to_string(), "logged-out");
    }
}
