//! Wall-clock expiry checks.

use std::sync::{PoisonError, RwLock};

use chrono::{DateTime, Duration, Utc};

use super::Session;

/// Returns true iff `session` has expired at `now`.
///
/// A session is expired at exactly its `expires_at` instant.
pub fn is_expired(session: &Session, now: DateTime<Utc>) -> bool {
    now >= session.expires_at()
}

/// Source of the current time.
pub trait Clock: Send + Sync {
    /// Get the current time.
    fn now(&self) -> DateTime<Utc>;
}

/// Clock backed by the system wall clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Manually driven clock for deterministic tests.
#[derive(Debug)]
pub struct FixedClock {
    time: RwLock<DateTime<Utc>>,
}

impl FixedClock {
    /// Create a clock frozen at `time`.
    pub fn new(time: DateTime<Utc>) -> Self {
        Self {
            time: RwLock::new(time),
        }
    }

    /// Move the clock to `time`.
    pub fn set(&self, time: DateTime<Utc>) {
        *self.time.write().unwrap_or_else(PoisonError::into_inner) = time;
    }

    /// Move the clock forward by `by`.
    pub fn advance(&self, by: Duration) {
        let mut time = self.time.write().unwrap_or_else(PoisonError::into_inner);
        *time += by;
    }
}

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        *self.time.read().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::UserIdentity;

    fn session_expiring_at(at: DateTime<Utc>) -> Session {
        Session::new("tok", at, UserIdentity::new("u-1"))
    }

    #[test]
    fn test_not_expired_before_deadline() {
        let now = Utc::now();
        let session = session_expiring_at(now + Duration::seconds(1));
        assert!(!is_expired(&session, now));
    }

    #[test]
    fn test_expired_at_deadline() {
        let now = Utc::now();
        let session = session_expiring_at(now);
        assert!(is_expired(&session, now));
    }

    #[test]
    fn test_expired_after_deadline() {
        let now = Utc::now();
        let session = session_expiring_at(now - Duration::seconds(1));
        assert!(is_expired(&session, now));
    }

    #[test]
    fn test_fixed_clock_advance() {
        let start = Utc::now();
        let clock = FixedClock::new(start);
        assert_eq!(clock.now(), start);

        clock.advance(Duration::minutes(5));
        assert_eq!(clock.now(), start + Duration::minutes(5));

        clock.set(start);
        assert_eq!(clock.now(), start);
    }

    #[test]
    fn test_system_clock_moves_forward() {
        let clock = SystemClock;
        let a = clock.now();
        let b = clock.now();
        assert!(b >= a);
    }
}
