//! Session state module.
//!
//! This module provides the session value types, the expiry clock and the
//! store that owns the process-wide authentication state.

pub mod clock;
mod model;
mod state;
mod store;

pub use clock::{is_expired, Clock, FixedClock, SystemClock};
pub use model::{Session, UserIdentity};
pub use state::{AuthPhase, AuthState, UpdateEvent};
pub use store::SessionStore;
