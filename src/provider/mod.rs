//! Identity provider capability.
//!
//! The synchronizer treats the identity provider as an opaque collaborator.
//! Transport, token storage and refresh-token handling all live behind
//! [`IdentityProvider`].

#[cfg(any(test, feature = "test-utils"))]
mod memory;

#[cfg(any(test, feature = "test-utils"))]
pub use memory::InMemoryProvider;

use async_trait::async_trait;
use futures_util::stream::BoxStream;
use thiserror::Error;

use crate::session::{Session, UserIdentity};

/// Metadata key under which the display name is sent at sign-up.
pub const DISPLAY_NAME_KEY: &str = "name";

/// Failures reported by an identity provider.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProviderError {
    /// Password did not match.
    #[error("invalid login credentials")]
    InvalidCredentials,

    /// No account exists for the e-mail address.
    #[error("user not found")]
    UserNotFound,

    /// An account already exists for the e-mail address.
    #[error("user already registered")]
    UserAlreadyExists,

    /// The provider holds no session.
    #[error("no session")]
    NoSession,

    /// The stored refresh credential could not be exchanged.
    #[error("token refresh failed: {0}")]
    RefreshFailed(String),

    /// The provider could not be reached.
    #[error("network error: {0}")]
    Network(String),

    /// The session-change stream was closed by the provider.
    #[error("session change stream closed")]
    StreamClosed,

    /// Any other provider failure.
    #[error("{0}")]
    Other(String),
}

/// Why the provider emitted a session change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    /// First event after subscribing, carrying the stored session if any.
    InitialSession,
    /// A user signed in.
    SignedIn,
    /// The user signed out.
    SignedOut,
    /// The access token was refreshed.
    TokenRefreshed,
    /// The user's profile changed.
    UserUpdated,
    /// The user was deleted.
    UserDeleted,
}

impl ChangeKind {
    /// Short name for logging.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InitialSession => "initial-session",
            Self::SignedIn => "signed-in",
            Self::SignedOut => "signed-out",
            Self::TokenRefreshed => "token-refreshed",
            Self::UserUpdated => "user-updated",
            Self::UserDeleted => "user-deleted",
        }
    }
}

/// A session change pushed by the provider.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionChange {
    /// What happened.
    pub kind: ChangeKind,
    /// The session after the change, if any.
    pub session: Option<Session>,
}

impl SessionChange {
    /// Create a change event.
    pub fn new(kind: ChangeKind, session: Option<Session>) -> Self {
        Self { kind, session }
    }
}

/// Result of a sign-up call.
#[derive(Debug, Clone, PartialEq)]
pub struct SignUpOutcome {
    /// The registered user.
    pub user: UserIdentity,
    /// Session issued immediately, absent when confirmation is pending.
    pub session: Option<Session>,
}

/// Stream of session changes from the provider.
pub type SessionChanges = BoxStream<'static, Result<SessionChange, ProviderError>>;

/// Identity provider operations used by the synchronizer.
///
/// Implementations bound their own network calls; callers never impose a
/// deadline beyond dropping the future.
#[async_trait]
pub trait IdentityProvider: Send + Sync + 'static {
    /// Register a new account. `display_name` is sent as user metadata.
    async fn sign_up(
        &self,
        email: &str,
        password: &str,
        display_name: &str,
    ) -> Result<SignUpOutcome, ProviderError>;

    /// Sign in with e-mail and password.
    async fn sign_in(&self, email: &str, password: &str) -> Result<Session, ProviderError>;

    /// Revoke the current session remotely and forget it locally.
    async fn sign_out(&self) -> Result<(), ProviderError>;

    /// Get the current session, refreshing it first if it is about to expire.
    async fn current_session(&self) -> Result<Session, ProviderError>;

    /// Subscribe to session changes.
    fn session_changes(&self) -> SessionChanges;
}
