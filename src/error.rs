//! Error types for session-sync.

use thiserror::Error;

use crate::config::ConfigError;
use crate::provider::ProviderError;

/// Main error type for session synchronization operations.
///
/// Every variant except [`SyncError::Config`] is recoverable by the caller:
/// the session store is always left in a well-defined state when one of
/// them is returned.
#[derive(Error, Debug)]
pub enum SyncError {
    /// Sign-in was refused. Unknown users and wrong passwords look the same.
    #[error("invalid credentials")]
    InvalidCredentials,

    /// Sign-up succeeded but no session was issued (e.g. e-mail confirmation pending).
    #[error("sign-up incomplete: no session issued")]
    SignUpIncomplete,

    /// The provider registered no active session.
    #[error("no active session")]
    NoActiveSession,

    /// The provider could not produce or refresh the current session.
    #[error("session refresh failed: {0}")]
    RefreshFailed(String),

    /// The identity provider could not be reached.
    #[error("identity provider unavailable: {0}")]
    ProviderUnavailable(String),

    /// The provider refused the registration.
    #[error("sign-up rejected: {0}")]
    SignUpRejected(String),

    /// Provider endpoint configuration is missing or malformed.
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
}

impl SyncError {
    /// Map a provider failure during sign-in.
    ///
    /// Credential failures collapse into [`SyncError::InvalidCredentials`]
    /// so callers cannot tell an unknown account from a wrong password.
    pub(crate) fn from_sign_in(err: ProviderError) -> Self {
        match err {
            ProviderError::Network(reason) => Self::ProviderUnavailable(reason),
            _ => Self::InvalidCredentials,
        }
    }

    /// Map a provider failure during sign-up.
    pub(crate) fn from_sign_up(err: ProviderError) -> Self {
        match err {
            ProviderError::Network(reason) => Self::ProviderUnavailable(reason),
            other => Self::SignUpRejected(other.to_string()),
        }
    }

    /// Map a provider failure while fetching the current session.
    pub(crate) fn from_validation(err: ProviderError) -> Self {
        match err {
            ProviderError::NoSession => Self::NoActiveSession,
            ProviderError::RefreshFailed(reason) => Self::RefreshFailed(reason),
            other => Self::RefreshFailed(other.to_string()),
        }
    }
}

/// Convenience Result type for session-sync operations.
pub type Result<T> = std::result::Result<T, SyncError>;
