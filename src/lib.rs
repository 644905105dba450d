//! # session-sync
//!
//! Authenticated-session state synchronization for app clients.
//!
//! This crate owns the "am I authenticated, and with which session" truth
//! for an application. It reconciles two independent sources of session
//! information into one observable state:
//!
//! - a push stream of session changes from an identity provider, and
//! - explicit validate/refresh round trips issued by the app.
//!
//! ## Features
//!
//! - **Single writer**: every update goes through [`SessionStore::apply`]
//! - **Expiry re-check**: late or stale sessions are never published as authenticated
//! - **Observable**: [`SessionStore::subscribe`] streams every state transition
//! - **Offline-safe sign-out**: local sign-out never waits on a dead network
//!
//! ## Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use session_sync::{Config, InMemoryProvider, SessionSynchronizer};
//!
//! #[tokio::main]
//! async fn main() -> session_sync::Result<()> {
//!     session_sync::logging::try_init().ok();
//!
//!     let config = Config::resolve(None, Some("session-sync.json".as_ref()))?;
//!     let provider = Arc::new(InMemoryProvider::new());
//!     let sync = SessionSynchronizer::new(&config, provider)?;
//!     sync.start().await;
//!
//!     let session = sync.sign_in("a@b.com", "secret").await?;
//!     println!("signed in as {}", session.user_id());
//!
//!     let token = sync.access_token().await?;
//!     println!("bearer token has {} bytes", token.len());
//!
//!     sync.sign_out().await;
//!     Ok(())
//! }
//! ```

pub mod bearer;
pub mod config;
pub mod error;
pub mod logging;
pub mod provider;
pub mod session;
pub mod sync;

// Re-export commonly used types
pub use bearer::{bearer_header, TokenSource};
pub use config::{Config, ConfigError, ProviderEndpoint};
pub use error::{Result, SyncError};
#[cfg(any(test, feature = "test-utils"))]
pub use provider::InMemoryProvider;
pub use provider::{ChangeKind, IdentityProvider, ProviderError, SessionChange, SignUpOutcome};
pub use session::{AuthPhase, AuthState, Session, SessionStore, UpdateEvent, UserIdentity};
pub use sync::{NotificationListener, SessionSynchronizer, Validator};
