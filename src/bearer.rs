//! Bearer credentials for outgoing backend requests.
//!
//! The backend API client only needs a token; it has no view of session
//! state. [`TokenSource`] is the seam it depends on.

use async_trait::async_trait;
use tracing::debug;

use crate::sync::SessionSynchronizer;
use crate::Result;

/// Authorization scheme prefix.
pub const BEARER_PREFIX: &str = "Bearer ";

/// Something that can produce an access token on demand.
#[async_trait]
pub trait TokenSource: Send + Sync {
    /// Get a currently valid access token.
    async fn access_token(&self) -> Result<String>;
}

#[async_trait]
impl TokenSource for SessionSynchronizer {
    async fn access_token(&self) -> Result<String> {
        SessionSynchronizer::access_token(self).await
    }
}

/// Build an `Authorization` header value, or `None` when no token is available.
///
/// Requests without a token go out unauthenticated; the backend decides
/// what to do with them.
pub async fn bearer_header<S>(source: &S) -> Option<String>
where
    S: TokenSource + ?Sized,
{
    match source.access_token().await {
        Ok(token) => Some(format!("{BEARER_PREFIX}{token}")),
        Err(e) => {
            debug!(error = %e, "sending request without bearer token");
            None
        }
    }
}
