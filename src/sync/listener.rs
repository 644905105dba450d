//! Push path: forwards provider session changes to the store.

use std::sync::Arc;

use futures_util::StreamExt;
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

use crate::provider::{IdentityProvider, ProviderError};
use crate::session::{SessionStore, UpdateEvent};

/// Why a listener stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ListenerExit {
    /// The provider ended the stream.
    Ended,
    /// The provider reported an error on the stream.
    Failed(ProviderError),
    /// The listener task was aborted.
    Aborted,
}

/// Consumes the provider's session-change stream.
///
/// The listener does not reconnect on its own. When its stream ends the
/// owner decides whether to start a new one.
pub struct NotificationListener {
    provider: Arc<dyn IdentityProvider>,
    store: Arc<SessionStore>,
}

impl NotificationListener {
    /// Create a listener feeding `store`.
    pub fn new(provider: Arc<dyn IdentityProvider>, store: Arc<SessionStore>) -> Self {
        Self { provider, store }
    }

    /// Start the listener on a background task.
    pub fn spawn(self) -> ListenerHandle {
        ListenerHandle {
            task: tokio::spawn(self.run()),
        }
    }

    /// Forward changes until the stream ends or fails.
    pub async fn run(self) -> ListenerExit {
        let mut changes = self.provider.session_changes();
        debug!("subscribed to session changes");

        while let Some(item) = changes.next().await {
            match item {
                Ok(change) => {
                    debug!(
                        kind = change.kind.as_str(),
                        has_session = change.session.is_some(),
                        "session change received"
                    );
                    self.store.apply(UpdateEvent::Observed(change.session));
                }
                Err(e) => {
                    error!(error = %e, "session change stream failed");
                    return ListenerExit::Failed(e);
                }
            }
        }

        warn!("session change stream ended");
        ListenerExit::Ended
    }
}

/// Handle to a running listener task.
#[derive(Debug)]
pub struct ListenerHandle {
    task: JoinHandle<ListenerExit>,
}

impl ListenerHandle {
    /// Whether the listener has stopped.
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Stop the listener.
    pub fn abort(&self) {
        self.task.abort();
    }

    /// Wait for the listener to stop.
    pub async fn join(self) -> ListenerExit {
        match self.task.await {
            Ok(exit) => exit,
            Err(e) if e.is_cancelled() => ListenerExit::Aborted,
            Err(e) => {
                error!(error = %e, "session listener panicked");
                ListenerExit::Failed(ProviderError::Other(e.to_string()))
            }
        }
    }
}
