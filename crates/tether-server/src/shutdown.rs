//! Graceful shutdown coordination via `CancellationToken`.

use std::time::Duration;

use tether_session::SessionRegistry;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Default timeout for graceful shutdown before giving up on open requests.
const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

/// Coordinates shutdown of the listener and every live session.
pub struct ShutdownCoordinator {
    token: CancellationToken,
}

impl ShutdownCoordinator {
    /// Create a new shutdown coordinator.
    pub fn new() -> Self {
        Self {
            token: CancellationToken::new(),
        }
    }

    /// Get a clone of the cancellation token.
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Initiate shutdown.
    pub fn shutdown(&self) {
        self.token.cancel();
    }

    /// Whether a shutdown has been initiated.
    pub fn is_shutting_down(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Resolves once shutdown starts, after every registered session has
    /// been closed. Parked slots are answered with the close sentinel, so
    /// long-poll requests finish instead of holding the listener open.
    pub async fn sessions_closed(&self, sessions: SessionRegistry) {
        self.token.cancelled().await;
        let closed = sessions.close_all().await;
        info!(closed, "sessions closed for shutdown");
    }

    /// Perform a graceful shutdown of all tracked tasks.
    ///
    /// 1. Cancel the shutdown token (signals all tasks)
    /// 2. Wait up to `timeout` for all handles to complete
    pub async fn graceful_shutdown(&self, handles: Vec<JoinHandle<()>>, timeout: Option<Duration>) {
        let timeout = timeout.unwrap_or(DEFAULT_SHUTDOWN_TIMEOUT);

        self.shutdown();
        info!(
            task_count = handles.len(),
            timeout_secs = timeout.as_secs(),
            "waiting for tasks to complete"
        );

        let drain = futures::future::join_all(handles);

        if tokio::time::timeout(timeout, drain).await.is_err() {
            warn!("shutdown timed out after {timeout:?}, some tasks may still be running");
        }
    }
}

impl Default for ShutdownCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use tether_channel::ChannelTimeouts;
    use tether_core::{Action, Basket};
    use tether_session::{ExposedMethods, Session};

    #[test]
    fn initial_state_not_shutting_down() {
        let coord = ShutdownCoordinator::new();
        assert!(!coord.is_shutting_down());
    }

    #[test]
    fn shutdown_is_idempotent_and_propagates() {
        let coord = ShutdownCoordinator::default();
        let token = coord.token();
        coord.shutdown();
        coord.shutdown();
        assert!(coord.is_shutting_down());
        assert!(token.is_cancelled());
    }

    #[tokio::test]
    async fn graceful_shutdown_awaits_all_tasks() {
        let coord = ShutdownCoordinator::new();
        let token = coord.token();
        let handle = tokio::spawn(async move {
            token.cancelled().await;
        });
        coord.graceful_shutdown(vec![handle], None).await;
        assert!(coord.is_shutting_down());
    }

    #[tokio::test(start_paused = true)]
    async fn graceful_shutdown_times_out() {
        let coord = ShutdownCoordinator::new();
        let handle = tokio::spawn(async {
            tokio::time::sleep(Duration::from_secs(300)).await;
        });
        coord
            .graceful_shutdown(vec![handle], Some(Duration::from_millis(100)))
            .await;
        assert!(coord.is_shutting_down());
    }

    #[tokio::test]
    async fn shutdown_answers_parked_slots_with_close() {
        let coord = Arc::new(ShutdownCoordinator::new());
        let sessions = SessionRegistry::new();
        let handle = Session::create(Arc::new(ExposedMethods::new()), ChannelTimeouts::default());
        let _ = sessions.activate(handle.clone(), "/live").await.unwrap();
        let slot = handle.offer_slot().unwrap();

        let waiter = {
            let coord = Arc::clone(&coord);
            let sessions = sessions.clone();
            tokio::spawn(async move { coord.sessions_closed(sessions).await })
        };
        coord.shutdown();
        waiter.await.unwrap();

        let basket: Basket = slot.await.unwrap();
        assert_eq!(basket.messages.len(), 1);
        assert_eq!(basket.messages[0].payload, Action::Close);
    }
}
