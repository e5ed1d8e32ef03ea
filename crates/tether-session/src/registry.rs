//! Index of activated sessions by client id.

use std::sync::Arc;

use dashmap::DashMap;
use metrics::gauge;
use tether_core::{ClientId, DisconnectReason};
use tracing::{debug, info, warn};

use crate::error::SessionError;
use crate::session::{Activation, SessionHandle};

/// Shared map from client id to session.
///
/// A session enters on activation and leaves exactly once, when it
/// disconnects.
#[derive(Clone, Default)]
pub struct SessionRegistry {
    sessions: Arc<DashMap<ClientId, SessionHandle>>,
}

impl SessionRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Activate `handle` under `location` and index it by its new client id.
    pub async fn activate(
        &self,
        handle: SessionHandle,
        location: &str,
    ) -> Result<Activation, SessionError> {
        let activation = handle.activate(location).await?;
        let client_id = activation.client_id.clone();
        let notice = handle.notify_on_disconnect();
        let watched = handle.clone();
        let _ = self.sessions.insert(client_id.clone(), handle);
        self.publish_count();

        let registry = self.clone();
        drop(tokio::spawn(async move {
            let reason = tokio::select! {
                reason = notice => Some(reason),
                () = watched.stopped() => None,
            };
            let _ = registry.remove(&client_id, reason);
        }));
        Ok(activation)
    }

    /// Look up a session.
    pub fn get(&self, client_id: &ClientId) -> Option<SessionHandle> {
        self.sessions.get(client_id).map(|entry| entry.value().clone())
    }

    /// Number of indexed sessions.
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    /// Whether no session is indexed.
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Close every indexed session. Returns how many were closed.
    pub async fn close_all(&self) -> usize {
        let handles: Vec<SessionHandle> = self
            .sessions
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        let mut closed = 0;
        for handle in handles {
            if handle.close().await.is_ok() {
                closed += 1;
            }
        }
        info!(closed, "closed all sessions");
        closed
    }

    fn remove(&self, client_id: &ClientId, reason: Option<DisconnectReason>) -> bool {
        let removed = self.sessions.remove(client_id).is_some();
        if removed {
            match reason {
                Some(reason) => {
                    debug!(%client_id, reason = reason.kind(), "session removed from registry");
                }
                None => warn!(%client_id, "session task exited without disconnecting"),
            }
            self.publish_count();
        }
        removed
    }

    #[allow(clippy::cast_precision_loss)]
    fn publish_count(&self) {
        gauge!("tether_sessions_active").set(self.sessions.len() as f64);
    }
}
