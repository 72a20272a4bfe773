use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::Message;
use solvergate_core::protocol::TaggedId;
use tokio::sync::{mpsc, RwLock};

use super::frame::Frame;
use super::keepalive::DEFAULT_KEEPALIVE_INTERVAL;
use super::session::Session;

/// Channel sender half for pushing messages to a WebSocket connection.
pub type WsSender = mpsc::UnboundedSender<Message>;

/// Informational message of the frame sent to sessions closed by shutdown.
pub const MSG_SERVER_SHUTDOWN: &str = "Server shutting down";

/// Registry of live sessions, keyed by connection id.
///
/// Thread-safe via interior `RwLock`; designed to be wrapped in `Arc` and
/// shared across the application.
pub struct WsManager {
    sessions: RwLock<HashMap<String, Arc<Session>>>,
    keepalive_interval: Duration,
}

impl WsManager {
    /// Create an empty registry whose sessions tick every `keepalive_interval`.
    pub fn new(keepalive_interval: Duration) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            keepalive_interval,
        }
    }

    /// Register a new session.
    ///
    /// Returns the session and the receiver half of its message channel so
    /// the caller can forward messages to the WebSocket sink.
    pub async fn open_session(
        &self,
        conn_id: String,
    ) -> (Arc<Session>, mpsc::UnboundedReceiver<Message>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let session = Arc::new(Session::new(conn_id.clone(), tx, self.keepalive_interval));
        self.sessions
            .write()
            .await
            .insert(conn_id, Arc::clone(&session));
        (session, rx)
    }

    /// Remove a session by its connection id.
    pub async fn remove(&self, conn_id: &str) {
        self.sessions.write().await.remove(conn_id);
    }

    /// Return the current number of registered sessions.
    pub async fn connection_count(&self) -> usize {
        self.sessions.read().await.len()
    }

    /// The session whose attached job or query with `handle` is still in
    /// flight, even if its peer has gone away.
    pub async fn find_by_handle(&self, handle: TaggedId) -> Option<Arc<Session>> {
        self.sessions
            .read()
            .await
            .values()
            .find(|s| s.handle() == Some(handle) && s.is_in_flight())
            .cloned()
    }

    /// Close every session cleanly, then clear the registry.
    ///
    /// Used during graceful shutdown. Attached solver processes are left
    /// running.
    pub async fn shutdown_all(&self) {
        let mut sessions = self.sessions.write().await;
        let count = sessions.len();
        for session in sessions.values() {
            session.close(Some(Frame::finished(MSG_SERVER_SHUTDOWN)), true);
        }
        sessions.clear();
        tracing::info!(count, "Closed all sessions");
    }
}

impl Default for WsManager {
    fn default() -> Self {
        Self::new(DEFAULT_KEEPALIVE_INTERVAL)
    }
}
