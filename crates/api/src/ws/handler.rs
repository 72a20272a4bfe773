use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use futures::{SinkExt, StreamExt};
use solvergate_core::error::CoreError;

use super::manager::WsManager;
use super::session::Session;

/// How long to wait for the peer's close handshake once the session is done.
const CLOSE_GRACE: Duration = Duration::from_secs(5);

/// Run one session over an upgraded socket.
///
/// Splits the socket into a sink (outbound) and stream (inbound), then:
///   1. Registers the session with `WsManager`.
///   2. Spawns a sender task that forwards the session's channel to the sink.
///   3. Spawns a receiver task; a peer Close or read error closes the
///      session uncleanly while the operation keeps running.
///   4. Runs `operation` on its own task, so a panic is turned into an error
///      frame instead of tearing down the connection handler.
///   5. Cleans up once the session's channel has drained.
pub async fn serve_session<F, Fut>(socket: WebSocket, ws_manager: Arc<WsManager>, operation: F)
where
    F: FnOnce(Arc<Session>) -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    let conn_id = uuid::Uuid::new_v4().to_string();
    tracing::info!(conn_id = %conn_id, "WebSocket connected");

    let (session, mut rx) = ws_manager.open_session(conn_id.clone()).await;
    let (mut sink, mut stream) = socket.split();

    // Sender task: forward channel messages to the WebSocket sink.
    let sender_conn_id = conn_id.clone();
    let send_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            let closing = matches!(msg, Message::Close(_));
            if sink.send(msg).await.is_err() {
                tracing::debug!(conn_id = %sender_conn_id, "WebSocket sink closed");
                break;
            }
            if closing {
                break;
            }
        }
    });

    // Receiver task: inbound frames other than Close are ignored.
    let recv_session = Arc::clone(&session);
    let mut recv_task = tokio::spawn(async move {
        while let Some(result) = stream.next().await {
            match result {
                Ok(Message::Close(_)) => break,
                Ok(_) => {
                    tracing::trace!(conn_id = %recv_session.conn_id(), "Ignoring inbound frame");
                }
                Err(e) => {
                    tracing::debug!(
                        conn_id = %recv_session.conn_id(),
                        error = %e,
                        "WebSocket receive error",
                    );
                    break;
                }
            }
        }
        recv_session.close(None, false);
    });

    if let Err(e) = tokio::spawn(operation(Arc::clone(&session))).await {
        tracing::error!(conn_id = %conn_id, error = %e, "Session operation aborted");
        session.fail(&CoreError::Internal(
            "The operation failed unexpectedly".into(),
        ));
    }
    // Operations close their own session; this only catches early returns.
    session.close(None, true);

    let _ = send_task.await;
    if tokio::time::timeout(CLOSE_GRACE, &mut recv_task).await.is_err() {
        recv_task.abort();
    }

    ws_manager.remove(&conn_id).await;
    tracing::info!(conn_id = %conn_id, "WebSocket disconnected");
}
