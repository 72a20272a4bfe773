use std::sync::Weak;
use std::time::Duration;

use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use super::session::Session;

/// Default interval between keepalive frames.
pub const DEFAULT_KEEPALIVE_INTERVAL: Duration = Duration::from_secs(30);

/// Spawn the keepalive timer of one session.
///
/// Every `period` the session sends its progress text, or a heartbeat frame
/// when none is set, so idle intermediaries do not drop the connection. The
/// task ends when `cancel` fires, the session is finalized, or the session
/// is dropped.
pub fn start_keepalive(session: Weak<Session>, period: Duration, cancel: CancellationToken) {
    tokio::spawn(async move {
        let mut interval = interval_at(Instant::now() + period, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                () = cancel.cancelled() => break,
                _ = interval.tick() => {
                    let Some(session) = session.upgrade() else { break };
                    if !session.keepalive_tick() {
                        break;
                    }
                    tracing::trace!(conn_id = %session.conn_id(), "Session keepalive");
                }
            }
        }
    });
}
