pub mod health;
pub mod processes;
pub mod runs;
pub mod ws;

use axum::Router;

use crate::state::AppState;

/// Build the `/api/v1` route tree.
///
/// Route hierarchy:
///
/// ```text
/// /ws/solver?project=&token=                       solver session (WebSocket)
/// /ws/preprocess?project=&feature=&token=          preprocessing session (WebSocket)
///
/// /processes/{pid}/stop                            stop a job (m<pid>) or query (q<id>)
///
/// /runs                                            list (GET), clear (DELETE, admin)
/// ```
pub fn api_routes() -> Router<AppState> {
    Router::new()
        .nest("/ws", ws::router())
        .nest("/processes", processes::router())
        .nest("/runs", runs::router())
}
