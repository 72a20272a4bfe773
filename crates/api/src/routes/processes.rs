use axum::routing::post;
use axum::Router;

use crate::handlers::processes;
use crate::state::AppState;

/// Routes mounted at `/processes`.
///
/// ```text
/// POST   /{pid}/stop      -> stop_process
/// ```
pub fn router() -> Router<AppState> {
    Router::new().route("/{pid}/stop", post(processes::stop_process))
}
