use axum::routing::get;
use axum::Router;

use crate::handlers::runs;
use crate::state::AppState;

/// Routes mounted at `/runs`.
///
/// ```text
/// GET    /                -> list_runs
/// DELETE /                -> clear_runs
/// ```
pub fn router() -> Router<AppState> {
    Router::new().route("/", get(runs::list_runs).delete(runs::clear_runs))
}
