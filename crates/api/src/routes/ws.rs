//! Streaming session endpoints.

use axum::routing::get;
use axum::Router;

use crate::handlers::{preprocess, solver};
use crate::state::AppState;

/// Routes mounted at `/ws`.
///
/// ```text
/// GET    /solver          -> solver_ws
/// GET    /preprocess      -> preprocess_ws
/// ```
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/solver", get(solver::solver_ws))
        .route("/preprocess", get(preprocess::preprocess_ws))
}
