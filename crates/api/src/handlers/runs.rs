//! Run ledger listing and clearing.
//!
//! Admins see every row; other callers see their own.

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::Json;
use serde::Deserialize;
use solvergate_core::ledger::JobRecord;

use crate::auth::Operation;
use crate::error::AppResult;
use crate::middleware::auth::AuthUser;
use crate::response::DataResponse;
use crate::state::AppState;

#[derive(Debug, Default, Deserialize)]
pub struct RunListQuery {
    /// Only rows whose status is `Running`.
    #[serde(default)]
    pub running: bool,
}

/// GET /api/v1/runs
pub async fn list_runs(
    State(state): State<AppState>,
    auth: AuthUser,
    Query(params): Query<RunListQuery>,
) -> AppResult<Json<DataResponse<Vec<JobRecord>>>> {
    state.auth.authorize(&auth, Operation::ListRuns).await?;

    let rows = if params.running {
        state.ledger.list_running().await?
    } else {
        state.ledger.list().await?
    };
    let rows = if auth.is_admin() {
        rows
    } else {
        rows.into_iter().filter(|r| r.user == auth.user).collect()
    };

    Ok(Json(DataResponse { data: rows }))
}

/// DELETE /api/v1/runs
pub async fn clear_runs(State(state): State<AppState>, auth: AuthUser) -> AppResult<StatusCode> {
    state.auth.authorize(&auth, Operation::ClearRuns).await?;
    state.ledger.clear().await?;
    tracing::info!(user = %auth.user, "Run ledger cleared by request");
    Ok(StatusCode::NO_CONTENT)
}
