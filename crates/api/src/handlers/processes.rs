//! Control commands for running jobs and queries.
//!
//! `POST /api/v1/processes/{pid}/stop` routes on the tagged id's prefix:
//! `m<pid>` stops a solver job, `q<backend>` cancels a query. Owners and
//! admins may stop.

use axum::extract::{Path, State};
use axum::Json;
use serde::Serialize;
use solvergate_core::error::CoreError;
use solvergate_core::protocol::TaggedId;
use solvergate_core::types::ProcessId;

use crate::auth::Operation;
use crate::error::{AppError, AppResult};
use crate::middleware::auth::AuthUser;
use crate::response::DataResponse;
use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct StopResponse {
    pub pid: TaggedId,
    pub stopped: bool,
}

/// POST /api/v1/processes/{pid}/stop
pub async fn stop_process(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(pid): Path<String>,
) -> AppResult<Json<DataResponse<StopResponse>>> {
    state.auth.authorize(&auth, Operation::StopProcess).await?;
    let handle: TaggedId = pid.parse()?;

    match handle {
        TaggedId::Job(pid) => {
            let owner = job_owner(&state, pid).await?;
            ensure_owner(&auth, &owner)?;
            state.supervisor.stop(pid).await?;
        }
        TaggedId::Query(backend) => {
            let session = state
                .ws_manager
                .find_by_handle(handle)
                .await
                .ok_or_else(|| not_found(handle))?;
            ensure_owner(&auth, &session.user_name().unwrap_or_default())?;
            state.executor.cancel(backend).await?;
        }
    }

    tracing::info!(pid = %handle, user = %auth.user, "Stop requested");
    Ok(Json(DataResponse {
        data: StopResponse {
            pid: handle,
            stopped: true,
        },
    }))
}

/// Owner of a job: its ledger row, or for unlogged clumping runs the
/// session holding its handle.
async fn job_owner(state: &AppState, pid: ProcessId) -> AppResult<String> {
    let handle = TaggedId::Job(pid);
    if let Some(row) = state.ledger.find_by_process_id(pid).await? {
        return Ok(row.user);
    }
    state
        .ws_manager
        .find_by_handle(handle)
        .await
        .and_then(|s| s.user_name())
        .ok_or_else(|| not_found(handle))
}

fn ensure_owner(auth: &AuthUser, owner: &str) -> AppResult<()> {
    if auth.user != owner && !auth.is_admin() {
        return Err(AppError::Core(CoreError::Forbidden(
            "Cannot stop another user's process".into(),
        )));
    }
    Ok(())
}

fn not_found(handle: TaggedId) -> AppError {
    AppError::Core(CoreError::NotFound {
        entity: "Process",
        id: handle.to_string(),
    })
}
