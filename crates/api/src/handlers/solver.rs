//! Solver sessions: `GET /api/v1/ws/solver?project=<p>&token=<jwt>`.

use std::sync::Arc;

use axum::extract::{Query, State, WebSocketUpgrade};
use axum::http::HeaderMap;
use axum::response::Response;
use serde::Deserialize;
use solvergate_core::error::CoreError;
use validator::Validate;

use crate::auth::Operation;
use crate::engine::JobRequest;
use crate::error::AppResult;
use crate::middleware::auth::request_token;
use crate::state::AppState;
use crate::ws::{serve_session, OpenRequest, OpenedSession, Session};

#[derive(Debug, Deserialize, Validate)]
pub struct SolverParams {
    #[validate(length(min = 1, max = 128))]
    pub project: String,
    pub token: Option<String>,
}

/// GET /api/v1/ws/solver
///
/// Upgrades to a session that runs the solver for the caller's project and
/// streams its output until the job is reconciled.
pub async fn solver_ws(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(params): Query<SolverParams>,
) -> AppResult<Response> {
    params.validate()?;
    let token = request_token(&headers, params.token.as_deref());
    let manager = Arc::clone(&state.ws_manager);

    Ok(ws.on_upgrade(move |socket| {
        serve_session(socket, manager, move |session| {
            run_solver(state, session, params.project, token)
        })
    }))
}

/// Open `session` for the solver and run one job in it.
pub async fn run_solver(
    state: AppState,
    session: Arc<Session>,
    project: String,
    token: Option<String>,
) {
    let request = OpenRequest {
        start_message: format!("Starting solver for project {project}"),
        token,
        operation: Operation::RunSolver,
        project: Some(project.clone()),
    };
    let Ok(opened) = session
        .open(state.auth.as_ref(), state.layout.as_ref(), request)
        .await
    else {
        return;
    };

    if let Err(e) = solve(&state, &session, opened, project).await {
        session.fail(&e);
    }
}

async fn solve(
    state: &AppState,
    session: &Session,
    opened: OpenedSession,
    project: String,
) -> Result<(), CoreError> {
    let working_dir = opened
        .working_dir
        .ok_or_else(|| CoreError::Internal("Solver session has no working directory".into()))?;
    let required_runs = state.layout.required_runs(&working_dir).await?;

    let request = JobRequest {
        user: opened.user.user,
        project,
        working_dir,
        required_runs,
    };
    state.supervisor.run(session, &request).await?;
    Ok(())
}
