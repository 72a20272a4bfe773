//! Feature preprocessing sessions:
//! `GET /api/v1/ws/preprocess?project=<p>&feature=<f>&token=<jwt>`.

use std::sync::Arc;

use axum::extract::{Query, State, WebSocketUpgrade};
use axum::http::HeaderMap;
use axum::response::Response;
use serde::Deserialize;
use serde_json::Value;
use solvergate_core::error::CoreError;
use solvergate_core::protocol::FrameStatus;
use solvergate_db::statement::{QueryParam, RowShape};
use validator::Validate;

use crate::auth::Operation;
use crate::engine::QueryOutcome;
use crate::error::AppResult;
use crate::middleware::auth::request_token;
use crate::state::AppState;
use crate::ws::{serve_session, Frame, OpenRequest, Session};

/// Statement run for each preprocessing request.
pub const PREPROCESS_SQL: &str = "SELECT * FROM solvergate.preprocess_feature($1, $2)";

#[derive(Debug, Deserialize, Validate)]
pub struct PreprocessParams {
    #[validate(length(min = 1, max = 128))]
    pub project: String,
    #[validate(length(min = 1, max = 256))]
    pub feature: String,
    pub token: Option<String>,
}

/// GET /api/v1/ws/preprocess
///
/// Upgrades to a session that runs the preprocessing statement for one
/// feature. The resulting rows are returned as `data` in the `Finished` frame.
pub async fn preprocess_ws(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(params): Query<PreprocessParams>,
) -> AppResult<Response> {
    params.validate()?;
    let token = request_token(&headers, params.token.as_deref());
    let manager = Arc::clone(&state.ws_manager);

    Ok(ws.on_upgrade(move |socket| {
        serve_session(socket, manager, move |session| {
            run_preprocess(state, session, params.project, params.feature, token)
        })
    }))
}

pub async fn run_preprocess(
    state: AppState,
    session: Arc<Session>,
    project: String,
    feature: String,
    token: Option<String>,
) {
    let request = OpenRequest {
        start_message: format!("Preprocessing feature {feature}"),
        token,
        operation: Operation::PreprocessFeature,
        project: Some(project.clone()),
    };
    if session
        .open(state.auth.as_ref(), state.layout.as_ref(), request)
        .await
        .is_err()
    {
        return;
    }

    if let Err(e) = preprocess(&state, &session, &project, &feature).await {
        session.fail(&e);
    }
}

async fn preprocess(
    state: &AppState,
    session: &Session,
    project: &str,
    feature: &str,
) -> Result<(), CoreError> {
    session.set_progress_text(Some(format!("Preprocessing feature {feature}")));
    let params = [QueryParam::from(project), QueryParam::from(feature)];
    let outcome = state
        .executor
        .execute(session, PREPROCESS_SQL, &params, RowShape::All)
        .await;
    session.set_progress_text(None);

    match outcome? {
        QueryOutcome::Completed(output) => {
            let info = format!("Feature {feature} preprocessed");
            session.send(Frame::new(FrameStatus::FeatureCreated).info(info.clone()));
            session.close(
                Some(Frame::finished(info).with("data", Value::from(output))),
                true,
            );
        }
        QueryOutcome::Stopped { info } => session.close(Some(Frame::finished(info)), true),
    }
    Ok(())
}
