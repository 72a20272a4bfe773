#![allow(dead_code)]

use std::io::Write;
use std::os::unix::fs::OpenOptionsExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::body::Body;
use axum::extract::ws::Message;
use axum::http::{Method, Request};
use axum::response::Response;
use axum::Router;
use http_body_util::BodyExt;
use sqlx::PgPool;
use tempfile::TempDir;
use tokio::sync::mpsc;
use tower::ServiceExt;

use solvergate_api::auth::jwt::JwtConfig;
use solvergate_api::auth::AuthProvider;
use solvergate_api::config::{ServerConfig, SolverConfig};
use solvergate_api::middleware::auth::AuthUser;
use solvergate_api::router::build_app_router;
use solvergate_api::state::AppState;
use solvergate_core::error::CoreError;
use solvergate_core::layout::DEFAULT_ARTIFACT_PATTERN;
use solvergate_core::process::SupervisorKind;
use solvergate_db::PoolConfig;

/// Project every fixture user owns.
pub const PROJECT: &str = "coast";

/// Runs required by the fixture project.
pub const REQUIRED_RUNS: u32 = 3;

/// Build a test `ServerConfig` rooted at `root`.
///
/// Projects live under `<root>/users`, the ledger at `<root>/runlog.dat`, and
/// the solver at `<root>/bin/solver`.
pub fn test_config(root: &Path) -> ServerConfig {
    ServerConfig {
        host: "127.0.0.1".to_string(),
        port: 0,
        cors_origins: vec!["http://localhost:5173".to_string()],
        request_timeout_secs: 30,
        shutdown_timeout_secs: 30,
        keepalive_interval_secs: 30,
        pool: PoolConfig::default(),
        solver: SolverConfig {
            projects_root: root.join("users"),
            ledger_path: root.join("runlog.dat"),
            executable: solver_path(root),
            supervisor: SupervisorKind::Native,
            poll_interval_ms: 50,
            artifact_pattern: DEFAULT_ARTIFACT_PATTERN.to_string(),
        },
        jwt: JwtConfig {
            secret: "test-secret-that-is-long-enough-for-hmac".to_string(),
            access_token_expiry_mins: 15,
        },
    }
}

pub fn solver_path(root: &Path) -> PathBuf {
    root.join("bin").join("solver")
}

/// Fixed tokens: `alice` and `bob` are users, `admin` an admin, `viewer`
/// read-only. Any other token is rejected.
pub struct StaticAuthProvider;

#[async_trait]
impl AuthProvider for StaticAuthProvider {
    async fn authenticate(&self, token: Option<&str>) -> Result<AuthUser, CoreError> {
        let token =
            token.ok_or_else(|| CoreError::Unauthorized("Missing authentication token".into()))?;
        let (user, role) = match token {
            "alice" => ("alice", "user"),
            "bob" => ("bob", "user"),
            "admin" => ("admin", "admin"),
            "viewer" => ("viewer", "read_only"),
            _ => return Err(CoreError::Unauthorized("Invalid or expired token".into())),
        };
        Ok(AuthUser {
            user: user.to_string(),
            role: role.to_string(),
        })
    }
}

/// Everything a test needs: the temp directory backing projects and ledger,
/// and the application state built over it.
pub struct TestEnv {
    pub dir: TempDir,
    pub config: ServerConfig,
    pub state: AppState,
}

impl TestEnv {
    pub fn root(&self) -> &Path {
        self.dir.path()
    }

    pub fn app(&self) -> Router {
        build_app_router(self.state.clone(), &self.config)
    }

    /// Working directory of `user`'s fixture project.
    pub fn project_dir(&self, user: &str) -> PathBuf {
        self.config.solver.projects_root.join(user).join(PROJECT)
    }
}

/// Build state over a fresh temp directory with the fixture project created
/// for alice and bob and `solver_body` installed as the solver.
pub async fn build_test_env(pool: PgPool, solver_body: &str) -> TestEnv {
    let dir = tempfile::tempdir().expect("create temp dir");
    let config = test_config(dir.path());

    for user in ["alice", "bob"] {
        create_project(&config.solver.projects_root, user, PROJECT, REQUIRED_RUNS);
    }
    write_script(&dir.path().join("bin"), "solver", solver_body);

    let state = AppState::with_auth(config.clone(), pool, Arc::new(StaticAuthProvider))
        .await
        .expect("build app state");

    TestEnv { dir, config, state }
}

/// Create `<root>/<user>/<project>` with an input file requiring `runs` runs.
pub fn create_project(root: &Path, user: &str, project: &str, runs: u32) -> PathBuf {
    let dir = root.join(user).join(project);
    std::fs::create_dir_all(dir.join("output")).expect("create project");
    std::fs::write(dir.join("input.dat"), format!("TITLE test\nNUMREPS {runs}\n"))
        .expect("write input file");
    dir
}

/// Write an executable `/bin/sh` script named `name` into `dir`.
pub fn write_script(dir: &Path, name: &str, body: &str) -> PathBuf {
    std::fs::create_dir_all(dir).expect("create script dir");
    let path = dir.join(name);
    let mut file = std::fs::OpenOptions::new()
        .create(true)
        .truncate(true)
        .write(true)
        .mode(0o755)
        .open(&path)
        .expect("create script");
    write!(file, "#!/bin/sh\n{body}\n").expect("write script");
    file.sync_all().expect("sync script");
    path
}

/// Solver writing one artifact per required run.
pub const COMPLETING_SOLVER: &str = r#"for i in 1 2 3; do
  echo "run $i done"
  touch "output/output_r0000$i.csv"
done"#;

/// Solver finishing one run, then idling until killed.
pub const STALLING_SOLVER: &str = r#"echo "run 1 done"
touch output/output_r00001.csv
exec sleep 30"#;

/// Solver finishing every run, then idling until killed.
pub const LINGERING_SOLVER: &str = r#"for i in 1 2 3; do
  touch "output/output_r0000$i.csv"
done
exec sleep 30"#;

/// Solver killed by a signal after one run.
pub const CRASHING_SOLVER: &str = r#"echo "run 1 done"
touch output/output_r00001.csv
kill -9 $$"#;

// ---------------------------------------------------------------------------
// Session frames
// ---------------------------------------------------------------------------

/// Parse a text frame.
pub fn frame_json(message: Message) -> Option<serde_json::Value> {
    match message {
        Message::Text(text) => Some(serde_json::from_str(text.as_str()).expect("frame is JSON")),
        _ => None,
    }
}

/// Receive the next text frame, waiting at most five seconds.
pub async fn next_frame(rx: &mut mpsc::UnboundedReceiver<Message>) -> serde_json::Value {
    loop {
        let message = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("timed out waiting for a frame")
            .expect("session channel closed");
        if let Some(frame) = frame_json(message) {
            return frame;
        }
    }
}

/// Every text frame already queued on `rx`.
pub fn drain_frames(rx: &mut mpsc::UnboundedReceiver<Message>) -> Vec<serde_json::Value> {
    let mut frames = Vec::new();
    while let Ok(message) = rx.try_recv() {
        frames.extend(frame_json(message));
    }
    frames
}

/// Wait until `check` holds, polling every 20ms for up to five seconds.
pub async fn wait_until<F: FnMut() -> bool>(mut check: F) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while !check() {
        assert!(
            tokio::time::Instant::now() < deadline,
            "condition not met within five seconds"
        );
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

// ---------------------------------------------------------------------------
// HTTP helpers
// ---------------------------------------------------------------------------

/// Read the full response body and parse it as JSON.
pub async fn body_json(response: Response) -> serde_json::Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

async fn send(app: Router, method: Method, uri: &str, token: Option<&str>) -> Response {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(token) = token {
        builder = builder.header("authorization", format!("Bearer {token}"));
    }
    app.oneshot(builder.body(Body::empty()).unwrap())
        .await
        .unwrap()
}

pub async fn get(app: Router, uri: &str) -> Response {
    send(app, Method::GET, uri, None).await
}

pub async fn get_auth(app: Router, uri: &str, token: &str) -> Response {
    send(app, Method::GET, uri, Some(token)).await
}

pub async fn post_auth(app: Router, uri: &str, token: &str) -> Response {
    send(app, Method::POST, uri, Some(token)).await
}

pub async fn delete_auth(app: Router, uri: &str, token: &str) -> Response {
    send(app, Method::DELETE, uri, Some(token)).await
}
