use std::sync::Arc;

use regex::Regex;
use solvergate_core::error::CoreError;
use solvergate_core::layout::{FsProjectLayout, ProjectLayout};
use solvergate_core::ledger::RunLedger;
use solvergate_core::process::build_supervisor;

use crate::auth::{AuthProvider, JwtAuthProvider};
use crate::config::ServerConfig;
use crate::engine::{JobSupervisor, QueryExecutor};
use crate::ws::WsManager;

/// Application context available to all Axum handlers via `State<AppState>`.
///
/// Built once by [`AppState::init`] and torn down by [`AppState::teardown`].
/// This is cheaply cloneable (inner data is behind `Arc` or is already `Clone`).
#[derive(Clone)]
pub struct AppState {
    /// Database connection pool.
    pub pool: solvergate_db::DbPool,
    /// Server configuration.
    pub config: Arc<ServerConfig>,
    /// Live session registry.
    pub ws_manager: Arc<WsManager>,
    /// Authentication and authorization decisions.
    pub auth: Arc<dyn AuthProvider>,
    /// On-disk project layout.
    pub layout: Arc<dyn ProjectLayout>,
    /// Durable record of solver runs.
    pub ledger: Arc<RunLedger>,
    /// Solver job supervisor.
    pub supervisor: Arc<JobSupervisor>,
    /// Cancellable query executor.
    pub executor: Arc<QueryExecutor>,
}

impl AppState {
    /// Build the application context with JWT authentication.
    pub async fn init(config: ServerConfig, pool: solvergate_db::DbPool) -> Result<Self, CoreError> {
        let auth = Arc::new(JwtAuthProvider::new(config.jwt.clone()));
        Self::with_auth(config, pool, auth).await
    }

    /// Build the application context around a given auth provider.
    ///
    /// Opens (or creates) the run ledger and selects the configured process
    /// supervisor backend.
    pub async fn with_auth(
        config: ServerConfig,
        pool: solvergate_db::DbPool,
        auth: Arc<dyn AuthProvider>,
    ) -> Result<Self, CoreError> {
        let pattern = Regex::new(&config.solver.artifact_pattern).map_err(|e| {
            CoreError::Validation(format!("Invalid run artifact pattern: {e}"))
        })?;
        let layout: Arc<dyn ProjectLayout> = Arc::new(FsProjectLayout::new(
            config.solver.projects_root.clone(),
            pattern,
        ));

        let ledger = Arc::new(
            RunLedger::open(config.solver.ledger_path.clone(), Arc::clone(&layout)).await?,
        );

        let backend = build_supervisor(config.solver.supervisor, config.solver.poll_interval());
        tracing::info!(
            backend = backend.name(),
            executable = %config.solver.executable.display(),
            ledger = %ledger.path().display(),
            "Solver supervisor configured",
        );
        let supervisor = Arc::new(JobSupervisor::new(
            backend,
            Arc::clone(&ledger),
            Arc::clone(&layout),
            config.solver.executable.clone(),
        ));

        let reaped = supervisor.reap_orphans().await?;
        if reaped > 0 {
            tracing::warn!(reaped, "Marked orphaned solver runs killed");
        }

        Ok(Self {
            executor: Arc::new(QueryExecutor::new(pool.clone())),
            ws_manager: Arc::new(WsManager::new(config.keepalive_interval())),
            pool,
            config: Arc::new(config),
            auth,
            layout,
            ledger,
            supervisor,
        })
    }

    /// Close every live session, then the connection pool.
    pub async fn teardown(&self) {
        let sessions = self.ws_manager.connection_count().await;
        tracing::info!(sessions, "Closing remaining sessions");
        self.ws_manager.shutdown_all().await;

        self.pool.close().await;
        tracing::info!("Database pool closed");
    }
}
