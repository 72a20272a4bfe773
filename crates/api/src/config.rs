use std::path::PathBuf;
use std::time::Duration;

use solvergate_core::layout::DEFAULT_ARTIFACT_PATTERN;
use solvergate_core::process::SupervisorKind;
use solvergate_db::PoolConfig;

use crate::auth::jwt::JwtConfig;

/// Server configuration loaded from environment variables.
///
/// All fields except the JWT secret have defaults suitable for local
/// development. In production, override via environment variables.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Bind address (default: `0.0.0.0`).
    pub host: String,
    /// Bind port (default: `3000`).
    pub port: u16,
    /// Allowed CORS origins, parsed from comma-separated `CORS_ORIGINS` env var.
    pub cors_origins: Vec<String>,
    /// HTTP request timeout in seconds (default: `30`).
    pub request_timeout_secs: u64,
    /// Time allowed for live sessions to close after shutdown starts (default: `30`).
    pub shutdown_timeout_secs: u64,
    /// Interval between session keepalive frames in seconds (default: `30`).
    pub keepalive_interval_secs: u64,
    /// Connection pool sizing.
    pub pool: PoolConfig,
    /// Solver, project layout, and run ledger settings.
    pub solver: SolverConfig,
    /// JWT token configuration.
    pub jwt: JwtConfig,
}

/// Where projects live, which solver to run, and how to supervise it.
#[derive(Debug, Clone)]
pub struct SolverConfig {
    /// Root directory holding `<user>/<project>` working directories.
    pub projects_root: PathBuf,
    /// Path of the run ledger file.
    pub ledger_path: PathBuf,
    /// Solver executable spawned for each job.
    pub executable: PathBuf,
    /// Process supervisor backend.
    pub supervisor: SupervisorKind,
    /// Liveness poll interval of the polling backend.
    pub poll_interval_ms: u64,
    /// Regex matching per-run output artifact file names.
    pub artifact_pattern: String,
}

impl SolverConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

impl ServerConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                   | Default                          |
    /// |---------------------------|----------------------------------|
    /// | `HOST`                    | `0.0.0.0`                        |
    /// | `PORT`                    | `3000`                           |
    /// | `CORS_ORIGINS`            | `http://localhost:5173`          |
    /// | `REQUEST_TIMEOUT_SECS`    | `30`                             |
    /// | `SHUTDOWN_TIMEOUT_SECS`   | `30`                             |
    /// | `KEEPALIVE_INTERVAL_SECS` | `30`                             |
    /// | `DB_MIN_CONNECTIONS`      | `4`                              |
    /// | `DB_MAX_CONNECTIONS`      | `20`                             |
    /// | `PROJECTS_ROOT`           | `./users`                        |
    /// | `RUN_LEDGER_PATH`         | `./runlog.dat`                   |
    /// | `SOLVER_EXECUTABLE`       | `./bin/solver`                   |
    /// | `SOLVER_SUPERVISOR`       | `native` (`native` or `polling`) |
    /// | `SOLVER_POLL_INTERVAL_MS` | `1000`                           |
    /// | `RUN_ARTIFACT_PATTERN`    | `^output_r\d+\.(csv|txt|dat)$`   |
    ///
    /// # Panics
    ///
    /// Panics on malformed values, and if `JWT_SECRET` is unset (see
    /// [`JwtConfig::from_env`]).
    pub fn from_env() -> Self {
        let host = std::env::var("HOST").unwrap_or_else(|_| "0.0.0.0".into());

        let port: u16 = std::env::var("PORT")
            .unwrap_or_else(|_| "3000".into())
            .parse()
            .expect("PORT must be a valid u16");

        let cors_origins: Vec<String> = std::env::var("CORS_ORIGINS")
            .unwrap_or_else(|_| "http://localhost:5173".into())
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();

        let request_timeout_secs: u64 = std::env::var("REQUEST_TIMEOUT_SECS")
            .unwrap_or_else(|_| "30".into())
            .parse()
            .expect("REQUEST_TIMEOUT_SECS must be a valid u64");

        let shutdown_timeout_secs: u64 = std::env::var("SHUTDOWN_TIMEOUT_SECS")
            .unwrap_or_else(|_| "30".into())
            .parse()
            .expect("SHUTDOWN_TIMEOUT_SECS must be a valid u64");

        let keepalive_interval_secs: u64 = std::env::var("KEEPALIVE_INTERVAL_SECS")
            .unwrap_or_else(|_| "30".into())
            .parse()
            .expect("KEEPALIVE_INTERVAL_SECS must be a valid u64");
        assert!(
            keepalive_interval_secs > 0,
            "KEEPALIVE_INTERVAL_SECS must be positive"
        );

        let pool = PoolConfig {
            min_connections: std::env::var("DB_MIN_CONNECTIONS")
                .unwrap_or_else(|_| "4".into())
                .parse()
                .expect("DB_MIN_CONNECTIONS must be a valid u32"),
            max_connections: std::env::var("DB_MAX_CONNECTIONS")
                .unwrap_or_else(|_| "20".into())
                .parse()
                .expect("DB_MAX_CONNECTIONS must be a valid u32"),
        };
        assert!(
            pool.min_connections <= pool.max_connections,
            "DB_MIN_CONNECTIONS must not exceed DB_MAX_CONNECTIONS"
        );

        let solver = SolverConfig::from_env();
        let jwt = JwtConfig::from_env();

        Self {
            host,
            port,
            cors_origins,
            request_timeout_secs,
            shutdown_timeout_secs,
            keepalive_interval_secs,
            pool,
            solver,
            jwt,
        }
    }

    pub fn keepalive_interval(&self) -> Duration {
        Duration::from_secs(self.keepalive_interval_secs)
    }
}

impl SolverConfig {
    fn from_env() -> Self {
        let projects_root = std::env::var("PROJECTS_ROOT").unwrap_or_else(|_| "./users".into());
        let ledger_path =
            std::env::var("RUN_LEDGER_PATH").unwrap_or_else(|_| "./runlog.dat".into());
        let executable =
            std::env::var("SOLVER_EXECUTABLE").unwrap_or_else(|_| "./bin/solver".into());

        let supervisor = std::env::var("SOLVER_SUPERVISOR")
            .unwrap_or_else(|_| "native".into())
            .parse()
            .unwrap_or_else(|e| panic!("SOLVER_SUPERVISOR is invalid: {e}"));

        let poll_interval_ms: u64 = std::env::var("SOLVER_POLL_INTERVAL_MS")
            .unwrap_or_else(|_| "1000".into())
            .parse()
            .expect("SOLVER_POLL_INTERVAL_MS must be a valid u64");

        let artifact_pattern = std::env::var("RUN_ARTIFACT_PATTERN")
            .unwrap_or_else(|_| DEFAULT_ARTIFACT_PATTERN.into());

        Self {
            projects_root: projects_root.into(),
            ledger_path: ledger_path.into(),
            executable: executable.into(),
            supervisor,
            poll_interval_ms,
            artifact_pattern,
        }
    }
}
