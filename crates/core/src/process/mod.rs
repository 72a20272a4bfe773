//! Solver process supervision.
//!
//! [`ProcessSupervisor`] spawns the solver with its input stream closed and
//! hands back a [`SpawnedProcess`]: the OS process id, the output stream,
//! and a one-shot receiver resolved exactly once with the exit disposition
//! after the child has been reaped.
//!
//! Two interchangeable backends exist:
//! - [`NativeSupervisor`] awaits the child on the Tokio runtime.
//! - [`PollingSupervisor`] moves the child to a dedicated watcher thread that
//!   polls for exit at a fixed interval, for platforms without asynchronous
//!   child-exit notification.

mod native;
mod polling;
mod signal;

use std::fmt;
use std::os::unix::fs::PermissionsExt;
use std::path::Path;
use std::process::ExitStatus;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::ChildStdout;
use tokio::sync::oneshot;

pub use native::NativeSupervisor;
pub use polling::PollingSupervisor;
pub use signal::{is_alive, probe, terminate};

use crate::error::CoreError;
use crate::types::ProcessId;

/// How a solver process ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitDisposition {
    /// Normal exit with the given code.
    Exited(i32),
    /// Ended by a signal (or the exit status could not be observed).
    Terminated { signal: Option<i32> },
}

impl From<ExitStatus> for ExitDisposition {
    fn from(status: ExitStatus) -> Self {
        use std::os::unix::process::ExitStatusExt;

        match status.code() {
            Some(code) => Self::Exited(code),
            None => Self::Terminated {
                signal: status.signal(),
            },
        }
    }
}

/// A running solver process.
pub struct SpawnedProcess {
    pub pid: ProcessId,
    /// The solver's standard output.
    pub stdout: ChildStdout,
    /// Resolved once the process has exited and been reaped.
    pub exit: oneshot::Receiver<ExitDisposition>,
}

impl fmt::Debug for SpawnedProcess {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SpawnedProcess").field("pid", &self.pid).finish()
    }
}

/// Spawns the solver and reports its exit.
pub trait ProcessSupervisor: Send + Sync {
    /// Spawn `executable` in `working_dir` with stdin closed immediately.
    ///
    /// Must be called from within a Tokio runtime.
    fn spawn(&self, executable: &Path, working_dir: &Path) -> Result<SpawnedProcess, CoreError>;

    /// Backend name for logging.
    fn name(&self) -> &'static str;
}

/// Which [`ProcessSupervisor`] backend to use.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupervisorKind {
    Native,
    Polling,
}

impl FromStr for SupervisorKind {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "native" => Ok(Self::Native),
            "polling" => Ok(Self::Polling),
            other => Err(CoreError::Validation(format!(
                "Unknown supervisor backend '{other}' (expected 'native' or 'polling')"
            ))),
        }
    }
}

/// Build the configured backend.
pub fn build_supervisor(kind: SupervisorKind, poll_interval: Duration) -> Arc<dyn ProcessSupervisor> {
    match kind {
        SupervisorKind::Native => Arc::new(NativeSupervisor),
        SupervisorKind::Polling => Arc::new(PollingSupervisor::new(poll_interval)),
    }
}

/// Verify the solver exists and is executable before anything is spawned.
pub async fn validate_executable(path: &Path) -> Result<(), CoreError> {
    let metadata = tokio::fs::metadata(path).await.map_err(|_| {
        CoreError::Process(format!("Solver executable not found: {}", path.display()))
    })?;

    let mode = metadata.permissions().mode();
    if !metadata.is_file() || mode & 0o111 == 0 {
        return Err(CoreError::Process(format!(
            "Solver executable is blocked: {} is not executable (mode {mode:#o})",
            path.display()
        )));
    }
    Ok(())
}

fn spawn_error(executable: &Path, err: &std::io::Error) -> CoreError {
    CoreError::Process(format!(
        "Failed to start {}: {err}",
        executable.display()
    ))
}

/// Forward the solver's stderr to the log, one line per event.
fn log_stderr<R>(pid: ProcessId, stderr: R)
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut lines = BufReader::new(stderr).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            tracing::warn!(pid, line = %line, "Solver stderr");
        }
    });
}
