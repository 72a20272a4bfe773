//! Supervisor backend using the runtime's asynchronous child-exit notification.

use std::path::Path;
use std::process::Stdio;

use tokio::process::Command;
use tokio::sync::oneshot;

use super::{log_stderr, spawn_error, ExitDisposition, ProcessSupervisor, SpawnedProcess};
use crate::error::CoreError;

/// Awaits each child on a Tokio task.
#[derive(Debug, Clone, Copy, Default)]
pub struct NativeSupervisor;

impl ProcessSupervisor for NativeSupervisor {
    fn spawn(&self, executable: &Path, working_dir: &Path) -> Result<SpawnedProcess, CoreError> {
        let mut child = Command::new(executable)
            .current_dir(working_dir)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| spawn_error(executable, &e))?;

        // The solver terminates on seeing end-of-input instead of blocking on it.
        drop(child.stdin.take());

        let pid = child
            .id()
            .ok_or_else(|| CoreError::Process("Solver exited before reporting a pid".into()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| CoreError::Process("Solver stdout was not captured".into()))?;
        if let Some(stderr) = child.stderr.take() {
            log_stderr(pid, stderr);
        }

        let (tx, rx) = oneshot::channel();
        tokio::spawn(async move {
            let disposition = match child.wait().await {
                Ok(status) => ExitDisposition::from(status),
                Err(e) => {
                    tracing::warn!(pid, error = %e, "Failed to wait for solver");
                    ExitDisposition::Terminated { signal: None }
                }
            };
            tracing::debug!(pid, ?disposition, "Solver reaped");
            let _ = tx.send(disposition);
        });

        Ok(SpawnedProcess {
            pid,
            stdout,
            exit: rx,
        })
    }

    fn name(&self) -> &'static str {
        "native"
    }
}
