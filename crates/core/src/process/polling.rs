//! Supervisor backend that polls for child exit from a dedicated thread.
//!
//! The watcher thread owns the child, checks it with `try_wait` every
//! `interval`, and bridges the result back into the runtime through a
//! one-shot channel. Output is still read asynchronously on the runtime.

use std::path::Path;
use std::process::{Command, Stdio};
use std::time::Duration;

use tokio::process::{ChildStderr, ChildStdout};
use tokio::sync::oneshot;

use super::{log_stderr, spawn_error, ExitDisposition, ProcessSupervisor, SpawnedProcess};
use crate::error::CoreError;

/// Default liveness poll interval.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Polls each child for exit on its own watcher thread.
#[derive(Debug, Clone, Copy)]
pub struct PollingSupervisor {
    interval: Duration,
}

impl PollingSupervisor {
    pub fn new(interval: Duration) -> Self {
        Self { interval }
    }
}

impl Default for PollingSupervisor {
    fn default() -> Self {
        Self::new(DEFAULT_POLL_INTERVAL)
    }
}

impl ProcessSupervisor for PollingSupervisor {
    fn spawn(&self, executable: &Path, working_dir: &Path) -> Result<SpawnedProcess, CoreError> {
        let mut child = Command::new(executable)
            .current_dir(working_dir)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| spawn_error(executable, &e))?;

        drop(child.stdin.take());
        let pid = child.id();

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| CoreError::Process("Solver stdout was not captured".into()))
            .and_then(|s| {
                ChildStdout::from_std(s).map_err(|e| {
                    CoreError::Process(format!("Failed to register solver stdout: {e}"))
                })
            });
        let stdout = match stdout {
            Ok(stdout) => stdout,
            Err(e) => {
                let _ = child.kill();
                let _ = child.wait();
                return Err(e);
            }
        };
        if let Some(stderr) = child.stderr.take().and_then(|s| ChildStderr::from_std(s).ok()) {
            log_stderr(pid, stderr);
        }

        let (tx, rx) = oneshot::channel();
        let interval = self.interval;
        std::thread::Builder::new()
            .name(format!("solver-watch-{pid}"))
            .spawn(move || {
                let disposition = loop {
                    match child.try_wait() {
                        Ok(Some(status)) => break ExitDisposition::from(status),
                        Ok(None) => std::thread::sleep(interval),
                        Err(e) => {
                            tracing::warn!(pid, error = %e, "Failed to poll solver");
                            break ExitDisposition::Terminated { signal: None };
                        }
                    }
                };
                tracing::debug!(pid, ?disposition, "Solver reaped by watcher thread");
                let _ = tx.send(disposition);
            })
            .map_err(|e| CoreError::Process(format!("Failed to start watcher thread: {e}")))?;

        Ok(SpawnedProcess {
            pid,
            stdout,
            exit: rx,
        })
    }

    fn name(&self) -> &'static str {
        "polling"
    }
}
