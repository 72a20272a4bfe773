//! Job Supervisor: runs the solver for one session, streams its output, and
//! reconciles its exit against the run ledger.
//!
//! At most one job runs per (user, project). A start gate is held from the
//! ledger check until the new `Running` row is appended, so two concurrent
//! starts cannot both pass the check; the ledger refuses a second running row
//! as well. The clumping project is exempt from both and is never logged.
//!
//! A `Running` row whose process is gone and that no supervisor here is
//! watching (its server exited mid-run) is an orphan. Orphans are marked
//! `Killed` at startup, when they block a start, and when a stop finds them.

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use solvergate_core::error::CoreError;
use solvergate_core::layout::ProjectLayout;
use solvergate_core::ledger::{
    JobRecord, RecordUpdate, RunCount, RunLedger, RunStatus, UpdateOutcome,
};
use solvergate_core::process::{
    is_alive, probe, terminate, validate_executable, ExitDisposition, ProcessSupervisor, SpawnedProcess,
};
use solvergate_core::protocol::{
    stopped_by, FrameStatus, TaggedId, MSG_RUN_COMPLETED, MSG_STOPPED_BY_OS,
};
use solvergate_core::types::{ProcessId, CLUMPING_PROJECT};
use tokio::io::AsyncReadExt;

use crate::ws::{Frame, Session};

/// Size of each output chunk forwarded to the session.
const OUTPUT_CHUNK_SIZE: usize = 4096;

/// How long to keep reading output after the solver has exited. Bounds the
/// wait when a descendant of the solver still holds the pipe open.
const DRAIN_GRACE: Duration = Duration::from_millis(500);

/// One solver job to run.
#[derive(Debug, Clone)]
pub struct JobRequest {
    pub user: String,
    pub project: String,
    pub working_dir: PathBuf,
    pub required_runs: u32,
}

impl JobRequest {
    fn is_logged(&self) -> bool {
        self.project != CLUMPING_PROJECT
    }
}

/// How a job ended, as reported to its session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobOutcome {
    pub pid: ProcessId,
    pub status: RunStatus,
    pub runs: RunCount,
    pub info: String,
}

/// Serializes job starts per (user, project).
#[derive(Default)]
struct StartGate {
    starting: Mutex<HashSet<(String, String)>>,
}

struct GatePass<'a> {
    gate: &'a StartGate,
    key: (String, String),
}

impl StartGate {
    fn enter(&self, user: &str, project: &str) -> Result<GatePass<'_>, CoreError> {
        let key = (user.to_string(), project.to_string());
        let mut starting = self.starting.lock().unwrap_or_else(PoisonError::into_inner);
        if !starting.insert(key.clone()) {
            return Err(CoreError::Conflict(format!(
                "A job is already starting for project '{project}'"
            )));
        }
        Ok(GatePass { gate: self, key })
    }
}

impl Drop for GatePass<'_> {
    fn drop(&mut self) {
        self.gate
            .starting
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.key);
    }
}

/// Spawns and supervises solver jobs.
pub struct JobSupervisor {
    backend: Arc<dyn ProcessSupervisor>,
    ledger: Arc<RunLedger>,
    layout: Arc<dyn ProjectLayout>,
    executable: PathBuf,
    gate: StartGate,
    /// Jobs started by this supervisor and not yet reconciled, with whether a
    /// stop was requested. The only stop record for unlogged clumping runs.
    active: Mutex<HashMap<ProcessId, bool>>,
}

impl JobSupervisor {
    pub fn new(
        backend: Arc<dyn ProcessSupervisor>,
        ledger: Arc<RunLedger>,
        layout: Arc<dyn ProjectLayout>,
        executable: impl Into<PathBuf>,
    ) -> Self {
        Self {
            backend,
            ledger,
            layout,
            executable: executable.into(),
            gate: StartGate::default(),
            active: Mutex::new(HashMap::new()),
        }
    }

    fn active(&self) -> MutexGuard<'_, HashMap<ProcessId, bool>> {
        self.active.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Start the job, stream its output to `session`, and close `session`
    /// with the reconciled outcome once the solver exits.
    pub async fn run(&self, session: &Session, request: &JobRequest) -> Result<JobOutcome, CoreError> {
        let process = self.start(session, request).await?;
        let pid = process.pid;

        session.begin_streaming();
        let disposition = self.stream_output(session, process).await;
        tracing::info!(pid, ?disposition, "Solver exited");

        Ok(self.reconcile(session, request, pid).await)
    }

    /// Spawn the solver for `request` and publish its tagged id to `session`.
    ///
    /// Fails with `Conflict` when a job is already running for the project,
    /// before anything on disk is touched, and with `Process` when the
    /// executable is missing or blocked, before any ledger row is written.
    pub async fn start(
        &self,
        session: &Session,
        request: &JobRequest,
    ) -> Result<SpawnedProcess, CoreError> {
        let _pass = if request.is_logged() {
            Some(self.gate.enter(&request.user, &request.project)?)
        } else {
            None
        };

        if request.is_logged() {
            let running = self
                .ledger
                .find_running(&request.user, &request.project)
                .await?;
            if let Some(existing) = running {
                if !self.reap_if_orphaned(&existing).await? {
                    return Err(CoreError::Conflict(format!(
                        "A job is already running for project '{}' ({})",
                        request.project,
                        TaggedId::Job(existing.pid),
                    )));
                }
            }
        }

        self.spawn_job(session, request).await
    }

    /// Spawn the solver and record it. The caller holds the start gate.
    async fn spawn_job(
        &self,
        session: &Session,
        request: &JobRequest,
    ) -> Result<SpawnedProcess, CoreError> {
        validate_executable(&self.executable).await?;
        self.layout.clear_outputs(&request.working_dir).await?;

        let process = self.backend.spawn(&self.executable, &request.working_dir)?;
        let pid = process.pid;
        tracing::info!(
            pid,
            user = %request.user,
            project = %request.project,
            required_runs = request.required_runs,
            backend = self.backend.name(),
            "Solver spawned",
        );

        let record = JobRecord::running(pid, &request.user, &request.project, request.required_runs);
        if let Err(e) = self.ledger.append(record).await {
            tracing::error!(pid, error = %e, "Failed to record solver run, terminating it");
            let _ = terminate(pid);
            return Err(e);
        }

        self.active().insert(pid, false);
        session.attach(TaggedId::Job(pid));
        Ok(process)
    }

    /// Forward solver output to `session` until the solver exits.
    async fn stream_output(&self, session: &Session, process: SpawnedProcess) -> ExitDisposition {
        let SpawnedProcess {
            pid,
            mut stdout,
            mut exit,
        } = process;
        let mut buf = vec![0u8; OUTPUT_CHUNK_SIZE];
        let mut eof = false;

        let disposition = loop {
            tokio::select! {
                biased;
                read = stdout.read(&mut buf), if !eof => match read {
                    Ok(0) => eof = true,
                    Ok(n) => forward(session, &buf[..n]),
                    Err(e) => {
                        tracing::warn!(pid, error = %e, "Failed to read solver output");
                        eof = true;
                    }
                },
                result = &mut exit => {
                    break result.unwrap_or(ExitDisposition::Terminated { signal: None });
                }
            }
        };

        while !eof {
            match tokio::time::timeout(DRAIN_GRACE, stdout.read(&mut buf)).await {
                Ok(Ok(n)) if n > 0 => forward(session, &buf[..n]),
                _ => eof = true,
            }
        }
        disposition
    }

    /// Resolve the final status of an exited job and close its session.
    ///
    /// All runs done means Completed. Otherwise the exit is either an earlier
    /// stop command (Stopped) or the operating system (Killed). A logged job
    /// reports whatever its ledger row ends up holding: the compare-and-set
    /// keeps a stop that landed first, even after the last run finished.
    async fn reconcile(&self, session: &Session, request: &JobRequest, pid: ProcessId) -> JobOutcome {
        let stop_requested = self.active().get(&pid).copied().unwrap_or(false);
        let completed = self.layout.count_artifacts(&request.working_dir).await;
        let runs = RunCount::new(
            u32::try_from(completed).unwrap_or(u32::MAX),
            request.required_runs,
        );

        let exit_status = if runs.is_complete() {
            RunStatus::Completed
        } else {
            RunStatus::Killed
        };
        let status = if request.is_logged() {
            // A stop recorded before the exit wins, even when every run finished.
            match self.record_exit(pid, exit_status, runs).await {
                Some(UpdateOutcome::Unchanged(row)) => row.status,
                _ => exit_status,
            }
        } else if stop_requested {
            RunStatus::Stopped
        } else {
            exit_status
        };
        self.active().remove(&pid);

        let info = match status {
            RunStatus::Completed => MSG_RUN_COMPLETED.to_string(),
            RunStatus::Stopped => {
                stopped_by(&session.user_name().unwrap_or_else(|| request.user.clone()))
            }
            RunStatus::Running | RunStatus::Killed => MSG_STOPPED_BY_OS.to_string(),
        };

        tracing::info!(pid, status = %status, runs = %runs, "Solver run reconciled");
        session.detach();
        session.close(
            Some(Frame::finished(info.clone()).with("runs", runs.to_string())),
            true,
        );

        JobOutcome {
            pid,
            status,
            runs,
            info,
        }
    }

    /// Write the exit status. A missing row is reported, not fatal.
    async fn record_exit(
        &self,
        pid: ProcessId,
        status: RunStatus,
        runs: RunCount,
    ) -> Option<UpdateOutcome> {
        let update = RecordUpdate::status(status).with_runs_completed(runs.completed);
        match self.ledger.update(pid, update).await {
            Ok(outcome) => Some(outcome),
            Err(e) => {
                tracing::warn!(pid, error = %e, "Could not record solver exit");
                None
            }
        }
    }

    /// Stop a running job: mark its row Stopped, then kill the process.
    ///
    /// Fails with `Cancellation` when the process no longer exists, cannot be
    /// signalled, or has already finished.
    pub async fn stop(&self, pid: ProcessId) -> Result<(), CoreError> {
        if let Err(e) = probe(pid) {
            if let Some(row) = self.ledger.find_by_process_id(pid).await? {
                if row.status == RunStatus::Running {
                    if let Err(reap) = self.reap_if_orphaned(&row).await {
                        tracing::warn!(pid, error = %reap, "Could not reap orphaned solver run");
                    }
                }
            }
            return Err(e);
        }

        let tracked = match self.active().get_mut(&pid) {
            Some(stop_requested) => {
                *stop_requested = true;
                true
            }
            None => false,
        };

        match self.ledger.update(pid, RecordUpdate::status(RunStatus::Stopped)).await {
            Ok(UpdateOutcome::Applied(row)) => {
                tracing::info!(pid, runs = %row.runs, "Solver run marked stopped");
            }
            Ok(UpdateOutcome::Unchanged(row)) => {
                return Err(CoreError::Cancellation(format!(
                    "Process {pid} has already finished ({})",
                    row.status
                )));
            }
            // Clumping runs have no ledger row.
            Err(CoreError::LedgerInconsistency(_)) if tracked => {}
            Err(e) => return Err(e),
        }

        terminate(pid)
    }

    /// Mark every orphaned `Running` row `Killed`. Returns how many were.
    pub async fn reap_orphans(&self) -> Result<usize, CoreError> {
        let mut reaped = 0;
        for row in self.ledger.list_running().await? {
            if self.reap_if_orphaned(&row).await? {
                reaped += 1;
            }
        }
        Ok(reaped)
    }

    /// Mark `row` `Killed` when no job here supervises it and its process is
    /// gone. Returns whether the row is no longer running.
    async fn reap_if_orphaned(&self, row: &JobRecord) -> Result<bool, CoreError> {
        if self.active().contains_key(&row.pid) || is_alive(row.pid) {
            return Ok(false);
        }
        let outcome = self
            .ledger
            .update(row.pid, RecordUpdate::status(RunStatus::Killed))
            .await?;
        tracing::warn!(
            pid = row.pid,
            user = %row.user,
            project = %row.project,
            status = %outcome.record().status,
            "Orphaned solver run reaped",
        );
        Ok(true)
    }
}

fn forward(session: &Session, chunk: &[u8]) {
    session.send(Frame::new(FrameStatus::RunningJob).info(String::from_utf8_lossy(chunk)));
}
