//! Run Ledger: the durable record of solver job attempts.
//!
//! One tab-separated row per process identifier with eight fields (pid,
//! user, project, start time, end time, runtime, `completed/required` runs,
//! status). The file is rewritten wholesale on every mutation through a
//! temporary file and an atomic rename, and all read-modify-write cycles are
//! serialized by an in-process lock.
//!
//! Status writes are compare-and-set: a row may only leave `Running`, so a
//! terminal status is written exactly once and `Stopped` can never be
//! overwritten by `Killed`.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;

use chrono::{NaiveDateTime, Utc};
use serde::Serialize;
use tokio::sync::Mutex;

use crate::error::CoreError;
use crate::layout::ProjectLayout;
use crate::types::{ProcessId, Timestamp, CLUMPING_PROJECT};

/// First line of the ledger file.
const HEADER: &str = "PID\tUSER\tPROJECT\tSTARTTIME\tENDTIME\tRUNTIME\tRUNS\tSTATUS";

/// Number of tab-separated fields per row.
const FIELD_COUNT: usize = 8;

/// Timestamp format used in the ledger file.
const TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

// ---------------------------------------------------------------------------
// Row types
// ---------------------------------------------------------------------------

/// Status of a job attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum RunStatus {
    Running,
    Completed,
    Stopped,
    Killed,
}

impl RunStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, Self::Running)
    }

    /// Only a running row may change status, and only to a terminal one.
    pub fn can_become(self, next: RunStatus) -> bool {
        self == Self::Running && next.is_terminal()
    }

    fn as_str(self) -> &'static str {
        match self {
            Self::Running => "Running",
            Self::Completed => "Completed",
            Self::Stopped => "Stopped",
            Self::Killed => "Killed",
        }
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RunStatus {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Running" => Ok(Self::Running),
            "Completed" => Ok(Self::Completed),
            "Stopped" => Ok(Self::Stopped),
            "Killed" => Ok(Self::Killed),
            other => Err(CoreError::LedgerInconsistency(format!(
                "Unknown run status '{other}'"
            ))),
        }
    }
}

/// Completed and required run counts, written as `"2/10"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunCount {
    pub completed: u32,
    pub required: u32,
}

impl RunCount {
    pub fn new(completed: u32, required: u32) -> Self {
        Self {
            completed,
            required,
        }
    }

    pub fn is_complete(self) -> bool {
        self.completed == self.required
    }
}

impl fmt::Display for RunCount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.completed, self.required)
    }
}

impl FromStr for RunCount {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || CoreError::LedgerInconsistency(format!("Invalid run count '{s}'"));
        let (completed, required) = s.split_once('/').ok_or_else(invalid)?;
        Ok(Self {
            completed: completed.parse().map_err(|_| invalid())?,
            required: required.parse().map_err(|_| invalid())?,
        })
    }
}

impl Serialize for RunCount {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// One row of the Run Ledger.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JobRecord {
    pub pid: ProcessId,
    pub user: String,
    pub project: String,
    pub start_time: Timestamp,
    pub end_time: Option<Timestamp>,
    pub runtime_secs: Option<i64>,
    pub runs: RunCount,
    pub status: RunStatus,
}

impl JobRecord {
    /// A freshly spawned job: no runs completed yet, status `Running`.
    pub fn running(pid: ProcessId, user: &str, project: &str, required_runs: u32) -> Self {
        Self {
            pid,
            user: user.to_string(),
            project: project.to_string(),
            start_time: Utc::now(),
            end_time: None,
            runtime_secs: None,
            runs: RunCount::new(0, required_runs),
            status: RunStatus::Running,
        }
    }

    fn to_line(&self) -> String {
        let end_time = self
            .end_time
            .map(|t| t.format(TIME_FORMAT).to_string())
            .unwrap_or_default();
        let runtime = self
            .runtime_secs
            .map(|s| format!("{s}s"))
            .unwrap_or_default();
        format!(
            "{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}",
            self.pid,
            self.user,
            self.project,
            self.start_time.format(TIME_FORMAT),
            end_time,
            runtime,
            self.runs,
            self.status,
        )
    }

    fn from_line(line: &str) -> Result<Self, CoreError> {
        let fields: Vec<&str> = line.split('\t').collect();
        if fields.len() != FIELD_COUNT {
            return Err(CoreError::LedgerInconsistency(format!(
                "Expected {FIELD_COUNT} fields, found {}",
                fields.len()
            )));
        }

        let pid = fields[0].parse().map_err(|_| {
            CoreError::LedgerInconsistency(format!("Invalid process id '{}'", fields[0]))
        })?;
        let runtime_secs = match fields[5] {
            "" => None,
            s => Some(
                s.trim_end_matches('s')
                    .parse()
                    .map_err(|_| CoreError::LedgerInconsistency(format!("Invalid runtime '{s}'")))?,
            ),
        };

        Ok(Self {
            pid,
            user: fields[1].to_string(),
            project: fields[2].to_string(),
            start_time: parse_time(fields[3])?,
            end_time: match fields[4] {
                "" => None,
                s => Some(parse_time(s)?),
            },
            runtime_secs,
            runs: fields[6].parse()?,
            status: fields[7].parse()?,
        })
    }
}

fn parse_time(s: &str) -> Result<Timestamp, CoreError> {
    NaiveDateTime::parse_from_str(s, TIME_FORMAT)
        .map(|t| t.and_utc())
        .map_err(|_| CoreError::LedgerInconsistency(format!("Invalid timestamp '{s}'")))
}

/// Fields changed by [`RunLedger::update`].
#[derive(Debug, Clone, Copy, Default)]
pub struct RecordUpdate {
    /// New status. Refused unless the row is currently `Running`.
    pub status: Option<RunStatus>,
    /// Completed run count. When absent, a running row is re-counted from its artifacts.
    pub runs_completed: Option<u32>,
}

impl RecordUpdate {
    pub fn status(status: RunStatus) -> Self {
        Self {
            status: Some(status),
            runs_completed: None,
        }
    }

    pub fn with_runs_completed(mut self, completed: u32) -> Self {
        self.runs_completed = Some(completed);
        self
    }
}

/// Result of [`RunLedger::update`].
#[derive(Debug, Clone, PartialEq)]
pub enum UpdateOutcome {
    /// The update was written; carries the new row.
    Applied(JobRecord),
    /// The row already held a terminal status; carries the row as stored.
    Unchanged(JobRecord),
}

impl UpdateOutcome {
    pub fn record(&self) -> &JobRecord {
        match self {
            Self::Applied(r) | Self::Unchanged(r) => r,
        }
    }
}

// ---------------------------------------------------------------------------
// Ledger
// ---------------------------------------------------------------------------

/// File-backed Run Ledger shared by every session of the process.
pub struct RunLedger {
    path: PathBuf,
    layout: Arc<dyn ProjectLayout>,
    lock: Mutex<()>,
}

impl RunLedger {
    /// Open the ledger at `path`, creating it with only a header if missing.
    pub async fn open(
        path: impl Into<PathBuf>,
        layout: Arc<dyn ProjectLayout>,
    ) -> Result<Self, CoreError> {
        let ledger = Self {
            path: path.into(),
            layout,
            lock: Mutex::new(()),
        };

        if tokio::fs::metadata(&ledger.path).await.is_err() {
            ledger.write_rows(&[]).await?;
            tracing::info!(path = %ledger.path.display(), "Created run ledger");
        }
        Ok(ledger)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append a new row.
    ///
    /// Refuses a duplicate process id and a second `Running` row for the same
    /// user and project. Rows for the clumping project are never logged.
    pub async fn append(&self, record: JobRecord) -> Result<(), CoreError> {
        if record.project == CLUMPING_PROJECT {
            tracing::debug!(pid = record.pid, "Clumping run not logged");
            return Ok(());
        }

        let _guard = self.lock.lock().await;
        let mut rows = self.read_rows().await?;

        if rows.iter().any(|r| r.pid == record.pid) {
            return Err(CoreError::LedgerInconsistency(format!(
                "Process {} is already in the run ledger",
                record.pid
            )));
        }
        if record.status == RunStatus::Running
            && rows.iter().any(|r| {
                r.status == RunStatus::Running && r.user == record.user && r.project == record.project
            })
        {
            return Err(CoreError::Conflict(format!(
                "A job is already running for project '{}'",
                record.project
            )));
        }

        tracing::info!(
            pid = record.pid,
            user = %record.user,
            project = %record.project,
            runs = %record.runs,
            "Run ledger row appended",
        );
        rows.push(record);
        self.write_rows(&rows).await
    }

    /// Look up a row by process id, with a live run count if it is still running.
    pub async fn find_by_process_id(&self, pid: ProcessId) -> Result<Option<JobRecord>, CoreError> {
        let row = self.read_rows().await?.into_iter().find(|r| r.pid == pid);
        match row {
            Some(mut row) => {
                self.heal(&mut row).await;
                Ok(Some(row))
            }
            None => Ok(None),
        }
    }

    /// The running row for `user` and `project`, if any.
    pub async fn find_running(
        &self,
        user: &str,
        project: &str,
    ) -> Result<Option<JobRecord>, CoreError> {
        Ok(self
            .list_running()
            .await?
            .into_iter()
            .find(|r| r.user == user && r.project == project))
    }

    /// Update a row by process id.
    ///
    /// Fails with `LedgerInconsistency` when no row matches (for example the
    /// ledger was cleared while the job ran). A status change on a row that is
    /// no longer `Running` is refused and reported as [`UpdateOutcome::Unchanged`].
    pub async fn update(
        &self,
        pid: ProcessId,
        update: RecordUpdate,
    ) -> Result<UpdateOutcome, CoreError> {
        let _guard = self.lock.lock().await;
        let mut rows = self.read_rows().await?;

        let row = rows.iter_mut().find(|r| r.pid == pid).ok_or_else(|| {
            CoreError::LedgerInconsistency(format!("Process {pid} is not in the run ledger"))
        })?;

        if row.status.is_terminal() {
            tracing::debug!(
                pid,
                current = %row.status,
                requested = ?update.status,
                "Run ledger row already terminal, update skipped",
            );
            return Ok(UpdateOutcome::Unchanged(row.clone()));
        }

        match update.runs_completed {
            Some(completed) => row.runs.completed = completed,
            None => self.heal(row).await,
        }

        if let Some(next) = update.status {
            if row.status.can_become(next) {
                let now = Utc::now();
                row.status = next;
                row.end_time = Some(now);
                row.runtime_secs = Some((now - row.start_time).num_seconds());
            }
        }

        let updated = row.clone();
        self.write_rows(&rows).await?;

        tracing::info!(
            pid,
            status = %updated.status,
            runs = %updated.runs,
            "Run ledger row updated",
        );
        Ok(UpdateOutcome::Applied(updated))
    }

    /// All rows, oldest first, with live counts for running rows.
    pub async fn list(&self) -> Result<Vec<JobRecord>, CoreError> {
        let mut rows = self.read_rows().await?;
        for row in &mut rows {
            self.heal(row).await;
        }
        Ok(rows)
    }

    /// Running rows only.
    pub async fn list_running(&self) -> Result<Vec<JobRecord>, CoreError> {
        Ok(self
            .list()
            .await?
            .into_iter()
            .filter(|r| r.status == RunStatus::Running)
            .collect())
    }

    /// Remove every row, preserving only the header line.
    pub async fn clear(&self) -> Result<(), CoreError> {
        let _guard = self.lock.lock().await;
        self.write_rows(&[]).await?;
        tracing::info!(path = %self.path.display(), "Run ledger cleared");
        Ok(())
    }

    // ---- private helpers ----

    /// Recompute the completed count of a running row from its artifacts.
    async fn heal(&self, row: &mut JobRecord) {
        if row.status != RunStatus::Running {
            return;
        }
        if let Ok(dir) = self
            .layout
            .resolve_working_directory(&row.user, &row.project)
            .await
        {
            let count = self.layout.count_artifacts(&dir).await;
            row.runs.completed = u32::try_from(count).unwrap_or(u32::MAX);
        }
    }

    async fn read_rows(&self) -> Result<Vec<JobRecord>, CoreError> {
        let contents = match tokio::fs::read_to_string(&self.path).await {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(CoreError::Internal(format!(
                    "Failed to read run ledger {}: {e}",
                    self.path.display()
                )))
            }
        };

        contents
            .lines()
            .enumerate()
            .filter(|(_, line)| !line.trim().is_empty() && *line != HEADER)
            .map(|(n, line)| {
                JobRecord::from_line(line).map_err(|e| {
                    CoreError::LedgerInconsistency(format!("Line {}: {}", n + 1, e.message()))
                })
            })
            .collect()
    }

    async fn write_rows(&self, rows: &[JobRecord]) -> Result<(), CoreError> {
        let mut contents = String::from(HEADER);
        contents.push('\n');
        for row in rows {
            contents.push_str(&row.to_line());
            contents.push('\n');
        }

        let file_name = self
            .path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "runlog".to_string());
        let tmp = self.path.with_file_name(format!(".{file_name}.tmp"));

        let io_err =
            |e: std::io::Error| CoreError::Internal(format!("Failed to write run ledger: {e}"));
        tokio::fs::write(&tmp, contents).await.map_err(io_err)?;
        tokio::fs::rename(&tmp, &self.path).await.map_err(io_err)?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
