/// All timestamps are UTC.
pub type Timestamp = chrono::DateTime<chrono::Utc>;

/// Operating-system process identifier of a spawned solver.
pub type ProcessId = u32;

/// Postgres backend process identifier (`pg_backend_pid()`).
pub type BackendId = i32;

/// System project used for ephemeral batch clustering runs.
///
/// Runs in this project are never written to the Run Ledger and are exempt
/// from the one-running-job-per-project rule.
pub const CLUMPING_PROJECT: &str = "_clumping";
