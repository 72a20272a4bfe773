//! Integration tests for `JobSupervisor`.
//!
//! These run real `/bin/sh` solvers against a temp project directory and a
//! file-backed run ledger. No database is needed.

mod common;

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use assert_matches::assert_matches;
use common::{
    create_project, drain_frames, next_frame, wait_until, write_script, COMPLETING_SOLVER,
    CRASHING_SOLVER, LINGERING_SOLVER, PROJECT, REQUIRED_RUNS, STALLING_SOLVER,
};
use solvergate_api::engine::{JobRequest, JobSupervisor};
use solvergate_api::ws::WsManager;
use solvergate_core::error::CoreError;
use solvergate_core::layout::{FsProjectLayout, ProjectLayout};
use solvergate_core::ledger::{JobRecord, RunCount, RunLedger, RunStatus};
use solvergate_core::process::{build_supervisor, terminate, SupervisorKind};
use solvergate_core::protocol::{TaggedId, MSG_RUN_COMPLETED, MSG_STOPPED_BY_OS};
use solvergate_core::types::CLUMPING_PROJECT;
use tempfile::TempDir;

struct Fixture {
    _dir: TempDir,
    layout: Arc<dyn ProjectLayout>,
    ledger: Arc<RunLedger>,
    supervisor: Arc<JobSupervisor>,
    manager: WsManager,
    request: JobRequest,
}

async fn fixture(solver: &str, kind: SupervisorKind) -> Fixture {
    let dir = tempfile::tempdir().unwrap();
    let users = dir.path().join("users");
    let working_dir = create_project(&users, "alice", PROJECT, REQUIRED_RUNS);
    let executable = write_script(&dir.path().join("bin"), "solver", solver);

    let layout: Arc<dyn ProjectLayout> = Arc::new(FsProjectLayout::with_default_pattern(&users));
    let ledger = Arc::new(
        RunLedger::open(dir.path().join("runlog.dat"), Arc::clone(&layout))
            .await
            .unwrap(),
    );
    let supervisor = Arc::new(JobSupervisor::new(
        build_supervisor(kind, Duration::from_millis(50)),
        Arc::clone(&ledger),
        Arc::clone(&layout),
        executable,
    ));

    Fixture {
        _dir: dir,
        layout,
        ledger,
        supervisor,
        manager: WsManager::new(Duration::from_secs(30)),
        request: JobRequest {
            user: "alice".to_string(),
            project: PROJECT.to_string(),
            working_dir,
            required_runs: REQUIRED_RUNS,
        },
    }
}

fn clumping_request(f: &Fixture) -> JobRequest {
    let users = f.request.working_dir.parent().and_then(Path::parent).unwrap();
    JobRequest {
        project: CLUMPING_PROJECT.to_string(),
        working_dir: create_project(users, "alice", CLUMPING_PROJECT, REQUIRED_RUNS),
        ..f.request.clone()
    }
}

fn published_pid(frame: &serde_json::Value) -> u32 {
    assert_eq!(frame["status"], "pid");
    let tagged: TaggedId = frame["pid"].as_str().unwrap().parse().unwrap();
    assert_matches!(tagged, TaggedId::Job(pid) => pid)
}

// ---------------------------------------------------------------------------
// Test: a solver that finishes every run is recorded Completed
// ---------------------------------------------------------------------------

#[tokio::test]
async fn completed_run_is_recorded() {
    let f = fixture(COMPLETING_SOLVER, SupervisorKind::Native).await;
    let (session, mut rx) = f.manager.open_session("conn-1".into()).await;

    let outcome = f.supervisor.run(&session, &f.request).await.unwrap();

    assert_eq!(outcome.status, RunStatus::Completed);
    assert_eq!(outcome.runs, RunCount::new(3, 3));
    assert_eq!(outcome.info, MSG_RUN_COMPLETED);

    let row = f.ledger.find_by_process_id(outcome.pid).await.unwrap().unwrap();
    assert_eq!(row.status, RunStatus::Completed);
    assert_eq!(row.runs, RunCount::new(3, 3));
    assert!(row.end_time.is_some());
    assert!(row.runtime_secs.is_some());

    let frames = drain_frames(&mut rx);
    assert_eq!(published_pid(&frames[0]), outcome.pid);

    let output: String = frames
        .iter()
        .filter(|f| f["status"] == "RunningJob")
        .filter_map(|f| f["info"].as_str())
        .collect();
    assert!(output.contains("run 3 done"), "solver output was {output:?}");

    let last = frames.last().unwrap();
    assert_eq!(last["status"], "Finished");
    assert_eq!(last["info"], MSG_RUN_COMPLETED);
    assert_eq!(last["runs"], "3/3");
    assert_eq!(last["pid"], format!("m{}", outcome.pid));
}

// ---------------------------------------------------------------------------
// Test: a start clears the previous run's outputs
// ---------------------------------------------------------------------------

#[tokio::test]
async fn start_clears_previous_outputs() {
    let f = fixture(STALLING_SOLVER, SupervisorKind::Native).await;
    let output = f.request.working_dir.join("output");
    for i in 1..=3 {
        std::fs::write(output.join(format!("output_r0000{i}.csv")), "stale").unwrap();
    }
    let (session, _rx) = f.manager.open_session("conn-1".into()).await;

    let process = f.supervisor.start(&session, &f.request).await.unwrap();
    let row = f.ledger.find_by_process_id(process.pid).await.unwrap().unwrap();
    assert_eq!(row.status, RunStatus::Running);
    assert!(row.runs.completed <= 1, "stale artifacts must be gone, got {}", row.runs);

    terminate(process.pid).unwrap();
}

// ---------------------------------------------------------------------------
// Test: stopping a job records Stopped, never Killed
// ---------------------------------------------------------------------------

#[tokio::test]
async fn stopped_run_is_recorded_as_stopped() {
    let f = fixture(STALLING_SOLVER, SupervisorKind::Native).await;
    let (session, mut rx) = f.manager.open_session("conn-1".into()).await;

    let supervisor = Arc::clone(&f.supervisor);
    let request = f.request.clone();
    let job_session = Arc::clone(&session);
    let job = tokio::spawn(async move { supervisor.run(&job_session, &request).await });

    let pid = published_pid(&next_frame(&mut rx).await);
    let artifact = f.request.working_dir.join("output/output_r00001.csv");
    wait_until(|| artifact.exists()).await;

    f.supervisor.stop(pid).await.unwrap();
    let outcome = job.await.unwrap().unwrap();

    assert_eq!(outcome.pid, pid);
    assert_eq!(outcome.status, RunStatus::Stopped);
    assert_eq!(outcome.runs, RunCount::new(1, 3));
    assert_eq!(outcome.info, "Stopped by alice");

    let row = f.ledger.find_by_process_id(pid).await.unwrap().unwrap();
    assert_eq!(row.status, RunStatus::Stopped);
    assert_eq!(row.runs, RunCount::new(1, 3));

    let last = drain_frames(&mut rx).pop().unwrap();
    assert_eq!(last["status"], "Finished");
    assert_eq!(last["info"], "Stopped by alice");
}

// ---------------------------------------------------------------------------
// Test: a stop after the last run still reports what the ledger holds
// ---------------------------------------------------------------------------

#[tokio::test]
async fn stop_after_last_run_matches_ledger() {
    let f = fixture(LINGERING_SOLVER, SupervisorKind::Native).await;
    let (session, mut rx) = f.manager.open_session("conn-1".into()).await;

    let supervisor = Arc::clone(&f.supervisor);
    let request = f.request.clone();
    let job_session = Arc::clone(&session);
    let job = tokio::spawn(async move { supervisor.run(&job_session, &request).await });

    let pid = published_pid(&next_frame(&mut rx).await);
    let last_artifact = f.request.working_dir.join("output/output_r00003.csv");
    wait_until(|| last_artifact.exists()).await;

    f.supervisor.stop(pid).await.unwrap();
    let outcome = job.await.unwrap().unwrap();

    let row = f.ledger.find_by_process_id(pid).await.unwrap().unwrap();
    assert_eq!(row.status, RunStatus::Stopped);
    assert_eq!(outcome.status, row.status);
    assert_eq!(outcome.runs, RunCount::new(3, 3));
    assert_eq!(outcome.info, "Stopped by alice");

    let last = drain_frames(&mut rx).pop().unwrap();
    assert_eq!(last["status"], "Finished");
    assert_eq!(last["info"], "Stopped by alice");
}

// ---------------------------------------------------------------------------
// Test: a solver dying on its own is recorded Killed
// ---------------------------------------------------------------------------

#[tokio::test]
async fn crashed_run_is_recorded_as_killed() {
    let f = fixture(CRASHING_SOLVER, SupervisorKind::Native).await;
    let (session, _rx) = f.manager.open_session("conn-1".into()).await;

    let outcome = f.supervisor.run(&session, &f.request).await.unwrap();

    assert_eq!(outcome.status, RunStatus::Killed);
    assert_eq!(outcome.runs, RunCount::new(1, 3));
    assert_eq!(outcome.info, MSG_STOPPED_BY_OS);

    let row = f.ledger.find_by_process_id(outcome.pid).await.unwrap().unwrap();
    assert_eq!(row.status, RunStatus::Killed);
}

// ---------------------------------------------------------------------------
// Test: the polling backend reconciles the same way
// ---------------------------------------------------------------------------

#[tokio::test]
async fn polling_backend_completes_run() {
    let f = fixture(COMPLETING_SOLVER, SupervisorKind::Polling).await;
    let (session, _rx) = f.manager.open_session("conn-1".into()).await;

    let outcome = f.supervisor.run(&session, &f.request).await.unwrap();

    assert_eq!(outcome.status, RunStatus::Completed);
    assert_eq!(outcome.runs, RunCount::new(3, 3));
}

#[tokio::test]
async fn polling_backend_detects_crash() {
    let f = fixture(CRASHING_SOLVER, SupervisorKind::Polling).await;
    let (session, _rx) = f.manager.open_session("conn-1".into()).await;

    let outcome = f.supervisor.run(&session, &f.request).await.unwrap();

    assert_eq!(outcome.status, RunStatus::Killed);
}

// ---------------------------------------------------------------------------
// Test: concurrent starts for one project admit exactly one job
// ---------------------------------------------------------------------------

#[tokio::test]
async fn concurrent_starts_admit_one_job() {
    let f = fixture(STALLING_SOLVER, SupervisorKind::Native).await;
    let (first, _rx1) = f.manager.open_session("conn-1".into()).await;
    let (second, _rx2) = f.manager.open_session("conn-2".into()).await;

    let (a, b) = tokio::join!(
        f.supervisor.start(&first, &f.request),
        f.supervisor.start(&second, &f.request),
    );

    let (started, refused) = match (a, b) {
        (Ok(p), Err(e)) | (Err(e), Ok(p)) => (p, e),
        (a, b) => panic!("expected one start to win, got {a:?} and {b:?}"),
    };
    assert_matches!(refused, CoreError::Conflict(_));

    let running = f.ledger.list_running().await.unwrap();
    assert_eq!(running.len(), 1);
    assert_eq!(running[0].pid, started.pid);

    terminate(started.pid).unwrap();
}

// ---------------------------------------------------------------------------
// Test: a start while a job is running names the running job
// ---------------------------------------------------------------------------

#[tokio::test]
async fn start_while_running_is_a_conflict() {
    let f = fixture(STALLING_SOLVER, SupervisorKind::Native).await;
    let (first, _rx1) = f.manager.open_session("conn-1".into()).await;
    let (second, _rx2) = f.manager.open_session("conn-2".into()).await;

    let running = f.supervisor.start(&first, &f.request).await.unwrap();
    let err = f.supervisor.start(&second, &f.request).await.unwrap_err();

    assert_matches!(err, CoreError::Conflict(msg) => {
        assert!(msg.contains(&format!("m{}", running.pid)), "message was {msg:?}");
    });
    assert_eq!(f.ledger.list().await.unwrap().len(), 1);

    terminate(running.pid).unwrap();
}

// ---------------------------------------------------------------------------
// Test: a blocked executable fails before any ledger row is written
// ---------------------------------------------------------------------------

#[tokio::test]
async fn blocked_executable_writes_no_row() {
    use std::os::unix::fs::PermissionsExt;

    let f = fixture(COMPLETING_SOLVER, SupervisorKind::Native).await;
    let executable = f.request.working_dir.ancestors().nth(3).unwrap().join("bin/solver");
    std::fs::set_permissions(&executable, std::fs::Permissions::from_mode(0o644)).unwrap();
    let (session, mut rx) = f.manager.open_session("conn-1".into()).await;

    let err = f.supervisor.run(&session, &f.request).await.unwrap_err();

    assert_matches!(err, CoreError::Process(_));
    assert!(f.ledger.list().await.unwrap().is_empty());
    assert!(drain_frames(&mut rx).is_empty(), "no pid may be published");
}

// ---------------------------------------------------------------------------
// Test: clumping runs are never logged but can still be stopped
// ---------------------------------------------------------------------------

#[tokio::test]
async fn clumping_run_is_not_logged() {
    let f = fixture(COMPLETING_SOLVER, SupervisorKind::Native).await;
    let request = clumping_request(&f);
    let (session, _rx) = f.manager.open_session("conn-1".into()).await;

    let outcome = f.supervisor.run(&session, &request).await.unwrap();

    assert_eq!(outcome.status, RunStatus::Completed);
    assert!(f.ledger.list().await.unwrap().is_empty());
}

#[tokio::test]
async fn clumping_run_can_be_stopped() {
    let f = fixture(STALLING_SOLVER, SupervisorKind::Native).await;
    let request = clumping_request(&f);
    let (session, mut rx) = f.manager.open_session("conn-1".into()).await;

    let supervisor = Arc::clone(&f.supervisor);
    let job_session = Arc::clone(&session);
    let job = tokio::spawn(async move { supervisor.run(&job_session, &request).await });

    let pid = published_pid(&next_frame(&mut rx).await);
    f.supervisor.stop(pid).await.unwrap();
    let outcome = job.await.unwrap().unwrap();

    assert_eq!(outcome.status, RunStatus::Stopped);
    assert!(f.ledger.list().await.unwrap().is_empty());
}

// ---------------------------------------------------------------------------
// Test: stopping a process that is gone fails without touching the ledger
// ---------------------------------------------------------------------------

#[tokio::test]
async fn stop_finished_job_fails() {
    let f = fixture(COMPLETING_SOLVER, SupervisorKind::Native).await;
    let (session, _rx) = f.manager.open_session("conn-1".into()).await;
    let outcome = f.supervisor.run(&session, &f.request).await.unwrap();

    let err = f.supervisor.stop(outcome.pid).await.unwrap_err();

    assert_matches!(err, CoreError::Cancellation(_));
    let row = f.ledger.find_by_process_id(outcome.pid).await.unwrap().unwrap();
    assert_eq!(row.status, RunStatus::Completed);
}

#[tokio::test]
async fn stop_unknown_process_fails() {
    let f = fixture(COMPLETING_SOLVER, SupervisorKind::Native).await;

    let err = f.supervisor.stop(99_999_999).await.unwrap_err();

    assert_matches!(err, CoreError::Cancellation(_));
}

// ---------------------------------------------------------------------------
// Test: a running row left behind by a dead process is reaped
// ---------------------------------------------------------------------------

/// Larger than any pid the kernel hands out.
const DEAD_PID: u32 = 99_999_999;

#[tokio::test]
async fn orphaned_row_does_not_block_start() {
    let f = fixture(STALLING_SOLVER, SupervisorKind::Native).await;
    f.ledger
        .append(JobRecord::running(DEAD_PID, "alice", PROJECT, REQUIRED_RUNS))
        .await
        .unwrap();
    let (session, _rx) = f.manager.open_session("conn-1".into()).await;

    let process = f.supervisor.start(&session, &f.request).await.unwrap();

    let orphan = f.ledger.find_by_process_id(DEAD_PID).await.unwrap().unwrap();
    assert_eq!(orphan.status, RunStatus::Killed);
    let running = f.ledger.list_running().await.unwrap();
    assert_eq!(running.len(), 1);
    assert_eq!(running[0].pid, process.pid);

    terminate(process.pid).unwrap();
}

#[tokio::test]
async fn stop_of_orphaned_row_reaps_it() {
    let f = fixture(STALLING_SOLVER, SupervisorKind::Native).await;
    f.ledger
        .append(JobRecord::running(DEAD_PID, "alice", PROJECT, REQUIRED_RUNS))
        .await
        .unwrap();

    let err = f.supervisor.stop(DEAD_PID).await.unwrap_err();

    assert_matches!(err, CoreError::Cancellation(_));
    let row = f.ledger.find_by_process_id(DEAD_PID).await.unwrap().unwrap();
    assert_eq!(row.status, RunStatus::Killed);
}

#[tokio::test]
async fn reap_orphans_spares_live_jobs() {
    let f = fixture(STALLING_SOLVER, SupervisorKind::Native).await;
    f.ledger
        .append(JobRecord::running(DEAD_PID, "bob", PROJECT, REQUIRED_RUNS))
        .await
        .unwrap();
    let (session, _rx) = f.manager.open_session("conn-1".into()).await;
    let live = f.supervisor.start(&session, &f.request).await.unwrap();

    assert_eq!(f.supervisor.reap_orphans().await.unwrap(), 1);
    assert_eq!(f.supervisor.reap_orphans().await.unwrap(), 0);

    let running = f.ledger.list_running().await.unwrap();
    assert_eq!(running.len(), 1);
    assert_eq!(running[0].pid, live.pid);

    terminate(live.pid).unwrap();
}

// ---------------------------------------------------------------------------
// Test: a running row reports its live artifact count
// ---------------------------------------------------------------------------

#[tokio::test]
async fn running_row_heals_its_count() {
    let f = fixture(STALLING_SOLVER, SupervisorKind::Native).await;
    let (session, _rx) = f.manager.open_session("conn-1".into()).await;

    let process = f.supervisor.start(&session, &f.request).await.unwrap();
    let artifact = f.request.working_dir.join("output/output_r00001.csv");
    wait_until(|| artifact.exists()).await;

    let row = f.ledger.find_by_process_id(process.pid).await.unwrap().unwrap();
    assert_eq!(row.status, RunStatus::Running);
    assert_eq!(row.runs, RunCount::new(1, 3));
    assert_eq!(f.layout.count_artifacts(&f.request.working_dir).await, 1);

    terminate(process.pid).unwrap();
}
