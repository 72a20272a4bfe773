//! Forceful termination of solver processes.

use crate::error::CoreError;
use crate::types::ProcessId;

/// Check that `pid` exists and may be signalled, without signalling it.
pub fn probe(pid: ProcessId) -> Result<(), CoreError> {
    send(pid, 0)
}

/// Whether `pid` still exists. A process the server may not signal counts as
/// alive.
pub fn is_alive(pid: ProcessId) -> bool {
    match libc::pid_t::try_from(pid) {
        // Safety: as in `send`.
        Ok(raw) if raw > 0 => {
            (unsafe { libc::kill(raw, 0) }) == 0
                || std::io::Error::last_os_error().raw_os_error() != Some(libc::ESRCH)
        }
        _ => false,
    }
}

/// Send `SIGKILL` to `pid`.
///
/// Fails with `Cancellation` when the process no longer exists or the server
/// lacks permission to signal it.
pub fn terminate(pid: ProcessId) -> Result<(), CoreError> {
    send(pid, libc::SIGKILL)?;
    tracing::info!(pid, "Sent SIGKILL to solver");
    Ok(())
}

fn send(pid: ProcessId, signal: libc::c_int) -> Result<(), CoreError> {
    // pid 0 and negative values address process groups, never a single solver.
    let raw = libc::pid_t::try_from(pid)
        .ok()
        .filter(|p| *p > 0)
        .ok_or_else(|| CoreError::Cancellation(format!("Invalid process id {pid}")))?;

    // Safety: kill(2) takes plain integers and has no memory-safety requirements.
    let ret = unsafe { libc::kill(raw, signal) };
    if ret == 0 {
        return Ok(());
    }

    let err = std::io::Error::last_os_error();
    Err(match err.raw_os_error() {
        Some(libc::ESRCH) => CoreError::Cancellation(format!("Process {pid} no longer exists")),
        Some(libc::EPERM) => {
            CoreError::Cancellation(format!("No permission to stop process {pid}"))
        }
        _ => CoreError::Cancellation(format!("Failed to stop process {pid}: {err}")),
    })
}
