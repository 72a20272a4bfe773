//! Session protocol vocabulary.
//!
//! Frame statuses sent to clients, the tagged identifiers published for
//! attached jobs and queries, and the fixed informational messages that end
//! a session.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::types::{BackendId, ProcessId};

/// Namespace prefix for solver process identifiers.
pub const JOB_PREFIX: char = 'm';

/// Namespace prefix for database backend identifiers.
pub const QUERY_PREFIX: char = 'q';

/// Informational message for a job whose runs all completed.
pub const MSG_RUN_COMPLETED: &str = "Run completed";

/// Informational message for a job or query ended by the operating system.
pub const MSG_STOPPED_BY_OS: &str = "Stopped by the operating system";

/// Informational message for an operation cancelled by a stop command.
pub fn stopped_by(user: &str) -> String {
    format!("Stopped by {user}")
}

/// Value of the `status` field of a session frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FrameStatus {
    Started,
    Preprocessing,
    /// Publishes the tagged identifier of the attached job or query.
    #[serde(rename = "pid")]
    Pid,
    RunningJob,
    FeatureCreated,
    /// Keepalive heartbeat.
    WebSocketOpen,
    Finished,
}

/// A job or query identifier carrying its namespace prefix (`m1234`, `q5678`).
///
/// The prefix decides which subsystem a stop command is routed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaggedId {
    Job(ProcessId),
    Query(BackendId),
}

impl fmt::Display for TaggedId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Job(pid) => write!(f, "{JOB_PREFIX}{pid}"),
            Self::Query(id) => write!(f, "{QUERY_PREFIX}{id}"),
        }
    }
}

impl FromStr for TaggedId {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut chars = s.chars();
        let prefix = chars
            .next()
            .ok_or_else(|| CoreError::Validation("Process id must not be empty".into()))?;
        let digits = chars.as_str();

        let invalid = || CoreError::Validation(format!("Invalid process id '{s}'"));
        if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
            return Err(invalid());
        }

        match prefix {
            JOB_PREFIX => digits.parse().map(Self::Job).map_err(|_| invalid()),
            QUERY_PREFIX => digits.parse().map(Self::Query).map_err(|_| invalid()),
            other => Err(CoreError::Validation(format!(
                "Unknown process id prefix '{other}' (expected '{JOB_PREFIX}' or '{QUERY_PREFIX}')"
            ))),
        }
    }
}

impl Serialize for TaggedId {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}
