/// Domain error kinds shared by every component.
///
/// Each variant carries a human-readable message that is safe to show to the
/// client of a session; HTTP handlers map the variant to a status code.
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("Entity not found: {entity} {id}")]
    NotFound { entity: &'static str, id: String },

    /// Bad or missing input. No side effects were performed.
    #[error("Validation failed: {0}")]
    Validation(String),

    /// A job is already running for the same user and project.
    #[error("Conflict: {0}")]
    Conflict(String),

    /// The solver could not be spawned (missing or blocked executable, I/O).
    #[error("Process error: {0}")]
    Process(String),

    /// A stop command targeted an unknown process or one the caller may not signal.
    #[error("Cancellation failed: {0}")]
    Cancellation(String),

    /// A Run Ledger update found no matching row.
    #[error("Run ledger inconsistency: {0}")]
    LedgerInconsistency(String),

    /// Pool exhaustion, database shutdown, or a lost connection.
    #[error("Infrastructure error: {0}")]
    Infrastructure(String),

    /// A database error raised by the statement itself.
    #[error("Query failed: {0}")]
    Query(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl CoreError {
    /// The message without the kind prefix, as sent in session error frames.
    pub fn message(&self) -> String {
        match self {
            Self::NotFound { entity, id } => format!("{entity} {id} not found"),
            Self::Validation(msg)
            | Self::Conflict(msg)
            | Self::Process(msg)
            | Self::Cancellation(msg)
            | Self::LedgerInconsistency(msg)
            | Self::Infrastructure(msg)
            | Self::Query(msg)
            | Self::Unauthorized(msg)
            | Self::Forbidden(msg)
            | Self::Internal(msg) => msg.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_includes_kind() {
        let err = CoreError::Conflict("job already running".into());
        assert_eq!(err.to_string(), "Conflict: job already running");
    }

    #[test]
    fn message_strips_kind() {
        let err = CoreError::NotFound {
            entity: "Project",
            id: "alice/coast".into(),
        };
        assert_eq!(err.message(), "Project alice/coast not found");
        assert_eq!(
            CoreError::Process("blocked".into()).message(),
            "blocked".to_string()
        );
    }
}
