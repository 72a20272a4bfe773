//! Backend identifiers, out-of-band cancellation, and error classification.

use solvergate_core::types::BackendId;
use sqlx::PgConnection;

use crate::DbPool;

/// SQLSTATE raised in a statement cancelled by `pg_cancel_backend`.
const QUERY_CANCELED: &str = "57014";

/// SQLSTATEs raised when the server shuts down or refuses connections.
const SHUTDOWN_CODES: [&str; 3] = ["57P01", "57P02", "57P03"];

/// SQLSTATE class for connection exceptions.
const CONNECTION_EXCEPTION_CLASS: &str = "08";

/// Why a statement failed, from the session's point of view.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueryFailure {
    /// Cancelled by an administrative cancel request.
    Cancelled,
    /// The server shut down or the connection was lost.
    Shutdown,
    /// Any other error, with the database's own message.
    Other(String),
}

/// The backend process id serving `conn`.
pub async fn backend_id(conn: &mut PgConnection) -> Result<BackendId, sqlx::Error> {
    sqlx::query_scalar::<_, BackendId>("SELECT pg_backend_pid()")
        .fetch_one(conn)
        .await
}

/// Ask the server to cancel the statement running on backend `id`.
///
/// Advisory: returns `false` when no such backend exists. The cancelled
/// statement fails with SQLSTATE 57014 on its own connection.
pub async fn cancel_backend(pool: &DbPool, id: BackendId) -> Result<bool, sqlx::Error> {
    let cancelled = sqlx::query_scalar::<_, bool>("SELECT pg_cancel_backend($1)")
        .bind(id)
        .fetch_one(pool)
        .await?;
    tracing::info!(backend_id = id, cancelled, "Requested backend cancel");
    Ok(cancelled)
}

/// Classify a statement error.
pub fn classify(err: &sqlx::Error) -> QueryFailure {
    match err {
        sqlx::Error::Database(db_err) => {
            let code = db_err.code();
            let code = code.as_deref().unwrap_or_default();
            if code == QUERY_CANCELED {
                QueryFailure::Cancelled
            } else if SHUTDOWN_CODES.contains(&code) || code.starts_with(CONNECTION_EXCEPTION_CLASS)
            {
                QueryFailure::Shutdown
            } else {
                QueryFailure::Other(db_err.message().to_string())
            }
        }
        sqlx::Error::Io(_)
        | sqlx::Error::PoolClosed
        | sqlx::Error::PoolTimedOut
        | sqlx::Error::WorkerCrashed => QueryFailure::Shutdown,
        other => QueryFailure::Other(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pool_and_io_errors_are_shutdowns() {
        assert_eq!(classify(&sqlx::Error::PoolClosed), QueryFailure::Shutdown);
        let io = std::io::Error::new(std::io::ErrorKind::ConnectionReset, "reset");
        assert_eq!(classify(&sqlx::Error::Io(io)), QueryFailure::Shutdown);
    }

    #[test]
    fn other_errors_keep_their_message() {
        assert_eq!(
            classify(&sqlx::Error::RowNotFound),
            QueryFailure::Other(sqlx::Error::RowNotFound.to_string())
        );
    }
}
