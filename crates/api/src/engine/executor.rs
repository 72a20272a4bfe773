//! Cancellable Query Executor.
//!
//! Runs one statement on a pooled connection. The connection's backend id is
//! published to the session as `q<id>` before the statement starts, so a stop
//! command can cancel it with `pg_cancel_backend`. Cancellation is advisory:
//! the statement fails with SQLSTATE 57014 and the error classification below
//! turns that into a "stopped by" outcome.

use solvergate_core::error::CoreError;
use solvergate_core::protocol::{stopped_by, TaggedId, MSG_STOPPED_BY_OS};
use solvergate_core::types::BackendId;
use solvergate_db::backend::{backend_id, cancel_backend, classify, QueryFailure};
use solvergate_db::statement::{self, QueryOutput, QueryParam, RowShape};
use solvergate_db::DbPool;

use crate::ws::Session;

/// Result of a statement that did not fail with a domain error.
#[derive(Debug, Clone, PartialEq)]
pub enum QueryOutcome {
    Completed(QueryOutput),
    /// Cancelled by a stop command or ended by a database shutdown.
    Stopped { info: String },
}

pub struct QueryExecutor {
    pool: DbPool,
}

impl QueryExecutor {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Run `sql` for `session`.
    ///
    /// Waits for a pooled connection without a timeout. The connection goes
    /// back to the pool when this returns, on every path.
    pub async fn execute(
        &self,
        session: &Session,
        sql: &str,
        params: &[QueryParam],
        shape: RowShape,
    ) -> Result<QueryOutcome, CoreError> {
        let mut conn = self.pool.acquire().await.map_err(infrastructure)?;
        let backend = backend_id(&mut conn).await.map_err(infrastructure)?;

        session.attach(TaggedId::Query(backend));
        session.begin_streaming();
        tracing::info!(
            conn_id = %session.conn_id(),
            backend_id = backend,
            "Query handle published",
        );

        let result = statement::run(&mut conn, sql, params, shape).await;
        drop(conn);
        session.detach();

        match result {
            Ok(output) => Ok(QueryOutcome::Completed(output)),
            Err(e) => match classify(&e) {
                QueryFailure::Cancelled => {
                    let user = session.user_name().unwrap_or_default();
                    tracing::info!(backend_id = backend, user = %user, "Query cancelled");
                    Ok(QueryOutcome::Stopped {
                        info: stopped_by(&user),
                    })
                }
                QueryFailure::Shutdown => {
                    tracing::warn!(backend_id = backend, error = %e, "Query ended by database shutdown");
                    Ok(QueryOutcome::Stopped {
                        info: MSG_STOPPED_BY_OS.to_string(),
                    })
                }
                QueryFailure::Other(msg) => Err(CoreError::Query(msg)),
            },
        }
    }

    /// Ask the database to cancel the statement running on `backend`.
    pub async fn cancel(&self, backend: BackendId) -> Result<(), CoreError> {
        match cancel_backend(&self.pool, backend).await {
            Ok(true) => Ok(()),
            Ok(false) => Err(CoreError::Cancellation(format!(
                "Query {} is no longer running",
                TaggedId::Query(backend)
            ))),
            Err(e) => Err(infrastructure(e)),
        }
    }
}

fn infrastructure(err: sqlx::Error) -> CoreError {
    CoreError::Infrastructure(format!("Database unavailable: {err}"))
}
