//! Connection pool and Postgres backend plumbing.
//!
//! The pool is bounded by a minimum and maximum size and never times out an
//! acquire: a saturated pool suspends callers until a connection is released.
//! Callers that need a bounded wait impose their own timeout.

pub mod backend;
pub mod statement;

use std::time::Duration;

use sqlx::postgres::PgPoolOptions;

pub type DbPool = sqlx::PgPool;

/// Acquire wait used in place of "forever"; sqlx requires a finite duration.
const UNBOUNDED_ACQUIRE: Duration = Duration::from_secs(100 * 365 * 24 * 60 * 60);

/// Pool sizing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolConfig {
    pub min_connections: u32,
    pub max_connections: u32,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            min_connections: 4,
            max_connections: 20,
        }
    }
}

/// Create a connection pool from a database URL.
pub async fn create_pool(database_url: &str, config: &PoolConfig) -> Result<DbPool, sqlx::Error> {
    PgPoolOptions::new()
        .min_connections(config.min_connections)
        .max_connections(config.max_connections)
        .acquire_timeout(UNBOUNDED_ACQUIRE)
        .connect(database_url)
        .await
}

/// Round-trip a trivial statement to verify the database is reachable.
pub async fn health_check(pool: &DbPool) -> Result<(), sqlx::Error> {
    sqlx::query("SELECT 1").execute(pool).await?;
    Ok(())
}

/// Number of connections currently checked out of the pool.
pub fn outstanding(pool: &DbPool) -> u32 {
    let idle = u32::try_from(pool.num_idle()).unwrap_or(u32::MAX);
    pool.size().saturating_sub(idle)
}
