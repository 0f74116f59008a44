//! PostgreSQL backends.
//!
//! Claims are a single `UPDATE ... FROM (SELECT ... FOR UPDATE SKIP LOCKED)`
//! statement, so concurrent workers never block on each other's rows and
//! never claim the same row twice.

mod destinations;
mod queue;

pub use destinations::PostgresDestinationRegistry;
pub use queue::PostgresQueueStore;

use sqlx::PgPool;

/// Runs the workspace migrations against `pool`.
pub async fn run_migrations(pool: &PgPool) -> crate::Result<()> {
    sqlx::migrate!("../../migrations").run(pool).await?;
    Ok(())
}

fn count_from_db(value: i32) -> u32 {
    u32::try_from(value).unwrap_or_default()
}

fn count_to_db(value: u32) -> i32 {
    i32::try_from(value).unwrap_or(i32::MAX)
}

fn limit_to_db(limit: usize) -> i64 {
    i64::try_from(limit).unwrap_or(i64::MAX)
}
