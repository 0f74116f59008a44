use std::sync::Arc;

use async_trait::async_trait;
use common::{Clock, SystemClock};
use sqlx::{PgPool, Row, postgres::PgRow};

use crate::{
    Event, EventSelector, NewEvent, Result, Sequence,
    store::{EventLog, validate_append, validate_limit},
};

/// PostgreSQL-backed event log.
///
/// Sequences come from a per-category counter row in `event_sequences` that
/// is bumped in the same transaction as the insert. Concurrent appends to one
/// category serialize on that row, and a rolled-back append rolls back its
/// counter bump, so sequences stay gapless.
#[derive(Clone)]
pub struct PostgresEventLog {
    pool: PgPool,
    clock: Arc<dyn Clock>,
}

impl PostgresEventLog {
    /// Creates a new PostgreSQL event log.
    pub fn new(pool: PgPool) -> Self {
        Self::with_clock(pool, Arc::new(SystemClock))
    }

    /// Creates a new PostgreSQL event log that timestamps events with `clock`.
    pub fn with_clock(pool: PgPool, clock: Arc<dyn Clock>) -> Self {
        Self { pool, clock }
    }

    /// Gets a reference to the underlying connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Runs the workspace migrations.
    pub async fn run_migrations(&self) -> Result<()> {
        sqlx::migrate!("../../migrations").run(&self.pool).await?;
        Ok(())
    }

    fn row_to_event(row: PgRow) -> Result<Event> {
        Ok(Event {
            sequence: Sequence::new(row.try_get("sequence")?),
            category: row.try_get("category")?,
            event_type: row.try_get("event_type")?,
            subject_id: row.try_get("subject_id")?,
            payload: row.try_get("payload")?,
            created_at: row.try_get("created_at")?,
        })
    }
}

#[async_trait]
impl EventLog for PostgresEventLog {
    #[tracing::instrument(skip(self, event), fields(event_type = %event.event_type))]
    async fn append(&self, category: &str, event: NewEvent) -> Result<Sequence> {
        validate_append(category, &event)?;

        let mut tx = self.pool.begin().await?;

        let sequence: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO event_sequences (category, last_sequence)
            VALUES ($1, 1)
            ON CONFLICT (category) DO UPDATE
                SET last_sequence = event_sequences.last_sequence + 1
            RETURNING last_sequence
            "#,
        )
        .bind(category)
        .fetch_one(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            INSERT INTO events (category, sequence, event_type, subject_id, payload, created_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(category)
        .bind(sequence)
        .bind(&event.event_type)
        .bind(&event.subject_id)
        .bind(&event.payload)
        .bind(self.clock.now())
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        metrics::counter!("event_log_appends_total").increment(1);
        Ok(Sequence::new(sequence))
    }

    async fn read_after(
        &self,
        category: &str,
        selector: &EventSelector,
        cursor: Sequence,
        limit: usize,
    ) -> Result<Vec<Event>> {
        validate_limit(limit)?;

        let rows = sqlx::query(
            r#"
            SELECT category, sequence, event_type, subject_id, payload, created_at
            FROM events
            WHERE category = $1
              AND sequence > $2
              AND ($3::text[] IS NULL OR event_type = ANY($3))
            ORDER BY sequence ASC
            LIMIT $4
            "#,
        )
        .bind(category)
        .bind(cursor.as_i64())
        .bind(selector.event_types.as_deref())
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Self::row_to_event).collect()
    }

    async fn head(&self, category: &str) -> Result<Sequence> {
        let last: Option<i64> =
            sqlx::query_scalar("SELECT last_sequence FROM event_sequences WHERE category = $1")
                .bind(category)
                .fetch_optional(&self.pool)
                .await?;

        Ok(Sequence::new(last.unwrap_or(0)))
    }
}
