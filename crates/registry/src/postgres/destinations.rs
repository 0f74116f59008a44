use std::sync::Arc;

use async_trait::async_trait;
use common::{ClaimToken, Clock, DestinationId, SystemClock};
use event_log::Sequence;
use sqlx::{PgPool, Row, postgres::PgRow};

use super::{count_from_db, count_to_db, limit_to_db};
use crate::{
    Destination, DestinationClaim, DestinationPolicy, DestinationRegistry, NewDestination,
    RegistryError, Result,
    backoff::add_duration,
    destination::{truncate_error, validate_claim_limit},
};

const COLUMNS: &str = "id, category, name, endpoint, secret, event_types, cursor, \
     consecutive_failures, next_retry_at, last_error, last_success_at, is_active, \
     claimed_until, created_at, updated_at";

/// PostgreSQL-backed destination registry.
#[derive(Clone)]
pub struct PostgresDestinationRegistry {
    pool: PgPool,
    policy: DestinationPolicy,
    clock: Arc<dyn Clock>,
}

impl PostgresDestinationRegistry {
    /// Creates a registry with the default policy and the system clock.
    pub fn new(pool: PgPool) -> Self {
        Self::with_clock(pool, Arc::new(SystemClock))
    }

    pub fn with_clock(pool: PgPool, clock: Arc<dyn Clock>) -> Self {
        Self {
            pool,
            policy: DestinationPolicy::default(),
            clock,
        }
    }

    /// Replaces the backoff and lease policy.
    pub fn with_policy(mut self, policy: DestinationPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    fn row_to_destination(row: PgRow) -> Result<Destination> {
        Ok(Destination {
            id: DestinationId::from_uuid(row.try_get("id")?),
            category: row.try_get("category")?,
            name: row.try_get("name")?,
            endpoint: row.try_get("endpoint")?,
            secret: row.try_get("secret")?,
            event_types: row.try_get("event_types")?,
            cursor: Sequence::new(row.try_get("cursor")?),
            consecutive_failures: count_from_db(row.try_get("consecutive_failures")?),
            next_retry_at: row.try_get("next_retry_at")?,
            last_error: row.try_get("last_error")?,
            last_success_at: row.try_get("last_success_at")?,
            is_active: row.try_get("is_active")?,
            claimed_until: row.try_get("claimed_until")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }

    /// Maps a token-guarded update that matched nothing to the right error.
    async fn claim_miss(&self, id: DestinationId) -> RegistryError {
        match self.get(id).await {
            Ok(Some(_)) => RegistryError::claim_lost(id),
            Ok(None) => RegistryError::destination_not_found(id),
            Err(e) => e,
        }
    }
}

#[async_trait]
impl DestinationRegistry for PostgresDestinationRegistry {
    #[tracing::instrument(skip(self, destination), fields(category = %destination.category))]
    async fn register(&self, destination: NewDestination) -> Result<Destination> {
        destination.validate()?;
        let destination = destination.into_destination(self.clock.now());

        sqlx::query(
            r#"
            INSERT INTO destinations (
                id, category, name, endpoint, secret, event_types, cursor,
                consecutive_failures, next_retry_at, is_active, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, 0, 0, $7, TRUE, $7, $7)
            "#,
        )
        .bind(destination.id.as_uuid())
        .bind(&destination.category)
        .bind(&destination.name)
        .bind(&destination.endpoint)
        .bind(&destination.secret)
        .bind(&destination.event_types)
        .bind(destination.created_at)
        .execute(&self.pool)
        .await?;

        tracing::info!(destination_id = %destination.id, "Registered destination");
        Ok(destination)
    }

    async fn get(&self, id: DestinationId) -> Result<Option<Destination>> {
        let row = sqlx::query(&format!("SELECT {COLUMNS} FROM destinations WHERE id = $1"))
            .bind(id.as_uuid())
            .fetch_optional(&self.pool)
            .await?;

        row.map(Self::row_to_destination).transpose()
    }

    async fn list(&self, category: Option<&str>) -> Result<Vec<Destination>> {
        let rows = sqlx::query(&format!(
            "SELECT {COLUMNS} FROM destinations \
             WHERE ($1::text IS NULL OR category = $1) \
             ORDER BY created_at ASC, id ASC"
        ))
        .bind(category)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Self::row_to_destination).collect()
    }

    #[tracing::instrument(skip(self))]
    async fn select_due(&self, category: &str, limit: usize) -> Result<Vec<DestinationClaim>> {
        validate_claim_limit(limit)?;

        let now = self.clock.now();
        let token = ClaimToken::new();
        let claimed_until = add_duration(now, self.policy.claim_ttl);

        // One token per batch; each row is still only ever held by this worker.
        let rows = sqlx::query(
            r#"
            UPDATE destinations AS d
            SET claim_token = $4, claimed_until = $5
            FROM (
                SELECT id
                FROM destinations
                WHERE category = $1
                  AND is_active
                  AND next_retry_at <= $2
                  AND (claimed_until IS NULL OR claimed_until <= $2)
                ORDER BY updated_at ASC, id ASC
                LIMIT $3
                FOR UPDATE SKIP LOCKED
            ) AS due
            WHERE d.id = due.id
            RETURNING d.id, d.category, d.name, d.endpoint, d.secret, d.event_types,
                      d.cursor, d.consecutive_failures, d.next_retry_at, d.last_error,
                      d.last_success_at, d.is_active, d.claimed_until, d.created_at,
                      d.updated_at
            "#,
        )
        .bind(category)
        .bind(now)
        .bind(limit_to_db(limit))
        .bind(token.as_uuid())
        .bind(claimed_until)
        .fetch_all(&self.pool)
        .await?;

        let mut claims = rows
            .into_iter()
            .map(|row| {
                Ok(DestinationClaim {
                    destination: Self::row_to_destination(row)?,
                    token,
                })
            })
            .collect::<Result<Vec<_>>>()?;
        claims.sort_by(|a, b| {
            (a.destination.updated_at, a.destination.id)
                .cmp(&(b.destination.updated_at, b.destination.id))
        });

        Ok(claims)
    }

    async fn record_success(
        &self,
        claim: &DestinationClaim,
        cursor: Sequence,
    ) -> Result<Destination> {
        let now = self.clock.now();
        let row = sqlx::query(&format!(
            "UPDATE destinations \
             SET cursor = GREATEST(cursor, $3), consecutive_failures = 0, last_error = NULL, \
                 next_retry_at = $4, last_success_at = $4, claim_token = NULL, \
                 claimed_until = NULL, updated_at = $4 \
             WHERE id = $1 AND claim_token = $2 \
             RETURNING {COLUMNS}"
        ))
        .bind(claim.destination.id.as_uuid())
        .bind(claim.token.as_uuid())
        .bind(cursor.as_i64())
        .bind(now)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => Self::row_to_destination(row),
            None => Err(self.claim_miss(claim.destination.id).await),
        }
    }

    async fn record_failure(&self, claim: &DestinationClaim, error: &str) -> Result<Destination> {
        let now = self.clock.now();
        // The claim snapshot is authoritative: nobody else writes while the token matches.
        let failures = claim.destination.consecutive_failures.saturating_add(1);
        let next_retry_at = self.policy.backoff.next_attempt_at(now, failures);

        let row = sqlx::query(&format!(
            "UPDATE destinations \
             SET consecutive_failures = $3, next_retry_at = $4, last_error = $5, \
                 claim_token = NULL, claimed_until = NULL, updated_at = $6 \
             WHERE id = $1 AND claim_token = $2 \
             RETURNING {COLUMNS}"
        ))
        .bind(claim.destination.id.as_uuid())
        .bind(claim.token.as_uuid())
        .bind(count_to_db(failures))
        .bind(next_retry_at)
        .bind(truncate_error(error))
        .bind(now)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => Self::row_to_destination(row),
            None => Err(self.claim_miss(claim.destination.id).await),
        }
    }

    async fn release(&self, claim: &DestinationClaim) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE destinations
            SET claim_token = NULL, claimed_until = NULL, updated_at = $3
            WHERE id = $1 AND claim_token = $2
            "#,
        )
        .bind(claim.destination.id.as_uuid())
        .bind(claim.token.as_uuid())
        .bind(self.clock.now())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(self.claim_miss(claim.destination.id).await);
        }
        Ok(())
    }

    #[tracing::instrument(skip(self))]
    async fn set_active(&self, id: DestinationId, active: bool) -> Result<Destination> {
        let row = sqlx::query(&format!(
            "UPDATE destinations \
             SET is_active = $2, \
                 next_retry_at = CASE WHEN $2 THEN $3 ELSE next_retry_at END, \
                 updated_at = $3 \
             WHERE id = $1 \
             RETURNING {COLUMNS}"
        ))
        .bind(id.as_uuid())
        .bind(active)
        .bind(self.clock.now())
        .fetch_optional(&self.pool)
        .await?;

        row.map(Self::row_to_destination)
            .transpose()?
            .ok_or_else(|| RegistryError::destination_not_found(id))
    }
}
