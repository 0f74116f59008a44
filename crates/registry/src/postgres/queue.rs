use std::sync::Arc;

use async_trait::async_trait;
use common::{ClaimToken, Clock, DocumentId, DocumentStatus, ErpOperation, QueueItemId, SystemClock};
use sqlx::{PgPool, Row, postgres::PgRow};

use super::{count_from_db, count_to_db, limit_to_db};
use crate::{
    NewQueueItem, QueueClaim, QueueItem, QueuePolicy, QueueReceipt, QueueStatus, QueueStore,
    RegistryError, Result,
    backoff::add_duration,
    destination::{truncate_error, validate_claim_limit},
};

const COLUMNS: &str = "id, document_id, document_version, operation, payload, status, \
     retry_count, error_message, external_reference, external_status, next_attempt_at, \
     claimed_until, created_at, processed_at, completed_at";

/// PostgreSQL-backed ERP queue.
#[derive(Clone)]
pub struct PostgresQueueStore {
    pool: PgPool,
    policy: QueuePolicy,
    clock: Arc<dyn Clock>,
}

impl PostgresQueueStore {
    /// Creates a queue with the default policy and the system clock.
    pub fn new(pool: PgPool) -> Self {
        Self::with_clock(pool, Arc::new(SystemClock))
    }

    pub fn with_clock(pool: PgPool, clock: Arc<dyn Clock>) -> Self {
        Self {
            pool,
            policy: QueuePolicy::default(),
            clock,
        }
    }

    /// Replaces the retry and lease policy.
    pub fn with_policy(mut self, policy: QueuePolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    fn row_to_item(row: PgRow) -> Result<QueueItem> {
        let operation: String = row.try_get("operation")?;
        let status: String = row.try_get("status")?;
        let external_status: Option<String> = row.try_get("external_status")?;

        Ok(QueueItem {
            id: QueueItemId::from_uuid(row.try_get("id")?),
            document_id: DocumentId::from_uuid(row.try_get("document_id")?),
            document_version: row.try_get("document_version")?,
            operation: operation
                .parse::<ErpOperation>()
                .map_err(|e| RegistryError::Corrupt(e.to_string()))?,
            payload: row.try_get("payload")?,
            status: status
                .parse::<QueueStatus>()
                .map_err(|e| RegistryError::Corrupt(e.to_string()))?,
            retry_count: count_from_db(row.try_get("retry_count")?),
            error_message: row.try_get("error_message")?,
            external_reference: row.try_get("external_reference")?,
            external_status: external_status
                .map(|s| s.parse::<DocumentStatus>())
                .transpose()
                .map_err(|e| RegistryError::Corrupt(e.to_string()))?,
            next_attempt_at: row.try_get("next_attempt_at")?,
            claimed_until: row.try_get("claimed_until")?,
            created_at: row.try_get("created_at")?,
            processed_at: row.try_get("processed_at")?,
            completed_at: row.try_get("completed_at")?,
        })
    }

    async fn claim_miss(&self, id: QueueItemId) -> RegistryError {
        match self.get(id).await {
            Ok(Some(_)) => RegistryError::claim_lost(id),
            Ok(None) => RegistryError::queue_item_not_found(id),
            Err(e) => e,
        }
    }
}

#[async_trait]
impl QueueStore for PostgresQueueStore {
    #[tracing::instrument(skip(self, item), fields(document_id = %item.document_id, operation = %item.operation))]
    async fn enqueue(&self, item: NewQueueItem) -> Result<QueueItem> {
        item.validate()?;
        let item = item.into_item(self.clock.now());

        sqlx::query(
            r#"
            INSERT INTO erp_queue_items (
                id, document_id, document_version, operation, payload, status,
                retry_count, next_attempt_at, created_at
            )
            VALUES ($1, $2, $3, $4, $5, 'pending', 0, $6, $6)
            "#,
        )
        .bind(item.id.as_uuid())
        .bind(item.document_id.as_uuid())
        .bind(item.document_version)
        .bind(item.operation.as_str())
        .bind(&item.payload)
        .bind(item.created_at)
        .execute(&self.pool)
        .await?;

        Ok(item)
    }

    async fn get(&self, id: QueueItemId) -> Result<Option<QueueItem>> {
        let row = sqlx::query(&format!("SELECT {COLUMNS} FROM erp_queue_items WHERE id = $1"))
            .bind(id.as_uuid())
            .fetch_optional(&self.pool)
            .await?;

        row.map(Self::row_to_item).transpose()
    }

    async fn recent(&self, limit: usize, status: Option<QueueStatus>) -> Result<Vec<QueueItem>> {
        let rows = sqlx::query(&format!(
            "SELECT {COLUMNS} FROM erp_queue_items \
             WHERE ($1::text IS NULL OR status = $1) \
             ORDER BY created_at DESC, id DESC \
             LIMIT $2"
        ))
        .bind(status.map(|s| s.as_str()))
        .bind(limit_to_db(limit))
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Self::row_to_item).collect()
    }

    #[tracing::instrument(skip(self))]
    async fn claim_due(&self, limit: usize) -> Result<Vec<QueueClaim>> {
        validate_claim_limit(limit)?;

        let now = self.clock.now();
        let token = ClaimToken::new();
        let claimed_until = add_duration(now, self.policy.claim_ttl);

        let rows = sqlx::query(
            r#"
            UPDATE erp_queue_items AS i
            SET status = 'processing', claim_token = $3, claimed_until = $4, processed_at = $1
            FROM (
                SELECT q.id
                FROM erp_queue_items q
                WHERE ((q.status = 'pending' AND q.next_attempt_at <= $1)
                    OR (q.status = 'processing' AND (q.claimed_until IS NULL OR q.claimed_until <= $1)))
                  AND NOT EXISTS (
                      SELECT 1
                      FROM erp_queue_items e
                      WHERE e.document_id = q.document_id
                        AND e.status IN ('pending', 'processing')
                        AND (e.created_at, e.id) < (q.created_at, q.id)
                  )
                ORDER BY q.created_at ASC, q.id ASC
                LIMIT $2
                FOR UPDATE OF q SKIP LOCKED
            ) AS due
            WHERE i.id = due.id
            RETURNING i.id, i.document_id, i.document_version, i.operation, i.payload,
                      i.status, i.retry_count, i.error_message, i.external_reference,
                      i.external_status, i.next_attempt_at, i.claimed_until, i.created_at,
                      i.processed_at, i.completed_at
            "#,
        )
        .bind(now)
        .bind(limit_to_db(limit))
        .bind(token.as_uuid())
        .bind(claimed_until)
        .fetch_all(&self.pool)
        .await?;

        let mut claims = rows
            .into_iter()
            .map(|row| {
                Ok(QueueClaim {
                    item: Self::row_to_item(row)?,
                    token,
                })
            })
            .collect::<Result<Vec<_>>>()?;
        claims.sort_by(|a, b| (a.item.created_at, a.item.id).cmp(&(b.item.created_at, b.item.id)));

        Ok(claims)
    }

    async fn complete(&self, claim: &QueueClaim, receipt: QueueReceipt) -> Result<QueueItem> {
        let row = sqlx::query(&format!(
            "UPDATE erp_queue_items \
             SET status = 'completed', external_reference = $3, external_status = $4, \
                 error_message = NULL, completed_at = $5, claim_token = NULL, claimed_until = NULL \
             WHERE id = $1 AND claim_token = $2 AND status = 'processing' \
             RETURNING {COLUMNS}"
        ))
        .bind(claim.item.id.as_uuid())
        .bind(claim.token.as_uuid())
        .bind(receipt.external_reference)
        .bind(receipt.external_status.as_str())
        .bind(self.clock.now())
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => Self::row_to_item(row),
            None => Err(self.claim_miss(claim.item.id).await),
        }
    }

    async fn fail(&self, claim: &QueueClaim, error: &str, permanent: bool) -> Result<QueueItem> {
        let now = self.clock.now();
        let retry_count = claim.item.retry_count.saturating_add(1);
        let status = self.policy.status_after_failure(retry_count, permanent);
        let next_attempt_at = match status {
            QueueStatus::Pending => self.policy.backoff.next_attempt_at(now, retry_count),
            _ => claim.item.next_attempt_at,
        };

        let row = sqlx::query(&format!(
            "UPDATE erp_queue_items \
             SET status = $3, retry_count = $4, error_message = $5, next_attempt_at = $6, \
                 claim_token = NULL, claimed_until = NULL \
             WHERE id = $1 AND claim_token = $2 AND status = 'processing' \
             RETURNING {COLUMNS}"
        ))
        .bind(claim.item.id.as_uuid())
        .bind(claim.token.as_uuid())
        .bind(status.as_str())
        .bind(count_to_db(retry_count))
        .bind(truncate_error(error))
        .bind(next_attempt_at)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => Self::row_to_item(row),
            None => Err(self.claim_miss(claim.item.id).await),
        }
    }

    async fn release(&self, claim: &QueueClaim) -> Result<QueueItem> {
        let row = sqlx::query(&format!(
            "UPDATE erp_queue_items \
             SET status = 'pending', claim_token = NULL, claimed_until = NULL \
             WHERE id = $1 AND claim_token = $2 AND status = 'processing' \
             RETURNING {COLUMNS}"
        ))
        .bind(claim.item.id.as_uuid())
        .bind(claim.token.as_uuid())
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => Self::row_to_item(row),
            None => Err(self.claim_miss(claim.item.id).await),
        }
    }

    #[tracing::instrument(skip(self))]
    async fn requeue(&self, id: QueueItemId) -> Result<QueueItem> {
        let row = sqlx::query(&format!(
            "UPDATE erp_queue_items \
             SET status = 'pending', retry_count = 0, next_attempt_at = $2, \
                 claim_token = NULL, claimed_until = NULL \
             WHERE id = $1 AND status = 'failed' \
             RETURNING {COLUMNS}"
        ))
        .bind(id.as_uuid())
        .bind(self.clock.now())
        .fetch_optional(&self.pool)
        .await?;

        if let Some(row) = row {
            return Self::row_to_item(row);
        }

        match self.get(id).await? {
            Some(item) => Err(RegistryError::InvalidTransition {
                id: id.to_string(),
                reason: format!("only failed items can be requeued, item is {}", item.status),
            }),
            None => Err(RegistryError::queue_item_not_found(id)),
        }
    }
}
