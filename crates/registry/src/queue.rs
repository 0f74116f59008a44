use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{ClaimToken, DocumentId, DocumentStatus, ErpOperation, ParseEnumError, QueueItemId};
use serde::{Deserialize, Serialize};

use crate::{BackoffPolicy, RegistryError, Result};

/// Lifecycle state of a queue item.
///
/// `pending -> processing -> completed | failed`, with `processing -> pending`
/// on a transient failure and `failed -> pending` on operator requeue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueueStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl QueueStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            QueueStatus::Pending => "pending",
            QueueStatus::Processing => "processing",
            QueueStatus::Completed => "completed",
            QueueStatus::Failed => "failed",
        }
    }

    /// Terminal states are never picked up by a claim.
    pub fn is_terminal(&self) -> bool {
        matches!(self, QueueStatus::Completed | QueueStatus::Failed)
    }
}

impl std::fmt::Display for QueueStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for QueueStatus {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "pending" => Ok(QueueStatus::Pending),
            "processing" => Ok(QueueStatus::Processing),
            "completed" => Ok(QueueStatus::Completed),
            "failed" => Ok(QueueStatus::Failed),
            other => Err(ParseEnumError {
                kind: "queue status",
                value: other.to_string(),
            }),
        }
    }
}

/// One ERP operation for one document version.
#[derive(Debug, Clone, PartialEq)]
pub struct QueueItem {
    pub id: QueueItemId,
    pub document_id: DocumentId,
    /// Portal version of the document at enqueue time.
    pub document_version: i64,
    pub operation: ErpOperation,
    /// Document snapshot captured at enqueue time.
    pub payload: serde_json::Value,
    pub status: QueueStatus,
    pub retry_count: u32,
    pub error_message: Option<String>,
    pub external_reference: Option<String>,
    pub external_status: Option<DocumentStatus>,
    pub next_attempt_at: DateTime<Utc>,
    pub claimed_until: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// Enqueue request for a document operation.
#[derive(Debug, Clone)]
pub struct NewQueueItem {
    pub document_id: DocumentId,
    pub document_version: i64,
    pub operation: ErpOperation,
    pub payload: serde_json::Value,
}

impl NewQueueItem {
    pub fn new(
        document_id: DocumentId,
        document_version: i64,
        operation: ErpOperation,
        payload: serde_json::Value,
    ) -> Self {
        Self {
            document_id,
            document_version,
            operation,
            payload,
        }
    }

    pub(crate) fn validate(&self) -> Result<()> {
        if self.document_version < 0 {
            return Err(RegistryError::InvalidArgument(format!(
                "document version must not be negative, got {}",
                self.document_version
            )));
        }
        Ok(())
    }

    pub(crate) fn into_item(self, now: DateTime<Utc>) -> QueueItem {
        QueueItem {
            id: QueueItemId::new(),
            document_id: self.document_id,
            document_version: self.document_version,
            operation: self.operation,
            payload: self.payload,
            status: QueueStatus::Pending,
            retry_count: 0,
            error_message: None,
            external_reference: None,
            external_status: None,
            next_attempt_at: now,
            claimed_until: None,
            created_at: now,
            processed_at: None,
            completed_at: None,
        }
    }
}

/// A lease on one queue item, held by a single worker.
#[derive(Debug, Clone)]
pub struct QueueClaim {
    pub item: QueueItem,
    pub token: ClaimToken,
}

/// What the ERP reported for a successfully delivered item.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueueReceipt {
    pub external_reference: Option<String>,
    pub external_status: DocumentStatus,
}

/// Tuning shared by both queue backends.
#[derive(Debug, Clone, Copy)]
pub struct QueuePolicy {
    pub backoff: BackoffPolicy,
    pub claim_ttl: Duration,
    /// Failed attempts after which an item is marked failed.
    pub max_retries: u32,
}

impl QueuePolicy {
    /// Status an item moves to after its `retry_count`-th failure.
    pub fn status_after_failure(&self, retry_count: u32, permanent: bool) -> QueueStatus {
        if permanent || retry_count >= self.max_retries {
            QueueStatus::Failed
        } else {
            QueueStatus::Pending
        }
    }
}

impl Default for QueuePolicy {
    fn default() -> Self {
        Self {
            backoff: BackoffPolicy::default(),
            claim_ttl: Duration::from_secs(60),
            max_retries: 5,
        }
    }
}

/// Storage for ERP queue items.
#[async_trait]
pub trait QueueStore: Send + Sync {
    async fn enqueue(&self, item: NewQueueItem) -> Result<QueueItem>;

    async fn get(&self, id: QueueItemId) -> Result<Option<QueueItem>>;

    /// Most recently created items first, optionally filtered by status.
    async fn recent(&self, limit: usize, status: Option<QueueStatus>) -> Result<Vec<QueueItem>>;

    /// Atomically claims up to `limit` due items, oldest first.
    ///
    /// Due means pending with `next_attempt_at <= now`, or processing with an
    /// expired lease. An item is skipped while an older item for the same
    /// document is still pending or processing, so one document's operations
    /// reach the ERP in enqueue order.
    async fn claim_due(&self, limit: usize) -> Result<Vec<QueueClaim>>;

    /// Marks the claimed item completed.
    async fn complete(&self, claim: &QueueClaim, receipt: QueueReceipt) -> Result<QueueItem>;

    /// Records a failed attempt: back to pending with backoff, or failed when
    /// the retry budget is spent or the rejection is permanent.
    async fn fail(&self, claim: &QueueClaim, error: &str, permanent: bool) -> Result<QueueItem>;

    /// Returns a claimed item to pending without counting an attempt.
    async fn release(&self, claim: &QueueClaim) -> Result<QueueItem>;

    /// Operator control: moves a failed item back to pending with a fresh retry budget.
    async fn requeue(&self, id: QueueItemId) -> Result<QueueItem>;
}
