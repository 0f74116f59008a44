//! ERP queue inspection and requeue.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, Query, State};
use chrono::{DateTime, Utc};
use common::{DocumentStatus, QueueItemId};
use registry::{QueueItem, QueueStatus};
use serde::{Deserialize, Serialize};

use crate::AppState;
use crate::error::ApiError;

const DEFAULT_LIMIT: usize = 50;
const MAX_LIMIT: usize = 500;

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    pub limit: Option<usize>,
    pub status: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct QueueItemResponse {
    pub id: String,
    pub document_id: String,
    pub document_version: i64,
    pub operation: String,
    pub status: QueueStatus,
    pub retry_count: u32,
    pub error_message: Option<String>,
    pub external_reference: Option<String>,
    pub external_status: Option<DocumentStatus>,
    pub next_attempt_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl From<QueueItem> for QueueItemResponse {
    fn from(item: QueueItem) -> Self {
        Self {
            id: item.id.to_string(),
            document_id: item.document_id.to_string(),
            document_version: item.document_version,
            operation: item.operation.to_string(),
            status: item.status,
            retry_count: item.retry_count,
            error_message: item.error_message,
            external_reference: item.external_reference,
            external_status: item.external_status,
            next_attempt_at: item.next_attempt_at,
            created_at: item.created_at,
            processed_at: item.processed_at,
            completed_at: item.completed_at,
        }
    }
}

/// GET /queue-items?limit=&status=: Newest first.
#[tracing::instrument(skip(state))]
pub async fn list(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ListQuery>,
) -> Result<Json<Vec<QueueItemResponse>>, ApiError> {
    let limit = query.limit.unwrap_or(DEFAULT_LIMIT).min(MAX_LIMIT);
    let status = query
        .status
        .as_deref()
        .map(str::parse::<QueueStatus>)
        .transpose()
        .map_err(|e| ApiError::BadRequest(e.to_string()))?;

    let items = state.queue.recent(limit, status).await?;
    Ok(Json(items.into_iter().map(QueueItemResponse::from).collect()))
}

/// POST /queue-items/{id}/requeue: Moves a failed item back to pending.
#[tracing::instrument(skip(state))]
pub async fn requeue(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<QueueItemResponse>, ApiError> {
    let id: QueueItemId = id
        .parse()
        .map_err(|e| ApiError::BadRequest(format!("Invalid queue item id: {e}")))?;

    let item = state.queue.requeue(id).await?;
    tracing::info!(item_id = %id, document_id = %item.document_id, "Queue item requeued");
    Ok(Json(item.into()))
}
