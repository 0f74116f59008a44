//! Destination inspection and operator controls.

use std::collections::HashMap;
use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, Query, State};
use chrono::{DateTime, Utc};
use common::DestinationId;
use registry::Destination;
use serde::{Deserialize, Serialize};

use crate::AppState;
use crate::error::ApiError;

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    pub category: Option<String>,
}

/// A destination's delivery state. The signing secret is never exposed.
#[derive(Debug, Serialize)]
pub struct DestinationResponse {
    pub id: String,
    pub category: String,
    pub name: String,
    pub endpoint: String,
    pub event_types: Vec<String>,
    pub is_active: bool,
    pub cursor: i64,
    pub head: i64,
    /// Events in the category after the cursor, subscribed or not.
    pub lag: i64,
    pub consecutive_failures: u32,
    pub next_retry_at: DateTime<Utc>,
    pub last_error: Option<String>,
    pub last_success_at: Option<DateTime<Utc>>,
    pub claimed_until: Option<DateTime<Utc>>,
}

impl DestinationResponse {
    fn new(destination: Destination, head: i64) -> Self {
        let cursor = destination.cursor.as_i64();
        Self {
            id: destination.id.to_string(),
            category: destination.category,
            name: destination.name,
            endpoint: destination.endpoint,
            event_types: destination.event_types,
            is_active: destination.is_active,
            cursor,
            head,
            lag: (head - cursor).max(0),
            consecutive_failures: destination.consecutive_failures,
            next_retry_at: destination.next_retry_at,
            last_error: destination.last_error,
            last_success_at: destination.last_success_at,
            claimed_until: destination.claimed_until,
        }
    }
}

/// GET /destinations?category=
#[tracing::instrument(skip(state))]
pub async fn list(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ListQuery>,
) -> Result<Json<Vec<DestinationResponse>>, ApiError> {
    let destinations = state.registry.list(query.category.as_deref()).await?;

    let mut heads: HashMap<String, i64> = HashMap::new();
    let mut responses = Vec::with_capacity(destinations.len());
    for destination in destinations {
        let head = match heads.get(&destination.category) {
            Some(head) => *head,
            None => {
                let head = state.log.head(&destination.category).await?.as_i64();
                heads.insert(destination.category.clone(), head);
                head
            }
        };
        responses.push(DestinationResponse::new(destination, head));
    }

    Ok(Json(responses))
}

/// POST /destinations/{id}/activate: Resumes delivery immediately.
#[tracing::instrument(skip(state))]
pub async fn activate(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<DestinationResponse>, ApiError> {
    set_active(&state, &id, true).await
}

/// POST /destinations/{id}/deactivate
#[tracing::instrument(skip(state))]
pub async fn deactivate(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<DestinationResponse>, ApiError> {
    set_active(&state, &id, false).await
}

async fn set_active(
    state: &AppState,
    id: &str,
    active: bool,
) -> Result<Json<DestinationResponse>, ApiError> {
    let id: DestinationId = id
        .parse()
        .map_err(|e| ApiError::BadRequest(format!("Invalid destination id: {e}")))?;

    let destination = state.registry.set_active(id, active).await?;
    let head = state.log.head(&destination.category).await?.as_i64();

    tracing::info!(destination_id = %id, active, "Destination activation changed");
    Ok(Json(DestinationResponse::new(destination, head)))
}
