//! Health, metrics, worker statistics and the manual sync trigger.

use std::collections::BTreeMap;
use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, State};
use axum::http::{StatusCode, header};
use axum::response::IntoResponse;
use delivery::WorkerStats;
use metrics_exporter_prometheus::PrometheusHandle;
use serde::Serialize;

use crate::AppState;
use crate::error::ApiError;

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub pipelines: Vec<String>,
}

#[derive(Serialize)]
pub struct StatsResponse {
    pub pipelines: BTreeMap<String, WorkerStats>,
}

#[derive(Serialize)]
pub struct SyncResponse {
    pub pipeline: String,
    pub status: &'static str,
}

/// GET /health
pub async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        pipelines: state.scheduler.pipeline_names(),
    })
}

/// GET /metrics: Prometheus text exposition.
pub async fn metrics(State(handle): State<PrometheusHandle>) -> impl IntoResponse {
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4; charset=utf-8")],
        handle.render(),
    )
}

/// GET /stats: Accumulated worker counters per pipeline.
pub async fn stats(State(state): State<Arc<AppState>>) -> Json<StatsResponse> {
    Json(StatsResponse {
        pipelines: state.scheduler.stats().await,
    })
}

/// POST /sync/{category}: Runs the pipeline's next tick now.
///
/// The webhook pipeline is addressed by its event category, the ERP pipeline
/// as `erp`.
#[tracing::instrument(skip(state))]
pub async fn sync(
    State(state): State<Arc<AppState>>,
    Path(category): Path<String>,
) -> Result<(StatusCode, Json<SyncResponse>), ApiError> {
    if !state.scheduler.kick(&category) {
        return Err(ApiError::NotFound(format!("No pipeline for category {category}")));
    }

    metrics::counter!("delivery_manual_syncs_total", "pipeline" => category.clone()).increment(1);
    tracing::info!(pipeline = %category, "Manual sync requested");

    Ok((
        StatusCode::ACCEPTED,
        Json(SyncResponse {
            pipeline: category,
            status: "scheduled",
        }),
    ))
}
