//! Operational HTTP surface for the outbound delivery subsystem.
//!
//! Exposes destination and queue inspection, operator controls (activate,
//! deactivate, requeue, immediate sync), worker statistics, and Prometheus
//! metrics. Producers do not go through HTTP; they call the library APIs.

pub mod config;
pub mod error;
pub mod routes;
pub mod stores;

use std::sync::Arc;

use axum::Router;
use axum::routing::{get, post};
use delivery::SchedulerHandle;
use event_log::EventLog;
use metrics_exporter_prometheus::PrometheusHandle;
use registry::{DestinationRegistry, QueueStore};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

pub use config::Config;
pub use stores::Stores;

/// Shared application state accessible from all handlers.
pub struct AppState {
    pub log: Arc<dyn EventLog>,
    pub registry: Arc<dyn DestinationRegistry>,
    pub queue: Arc<dyn QueueStore>,
    pub scheduler: SchedulerHandle,
}

impl AppState {
    pub fn new(stores: &Stores, scheduler: SchedulerHandle) -> Self {
        Self {
            log: stores.log.clone(),
            registry: stores.registry.clone(),
            queue: stores.queue.clone(),
            scheduler,
        }
    }
}

/// Creates the Axum application router with all routes and shared state.
pub fn create_app(state: Arc<AppState>, metrics_handle: PrometheusHandle) -> Router {
    let metrics_router = Router::new()
        .route("/metrics", get(routes::ops::metrics))
        .with_state(metrics_handle);

    Router::new()
        .route("/health", get(routes::ops::health))
        .route("/stats", get(routes::ops::stats))
        .route("/sync/{category}", post(routes::ops::sync))
        .route("/destinations", get(routes::destinations::list))
        .route(
            "/destinations/{id}/activate",
            post(routes::destinations::activate),
        )
        .route(
            "/destinations/{id}/deactivate",
            post(routes::destinations::deactivate),
        )
        .route("/queue-items", get(routes::queue_items::list))
        .route(
            "/queue-items/{id}/requeue",
            post(routes::queue_items::requeue),
        )
        .with_state(state)
        .merge(metrics_router)
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
}
