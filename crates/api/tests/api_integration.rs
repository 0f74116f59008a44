//! Integration tests for the operational API.

use std::sync::{Arc, OnceLock};

use api::{AppState, Config, Stores};
use axum::body::Body;
use axum::http::{Request, StatusCode};
use common::{DocumentId, ErpOperation};
use delivery::Scheduler;
use event_log::NewEvent;
use metrics_exporter_prometheus::PrometheusHandle;
use registry::{NewDestination, NewQueueItem};
use serde_json::json;
use tower::ServiceExt;

static METRICS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

fn get_metrics_handle() -> PrometheusHandle {
    METRICS_HANDLE
        .get_or_init(|| {
            let builder = metrics_exporter_prometheus::PrometheusBuilder::new();
            builder
                .install_recorder()
                .expect("failed to install Prometheus recorder")
        })
        .clone()
}

/// Router over in-memory stores. The scheduler is never started, so the
/// stores only change through the test.
fn setup() -> (axum::Router, Stores) {
    let config = Config {
        erp_endpoint: Some("https://erp.test/api".to_string()),
        erp_secret: "erp-secret".to_string(),
        ..Config::default()
    };
    let stores = Stores::in_memory(&config);
    let scheduler = Scheduler::new(config.scheduler_config(), stores.pipelines(&config).unwrap());

    let state = Arc::new(AppState::new(&stores, scheduler.handle()));
    (api::create_app(state, get_metrics_handle()), stores)
}

async fn send(app: &axum::Router, method: &str, uri: &str) -> (StatusCode, serde_json::Value) {
    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method(method)
                .uri(uri)
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    let status = response.status();
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let json = if body.is_empty() {
        serde_json::Value::Null
    } else {
        serde_json::from_slice(&body).unwrap_or(serde_json::Value::Null)
    };
    (status, json)
}

async fn register(stores: &Stores, name: &str) -> registry::Destination {
    stores
        .registry
        .register(NewDestination::new(
            "document.events",
            name,
            format!("https://{name}.test/hooks"),
            "whsec_api",
        ))
        .await
        .unwrap()
}

#[tokio::test]
async fn test_health_check() {
    let (app, _) = setup();

    let (status, json) = send(&app, "GET", "/health").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["status"], "ok");
    assert_eq!(json["pipelines"], json!(["document.events", "erp"]));
}

#[tokio::test]
async fn test_metrics_endpoint() {
    let (app, _) = setup();

    let response = app
        .oneshot(
            Request::builder()
                .uri("/metrics")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert!(
        response.headers()["content-type"]
            .to_str()
            .unwrap()
            .starts_with("text/plain")
    );
}

#[tokio::test]
async fn test_list_destinations_reports_lag() {
    let (app, stores) = setup();
    let destination = register(&stores, "acme").await;
    for i in 0..3 {
        stores
            .log
            .append(
                "document.events",
                NewEvent::new("DocumentSubmitted", format!("doc-{i}"), json!({})),
            )
            .await
            .unwrap();
    }

    let (status, json) = send(&app, "GET", "/destinations").await;

    assert_eq!(status, StatusCode::OK);
    let listed = json.as_array().unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0]["id"], destination.id.to_string());
    assert_eq!(listed[0]["cursor"], 0);
    assert_eq!(listed[0]["head"], 3);
    assert_eq!(listed[0]["lag"], 3);
    assert_eq!(listed[0]["is_active"], true);
    assert!(listed[0].get("secret").is_none());
}

#[tokio::test]
async fn test_list_destinations_by_category() {
    let (app, stores) = setup();
    register(&stores, "acme").await;

    let (_, json) = send(&app, "GET", "/destinations?category=package.events").await;
    assert_eq!(json, json!([]));

    let (_, json) = send(&app, "GET", "/destinations?category=document.events").await;
    assert_eq!(json.as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn test_deactivate_and_activate_destination() {
    let (app, stores) = setup();
    let destination = register(&stores, "acme").await;

    let (status, json) = send(
        &app,
        "POST",
        &format!("/destinations/{}/deactivate", destination.id),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["is_active"], false);

    let stored = stores.registry.get(destination.id).await.unwrap().unwrap();
    assert!(!stored.is_active);

    let (status, json) = send(
        &app,
        "POST",
        &format!("/destinations/{}/activate", destination.id),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["is_active"], true);
}

#[tokio::test]
async fn test_activate_unknown_destination() {
    let (app, _) = setup();

    let (status, _) = send(
        &app,
        "POST",
        &format!("/destinations/{}/activate", common::DestinationId::new()),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, json) = send(&app, "POST", "/destinations/not-a-uuid/activate").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(json["error"].as_str().unwrap().contains("Invalid destination id"));
}

#[tokio::test]
async fn test_list_queue_items_with_status_filter() {
    let (app, stores) = setup();
    for version in 1..=2 {
        stores
            .queue
            .enqueue(NewQueueItem::new(
                DocumentId::new(),
                version,
                ErpOperation::UpsertDocument,
                json!({ "number": format!("INV-{version}") }),
            ))
            .await
            .unwrap();
    }

    let (status, json) = send(&app, "GET", "/queue-items").await;
    assert_eq!(status, StatusCode::OK);
    let items = json.as_array().unwrap();
    assert_eq!(items.len(), 2);
    assert_eq!(items[0]["status"], "pending");
    assert_eq!(items[0]["operation"], "UpsertDocument");

    let (_, json) = send(&app, "GET", "/queue-items?limit=1").await;
    assert_eq!(json.as_array().unwrap().len(), 1);

    let (_, json) = send(&app, "GET", "/queue-items?status=failed").await;
    assert_eq!(json, json!([]));

    let (status, _) = send(&app, "GET", "/queue-items?status=bogus").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_requeue_failed_item() {
    let (app, stores) = setup();
    let item = stores
        .queue
        .enqueue(NewQueueItem::new(
            DocumentId::new(),
            1,
            ErpOperation::PostDocument,
            json!({}),
        ))
        .await
        .unwrap();

    // Pending items cannot be requeued.
    let (status, _) = send(&app, "POST", &format!("/queue-items/{}/requeue", item.id)).await;
    assert_eq!(status, StatusCode::CONFLICT);

    let claim = stores.queue.claim_due(1).await.unwrap().pop().unwrap();
    stores
        .queue
        .fail(&claim, "unknown supplier", true)
        .await
        .unwrap();

    let (status, json) = send(&app, "POST", &format!("/queue-items/{}/requeue", item.id)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["status"], "pending");
    assert_eq!(json["retry_count"], 0);
}

#[tokio::test]
async fn test_requeue_unknown_item() {
    let (app, _) = setup();

    let (status, _) = send(
        &app,
        "POST",
        &format!("/queue-items/{}/requeue", common::QueueItemId::new()),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_stats_per_pipeline() {
    let (app, _) = setup();

    let (status, json) = send(&app, "GET", "/stats").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["pipelines"]["document.events"]["ticks"], 0);
    assert_eq!(json["pipelines"]["erp"]["delivered"], 0);
}

#[tokio::test]
async fn test_sync_known_and_unknown_pipelines() {
    let (app, _) = setup();

    let (status, json) = send(&app, "POST", "/sync/document.events").await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(json["pipeline"], "document.events");

    let (status, _) = send(&app, "POST", "/sync/erp").await;
    assert_eq!(status, StatusCode::ACCEPTED);

    let (status, _) = send(&app, "POST", "/sync/package.events").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}
