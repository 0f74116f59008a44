//! `outbound` entry point: stores, delivery pipelines and the operational API.

use std::sync::Arc;

use api::{AppState, Config, Stores};
use delivery::Scheduler;
use sqlx::postgres::PgPoolOptions;
use tokio::signal;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Waits for a shutdown signal (SIGINT or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install SIGINT handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("received SIGINT, starting graceful shutdown");
        }
        () = terminate => {
            tracing::info!("received SIGTERM, starting graceful shutdown");
        }
    }
}

#[tokio::main]
async fn main() {
    let config = Config::from_env();

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level)))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let metrics_handle = metrics_exporter_prometheus::PrometheusBuilder::new()
        .install_recorder()
        .expect("failed to install Prometheus recorder");

    let stores = match &config.database_url {
        Some(url) => {
            let pool = PgPoolOptions::new()
                .max_connections(10)
                .connect(url)
                .await
                .expect("failed to connect to PostgreSQL");
            tracing::info!("using PostgreSQL stores");
            Stores::postgres(pool, &config)
                .await
                .expect("failed to run migrations")
        }
        None => {
            tracing::warn!("DATABASE_URL not set, using in-memory stores");
            Stores::in_memory(&config)
        }
    };

    let pipelines = stores
        .pipelines(&config)
        .expect("failed to build delivery pipelines");
    let mut scheduler = Scheduler::new(config.scheduler_config(), pipelines);
    scheduler.start().expect("scheduler already started");

    let state = Arc::new(AppState::new(&stores, scheduler.handle()));
    let app = api::create_app(state, metrics_handle);

    let addr = config.addr();
    tracing::info!(%addr, "starting outbound API server");

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .expect("failed to bind address");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("server error");

    if let Err(e) = scheduler.shutdown().await {
        tracing::error!(error = %e, "delivery pipelines did not stop cleanly");
    }
    tracing::info!("server shut down gracefully");
}
