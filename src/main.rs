use axum::{routing::get, routing::post, Router};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::sync::Arc;
use tower_http::compression::CompressionLayer;
use tower_http::cors::CorsLayer;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

use batch_enrich::{app_state::AppState, config::AppConfig, db, routes};

#[tokio::main]
async fn main() {
    // Initialize structured logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .json()
        .init();

    let config = AppConfig::from_env().expect("Failed to load configuration from environment");

    tracing::info!("Initializing batch-enrich admin server");

    let prometheus_handle = PrometheusBuilder::new()
        .install_recorder()
        .expect("Failed to install Prometheus metrics recorder");
    let prometheus_handle = Arc::new(prometheus_handle);

    metrics::describe_counter!(
        "batch_items_processed_total",
        "Records a batch step attempted to transform"
    );
    metrics::describe_counter!(
        "batch_items_updated_total",
        "Records patched with a successful transformation"
    );
    metrics::describe_counter!(
        "batch_items_failed_total",
        "Records marked with a terminal transformation failure"
    );
    metrics::describe_counter!(
        "batch_lockouts_total",
        "Runs skipped or refused because the job lock was held"
    );
    metrics::describe_histogram!("batch_step_seconds", "Duration of one batch step");

    tracing::info!("Connecting to PostgreSQL record store");
    let db_pool = db::init_pool(&config.database_url)
        .await
        .expect("Failed to connect to database");

    tracing::info!("Running database migrations");
    db::run_migrations(&db_pool)
        .await
        .expect("Failed to run database migrations");

    let state = AppState::from_config(&config, db_pool).expect("Failed to initialize services");

    let app = Router::new()
        .route("/health", get(routes::health::health_check))
        .route("/api/v1/jobs", get(routes::jobs::list_jobs))
        .route("/api/v1/jobs/{job}/step", post(routes::jobs::run_step))
        .route("/api/v1/jobs/{job}/drain", post(routes::jobs::run_drain))
        .route("/api/v1/jobs/{job}/status", get(routes::jobs::job_status))
        .route("/api/v1/jobs/{job}/reset", post(routes::jobs::reset_job))
        .with_state(state)
        // Prometheus metrics endpoint (separate state)
        .route(
            "/metrics",
            get(routes::metrics::prometheus_metrics).with_state(prometheus_handle),
        )
        .layer(TraceLayer::new_for_http())
        .layer(CompressionLayer::new())
        .layer(CorsLayer::permissive())
        .layer(RequestBodyLimitLayer::new(64 * 1024));

    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .expect("Failed to bind to address");

    tracing::info!("Admin server listening on {}", config.bind_addr);

    axum::serve(listener, app).await.expect("Server error");
}
