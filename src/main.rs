mod app_state;
mod config;
mod db;
mod models;
mod routes;
mod services;

use axum::{routing::get, routing::post, Router};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tower_http::compression::CompressionLayer;
use tower_http::cors::CorsLayer;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

use app_state::AppState;
use config::AppConfig;
use db::{jobs::PgJobStore, quota::PgQuotaStore};
use services::{
    cleanup::ExpiryScheduler,
    figures::FigureCatalog,
    fusion::FaceFusionClient,
    orchestrator::{JobOrchestrator, OrchestratorSettings},
    retry::RetryPolicy,
    storage::R2Client,
};

#[tokio::main]
async fn main() {
    // Initialize structured logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .json()
        .init();

    // Load configuration from environment
    let config = AppConfig::from_env().expect("Failed to load configuration from environment");

    tracing::info!("Initializing facefuse server");

    // Initialize Prometheus metrics recorder
    let prometheus_handle = PrometheusBuilder::new()
        .install_recorder()
        .expect("Failed to install Prometheus metrics recorder");
    let prometheus_handle = Arc::new(prometheus_handle);

    // Register application metrics
    metrics::describe_counter!("generation_jobs_total", "Total generation jobs admitted");
    metrics::describe_counter!(
        "generation_jobs_completed",
        "Total generation jobs completed"
    );
    metrics::describe_counter!("generation_jobs_failed", "Total generation jobs that failed");
    metrics::describe_counter!(
        "generation_rejected_busy_total",
        "Submissions rejected because all fusion slots were taken"
    );
    metrics::describe_counter!(
        "generation_rejected_quota_total",
        "Submissions rejected because the identity exhausted its quota"
    );
    metrics::describe_counter!(
        "fusion_retries_total",
        "Retried calls against the fusion upstream"
    );
    metrics::describe_histogram!(
        "generation_processing_seconds",
        "Time to run one fusion job end to end"
    );
    metrics::describe_counter!(
        "cleanup_deleted_total",
        "Expired artifact records cleaned up"
    );
    metrics::describe_counter!(
        "cleanup_failed_total",
        "Expired artifact records whose cleanup failed"
    );

    // Initialize database connection pool
    tracing::info!("Connecting to PostgreSQL database");
    let db_pool = db::init_pool(&config.database_url)
        .await
        .expect("Failed to connect to database");

    // Run database migrations
    tracing::info!("Running database migrations");
    db::run_migrations(&db_pool)
        .await
        .expect("Failed to run database migrations");

    // Initialize R2 storage client
    tracing::info!("Initializing R2 storage client");
    let storage = R2Client::new(
        &config.r2_bucket,
        &config.r2_endpoint,
        &config.r2_access_key,
        &config.r2_secret_key,
        &config.r2_public_base,
    )
    .expect("Failed to initialize R2 client");
    let storage = Arc::new(storage);

    // Load the historical figure catalog
    let catalog = match &config.figures_path {
        Some(path) => FigureCatalog::from_path(path).expect("Failed to load figure catalog"),
        None => FigureCatalog::builtin(),
    };
    tracing::info!(figures = catalog.len(), "Figure catalog loaded");

    // Initialize the FaceFusion upstream client
    tracing::info!(space = %config.hf_space_url, "Initializing FaceFusion client");
    let fusion = FaceFusionClient::new(
        &config.hf_space_url,
        &config.hf_api_token,
        Duration::from_secs(config.fusion_timeout_secs),
    );

    let jobs = Arc::new(PgJobStore::new(db_pool.clone()));
    let quotas = Arc::new(PgQuotaStore::new(db_pool.clone()));

    let orchestrator = Arc::new(JobOrchestrator::new(
        jobs.clone(),
        quotas,
        storage.clone(),
        Arc::new(fusion),
        Arc::new(catalog),
        OrchestratorSettings {
            retry: RetryPolicy::with_max_attempts(config.fusion_max_attempts),
            retention: chrono::Duration::hours(config.retention_hours),
            max_concurrent_jobs: config.max_concurrent_jobs,
            capacity_ttl: Duration::from_secs(config.capacity_ttl_secs),
            ..OrchestratorSettings::default()
        },
    ));

    // Spawn the expiry scheduler: one process-lifetime task with a
    // supervised shutdown signal.
    let scheduler = Arc::new(ExpiryScheduler::new(
        jobs,
        storage,
        Duration::from_secs(config.cleanup_interval_hours * 60 * 60),
    ));
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(scheduler.run(shutdown_rx));

    // Create shared application state
    let state = AppState::new(db_pool, orchestrator);

    // Build API routes
    let app = Router::new()
        .route("/health", get(routes::health::health_check))
        .route("/api/v1/generate", post(routes::generate::submit_generation))
        .route("/api/v1/randomize", post(routes::generate::submit_randomize))
        .route("/api/v1/jobs/{id}", get(routes::generate::get_job_status))
        .route("/api/v1/usage", get(routes::generate::get_usage))
        .with_state(state)
        // Prometheus metrics endpoint (separate state)
        .route(
            "/metrics",
            get(routes::metrics::prometheus_metrics).with_state(prometheus_handle),
        )
        .layer(TraceLayer::new_for_http())
        .layer(CompressionLayer::new())
        .layer(CorsLayer::permissive())
        .layer(RequestBodyLimitLayer::new(10 * 1024 * 1024)); // 10 MB limit

    tracing::info!("Starting facefuse on {}", config.bind_addr);

    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .expect("Failed to bind to address");

    tracing::info!("Server listening on {}", config.bind_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            tokio::signal::ctrl_c()
                .await
                .expect("Failed to listen for shutdown signal");
            tracing::info!("Shutdown signal received");
        })
        .await
        .expect("Server error");

    // Stop the expiry scheduler alongside the server.
    let _ = shutdown_tx.send(true);
}
