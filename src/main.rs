use axum::response::Html;
use axum::{routing::get, routing::post, Router};
use metrics_exporter_prometheus::PrometheusBuilder;
use tower_http::compression::CompressionLayer;
use tower_http::cors::CorsLayer;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

use medcoder::app_state::AppState;
use medcoder::config::AppConfig;
use medcoder::services::{
    classifier::VlmClassifier, dispatcher::RedisDispatcher, storage::R2ImageStore,
};
use medcoder::{db, routes};

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

    tracing::info!("Initializing medcoder API server");

    // Initialize Prometheus metrics recorder
    let prometheus_handle = PrometheusBuilder::new()
        .install_recorder()
        .expect("Failed to install Prometheus metrics recorder");

    // Register API-side metrics
    metrics::describe_counter!(
        "documents_submitted_total",
        "Total documents accepted for classification"
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

    // Initialize encrypted image storage
    tracing::info!("Initializing R2 image storage");
    let images = R2ImageStore::new(
        &config.r2_bucket,
        &config.r2_endpoint,
        &config.r2_access_key,
        &config.r2_secret_key,
        &config.encryption_key,
    )
    .expect("Failed to initialize image storage");

    // Initialize Redis work dispatcher
    tracing::info!("Connecting to Redis dispatcher");
    let dispatcher =
        RedisDispatcher::new(&config.redis_url).expect("Failed to initialize dispatcher");

    // Initialize the classifier client (unused by API handlers, but constructed
    // here so a bad classifier configuration fails at boot, not in the worker)
    let classifier =
        VlmClassifier::new(config.classifier()).expect("Failed to initialize classifier client");

    // Create shared application state
    let state = AppState::new(db_pool, images, dispatcher, classifier);

    // Build API routes
    let app = Router::new()
        // Static UI (embedded at compile time)
        .route("/", get(|| async { Html(include_str!("../static/index.html")) }))
        // API endpoints
        .route("/health", get(routes::health::health_check))
        .route("/api/v1/documents", post(routes::documents::upload_document))
        .route(
            "/api/v1/documents/{id}",
            get(routes::documents::get_document),
        )
        .with_state(state)
        // Prometheus metrics endpoint
        .route(
            "/metrics",
            get(move || async move { prometheus_handle.render() }),
        )
        .layer(TraceLayer::new_for_http())
        .layer(CompressionLayer::new())
        .layer(CorsLayer::permissive())
        .layer(RequestBodyLimitLayer::new(10 * 1024 * 1024)); // 10 MB limit

    tracing::info!("Starting medcoder on {}", config.bind_addr);

    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .expect("Failed to bind to address");

    tracing::info!("Server listening on {}", config.bind_addr);

    axum::serve(listener, app).await.expect("Server error");
}
