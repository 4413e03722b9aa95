use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use metrics_exporter_prometheus::PrometheusBuilder;
use tokio::time::sleep;
use tracing_subscriber::EnvFilter;

use medcoder::config::AppConfig;
use medcoder::db;
use medcoder::services::classifier::{Classifier, VlmClassifier};
use medcoder::services::dispatcher::{Dispatcher, RedisDispatcher};
use medcoder::services::pipeline::{DocumentStore, Outcome, Pipeline, SkipReason};
use medcoder::services::storage::{ImageStore, R2ImageStore};

const POLL_INTERVAL_MS: u64 = 1000; // 1 second

type WorkerError = Box<dyn std::error::Error + Send + Sync>;

#[tokio::main]
async fn main() {
    // Initialize structured logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .json()
        .init();

    tracing::info!("Starting medcoder worker");

    // Load configuration
    let config = AppConfig::from_env().expect("Failed to load configuration");

    // The worker has no HTTP surface, so the Prometheus exporter gets its own
    // listener instead of an axum route.
    let metrics_addr: SocketAddr = config
        .worker_metrics_addr
        .parse()
        .expect("Invalid WORKER_METRICS_ADDR");
    PrometheusBuilder::new()
        .with_http_listener(metrics_addr)
        .install()
        .expect("Failed to install Prometheus exporter");

    metrics::describe_histogram!(
        "document_processing_seconds",
        "Time to process one document delivery"
    );
    metrics::describe_counter!(
        "documents_completed_total",
        "Documents classified successfully"
    );
    metrics::describe_counter!(
        "documents_failed_total",
        "Documents that exhausted their attempts"
    );
    metrics::describe_counter!(
        "classification_retries_total",
        "Retries scheduled after failed attempts"
    );
    metrics::describe_gauge!(
        "document_queue_depth",
        "Documents currently waiting for delivery"
    );

    // Initialize database
    tracing::info!("Connecting to PostgreSQL");
    let db_pool = db::init_pool(&config.database_url)
        .await
        .expect("Failed to connect to database");

    // Initialize services
    tracing::info!("Initializing services");
    let images: Arc<dyn ImageStore> = Arc::new(
        R2ImageStore::new(
            &config.r2_bucket,
            &config.r2_endpoint,
            &config.r2_access_key,
            &config.r2_secret_key,
            &config.encryption_key,
        )
        .expect("Failed to initialize image storage"),
    );

    let dispatcher = Arc::new(
        RedisDispatcher::new(&config.redis_url).expect("Failed to initialize dispatcher"),
    );

    let classifier: Arc<dyn Classifier> = Arc::new(
        VlmClassifier::new(config.classifier()).expect("Failed to initialize classifier client"),
    );

    let store: Arc<dyn DocumentStore> = Arc::new(db_pool);
    let pipeline = Arc::new(Pipeline::new(
        store,
        images,
        classifier,
        dispatcher.clone() as Arc<dyn Dispatcher>,
    ));

    tracing::info!(
        concurrency = config.worker_concurrency,
        "Worker ready, starting processing loops"
    );

    let mut handles = Vec::new();
    for worker_id in 0..config.worker_concurrency {
        let dispatcher = dispatcher.clone();
        let pipeline = pipeline.clone();
        handles.push(tokio::spawn(run_loop(worker_id, dispatcher, pipeline)));
    }
    for handle in handles {
        if let Err(e) = handle.await {
            tracing::error!(error = %e, "worker loop terminated");
        }
    }
}

/// One polling loop. Runs forever; infrastructure errors are logged and the
/// loop backs off rather than dying.
async fn run_loop(worker_id: usize, dispatcher: Arc<RedisDispatcher>, pipeline: Arc<Pipeline>) {
    loop {
        match poll_once(&dispatcher, &pipeline).await {
            Ok(true) => {
                tracing::debug!(worker_id, "delivery handled, checking for next");
            }
            Ok(false) => {
                tracing::trace!(worker_id, "queue empty, sleeping");
                sleep(Duration::from_millis(POLL_INTERVAL_MS)).await;
            }
            Err(e) => {
                tracing::error!(worker_id, error = %e, "delivery handling error, backing off");
                sleep(Duration::from_millis(POLL_INTERVAL_MS)).await;
            }
        }
    }
}

/// Claim and process one delivery.
/// Returns Ok(true) if an item was handled, Ok(false) if the queue was empty.
async fn poll_once(
    dispatcher: &RedisDispatcher,
    pipeline: &Pipeline,
) -> Result<bool, WorkerError> {
    if let Ok(depth) = dispatcher.queue_depth().await {
        metrics::gauge!("document_queue_depth").set(depth as f64);
    }

    let item = match dispatcher.dequeue().await? {
        Some(item) => item,
        None => return Ok(false),
    };

    tracing::info!(
        document_id = %item.document_id,
        attempt = item.attempt,
        "processing delivery"
    );

    let start = Instant::now();
    // Infrastructure errors bubble out here and leave the claim on the
    // processing list; attempt failures are absorbed into the outcome.
    let outcome = pipeline.process(&item).await?;
    dispatcher.complete(&item).await?;

    metrics::histogram!("document_processing_seconds").record(start.elapsed().as_secs_f64());

    match outcome {
        Outcome::Completed { codes } => {
            metrics::counter!("documents_completed_total").increment(1);
            tracing::info!(
                document_id = %item.document_id,
                codes,
                duration_ms = start.elapsed().as_millis() as u64,
                "delivery completed"
            );
        }
        Outcome::Failed { retry_scheduled: true } => {
            metrics::counter!("classification_retries_total").increment(1);
        }
        Outcome::Failed { retry_scheduled: false } => {
            metrics::counter!("documents_failed_total").increment(1);
        }
        Outcome::Skipped(SkipReason::NotFound) | Outcome::Skipped(SkipReason::AlreadyCompleted) => {
            tracing::debug!(document_id = %item.document_id, "delivery skipped");
        }
    }

    Ok(true)
}
