use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use uuid::Uuid;

use crate::models::document::{DiagnosisCode, Document, DocumentStatus};
use crate::services::classifier::{Classifier, ClassifierError};
use crate::services::dispatcher::{DispatchError, Dispatcher, WorkItem};
use crate::services::preprocess::{self, PreprocessError};
use crate::services::storage::{ImageStore, StorageError};

// ── Retry policy ────────────────────────────────────────────────────────────

/// Retries after the first attempt, so a document gets at most
/// `MAX_RETRIES + 1` classification attempts.
pub const MAX_RETRIES: u32 = 2;

/// Backoff before a scheduled retry is redelivered.
pub const RETRY_DELAY: Duration = Duration::from_secs(10);

// ── Document store contract ─────────────────────────────────────────────────

/// The persistence operations the pipeline drives. Implemented for
/// `sqlx::PgPool` in `db::documents`; tests substitute an in-memory store.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn get(&self, id: Uuid) -> Result<Option<Document>, StoreError>;

    /// `pending|failed -> processing`; clears `error_message`.
    async fn mark_processing(&self, id: Uuid) -> Result<(), StoreError>;

    /// `processing -> completed`; writes results, clears `error_message`.
    async fn mark_completed(&self, id: Uuid, results: &[DiagnosisCode]) -> Result<(), StoreError>;

    /// `processing -> failed`; writes `error_message`, clears results.
    async fn mark_failed(&self, id: Uuid, error_message: &str) -> Result<(), StoreError>;
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
}

// ── Attempt failures ────────────────────────────────────────────────────────

/// Everything that can sink a single classification attempt. Decode failures
/// are deterministic for the stored bytes and never retried; storage and
/// classifier failures are transient and eligible for redelivery.
#[derive(Debug, thiserror::Error)]
pub enum AttemptError {
    #[error(transparent)]
    Image(#[from] PreprocessError),

    #[error("could not load stored image: {0}")]
    Fetch(#[from] StorageError),

    #[error(transparent)]
    Classify(#[from] ClassifierError),
}

impl AttemptError {
    pub fn is_retryable(&self) -> bool {
        !matches!(self, AttemptError::Image(_))
    }
}

/// Infrastructure failures the pipeline cannot absorb (store or dispatcher
/// unreachable). These bubble to the worker loop; the claimed item stays on
/// the processing list for external recovery.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Dispatch(#[from] DispatchError),
}

// ── Outcome ─────────────────────────────────────────────────────────────────

/// What a delivery amounted to, for the worker's logs and counters.
#[derive(Debug, PartialEq, Eq)]
pub enum Outcome {
    Completed { codes: usize },
    Failed { retry_scheduled: bool },
    Skipped(SkipReason),
}

#[derive(Debug, PartialEq, Eq)]
pub enum SkipReason {
    /// No record for the delivered id; the item is acknowledged and dropped.
    NotFound,
    /// Terminal already; redelivery must not re-classify or touch results.
    AlreadyCompleted,
}

// ── Pipeline ────────────────────────────────────────────────────────────────

/// Drives one document delivery through the state machine:
/// `pending|failed -> processing -> completed|failed`, with an explicit
/// bounded-retry decision on failure.
pub struct Pipeline {
    store: Arc<dyn DocumentStore>,
    images: Arc<dyn ImageStore>,
    classifier: Arc<dyn Classifier>,
    dispatcher: Arc<dyn Dispatcher>,
}

impl Pipeline {
    pub fn new(
        store: Arc<dyn DocumentStore>,
        images: Arc<dyn ImageStore>,
        classifier: Arc<dyn Classifier>,
        dispatcher: Arc<dyn Dispatcher>,
    ) -> Self {
        Self {
            store,
            images,
            classifier,
            dispatcher,
        }
    }

    pub async fn process(&self, item: &WorkItem) -> Result<Outcome, PipelineError> {
        let Some(document) = self.store.get(item.document_id).await? else {
            tracing::info!(
                document_id = %item.document_id,
                "no record for delivered document, acknowledging"
            );
            return Ok(Outcome::Skipped(SkipReason::NotFound));
        };

        if document.status == DocumentStatus::Completed {
            tracing::info!(
                document_id = %document.id,
                "document already completed, skipping redelivery"
            );
            return Ok(Outcome::Skipped(SkipReason::AlreadyCompleted));
        }

        // Visible-state transition happens before any external call.
        self.store.mark_processing(document.id).await?;

        match self.run_attempt(&document).await {
            Ok(codes) => {
                self.store.mark_completed(document.id, &codes).await?;
                tracing::info!(
                    document_id = %document.id,
                    attempt = item.attempt,
                    codes = codes.len(),
                    "document classified"
                );
                Ok(Outcome::Completed { codes: codes.len() })
            }
            Err(err) => {
                tracing::warn!(
                    document_id = %document.id,
                    attempt = item.attempt,
                    error = %err,
                    "classification attempt failed"
                );
                // Failed state lands first so pollers always see the latest
                // diagnostic, then the retry decision is made explicitly.
                self.store
                    .mark_failed(document.id, &err.to_string())
                    .await?;

                let retry = err.is_retryable() && item.attempt < MAX_RETRIES;
                if retry {
                    self.dispatcher.schedule_retry(item, RETRY_DELAY).await?;
                    tracing::info!(
                        document_id = %document.id,
                        next_attempt = item.attempt + 1,
                        delay_secs = RETRY_DELAY.as_secs(),
                        "retry scheduled"
                    );
                } else {
                    tracing::warn!(
                        document_id = %document.id,
                        attempts = item.attempt + 1,
                        "document failed permanently"
                    );
                }
                Ok(Outcome::Failed {
                    retry_scheduled: retry,
                })
            }
        }
    }

    /// One classification attempt: load the original, normalize it, call the
    /// classifier. No persistence in here.
    async fn run_attempt(&self, document: &Document) -> Result<Vec<DiagnosisCode>, AttemptError> {
        tracing::debug!(document_id = %document.id, image_key = %document.image_key, "loading stored image");
        let raw = self.images.fetch(&document.image_key).await?;

        let encoded = preprocess::prepare_for_classifier(&raw)?;
        tracing::debug!(
            document_id = %document.id,
            payload_bytes = encoded.bytes.len(),
            "image prepared, calling classifier"
        );

        let codes = self.classifier.classify(&encoded).await?;
        Ok(codes)
    }
}

// ── Tests ───────────────────────────────────────────────────────────────────
