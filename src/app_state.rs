use sqlx::PgPool;
use std::sync::Arc;

use crate::services::{
    classifier::VlmClassifier, dispatcher::RedisDispatcher, storage::R2ImageStore,
};

/// Shared application state passed to all route handlers.
#[derive(Clone)]
pub struct AppState {
    pub db: PgPool,
    pub images: Arc<R2ImageStore>,
    pub dispatcher: Arc<RedisDispatcher>,
    pub classifier: Arc<VlmClassifier>,
}

impl AppState {
    pub fn new(
        db: PgPool,
        images: R2ImageStore,
        dispatcher: RedisDispatcher,
        classifier: VlmClassifier,
    ) -> Self {
        Self {
            db,
            images: Arc::new(images),
            dispatcher: Arc::new(dispatcher),
            classifier: Arc::new(classifier),
        }
    }
}
