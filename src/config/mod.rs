use std::time::Duration;

use serde::Deserialize;

use crate::services::classifier::ClassifierConfig;

#[derive(Debug, Deserialize)]
pub struct AppConfig {
    /// Server bind address (e.g., "0.0.0.0:3000"). Unused by the worker.
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,

    /// PostgreSQL connection string
    pub database_url: String,

    /// Redis connection string for the document queue
    pub redis_url: String,

    /// OpenRouter API key for the vision-language classifier
    pub openrouter_api_key: String,

    /// Vision-language model identifier
    #[serde(default = "default_model")]
    pub openrouter_model: String,

    /// Chat-completions endpoint URL
    #[serde(default = "default_api_url")]
    pub openrouter_api_url: String,

    /// Hard cap on a single classifier request, in seconds
    #[serde(default = "default_classifier_timeout_secs")]
    pub classifier_timeout_secs: u64,

    /// R2 bucket name
    pub r2_bucket: String,

    /// R2 access key ID (S3-compatible)
    pub r2_access_key: String,

    /// R2 secret access key (S3-compatible)
    pub r2_secret_key: String,

    /// R2 endpoint URL
    pub r2_endpoint: String,

    /// AES-256-GCM encryption key (base64-encoded, 32 bytes)
    pub encryption_key: String,

    /// Concurrent processing loops per worker process
    #[serde(default = "default_worker_concurrency")]
    pub worker_concurrency: usize,

    /// Prometheus exposition address for the worker process
    #[serde(default = "default_worker_metrics_addr")]
    pub worker_metrics_addr: String,
}

fn default_bind_addr() -> String {
    "0.0.0.0:3000".to_string()
}

fn default_model() -> String {
    "nvidia/nemotron-nano-12b-v2-vl:free".to_string()
}

fn default_api_url() -> String {
    "https://openrouter.ai/api/v1/chat/completions".to_string()
}

fn default_classifier_timeout_secs() -> u64 {
    60
}

fn default_worker_concurrency() -> usize {
    2
}

fn default_worker_metrics_addr() -> String {
    "0.0.0.0:9464".to_string()
}

impl AppConfig {
    pub fn from_env() -> Result<Self, envy::Error> {
        dotenvy::dotenv().ok();
        envy::from_env()
    }

    /// The classifier client's slice of the configuration.
    pub fn classifier(&self) -> ClassifierConfig {
        ClassifierConfig {
            api_url: self.openrouter_api_url.clone(),
            api_key: self.openrouter_api_key.clone(),
            model: self.openrouter_model.clone(),
            timeout: Duration::from_secs(self.classifier_timeout_secs),
        }
    }
}
