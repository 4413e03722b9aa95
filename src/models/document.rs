use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Lifecycle state of a document in the coding pipeline.
///
/// Serialized snake_case both in API payloads (serde) and in the
/// `documents.status` column (strum).
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display, strum::EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum DocumentStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

/// One ICD-10 code assignment returned by the classifier.
///
/// Both fields are optional on purpose: the model is told to emit exactly
/// `code` and `description`, but elements missing a key are kept and left
/// for the consumer to render. Absent fields are omitted when serialized.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiagnosisCode {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// A medical document moving through the classification pipeline.
///
/// `results` and `error_message` are mutually exclusive: completion writes
/// codes and clears the error, failure writes the error and clears codes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    pub id: Uuid,
    pub status: DocumentStatus,
    pub image_key: String,
    pub results: Option<Vec<DiagnosisCode>>,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
