use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::models::document::{DiagnosisCode, Document, DocumentStatus};

/// Document body returned by the upload (202) and status (200) endpoints.
///
/// `image_key` is intentionally absent: it points at an encrypted blob and
/// means nothing to API consumers.
#[derive(Debug, Serialize)]
pub struct DocumentResponse {
    pub id: Uuid,
    pub status: DocumentStatus,
    pub results: Option<Vec<DiagnosisCode>>,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl From<Document> for DocumentResponse {
    fn from(doc: Document) -> Self {
        Self {
            id: doc.id,
            status: doc.status,
            results: doc.results,
            error_message: doc.error_message,
            created_at: doc.created_at,
        }
    }
}
