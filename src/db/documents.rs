use std::str::FromStr;

use async_trait::async_trait;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use uuid::Uuid;

use crate::models::document::{DiagnosisCode, Document, DocumentStatus};
use crate::services::pipeline::{DocumentStore, StoreError};

/// Insert a new document in `pending` state.
pub async fn create_document(pool: &PgPool, image_key: &str) -> Result<Document, sqlx::Error> {
    let row = sqlx::query(
        r#"
        INSERT INTO documents (status, image_key)
        VALUES ('pending', $1)
        RETURNING id, status, image_key, results, error_message, created_at, updated_at
        "#,
    )
    .bind(image_key)
    .fetch_one(pool)
    .await?;

    document_from_row(&row)
}

/// Fetch a document by id.
pub async fn get_document(pool: &PgPool, id: Uuid) -> Result<Option<Document>, sqlx::Error> {
    let row = sqlx::query(
        r#"
        SELECT id, status, image_key, results, error_message, created_at, updated_at
        FROM documents
        WHERE id = $1
        "#,
    )
    .bind(id)
    .fetch_optional(pool)
    .await?;

    row.as_ref().map(document_from_row).transpose()
}

fn document_from_row(row: &PgRow) -> Result<Document, sqlx::Error> {
    let status_str: String = row.try_get("status")?;
    // Unknown column values read as pending rather than poisoning the fetch.
    let status = DocumentStatus::from_str(&status_str).unwrap_or(DocumentStatus::Pending);

    let results: Option<serde_json::Value> = row.try_get("results")?;
    let results = results.and_then(|value| serde_json::from_value::<Vec<DiagnosisCode>>(value).ok());

    Ok(Document {
        id: row.try_get("id")?,
        status,
        image_key: row.try_get("image_key")?,
        results,
        error_message: row.try_get("error_message")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

// ── Pipeline-facing store ───────────────────────────────────────────────────

/// Transition-specific updates keep the exclusivity rule in the SQL itself:
/// whichever of `results`/`error_message` is not being written gets cleared.
#[async_trait]
impl DocumentStore for PgPool {
    async fn get(&self, id: Uuid) -> Result<Option<Document>, StoreError> {
        Ok(get_document(self, id).await?)
    }

    async fn mark_processing(&self, id: Uuid) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            UPDATE documents
            SET status = 'processing',
                error_message = NULL,
                updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .execute(self)
        .await
        .map_err(StoreError::Database)?;

        Ok(())
    }

    async fn mark_completed(&self, id: Uuid, results: &[DiagnosisCode]) -> Result<(), StoreError> {
        let results_json = serde_json::to_value(results)?;
        sqlx::query(
            r#"
            UPDATE documents
            SET status = 'completed',
                results = $2,
                error_message = NULL,
                updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(results_json)
        .execute(self)
        .await
        .map_err(StoreError::Database)?;

        Ok(())
    }

    async fn mark_failed(&self, id: Uuid, error_message: &str) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            UPDATE documents
            SET status = 'failed',
                error_message = $2,
                results = NULL,
                updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(error_message)
        .execute(self)
        .await
        .map_err(StoreError::Database)?;

        Ok(())
    }
}
