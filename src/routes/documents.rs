use axum::extract::{Multipart, Path, State};
use axum::http::StatusCode;
use axum::Json;
use uuid::Uuid;

use crate::app_state::AppState;
use crate::db::documents;
use crate::models::api::DocumentResponse;
use crate::services::dispatcher::Dispatcher;
use crate::services::storage::ImageStore;

/// POST /api/v1/documents — accept a medical document image for coding.
///
/// Stores the encrypted original, creates the pending record, and enqueues
/// the first delivery. Responds 202: classification happens asynchronously
/// and clients poll the status endpoint.
pub async fn upload_document(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<(StatusCode, Json<DocumentResponse>), StatusCode> {
    let mut image_data: Option<Vec<u8>> = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|_| StatusCode::BAD_REQUEST)?
    {
        if field.name() == Some("file") {
            let data = field.bytes().await.map_err(|_| StatusCode::BAD_REQUEST)?;

            // Cheap magic-byte sniff; full decoding happens in the worker.
            image::guess_format(&data).map_err(|_| StatusCode::UNSUPPORTED_MEDIA_TYPE)?;

            image_data = Some(data.to_vec());
        }
    }

    let image_data = image_data.ok_or(StatusCode::BAD_REQUEST)?;
    let image_key = format!("documents/{}.enc", Uuid::new_v4());

    state
        .images
        .store(&image_key, &image_data)
        .await
        .map_err(|e| internal_error("failed to store document image", &e))?;

    let document = documents::create_document(&state.db, &image_key)
        .await
        .map_err(|e| internal_error("failed to create document record", &e))?;

    state
        .dispatcher
        .enqueue(document.id)
        .await
        .map_err(|e| internal_error("failed to enqueue document", &e))?;

    metrics::counter!("documents_submitted_total").increment(1);
    tracing::info!(
        document_id = %document.id,
        image_bytes = image_data.len(),
        "document accepted for classification"
    );

    Ok((StatusCode::ACCEPTED, Json(document.into())))
}

/// GET /api/v1/documents/{id} — current state of a document.
pub async fn get_document(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<DocumentResponse>, StatusCode> {
    match documents::get_document(&state.db, id).await {
        Ok(Some(document)) => Ok(Json(document.into())),
        Ok(None) => Err(StatusCode::NOT_FOUND),
        Err(e) => Err(internal_error("failed to load document", &e)),
    }
}

fn internal_error(context: &str, err: &dyn std::fmt::Display) -> StatusCode {
    tracing::error!(error = %err, "{context}");
    StatusCode::INTERNAL_SERVER_ERROR
}
