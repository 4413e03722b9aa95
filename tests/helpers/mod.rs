//! Test helper utilities for E2E testing

use std::time::Duration;

use reqwest::multipart;
use serde::Deserialize;
use tokio::time::sleep;
use uuid::Uuid;

/// Body of POST /api/v1/documents and GET /api/v1/documents/{id} responses.
#[derive(Debug, Deserialize)]
pub struct DocumentStatusResponse {
    pub id: Uuid,
    pub status: String,
    pub results: Option<Vec<CodeEntry>>,
    pub error_message: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct CodeEntry {
    pub code: Option<String>,
    #[allow(dead_code)]
    pub description: Option<String>,
}

/// Renders a synthetic document page as a JPEG: light background with a dark
/// text-block pattern, so every upload is a valid, non-trivial image.
pub fn test_page_jpeg(width: u32, height: u32) -> Vec<u8> {
    let img = image::RgbImage::from_fn(width, height, |x, y| {
        let in_line = (y / 24) % 3 != 0 && x > width / 10 && x < width - width / 10;
        if in_line && (x + y) % 7 != 0 {
            image::Rgb([40, 40, 60])
        } else {
            image::Rgb([245, 245, 240])
        }
    });

    let mut buf = std::io::Cursor::new(Vec::new());
    image::DynamicImage::ImageRgb8(img)
        .write_to(&mut buf, image::ImageFormat::Jpeg)
        .expect("Failed to encode test image");
    buf.into_inner()
}

/// Upload an image to the documents endpoint.
pub async fn upload_document_image(
    client: &reqwest::Client,
    base_url: &str,
    image_bytes: Vec<u8>,
    filename: &str,
) -> Result<DocumentStatusResponse, Box<dyn std::error::Error + Send + Sync>> {
    let form = multipart::Form::new().part(
        "file",
        multipart::Part::bytes(image_bytes)
            .file_name(filename.to_string())
            .mime_str("image/jpeg")?,
    );

    let response = client
        .post(format!("{}/api/v1/documents", base_url))
        .multipart(form)
        .send()
        .await?;

    let status = response.status();
    if !status.is_success() {
        let error_text = response.text().await?;
        return Err(format!("Upload failed with status {}: {}", status, error_text).into());
    }

    let body = response.json::<DocumentStatusResponse>().await?;
    Ok(body)
}

/// Poll document status until completed or failed (with timeout).
pub async fn poll_document_status(
    client: &reqwest::Client,
    base_url: &str,
    id: Uuid,
    timeout_secs: u64,
) -> Result<DocumentStatusResponse, Box<dyn std::error::Error + Send + Sync>> {
    let max_attempts = timeout_secs * 2; // Poll every 500ms

    for attempt in 0..max_attempts {
        let response = client
            .get(format!("{}/api/v1/documents/{}", base_url, id))
            .send()
            .await?;

        if !response.status().is_success() {
            let error_text = response.text().await?;
            return Err(format!("Status check failed: {}", error_text).into());
        }

        let status_response = response.json::<DocumentStatusResponse>().await?;

        match status_response.status.as_str() {
            "completed" | "failed" => return Ok(status_response),
            "pending" | "processing" => {
                if attempt % 10 == 0 && attempt > 0 {
                    println!("  ... still waiting (attempt {}/{})", attempt, max_attempts);
                }
                sleep(Duration::from_millis(500)).await;
            }
            _ => {
                return Err(format!("Unknown document status: {}", status_response.status).into());
            }
        }
    }

    Err(format!("Document did not finish within {} seconds", timeout_secs).into())
}

/// Wait for the worker to classify a document. The timeout covers the worst
/// case of two scheduled retries plus classifier latency.
pub async fn wait_for_classification(
    client: &reqwest::Client,
    base_url: &str,
    id: Uuid,
) -> Result<DocumentStatusResponse, Box<dyn std::error::Error + Send + Sync>> {
    poll_document_status(client, base_url, id, 120).await
}

/// Completed documents carry results and no error; failed documents carry an
/// error and no results.
pub fn assert_result_error_exclusive(doc: &DocumentStatusResponse) {
    match doc.status.as_str() {
        "completed" => {
            assert!(
                doc.results.is_some(),
                "completed document {} has no results",
                doc.id
            );
            assert!(
                doc.error_message.is_none(),
                "completed document {} still carries an error: {:?}",
                doc.id,
                doc.error_message
            );
        }
        "failed" => {
            assert!(
                doc.error_message.is_some(),
                "failed document {} has no diagnostic",
                doc.id
            );
            assert!(
                doc.results.is_none(),
                "failed document {} still carries results",
                doc.id
            );
        }
        other => panic!("Document {} in non-terminal state: {}", doc.id, other),
    }
}
