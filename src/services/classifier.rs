use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use reqwest::Client;
use serde::Deserialize;

use crate::models::document::DiagnosisCode;
use crate::services::preprocess::EncodedImage;

// ── Configuration ───────────────────────────────────────────────────────────

/// Everything the classifier client needs, resolved once at construction.
#[derive(Debug, Clone)]
pub struct ClassifierConfig {
    /// Full chat-completions URL, e.g. `https://openrouter.ai/api/v1/chat/completions`.
    pub api_url: String,
    pub api_key: String,
    pub model: String,
    /// Upper bound on a single request, connect to last byte.
    pub timeout: Duration,
}

const PROMPT: &str = concat!(
    "You are a certified medical coder. Analyse this medical document image and ",
    "return ONLY a JSON array of ICD-10 diagnosis codes that apply. Each element ",
    "must have exactly two keys: \"code\" and \"description\". Do not include any ",
    "explanation, markdown, or extra text - just the raw JSON array. ",
    "Example: [{\"code\": \"J18.9\", \"description\": \"Pneumonia, unspecified organism\"}]"
);

/// How much of an upstream error body survives into the error message.
const BODY_EXCERPT_CHARS: usize = 300;
/// How much of unparseable model output survives into the error message.
const CONTENT_EXCERPT_CHARS: usize = 200;

// ── Trait ───────────────────────────────────────────────────────────────────

/// Turns a prepared document image into a list of diagnosis codes.
#[async_trait]
pub trait Classifier: Send + Sync {
    async fn classify(&self, image: &EncodedImage) -> Result<Vec<DiagnosisCode>, ClassifierError>;
}

// ── Errors ──────────────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum ClassifierError {
    /// The endpoint answered with a non-success status.
    #[error("classifier returned HTTP {status}: {body}")]
    Unavailable { status: u16, body: String },

    /// The response body or the model's content was not parseable JSON.
    #[error("classifier returned non-JSON content: {excerpt}")]
    MalformedResponse { excerpt: String },

    /// The content parsed, but was not an array of code objects.
    #[error("expected a JSON array of code objects, got {found}")]
    UnexpectedShape { found: String },

    /// The request never produced a response (connect failure, timeout).
    #[error("classifier request failed: {0}")]
    Transport(#[from] reqwest::Error),
}

// ── OpenRouter-compatible client ────────────────────────────────────────────

/// Classifier backed by an OpenRouter-compatible vision-language endpoint.
pub struct VlmClassifier {
    http: Client,
    config: ClassifierConfig,
}

#[derive(Deserialize)]
struct ChatCompletion {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Deserialize)]
struct ChatMessage {
    content: String,
}

impl VlmClassifier {
    pub fn new(config: ClassifierConfig) -> Result<Self, ClassifierError> {
        let http = Client::builder().timeout(config.timeout).build()?;
        Ok(Self { http, config })
    }
}

#[async_trait]
impl Classifier for VlmClassifier {
    async fn classify(&self, image: &EncodedImage) -> Result<Vec<DiagnosisCode>, ClassifierError> {
        let payload = base64::engine::general_purpose::STANDARD.encode(&image.bytes);
        let request_body = serde_json::json!({
            "model": self.config.model,
            "messages": [{
                "role": "user",
                "content": [
                    {
                        "type": "image_url",
                        "image_url": { "url": format!("data:{};base64,{payload}", image.mime_type) }
                    },
                    { "type": "text", "text": PROMPT }
                ]
            }]
        });

        tracing::debug!(
            model = %self.config.model,
            payload_bytes = image.bytes.len(),
            "sending classification request"
        );

        let response = self
            .http
            .post(&self.config.api_url)
            .bearer_auth(&self.config.api_key)
            .json(&request_body)
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(ClassifierError::Unavailable {
                status: status.as_u16(),
                body: excerpt(&body, BODY_EXCERPT_CHARS),
            });
        }

        let completion: ChatCompletion = serde_json::from_str(&body).map_err(|_| {
            ClassifierError::MalformedResponse {
                excerpt: excerpt(&body, CONTENT_EXCERPT_CHARS),
            }
        })?;
        let content = completion
            .choices
            .into_iter()
            .next()
            .map(|choice| choice.message.content)
            .ok_or_else(|| ClassifierError::MalformedResponse {
                excerpt: excerpt(&body, CONTENT_EXCERPT_CHARS),
            })?;

        parse_code_list(&content)
    }
}

// ── Content validation ──────────────────────────────────────────────────────

/// Validates the model's text output into diagnosis codes: fences stripped,
/// JSON parsed, top-level shape checked. Element fields stay optional.
fn parse_code_list(content: &str) -> Result<Vec<DiagnosisCode>, ClassifierError> {
    let cleaned = strip_fences(content);

    let value: serde_json::Value =
        serde_json::from_str(&cleaned).map_err(|_| ClassifierError::MalformedResponse {
            excerpt: excerpt(&cleaned, CONTENT_EXCERPT_CHARS),
        })?;

    if !value.is_array() {
        return Err(ClassifierError::UnexpectedShape {
            found: json_type(&value).to_string(),
        });
    }

    serde_json::from_value(value).map_err(|_| ClassifierError::UnexpectedShape {
        found: "an array with non-object elements".to_string(),
    })
}

/// Drops markdown code fences the model wraps around its output despite being
/// told not to: every ``` marker (with or without a `json` tag), stray
/// trailing backticks, and surrounding whitespace.
fn strip_fences(content: &str) -> String {
    let cleaned = content.replace("```json", "").replace("```", "");
    cleaned.trim().trim_end_matches('`').trim().to_string()
}

/// First `max` characters of `s`, safe on multi-byte boundaries.
fn excerpt(s: &str, max: usize) -> String {
    s.chars().take(max).collect()
}

fn json_type(value: &serde_json::Value) -> &'static str {
    match value {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "a boolean",
        serde_json::Value::Number(_) => "a number",
        serde_json::Value::String(_) => "a string",
        serde_json::Value::Array(_) => "an array",
        serde_json::Value::Object(_) => "an object",
    }
}

// ── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    const PNEUMONIA: &str = "[{\"code\": \"J18.9\", \"description\": \"Pneumonia, unspecified organism\"}]";

    fn single_code(content: &str) -> Vec<DiagnosisCode> {
        parse_code_list(content).unwrap()
    }

    #[test]
    fn parses_a_bare_array() {
        let codes = single_code(PNEUMONIA);
        assert_eq!(codes.len(), 1);
        assert_eq!(codes[0].code.as_deref(), Some("J18.9"));
        assert_eq!(
            codes[0].description.as_deref(),
            Some("Pneumonia, unspecified organism")
        );
    }

    #[test]
    fn fenced_output_parses_identically() {
        let plain = single_code(PNEUMONIA);
        let fenced = single_code(&format!("```\n{PNEUMONIA}\n```"));
        let tagged = single_code(&format!("```json\n{PNEUMONIA}\n```"));
        assert_eq!(plain, fenced);
        assert_eq!(plain, tagged);
    }

    #[test]
    fn stray_trailing_backticks_are_stripped() {
        let codes = single_code(&format!("  {PNEUMONIA}``"));
        assert_eq!(codes.len(), 1);
    }

    #[test]
    fn empty_array_is_a_valid_result() {
        assert_eq!(single_code("[]"), Vec::new());
        assert_eq!(single_code("```json\n[]\n```"), Vec::new());
    }

    #[test]
    fn missing_keys_are_tolerated() {
        let codes = single_code("[{\"code\": \"I10\"}, {\"description\": \"Asthma\"}, {}]");
        assert_eq!(codes.len(), 3);
        assert_eq!(codes[0].code.as_deref(), Some("I10"));
        assert!(codes[0].description.is_none());
        assert!(codes[1].code.is_none());
        assert!(codes[2].code.is_none() && codes[2].description.is_none());
    }

    #[test]
    fn non_array_json_is_an_unexpected_shape() {
        let err = parse_code_list("{\"code\": \"J18.9\"}").unwrap_err();
        assert!(matches!(err, ClassifierError::UnexpectedShape { .. }));
        assert!(err.to_string().contains("an object"));

        let err = parse_code_list("\"J18.9\"").unwrap_err();
        assert!(err.to_string().contains("a string"));
    }

    #[test]
    fn array_of_non_objects_is_an_unexpected_shape() {
        let err = parse_code_list("[\"J18.9\", \"I10\"]").unwrap_err();
        assert!(matches!(err, ClassifierError::UnexpectedShape { .. }));
    }

    #[test]
    fn free_text_is_malformed_with_an_excerpt() {
        let prose = "I am sorry, I cannot read this document clearly enough to code it.";
        let err = parse_code_list(prose).unwrap_err();
        match err {
            ClassifierError::MalformedResponse { excerpt } => {
                assert!(excerpt.starts_with("I am sorry"));
            }
            other => panic!("expected MalformedResponse, got {other:?}"),
        }
    }

    #[test]
    fn excerpt_is_bounded_and_multibyte_safe() {
        let long = "é".repeat(500);
        let out = excerpt(&long, CONTENT_EXCERPT_CHARS);
        assert_eq!(out.chars().count(), CONTENT_EXCERPT_CHARS);

        let err = parse_code_list(&long).unwrap_err();
        match err {
            ClassifierError::MalformedResponse { excerpt } => {
                assert_eq!(excerpt.chars().count(), CONTENT_EXCERPT_CHARS)
            }
            other => panic!("expected MalformedResponse, got {other:?}"),
        }
    }

    #[test]
    fn unfenced_content_passes_through_untouched() {
        assert_eq!(strip_fences(PNEUMONIA), PNEUMONIA);
        assert_eq!(strip_fences("  [] "), "[]");
    }
}
