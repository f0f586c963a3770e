//! Google Cloud Vision provider.
//!
//! Talks to the `images:annotate` REST endpoint with API-key auth and
//! `DOCUMENT_TEXT_DETECTION`, which handles dense contract pages far better
//! than plain `TEXT_DETECTION`. Failures are classified rather than
//! propagated so the fallback engine can step to the next provider.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use base64::Engine as _;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::types::{OcrProvider, ProviderResponse, ProviderStatus};

const DEFAULT_ENDPOINT: &str = "https://vision.googleapis.com/v1/images:annotate";

pub struct GoogleVisionProvider {
    api_key: Option<String>,
    endpoint: String,
    timeout_secs: u64,
    // Built on first use so constructing the provider never touches the network.
    client: Mutex<Option<Arc<reqwest::blocking::Client>>>,
}

impl GoogleVisionProvider {
    pub fn new(api_key: Option<String>, endpoint: Option<String>, timeout_secs: u64) -> Self {
        Self {
            api_key,
            endpoint: endpoint.unwrap_or_else(|| DEFAULT_ENDPOINT.to_string()),
            timeout_secs,
            client: Mutex::new(None),
        }
    }

    fn http_client(&self) -> Result<Arc<reqwest::blocking::Client>, String> {
        let mut guard = self.client.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(client) = guard.as_ref() {
            return Ok(Arc::clone(client));
        }
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(self.timeout_secs))
            .build()
            .map_err(|e| e.to_string())?;
        let client = Arc::new(client);
        *guard = Some(Arc::clone(&client));
        Ok(client)
    }

    /// Non-fatal startup check: logs whether the provider is usable.
    pub fn verify(&self) -> bool {
        if self.api_key.is_none() {
            warn!("Google Vision API key not configured, provider will be skipped");
            return false;
        }
        true
    }

    fn annotate(&self, image_png: &[u8], lang: &str) -> Result<String, ProviderResponse> {
        let api_key = self.api_key.as_deref().ok_or_else(|| {
            ProviderResponse::failed(
                ProviderStatus::AuthError,
                "missing_api_key".to_string(),
            )
        })?;

        let client = self
            .http_client()
            .map_err(|e| ProviderResponse::failed(ProviderStatus::ApiError, e))?;

        let body = AnnotateRequest {
            requests: vec![ImageRequest {
                image: ImageContent {
                    content: base64::engine::general_purpose::STANDARD.encode(image_png),
                },
                features: vec![Feature {
                    kind: "DOCUMENT_TEXT_DETECTION",
                    max_results: 1,
                }],
                image_context: ImageContext {
                    language_hints: map_lang_to_vision_hints(lang),
                },
            }],
        };

        let url = format!("{}?key={}", self.endpoint, api_key);
        let response = client
            .post(&url)
            .json(&body)
            .send()
            .map_err(|e| classify_transport_error(&e))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().unwrap_or_default();
            return Err(classify_api_error(status.as_u16(), text));
        }

        let parsed: AnnotateResponse = response.json().map_err(|e| {
            ProviderResponse::failed(ProviderStatus::ApiError, e.to_string())
        })?;

        let first = parsed.responses.into_iter().next().unwrap_or_default();
        if let Some(err) = first.error {
            return Err(classify_api_error(err.code.unwrap_or(0), err.message));
        }

        Ok(first
            .full_text_annotation
            .map(|a| a.text)
            .unwrap_or_default())
    }
}

impl OcrProvider for GoogleVisionProvider {
    fn name(&self) -> &'static str {
        "google_vision"
    }

    fn recognize(&self, image_png: &[u8], lang: &str) -> ProviderResponse {
        match self.annotate(image_png, lang) {
            Ok(text) => {
                let text = text.trim().to_string();
                debug!(lang, text_length = text.len(), "Google Vision annotated page");
                if text.is_empty() {
                    ProviderResponse::empty()
                } else {
                    ProviderResponse::success(text)
                }
            }
            Err(failure) => failure,
        }
    }
}

fn classify_transport_error(e: &reqwest::Error) -> ProviderResponse {
    if e.is_timeout() {
        ProviderResponse::failed(ProviderStatus::Timeout, e.to_string())
    } else {
        ProviderResponse::failed(ProviderStatus::ApiError, e.to_string())
    }
}

/// Maps HTTP/API error codes and message text onto provider statuses.
/// Vision sometimes reports auth problems in the message with a 400 code,
/// so the message text is inspected too.
fn classify_api_error(code: u16, message: String) -> ProviderResponse {
    let lower = message.to_lowercase();
    let status = if code == 403 || lower.contains("permission") {
        ProviderStatus::PermissionError
    } else if code == 401 || lower.contains("auth") || lower.contains("credential") || lower.contains("api key") {
        ProviderStatus::AuthError
    } else if lower.contains("timeout") || lower.contains("deadline") {
        ProviderStatus::Timeout
    } else {
        ProviderStatus::ApiError
    };
    ProviderResponse::failed(status, format!("{code}: {message}"))
}

/// Converts a Tesseract-style language string ("hun+eng") to BCP-47 hints.
/// Unknown three-letter codes are dropped; two-letter codes pass through.
/// An empty result falls back to Hungarian + English.
pub fn map_lang_to_vision_hints(lang: &str) -> Vec<String> {
    const TABLE: &[(&str, &str)] = &[
        ("hun", "hu"),
        ("eng", "en"),
        ("deu", "de"),
        ("fra", "fr"),
        ("spa", "es"),
        ("ita", "it"),
    ];

    let mut hints: Vec<String> = lang
        .split('+')
        .filter_map(|part| {
            let part = part.trim();
            if let Some((_, bcp)) = TABLE.iter().find(|(t, _)| *t == part) {
                Some(bcp.to_string())
            } else if part.len() == 2 {
                Some(part.to_string())
            } else {
                None
            }
        })
        .collect();

    if hints.is_empty() {
        hints = vec!["hu".to_string(), "en".to_string()];
    }
    hints
}

#[derive(Serialize)]
struct AnnotateRequest {
    requests: Vec<ImageRequest>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ImageRequest {
    image: ImageContent,
    features: Vec<Feature>,
    image_context: ImageContext,
}

#[derive(Serialize)]
struct ImageContent {
    content: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct Feature {
    #[serde(rename = "type")]
    kind: &'static str,
    max_results: u32,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ImageContext {
    language_hints: Vec<String>,
}

#[derive(Deserialize, Default)]
struct AnnotateResponse {
    #[serde(default)]
    responses: Vec<PageAnnotation>,
}

#[derive(Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct PageAnnotation {
    full_text_annotation: Option<TextAnnotation>,
    error: Option<ApiError>,
}

#[derive(Deserialize)]
struct TextAnnotation {
    text: String,
}

#[derive(Deserialize)]
struct ApiError {
    code: Option<u16>,
    message: String,
}
