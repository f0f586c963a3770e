//! OCR.space provider.
//!
//! Last-resort remote fallback: free-tier friendly, multipart upload of the
//! page PNG. Without an API key the provider reports itself skipped instead
//! of failing, so an unconfigured chain entry costs nothing.

use std::time::Duration;

use serde::Deserialize;
use tracing::debug;

use super::types::{OcrProvider, ProviderResponse, ProviderStatus};

const DEFAULT_ENDPOINT: &str = "https://api.ocr.space/parse/image";

pub struct OcrSpaceProvider {
    api_key: Option<String>,
    endpoint: String,
    /// OCR.space engine selector, "2" handles accented scripts better.
    engine: String,
    timeout_secs: u64,
}

impl OcrSpaceProvider {
    pub fn new(
        api_key: Option<String>,
        endpoint: Option<String>,
        engine: &str,
        timeout_secs: u64,
    ) -> Self {
        Self {
            api_key,
            endpoint: endpoint.unwrap_or_else(|| DEFAULT_ENDPOINT.to_string()),
            engine: engine.to_string(),
            timeout_secs,
        }
    }

    fn parse_image(&self, image_png: &[u8], lang: &str) -> Result<String, ProviderResponse> {
        let api_key = match self.api_key.as_deref() {
            Some(key) => key,
            None => return Err(ProviderResponse::skipped("missing_api_key")),
        };

        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(self.timeout_secs))
            .build()
            .map_err(|e| ProviderResponse::failed(ProviderStatus::ApiError, e.to_string()))?;

        let part = reqwest::blocking::multipart::Part::bytes(image_png.to_vec())
            .file_name("scan.png")
            .mime_str("image/png")
            .map_err(|e| ProviderResponse::failed(ProviderStatus::ApiError, e.to_string()))?;
        let form = reqwest::blocking::multipart::Form::new()
            .text("apikey", api_key.to_string())
            .text("language", map_lang(lang).to_string())
            .text("isOverlayRequired", "false")
            .text("OCREngine", self.engine.clone())
            .part("file", part);

        let response = client
            .post(&self.endpoint)
            .multipart(form)
            .send()
            .map_err(|e| {
                if e.is_timeout() {
                    ProviderResponse::failed(ProviderStatus::Timeout, e.to_string())
                } else {
                    ProviderResponse::failed(ProviderStatus::ApiError, e.to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            let classified = if status.as_u16() == 401 || status.as_u16() == 403 {
                ProviderStatus::AuthError
            } else {
                ProviderStatus::ApiError
            };
            return Err(ProviderResponse::failed(
                classified,
                format!("{}: {body}", status.as_u16()),
            ));
        }

        let parsed: ParseResponse = response.json().map_err(|e| {
            ProviderResponse::failed(ProviderStatus::ApiError, e.to_string())
        })?;

        if parsed.is_errored_on_processing {
            let detail = parsed.error_message.join("; ");
            let classified = if detail.to_lowercase().contains("timed out") {
                ProviderStatus::Timeout
            } else {
                ProviderStatus::ApiError
            };
            return Err(ProviderResponse::failed(classified, detail));
        }

        Ok(parsed
            .parsed_results
            .iter()
            .map(|r| r.parsed_text.as_str())
            .collect::<Vec<_>>()
            .join("\n"))
    }
}

impl OcrProvider for OcrSpaceProvider {
    fn name(&self) -> &'static str {
        "ocr_space"
    }

    fn recognize(&self, image_png: &[u8], lang: &str) -> ProviderResponse {
        match self.parse_image(image_png, lang) {
            Ok(text) => {
                let text = text.trim().to_string();
                debug!(lang, text_length = text.len(), "OCR.space parsed page");
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

/// OCR.space speaks its own 3-letter codes; only Hungarian and English are
/// relevant, everything else falls back to English.
fn map_lang(lang: &str) -> &'static str {
    if lang.contains("hun") {
        "hun"
    } else if lang.contains("eng") {
        "eng"
    } else {
        "eng"
    }
}

#[derive(Deserialize, Default)]
#[serde(rename_all = "PascalCase", default)]
struct ParseResponse {
    parsed_results: Vec<ParsedResult>,
    is_errored_on_processing: bool,
    #[serde(deserialize_with = "string_or_list")]
    error_message: Vec<String>,
}

#[derive(Deserialize, Default)]
#[serde(rename_all = "PascalCase", default)]
struct ParsedResult {
    parsed_text: String,
}

/// OCR.space returns ErrorMessage as either a string or a list of strings.
fn string_or_list<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum StringOrList {
        One(String),
        Many(Vec<String>),
    }

    Ok(match Option::<StringOrList>::deserialize(deserializer)? {
        None => Vec::new(),
        Some(StringOrList::One(s)) => vec![s],
        Some(StringOrList::Many(v)) => v,
    })
}
