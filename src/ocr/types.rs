use std::sync::atomic::{AtomicUsize, Ordering};

use serde::{Deserialize, Serialize};

/// Classified outcome of one provider invocation.
///
/// Adapters never surface raw transport errors: every failure is caught at
/// the call site and classified into one of these, so a failing provider is
/// just a zero-score attempt for the fallback engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderStatus {
    Ok,
    ApiError,
    AuthError,
    PermissionError,
    Timeout,
    Skipped,
}

impl ProviderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderStatus::Ok => "ok",
            ProviderStatus::ApiError => "api_error",
            ProviderStatus::AuthError => "auth_error",
            ProviderStatus::PermissionError => "permission_error",
            ProviderStatus::Timeout => "timeout",
            ProviderStatus::Skipped => "skipped",
        }
    }

    /// Statuses that strict-provider mode tolerates.
    pub fn is_tolerated_strict(&self) -> bool {
        matches!(self, ProviderStatus::Ok | ProviderStatus::Skipped)
    }
}

impl std::fmt::Display for ProviderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Typed result of one adapter call: success or classified failure.
#[derive(Debug, Clone)]
pub struct ProviderResponse {
    pub text: String,
    pub status: ProviderStatus,
    /// Short machine-readable reason ("success", "empty_text", "exception", …).
    pub reason: &'static str,
    /// Human-readable error detail when the call failed.
    pub error: String,
}

impl ProviderResponse {
    pub fn success(text: String) -> Self {
        Self {
            text,
            status: ProviderStatus::Ok,
            reason: "success",
            error: String::new(),
        }
    }

    /// An `ok` call that produced no text (blank page, image without text).
    pub fn empty() -> Self {
        Self {
            text: String::new(),
            status: ProviderStatus::Ok,
            reason: "empty_text",
            error: String::new(),
        }
    }

    pub fn skipped(reason: &'static str) -> Self {
        Self {
            text: String::new(),
            status: ProviderStatus::Skipped,
            reason,
            error: String::new(),
        }
    }

    pub fn failed(status: ProviderStatus, error: String) -> Self {
        Self {
            text: String::new(),
            status,
            reason: "exception",
            error,
        }
    }
}

/// One provider invocation on one page, scored — the fallback engine keeps
/// the best of these as its return value when no provider is accepted.
#[derive(Debug, Clone, Serialize)]
pub struct OcrAttempt {
    pub provider: String,
    pub status: ProviderStatus,
    pub quality: f64,
    pub reason: String,
    pub text_length: usize,
}

impl OcrAttempt {
    /// Placeholder attempt before any provider has run.
    pub fn none() -> Self {
        Self {
            provider: "none".to_string(),
            status: ProviderStatus::Skipped,
            quality: 0.0,
            reason: "no_provider_ran".to_string(),
            text_length: 0,
        }
    }
}

/// Capability interface for one OCR backend.
///
/// `recognize` takes a preprocessed page as PNG bytes plus a Tesseract-style
/// language hint ("hun", "hun+eng"). It is infallible by contract: transport
/// and API failures come back classified in the response status.
pub trait OcrProvider: Send + Sync {
    fn name(&self) -> &'static str;
    fn recognize(&self, image_png: &[u8], lang: &str) -> ProviderResponse;
}

/// Scripted provider for unit tests (and offline smoke runs).
///
/// Counts invocations so tests can assert on short-circuit behavior.
pub struct MockProvider {
    name: &'static str,
    response: ProviderResponse,
    calls: AtomicUsize,
}

impl MockProvider {
    pub fn new(name: &'static str, response: ProviderResponse) -> Self {
        Self {
            name,
            response,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn ok(name: &'static str, text: &str) -> Self {
        Self::new(name, ProviderResponse::success(text.to_string()))
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl OcrProvider for MockProvider {
    fn name(&self) -> &'static str {
        self.name
    }

    fn recognize(&self, _image_png: &[u8], _lang: &str) -> ProviderResponse {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.response.clone()
    }
}
