//! Multi-provider OCR with quality-gated fallback.
//!
//! A page goes through [`preprocess::preprocess_page`], then
//! [`fallback::FallbackEngine`] runs the configured provider chain until one
//! result passes its quality floor. Providers implement [`OcrProvider`] and
//! classify their own failures, so one broken backend never fails a page.

pub mod fallback;
pub mod google_vision;
pub mod ocr_space;
pub mod preprocess;
pub mod quality;
#[cfg(feature = "ocr")]
pub mod tesseract;
pub mod types;

pub use fallback::FallbackEngine;
pub use preprocess::{encode_png, preprocess_page};
pub use quality::score_text_quality;
pub use types::{MockProvider, OcrAttempt, OcrProvider, ProviderResponse, ProviderStatus};

use thiserror::Error;

#[derive(Error, Debug)]
pub enum OcrError {
    #[error("OCR provider chain is empty")]
    EmptyProviderChain,

    #[error("strict provider mode: {provider} failed with {status}: {detail}")]
    StrictProviderFailure {
        provider: String,
        status: ProviderStatus,
        detail: String,
    },

    #[error("image processing error: {0}")]
    ImageProcessing(String),
}
