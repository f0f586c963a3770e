//! Document text extraction, routed by file kind.
//!
//! PDFs and images go through rendering/preprocessing and the OCR fallback
//! chain; DOCX and plain text are parsed directly. All paths converge on a
//! single non-empty text string for the analysis pipeline.

pub mod docx;
pub mod language;
pub mod pdf;
pub mod plain;

pub use docx::extract_docx;
pub use language::determine_language;
pub use pdf::{ocr_pdf, PageRenderer, PdfiumRenderer};
pub use plain::extract_plain_text;

use std::path::Path;

use thiserror::Error;
use tracing::info;

use crate::config::{OcrConfig, PreprocessConfig};
use crate::ocr::{encode_png, preprocess_page, FallbackEngine, OcrError};

#[derive(Error, Debug)]
pub enum ExtractionError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("PDF parsing failed: {0}")]
    Pdf(String),

    #[error("PDF rendering failed on page {page}: {reason}")]
    PdfRendering { page: usize, reason: String },

    #[error("DOCX parsing failed: {0}")]
    Docx(String),

    #[error("image processing error: {0}")]
    ImageProcessing(String),

    #[error("document produced no text ({0})")]
    EmptyDocument(&'static str),

    #[error("unsupported file extension: {0}")]
    UnsupportedFormat(String),

    #[error(transparent)]
    Ocr(#[from] OcrError),
}

/// Supported document kinds, decided by file extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileKind {
    Pdf,
    Docx,
    Image,
    Txt,
}

impl FileKind {
    pub fn from_path(path: &Path) -> Result<Self, ExtractionError> {
        let ext = path
            .extension()
            .map(|e| e.to_string_lossy().to_lowercase())
            .unwrap_or_default();
        match ext.as_str() {
            "pdf" => Ok(FileKind::Pdf),
            "docx" => Ok(FileKind::Docx),
            "png" | "jpg" | "jpeg" | "tif" | "tiff" => Ok(FileKind::Image),
            "txt" => Ok(FileKind::Txt),
            other => Err(ExtractionError::UnsupportedFormat(other.to_string())),
        }
    }
}

/// Routes a document to the right extraction path and returns its text.
pub struct DocumentExtractor {
    renderer: Box<dyn PageRenderer>,
    engine: FallbackEngine,
    preprocess: PreprocessConfig,
    default_lang: String,
    render_dpi: u32,
}

impl DocumentExtractor {
    /// Production wiring: PDFium renderer plus the configured provider chain.
    pub fn from_config(config: &OcrConfig) -> Result<Self, ExtractionError> {
        Ok(Self {
            renderer: Box::new(PdfiumRenderer::new()?),
            engine: FallbackEngine::from_config(config)?,
            preprocess: config.preprocess.clone(),
            default_lang: config.default_lang.clone(),
            render_dpi: config.pdf_render_dpi,
        })
    }

    /// Explicit wiring for tests and embedders.
    pub fn new(
        renderer: Box<dyn PageRenderer>,
        engine: FallbackEngine,
        config: &OcrConfig,
    ) -> Self {
        Self {
            renderer,
            engine,
            preprocess: config.preprocess.clone(),
            default_lang: config.default_lang.clone(),
            render_dpi: config.pdf_render_dpi,
        }
    }

    /// Extracts text from one document, choosing the path by `kind`.
    pub fn extract(&self, path: &Path, kind: FileKind) -> Result<String, ExtractionError> {
        let lang = determine_language(path, &self.default_lang);
        info!(path = %path.display(), kind = ?kind, lang = %lang, "Extracting document text");

        match kind {
            FileKind::Pdf => {
                let bytes = std::fs::read(path)?;
                ocr_pdf(
                    self.renderer.as_ref(),
                    &self.engine,
                    &self.preprocess,
                    &bytes,
                    self.render_dpi,
                    &lang,
                )
            }
            FileKind::Docx => extract_docx(path),
            FileKind::Txt => extract_plain_text(path),
            FileKind::Image => {
                let bytes = std::fs::read(path)?;
                self.ocr_image(&bytes, &lang)
            }
        }
    }

    fn ocr_image(&self, image_bytes: &[u8], lang: &str) -> Result<String, ExtractionError> {
        let processed = preprocess_page(image_bytes, &self.preprocess)?;
        let png = encode_png(&processed)?;
        let (text, attempt) = self.engine.run(&png, lang)?;
        if text.trim().is_empty() {
            return Err(ExtractionError::EmptyDocument("image"));
        }
        info!(
            provider = %attempt.provider,
            quality = format!("{:.3}", attempt.quality),
            text_length = text.chars().count(),
            "Image OCR complete"
        );
        Ok(text)
    }
}
