//! PDF page rendering and page-parallel OCR.
//!
//! Pages are rasterized with Google PDFium and OCR'd concurrently on a
//! bounded worker pool. A page that fails to render or recognize becomes an
//! empty string so one bad page never sinks a long contract; the stitched
//! document keeps page order regardless of completion order.
//!
//! `PdfiumRenderer` is stateless (`Send + Sync`). Each operation creates a
//! fresh `Pdfium` instance because the upstream type is `!Send`. The OS
//! caches `dlopen`/`LoadLibrary` calls, so repeat loads are near-free.

use std::io::Cursor;

use image::ImageOutputFormat;
use pdfium_render::prelude::*;
use tracing::{debug, info, warn};

use crate::config::PreprocessConfig;
use crate::ocr::{encode_png, preprocess_page, FallbackEngine};
use crate::pool;

use super::ExtractionError;

/// Maximum dimension (width or height) for rendered page images.
/// Prevents OOM on extremely large pages or absurd DPI settings.
const MAX_DIMENSION_PX: u32 = 4096;

/// PDF points per inch (standard PDF unit).
const POINTS_PER_INCH: f32 = 72.0;

/// Upper bound on concurrent page workers. OCR providers rate-limit, and
/// rendering is memory-hungry at 300 DPI.
const MAX_PAGE_WORKERS: usize = 6;

/// Capability interface for rasterizing PDF pages.
pub trait PageRenderer: Send + Sync {
    fn page_count(&self, pdf_bytes: &[u8]) -> Result<usize, ExtractionError>;
    fn render_page(
        &self,
        pdf_bytes: &[u8],
        page_number: usize,
        dpi: u32,
    ) -> Result<Vec<u8>, ExtractionError>;
}

/// Renders PDF pages to PNG using Google PDFium.
///
/// PDFium handles CIDFont encodings, embedded fonts, form fields and
/// transparency, which matter for the notarized contracts this pipeline
/// sees.
pub struct PdfiumRenderer;

impl PdfiumRenderer {
    /// Create a new renderer, verifying the PDFium library is loadable.
    pub fn new() -> Result<Self, ExtractionError> {
        let _ = load_pdfium()?;
        Ok(Self)
    }
}

/// Load the PDFium dynamic library.
///
/// Discovery order:
/// 1. `PDFIUM_DYNAMIC_LIB_PATH` env var (explicit path to library file)
/// 2. Alongside the running executable
/// 3. System library search paths
fn load_pdfium() -> Result<Pdfium, ExtractionError> {
    if let Ok(path) = std::env::var("PDFIUM_DYNAMIC_LIB_PATH") {
        debug!(path = %path, "Loading PDFium from env var");
        let bindings = Pdfium::bind_to_library(&path).map_err(|e| {
            ExtractionError::Pdf(format!("failed to load PDFium from {path}: {e}"))
        })?;
        return Ok(Pdfium::new(bindings));
    }

    if let Ok(exe) = std::env::current_exe() {
        if let Some(exe_dir) = exe.parent() {
            let lib_path =
                Pdfium::pdfium_platform_library_name_at_path(exe_dir.to_string_lossy().as_ref());
            if let Ok(bindings) = Pdfium::bind_to_library(&lib_path) {
                debug!(dir = %exe_dir.display(), "Loaded PDFium from executable directory");
                return Ok(Pdfium::new(bindings));
            }
        }
    }

    let bindings = Pdfium::bind_to_system_library().map_err(|e| {
        ExtractionError::Pdf(format!(
            "PDFium library not found. Set PDFIUM_DYNAMIC_LIB_PATH or install PDFium: {e}"
        ))
    })?;
    Ok(Pdfium::new(bindings))
}

/// Compute pixel dimensions for rendering, applying the dimension guard.
/// Preserves aspect ratio when capping.
fn compute_render_dimensions(width_points: f32, height_points: f32, dpi: u32) -> (u32, u32) {
    let scale = dpi as f32 / POINTS_PER_INCH;
    let raw_w = (width_points * scale).max(1.0);
    let raw_h = (height_points * scale).max(1.0);

    let max_dim = raw_w.max(raw_h);
    if max_dim > MAX_DIMENSION_PX as f32 {
        let ratio = MAX_DIMENSION_PX as f32 / max_dim;
        let w = ((raw_w * ratio) as u32).clamp(1, MAX_DIMENSION_PX);
        let h = ((raw_h * ratio) as u32).clamp(1, MAX_DIMENSION_PX);
        (w, h)
    } else {
        (raw_w as u32, raw_h as u32)
    }
}

impl PageRenderer for PdfiumRenderer {
    fn page_count(&self, pdf_bytes: &[u8]) -> Result<usize, ExtractionError> {
        let pdfium = load_pdfium()?;
        let document = pdfium
            .load_pdf_from_byte_slice(pdf_bytes, None)
            .map_err(|e| ExtractionError::Pdf(format!("failed to load PDF: {e}")))?;
        Ok(document.pages().len() as usize)
    }

    fn render_page(
        &self,
        pdf_bytes: &[u8],
        page_number: usize,
        dpi: u32,
    ) -> Result<Vec<u8>, ExtractionError> {
        let pdfium = load_pdfium()?;
        let document = pdfium
            .load_pdf_from_byte_slice(pdf_bytes, None)
            .map_err(|e| ExtractionError::Pdf(format!("failed to load PDF: {e}")))?;

        let pages = document.pages();

        let page_index =
            u16::try_from(page_number).map_err(|_| ExtractionError::PdfRendering {
                page: page_number,
                reason: format!("page index {page_number} exceeds u16 maximum"),
            })?;

        let page = pages
            .get(page_index)
            .map_err(|_| ExtractionError::PdfRendering {
                page: page_number,
                reason: format!(
                    "page {page_number} out of range (document has {} pages)",
                    pages.len()
                ),
            })?;

        let width_points = page.width().value;
        let height_points = page.height().value;
        let (target_w, target_h) = compute_render_dimensions(width_points, height_points, dpi);

        let config = PdfRenderConfig::new()
            .set_target_width(target_w as i32)
            .set_maximum_height(target_h as i32);

        let bitmap = page
            .render_with_config(&config)
            .map_err(|e| ExtractionError::PdfRendering {
                page: page_number,
                reason: format!("rendering failed: {e}"),
            })?;

        let dynamic_image = bitmap.as_image();
        let mut cursor = Cursor::new(Vec::new());
        dynamic_image
            .write_to(&mut cursor, ImageOutputFormat::Png)
            .map_err(|e| ExtractionError::ImageProcessing(format!("PNG encoding failed: {e}")))?;

        let png_bytes = cursor.into_inner();

        debug!(
            page = page_number,
            width = target_w,
            height = target_h,
            png_size = png_bytes.len(),
            "Rendered PDF page to PNG"
        );

        Ok(png_bytes)
    }
}

/// Extracts text from a scanned PDF: render each page, preprocess it, run
/// the OCR fallback chain, then stitch pages back together in order.
pub fn ocr_pdf(
    renderer: &dyn PageRenderer,
    engine: &FallbackEngine,
    preprocess: &PreprocessConfig,
    pdf_bytes: &[u8],
    dpi: u32,
    lang: &str,
) -> Result<String, ExtractionError> {
    let pages = renderer.page_count(pdf_bytes)?;
    if pages == 0 {
        return Err(ExtractionError::EmptyDocument("pdf"));
    }

    let workers = pages.min(pool::cpu_count()).min(MAX_PAGE_WORKERS);
    info!(pages, workers, dpi, "Starting page-parallel PDF OCR");

    let page_texts = pool::run_indexed(workers, (0..pages).collect(), |_, page| {
        match ocr_one_page(renderer, engine, preprocess, pdf_bytes, page, dpi, lang) {
            Ok(text) => text,
            Err(e) => {
                warn!(page, error = %e, "Page OCR failed, continuing with empty page");
                String::new()
            }
        }
    });

    let stitched = page_texts
        .iter()
        .map(|t| t.trim())
        .filter(|t| !t.is_empty())
        .collect::<Vec<_>>()
        .join("\n\n");

    if stitched.is_empty() {
        return Err(ExtractionError::EmptyDocument("pdf"));
    }

    info!(
        pages,
        text_length = stitched.chars().count(),
        "PDF OCR complete"
    );
    Ok(stitched)
}

fn ocr_one_page(
    renderer: &dyn PageRenderer,
    engine: &FallbackEngine,
    preprocess: &PreprocessConfig,
    pdf_bytes: &[u8],
    page: usize,
    dpi: u32,
    lang: &str,
) -> Result<String, ExtractionError> {
    let rendered = renderer.render_page(pdf_bytes, page, dpi)?;
    let processed = preprocess_page(&rendered, preprocess)?;
    let png = encode_png(&processed)?;
    let (text, attempt) = engine.run(&png, lang)?;
    debug!(
        page,
        provider = %attempt.provider,
        quality = format!("{:.3}", attempt.quality),
        reason = %attempt.reason,
        "Page OCR attempt finished"
    );
    Ok(text)
}

// ── Mock for testing ──────────────────────────────────────

/// Mock page renderer returning a fixed PNG for each valid page.
pub struct MockPageRenderer {
    page_count: usize,
    png: Vec<u8>,
    /// Pages that should fail to render.
    failing_pages: Vec<usize>,
}

impl MockPageRenderer {
    pub fn new(page_count: usize, png: Vec<u8>) -> Self {
        Self {
            page_count,
            png,
            failing_pages: Vec::new(),
        }
    }

    pub fn with_failing_pages(mut self, pages: Vec<usize>) -> Self {
        self.failing_pages = pages;
        self
    }
}

impl PageRenderer for MockPageRenderer {
    fn page_count(&self, _pdf_bytes: &[u8]) -> Result<usize, ExtractionError> {
        Ok(self.page_count)
    }

    fn render_page(
        &self,
        _pdf_bytes: &[u8],
        page_number: usize,
        _dpi: u32,
    ) -> Result<Vec<u8>, ExtractionError> {
        if page_number >= self.page_count || self.failing_pages.contains(&page_number) {
            return Err(ExtractionError::PdfRendering {
                page: page_number,
                reason: "mock render failure".into(),
            });
        }
        Ok(self.png.clone())
    }
}
