//! Local Tesseract provider.
//!
//! Only available when compiled with the `ocr` feature flag — CI machines
//! without libtesseract build the crate with the remote providers only.

use tracing::debug;

use super::types::{OcrProvider, ProviderResponse, ProviderStatus};

#[cfg(feature = "ocr")]
pub struct TesseractProvider {
    tessdata_dir: Option<std::path::PathBuf>,
    /// Page segmentation mode, "6" (uniform block of text) by default.
    psm: String,
    /// OCR engine mode, "3" (default, LSTM + legacy) by default.
    oem: String,
}

#[cfg(feature = "ocr")]
impl TesseractProvider {
    pub fn new(psm: &str, oem: &str) -> Self {
        Self {
            tessdata_dir: std::env::var_os("TESSDATA_PREFIX").map(Into::into),
            psm: psm.to_string(),
            oem: oem.to_string(),
        }
    }

    /// Point at a specific tessdata directory instead of TESSDATA_PREFIX.
    pub fn with_tessdata(mut self, dir: &std::path::Path) -> Self {
        self.tessdata_dir = Some(dir.to_path_buf());
        self
    }

    fn run(&self, image_png: &[u8], lang: &str) -> Result<String, tesseract::TesseractError> {
        let datapath = self
            .tessdata_dir
            .as_deref()
            .and_then(std::path::Path::to_str);

        let tess = tesseract::Tesseract::new(datapath, Some(lang))?
            .set_variable("tessedit_pageseg_mode", &self.psm)?
            .set_variable("tessedit_ocr_engine_mode", &self.oem)?;

        let mut tess = tess.set_image_from_mem(image_png)?;
        tess.get_text()
    }
}

#[cfg(feature = "ocr")]
impl OcrProvider for TesseractProvider {
    fn name(&self) -> &'static str {
        "tesseract"
    }

    fn recognize(&self, image_png: &[u8], lang: &str) -> ProviderResponse {
        match self.run(image_png, lang) {
            Ok(text) => {
                let text = text.trim().to_string();
                debug!(lang, text_length = text.len(), "Tesseract recognized page");
                if text.is_empty() {
                    ProviderResponse::empty()
                } else {
                    ProviderResponse::success(text)
                }
            }
            Err(e) => ProviderResponse::failed(ProviderStatus::ApiError, format!("{e:?}")),
        }
    }
}
