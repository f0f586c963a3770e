//! Environment-driven configuration snapshots.
//!
//! Each config struct is read once from the environment with `from_env()` and
//! injected into the component that needs it — call sites never reach into
//! `std::env` themselves, so a pipeline run sees one consistent view of its
//! settings.

use std::collections::HashMap;

use tracing_subscriber::EnvFilter;

pub const APP_NAME: &str = "Contralens";
pub const APP_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default log filter when `RUST_LOG` is unset.
pub fn default_log_filter() -> &'static str {
    "info,contralens=debug"
}

/// Initialize tracing for binaries and integration harnesses.
pub fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(default_log_filter())),
        )
        .init();
}

/// Parse a truthy environment flag: `1`, `true`, `yes`, `on` (case-insensitive).
pub(crate) fn env_flag(name: &str, default: bool) -> bool {
    match std::env::var(name) {
        Ok(raw) => matches!(
            raw.trim().to_ascii_lowercase().as_str(),
            "1" | "true" | "yes" | "on"
        ),
        Err(_) => default,
    }
}

fn env_or(name: &str, default: &str) -> String {
    std::env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .unwrap_or_else(|| default.to_string())
}

fn env_parse<T: std::str::FromStr>(name: &str, default: T) -> T {
    std::env::var(name)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

// ──────────────────────────────────────────────
// Image preprocessing
// ──────────────────────────────────────────────

/// Toggles and parameters for the deterministic page-image transforms
/// applied before OCR.
#[derive(Debug, Clone)]
pub struct PreprocessConfig {
    pub autorotate: bool,
    pub contrast_factor: f32,
    pub denoise: bool,
    pub binarize: bool,
    pub binarize_threshold: u8,
    pub upscale: bool,
    pub upscale_min_side: u32,
}

impl Default for PreprocessConfig {
    fn default() -> Self {
        Self {
            autorotate: true,
            contrast_factor: 1.6,
            denoise: true,
            binarize: true,
            binarize_threshold: 170,
            upscale: true,
            upscale_min_side: 1400,
        }
    }
}

impl PreprocessConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            autorotate: env_flag("OCR_ENABLE_AUTOROTATE", defaults.autorotate),
            contrast_factor: env_parse("OCR_CONTRAST_FACTOR", defaults.contrast_factor),
            denoise: env_flag("OCR_ENABLE_DENOISE", defaults.denoise),
            binarize: env_flag("OCR_ENABLE_BINARIZE", defaults.binarize),
            binarize_threshold: env_parse("OCR_BINARY_THRESHOLD", defaults.binarize_threshold),
            upscale: env_flag("OCR_ENABLE_UPSCALE", defaults.upscale),
            upscale_min_side: env_parse("OCR_UPSCALE_MIN_SIDE", defaults.upscale_min_side),
        }
    }
}

// ──────────────────────────────────────────────
// OCR engine
// ──────────────────────────────────────────────

/// Configuration for the provider fallback engine and the per-kind
/// document drivers.
#[derive(Debug, Clone)]
pub struct OcrConfig {
    /// Ordered provider chain tried until one yields an accepted result.
    pub provider_chain: Vec<String>,
    /// Default Tesseract-style language hint, "+"-joined for multi-language.
    pub default_lang: String,
    /// Global minimum quality score for accepting a provider's text.
    pub min_quality: f64,
    /// Per-provider overrides of the minimum quality score.
    pub provider_min_quality: HashMap<String, f64>,
    /// When set, any provider status other than ok/skipped aborts the call.
    pub strict_provider: bool,
    /// PDF rasterization DPI.
    pub pdf_render_dpi: u32,
    pub preprocess: PreprocessConfig,

    pub tesseract_psm: String,
    pub tesseract_oem: String,

    pub google_vision_api_key: String,
    pub google_vision_endpoint: String,
    pub google_vision_timeout_secs: u64,

    pub ocr_space_api_key: String,
    pub ocr_space_endpoint: String,
    pub ocr_space_engine: String,
    pub ocr_space_timeout_secs: u64,
}

impl Default for OcrConfig {
    fn default() -> Self {
        Self {
            provider_chain: vec!["google_vision".into(), "tesseract".into()],
            default_lang: "hun+eng".into(),
            min_quality: 0.40,
            provider_min_quality: HashMap::new(),
            strict_provider: false,
            pdf_render_dpi: 300,
            preprocess: PreprocessConfig::default(),
            tesseract_psm: "6".into(),
            tesseract_oem: "3".into(),
            google_vision_api_key: String::new(),
            google_vision_endpoint: "https://vision.googleapis.com/v1/images:annotate".into(),
            google_vision_timeout_secs: 20,
            ocr_space_api_key: String::new(),
            ocr_space_endpoint: "https://api.ocr.space/parse/image".into(),
            ocr_space_engine: "2".into(),
            ocr_space_timeout_secs: 20,
        }
    }
}

impl OcrConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let provider_chain: Vec<String> = env_or("OCR_PROVIDER_CHAIN", "google_vision,tesseract")
            .split(',')
            .map(|p| p.trim().to_ascii_lowercase())
            .filter(|p| !p.is_empty())
            .collect();
        let provider_chain = if provider_chain.is_empty() {
            vec!["tesseract".to_string()]
        } else {
            provider_chain
        };

        // Per-provider quality overrides: OCR_MIN_QUALITY_SCORE_<PROVIDER>
        let mut provider_min_quality = HashMap::new();
        for provider in &provider_chain {
            let key = format!("OCR_MIN_QUALITY_SCORE_{}", provider.to_ascii_uppercase());
            if let Ok(raw) = std::env::var(&key) {
                if let Ok(value) = raw.trim().parse::<f64>() {
                    provider_min_quality.insert(provider.clone(), value);
                }
            }
        }

        Self {
            provider_chain,
            default_lang: env_or("OCR_DEFAULT_LANG", &defaults.default_lang),
            min_quality: env_parse("OCR_MIN_QUALITY_SCORE", defaults.min_quality),
            provider_min_quality,
            strict_provider: env_flag("OCR_STRICT_PROVIDER", false),
            pdf_render_dpi: env_parse("OCR_PDF_RENDER_DPI", defaults.pdf_render_dpi),
            preprocess: PreprocessConfig::from_env(),
            tesseract_psm: env_or("OCR_TESSERACT_PSM", &defaults.tesseract_psm),
            tesseract_oem: env_or("OCR_TESSERACT_OEM", &defaults.tesseract_oem),
            google_vision_api_key: env_or("GOOGLE_VISION_API_KEY", ""),
            google_vision_endpoint: env_or(
                "GOOGLE_VISION_ENDPOINT",
                &defaults.google_vision_endpoint,
            ),
            google_vision_timeout_secs: env_parse(
                "OCR_GOOGLE_VISION_TIMEOUT",
                defaults.google_vision_timeout_secs,
            ),
            ocr_space_api_key: env_or("OCR_SPACE_API_KEY", ""),
            ocr_space_endpoint: env_or("OCR_SPACE_ENDPOINT", &defaults.ocr_space_endpoint),
            ocr_space_engine: env_or("OCR_SPACE_ENGINE", &defaults.ocr_space_engine),
            ocr_space_timeout_secs: env_parse(
                "OCR_SPACE_TIMEOUT",
                defaults.ocr_space_timeout_secs,
            ),
        }
    }

    /// Minimum acceptance quality for a provider: its override or the global floor.
    pub fn min_quality_for(&self, provider: &str) -> f64 {
        self.provider_min_quality
            .get(provider)
            .copied()
            .unwrap_or(self.min_quality)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_chain_prefers_cloud_then_local() {
        let cfg = OcrConfig::default();
        assert_eq!(cfg.provider_chain, vec!["google_vision", "tesseract"]);
    }

    #[test]
    fn min_quality_falls_back_to_global() {
        let mut cfg = OcrConfig::default();
        cfg.provider_min_quality.insert("tesseract".into(), 0.25);
        assert!((cfg.min_quality_for("tesseract") - 0.25).abs() < f64::EPSILON);
        assert!((cfg.min_quality_for("google_vision") - 0.40).abs() < f64::EPSILON);
    }

    #[test]
    fn preprocess_defaults_match_production_tuning() {
        let cfg = PreprocessConfig::default();
        assert!(cfg.autorotate);
        assert_eq!(cfg.binarize_threshold, 170);
        assert_eq!(cfg.upscale_min_side, 1400);
        assert!((cfg.contrast_factor - 1.6).abs() < f32::EPSILON);
    }

    #[test]
    fn app_version_matches_cargo() {
        assert_eq!(APP_VERSION, env!("CARGO_PKG_VERSION"));
    }
}
