//! Provider fallback engine.
//!
//! Tries the configured provider chain in order and stops as soon as a
//! result is acceptable. Two acceptance rules apply:
//!
//! 1. Google Vision text is trusted as-is: an `ok` response with non-empty
//!    text short-circuits the chain regardless of its quality score.
//! 2. Any other provider's text is accepted when it scores at or above the
//!    provider's quality floor.
//!
//! When nothing is accepted the best-scoring attempt wins, so a page always
//! yields whatever text the chain managed to produce.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::config::OcrConfig;

use super::google_vision::GoogleVisionProvider;
use super::ocr_space::OcrSpaceProvider;
use super::quality::score_text_quality;
use super::types::{OcrAttempt, OcrProvider, ProviderStatus};
use super::OcrError;

pub struct FallbackEngine {
    chain: Vec<String>,
    registry: HashMap<String, Arc<dyn OcrProvider>>,
    min_quality: f64,
    provider_min_quality: HashMap<String, f64>,
    strict_provider: bool,
}

impl FallbackEngine {
    /// Builds the engine with the real provider adapters the config names.
    ///
    /// Chain entries without a registered adapter (a misspelled name, or
    /// `tesseract` in a build without the `ocr` feature) are left out of the
    /// registry and reported as skipped attempts at run time.
    pub fn from_config(config: &OcrConfig) -> Result<Self, OcrError> {
        let mut registry: HashMap<String, Arc<dyn OcrProvider>> = HashMap::new();

        for provider in &config.provider_chain {
            match provider.as_str() {
                "google_vision" => {
                    let adapter = GoogleVisionProvider::new(
                        non_empty(&config.google_vision_api_key),
                        Some(config.google_vision_endpoint.clone()),
                        config.google_vision_timeout_secs,
                    );
                    adapter.verify();
                    registry.insert(provider.clone(), Arc::new(adapter));
                }
                "ocr_space" => {
                    registry.insert(
                        provider.clone(),
                        Arc::new(OcrSpaceProvider::new(
                            non_empty(&config.ocr_space_api_key),
                            Some(config.ocr_space_endpoint.clone()),
                            &config.ocr_space_engine,
                            config.ocr_space_timeout_secs,
                        )),
                    );
                }
                #[cfg(feature = "ocr")]
                "tesseract" => {
                    registry.insert(
                        provider.clone(),
                        Arc::new(super::tesseract::TesseractProvider::new(
                            &config.tesseract_psm,
                            &config.tesseract_oem,
                        )),
                    );
                }
                other => {
                    warn!(provider = other, "Unknown OCR provider in chain, will be skipped");
                }
            }
        }

        Self::with_providers(config, registry)
    }

    /// Assembles the engine from an explicit registry. Tests inject mock
    /// providers through this.
    pub fn with_providers(
        config: &OcrConfig,
        registry: HashMap<String, Arc<dyn OcrProvider>>,
    ) -> Result<Self, OcrError> {
        if config.provider_chain.is_empty() {
            return Err(OcrError::EmptyProviderChain);
        }
        Ok(Self {
            chain: config.provider_chain.clone(),
            registry,
            min_quality: config.min_quality,
            provider_min_quality: config.provider_min_quality.clone(),
            strict_provider: config.strict_provider,
        })
    }

    /// Chain entries that actually have a registered provider, in chain
    /// order. Startup health surface.
    pub fn provider_names(&self) -> Vec<&str> {
        self.chain
            .iter()
            .filter(|name| self.registry.contains_key(name.as_str()))
            .map(String::as_str)
            .collect()
    }

    fn min_quality_for(&self, provider: &str) -> f64 {
        self.provider_min_quality
            .get(provider)
            .copied()
            .unwrap_or(self.min_quality)
    }

    /// Runs the chain on one preprocessed page.
    ///
    /// Always returns text (possibly empty) with the attempt that produced
    /// it; the only error paths are strict-provider aborts.
    pub fn run(&self, image_png: &[u8], lang: &str) -> Result<(String, OcrAttempt), OcrError> {
        let mut best_text = String::new();
        let mut best = OcrAttempt::none();

        for name in &self.chain {
            let provider = match self.registry.get(name) {
                Some(p) => p,
                None => {
                    debug!(provider = %name, "Provider not registered, skipping");
                    continue;
                }
            };

            let response = provider.recognize(image_png, lang);

            if self.strict_provider && !response.status.is_tolerated_strict() {
                return Err(OcrError::StrictProviderFailure {
                    provider: name.clone(),
                    status: response.status,
                    detail: response.error,
                });
            }

            if response.status != ProviderStatus::Ok {
                warn!(
                    provider = %name,
                    status = %response.status,
                    error = %response.error,
                    "OCR provider failed, trying next in chain"
                );
                continue;
            }

            let quality = score_text_quality(&response.text);
            let attempt = OcrAttempt {
                provider: name.clone(),
                status: response.status,
                quality,
                reason: response.reason.to_string(),
                text_length: response.text.chars().count(),
            };

            // Vision's own confidence beats the local heuristic for the
            // handwriting and stamp-heavy pages the heuristic misjudges.
            if name == "google_vision" && !response.text.trim().is_empty() {
                let mut attempt = attempt;
                attempt.reason = "google_vision_text_found".to_string();
                info!(
                    provider = %name,
                    quality = format!("{quality:.3}"),
                    text_length = attempt.text_length,
                    "Accepting Google Vision text"
                );
                return Ok((response.text, attempt));
            }

            // A zero floor still never accepts an empty page.
            let floor = self.min_quality_for(name);
            if quality >= floor && !response.text.trim().is_empty() {
                let mut attempt = attempt;
                attempt.reason = "quality_threshold_met".to_string();
                info!(
                    provider = %name,
                    quality = format!("{quality:.3}"),
                    floor,
                    "Accepting OCR text at quality threshold"
                );
                return Ok((response.text, attempt));
            }

            debug!(
                provider = %name,
                quality = format!("{quality:.3}"),
                floor,
                "Quality below threshold, trying next provider"
            );

            if quality > best.quality {
                best_text = response.text;
                best = attempt;
            }
        }

        if best.provider == "none" {
            warn!("No OCR provider produced text for page");
        } else {
            warn!(
                provider = %best.provider,
                quality = format!("{:.3}", best.quality),
                "All providers below threshold, keeping best attempt"
            );
        }
        Ok((best_text, best))
    }
}

fn non_empty(value: &str) -> Option<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ocr::types::{MockProvider, ProviderResponse};

    fn config_with_chain(chain: &[&str]) -> OcrConfig {
        OcrConfig {
            provider_chain: chain.iter().map(|s| s.to_string()).collect(),
            ..OcrConfig::default()
        }
    }

    fn engine_with(
        config: &OcrConfig,
        providers: Vec<Arc<MockProvider>>,
    ) -> FallbackEngine {
        let registry = providers
            .into_iter()
            .map(|p| (p.name().to_string(), p as Arc<dyn OcrProvider>))
            .collect();
        FallbackEngine::with_providers(config, registry).unwrap()
    }

    const GOOD_TEXT: &str = "A szerződő felek megállapodnak abban, hogy a bérleti \
                             díj összege havonta fizetendő, a tárgyhónap ötödik napjáig.";

    #[test]
    fn provider_names_skip_unregistered_entries() {
        let config = config_with_chain(&["google_vision", "tesseract"]);
        let vision = Arc::new(MockProvider::ok("google_vision", "x"));
        let engine = engine_with(&config, vec![vision]);
        assert_eq!(engine.provider_names(), vec!["google_vision"]);
    }

    #[test]
    fn empty_chain_is_rejected() {
        let config = config_with_chain(&[]);
        let result = FallbackEngine::with_providers(&config, HashMap::new());
        assert!(matches!(result, Err(OcrError::EmptyProviderChain)));
    }

    #[test]
    fn google_vision_text_short_circuits() {
        let config = config_with_chain(&["google_vision", "tesseract"]);
        let vision = Arc::new(MockProvider::ok("google_vision", "rövid"));
        let tess = Arc::new(MockProvider::ok("tesseract", GOOD_TEXT));
        let engine = engine_with(&config, vec![Arc::clone(&vision), Arc::clone(&tess)]);

        let (text, attempt) = engine.run(b"png", "hun").unwrap();
        assert_eq!(text, "rövid");
        assert_eq!(attempt.reason, "google_vision_text_found");
        assert_eq!(tess.call_count(), 0);
    }

    #[test]
    fn quality_threshold_accepts_later_provider() {
        let config = config_with_chain(&["ocr_space", "tesseract"]);
        let noisy = Arc::new(MockProvider::ok("ocr_space", "@@## $$%% ^^&&"));
        let clean = Arc::new(MockProvider::ok("tesseract", GOOD_TEXT));
        let engine = engine_with(&config, vec![noisy, clean]);

        let (text, attempt) = engine.run(b"png", "hun").unwrap();
        assert_eq!(text, GOOD_TEXT);
        assert_eq!(attempt.provider, "tesseract");
        assert_eq!(attempt.reason, "quality_threshold_met");
    }

    #[test]
    fn zero_floor_still_rejects_empty_text() {
        let mut config = config_with_chain(&["ocr_space", "tesseract"]);
        config.provider_min_quality.insert("ocr_space".into(), 0.0);
        let blank = Arc::new(MockProvider::ok("ocr_space", ""));
        let clean = Arc::new(MockProvider::ok("tesseract", GOOD_TEXT));
        let engine = engine_with(&config, vec![blank, Arc::clone(&clean)]);

        let (text, attempt) = engine.run(b"png", "hun").unwrap();
        assert_eq!(text, GOOD_TEXT);
        assert_eq!(attempt.provider, "tesseract");
        assert_eq!(clean.call_count(), 1);
    }

    #[test]
    fn best_attempt_wins_when_nothing_passes() {
        let mut config = config_with_chain(&["ocr_space", "tesseract"]);
        config.min_quality = 0.99;
        let worse = Arc::new(MockProvider::ok("ocr_space", "@@## $$%%"));
        let better = Arc::new(MockProvider::ok("tesseract", GOOD_TEXT));
        let engine = engine_with(&config, vec![worse, better]);

        let (text, attempt) = engine.run(b"png", "hun").unwrap();
        assert_eq!(text, GOOD_TEXT);
        assert_eq!(attempt.provider, "tesseract");
        assert!(attempt.quality < 0.99);
    }

    #[test]
    fn failed_providers_are_stepped_over() {
        let config = config_with_chain(&["google_vision", "tesseract"]);
        let broken = Arc::new(MockProvider::new(
            "google_vision",
            ProviderResponse::failed(ProviderStatus::ApiError, "boom".into()),
        ));
        let working = Arc::new(MockProvider::ok("tesseract", GOOD_TEXT));
        let engine = engine_with(&config, vec![broken, working]);

        let (text, attempt) = engine.run(b"png", "hun").unwrap();
        assert_eq!(text, GOOD_TEXT);
        assert_eq!(attempt.provider, "tesseract");
    }

    #[test]
    fn strict_mode_aborts_on_provider_failure() {
        let mut config = config_with_chain(&["google_vision", "tesseract"]);
        config.strict_provider = true;
        let broken = Arc::new(MockProvider::new(
            "google_vision",
            ProviderResponse::failed(ProviderStatus::AuthError, "bad key".into()),
        ));
        let working = Arc::new(MockProvider::ok("tesseract", GOOD_TEXT));
        let engine = engine_with(&config, vec![broken, Arc::clone(&working)]);

        let err = engine.run(b"png", "hun").unwrap_err();
        match err {
            OcrError::StrictProviderFailure { provider, status, .. } => {
                assert_eq!(provider, "google_vision");
                assert_eq!(status, ProviderStatus::AuthError);
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(working.call_count(), 0);
    }

    #[test]
    fn strict_mode_tolerates_skipped_providers() {
        let mut config = config_with_chain(&["ocr_space", "tesseract"]);
        config.strict_provider = true;
        let skipped = Arc::new(MockProvider::new(
            "ocr_space",
            ProviderResponse::skipped("missing_api_key"),
        ));
        let working = Arc::new(MockProvider::ok("tesseract", GOOD_TEXT));
        let engine = engine_with(&config, vec![skipped, working]);

        let (text, _) = engine.run(b"png", "hun").unwrap();
        assert_eq!(text, GOOD_TEXT);
    }

    #[test]
    fn unregistered_provider_in_chain_is_skipped() {
        let config = config_with_chain(&["missing", "tesseract"]);
        let working = Arc::new(MockProvider::ok("tesseract", GOOD_TEXT));
        let engine = engine_with(&config, vec![working]);

        let (text, attempt) = engine.run(b"png", "hun").unwrap();
        assert_eq!(text, GOOD_TEXT);
        assert_eq!(attempt.provider, "tesseract");
    }

    #[test]
    fn no_provider_ran_yields_empty_best() {
        let config = config_with_chain(&["missing"]);
        let engine = engine_with(&config, vec![]);

        let (text, attempt) = engine.run(b"png", "hun").unwrap();
        assert!(text.is_empty());
        assert_eq!(attempt.provider, "none");
        assert_eq!(attempt.reason, "no_provider_ran");
    }

    #[test]
    fn per_provider_floor_overrides_global() {
        let mut config = config_with_chain(&["tesseract"]);
        config.min_quality = 0.99;
        config.provider_min_quality.insert("tesseract".into(), 0.10);
        let working = Arc::new(MockProvider::ok("tesseract", GOOD_TEXT));
        let engine = engine_with(&config, vec![working]);

        let (_, attempt) = engine.run(b"png", "hun").unwrap();
        assert_eq!(attempt.reason, "quality_threshold_met");
    }
}
