//! Per-document driver: extract, sanitize, analyze, restore, encrypt.
//!
//! This is the orchestration layer callers hand a file path to. The
//! caller's data-retention decision controls three things at once: whether
//! the PII sanitizer runs before analysis, whether the conversation-store
//! flag is forwarded to model calls, and whether the stored record keeps
//! clear text or ciphertext.

use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

use crate::analysis::{analyze_document, AnalysisConfig, AnalysisError, ChatClient, SummaryLength};
use crate::crypto::Cipher;
use crate::extract::{DocumentExtractor, ExtractionError, FileKind};
use crate::pii::{restore_text, PiiMap, SanitizeStrategy};

#[derive(Debug, Error)]
pub enum ProcessError {
    #[error(transparent)]
    Extraction(#[from] ExtractionError),
    #[error(transparent)]
    Analysis(#[from] AnalysisError),
}

/// Caller choices for one document run.
#[derive(Debug, Clone, Copy)]
pub struct ProcessOptions {
    /// The caller may retain clear data: skip encryption at rest and
    /// forward the conversation-store flag to model calls.
    pub retain_clear: bool,
    /// Mask personal data before any text leaves the process. Ignored when
    /// no sanitizer is wired in.
    pub use_pii_sanitizer: bool,
}

/// The persistable result of one document run. When `retain_clear` was off,
/// the sensitive fields are encrypted tokens and the clear fields are
/// empty; otherwise the clear fields are populated and the encrypted ones
/// stay empty.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AnalysisRecord {
    pub contract_type: String,
    pub detected_language: String,
    pub flagged_reference_count: usize,
    pub api_time_secs: f64,
    pub elapsed_secs: f64,

    pub extracted_text: String,
    pub key_terms: String,
    pub issues_report: String,
    pub summary_short: String,
    pub summary_normal: String,
    pub summary_detailed: String,
    pub summary_doc_language: String,

    pub encrypted_text: String,
    pub encrypted_pii_map: String,
    pub encrypted_key_terms: String,
    pub encrypted_issues_report: String,
    pub encrypted_summary_short: String,
    pub encrypted_summary_normal: String,
    pub encrypted_summary_detailed: String,
    pub encrypted_summary_doc_language: String,
}

/// Orchestrates the full per-document flow.
pub struct DocumentProcessor {
    extractor: DocumentExtractor,
    sanitizer: Option<Box<dyn SanitizeStrategy>>,
    chat: Arc<dyn ChatClient>,
    cipher: Cipher,
    analysis: AnalysisConfig,
}

impl DocumentProcessor {
    pub fn new(
        extractor: DocumentExtractor,
        sanitizer: Option<Box<dyn SanitizeStrategy>>,
        chat: Arc<dyn ChatClient>,
        cipher: Cipher,
        analysis: AnalysisConfig,
    ) -> Self {
        Self { extractor, sanitizer, chat, cipher, analysis }
    }

    /// Runs one document end to end and returns the persistable record.
    pub fn process(
        &self,
        path: &Path,
        options: ProcessOptions,
    ) -> Result<AnalysisRecord, ProcessError> {
        let kind = FileKind::from_path(path)?;
        let extracted = self.extractor.extract(path, kind)?;

        // Only the sanitized form is ever persisted; the PII map is the
        // recovery path back to the original wording.
        let (analysis_input, pii_map) = match (&self.sanitizer, options.use_pii_sanitizer) {
            (Some(sanitizer), true) => {
                let (masked, map) = sanitizer.sanitize(&extracted);
                info!(entities = map.len(), "Masked personal data before analysis");
                (masked, map)
            }
            (None, true) => {
                warn!("Sanitization requested but no sanitizer is configured");
                (extracted, PiiMap::new())
            }
            _ => (extracted, PiiMap::new()),
        };

        // Conversation retention needs both the caller's permission and the
        // deployment-level opt-in.
        let store = options.retain_clear && self.analysis.store_conversations;
        let mut outcome =
            analyze_document(&analysis_input, &self.analysis, self.chat.as_ref(), store)?;

        // Put the masked names back into everything the user reads.
        if !pii_map.is_empty() {
            outcome.summaries.map_cells(|cell| restore_text(cell, &pii_map));
            outcome.key_terms = restore_text(&outcome.key_terms, &pii_map);
            outcome.issues_report = restore_text(&outcome.issues_report, &pii_map);
            outcome.summary_doc_language = restore_text(&outcome.summary_doc_language, &pii_map);
        }

        let flagged_reference_count =
            outcome.references.iter().filter(|v| !v.is_valid()).count();
        let mut record = AnalysisRecord {
            contract_type: outcome.contract_type.clone(),
            detected_language: outcome.detected_language.clone(),
            flagged_reference_count,
            api_time_secs: outcome.api_time_secs,
            elapsed_secs: outcome.elapsed_secs,
            ..AnalysisRecord::default()
        };

        let summaries = &outcome.summaries;
        if options.retain_clear {
            record.extracted_text = analysis_input;
            record.key_terms = outcome.key_terms.clone();
            record.issues_report = outcome.issues_report.clone();
            record.summary_short = summaries.analysis_summary(SummaryLength::Short).to_string();
            record.summary_normal = summaries.analysis_summary(SummaryLength::Normal).to_string();
            record.summary_detailed =
                summaries.analysis_summary(SummaryLength::Detailed).to_string();
            record.summary_doc_language = outcome.summary_doc_language.clone();
        } else {
            let map_json = serde_json::to_string(&pii_map).unwrap_or_default();
            record.encrypted_text = self.cipher.encrypt(&analysis_input);
            record.encrypted_pii_map = self.cipher.encrypt(&map_json);
            record.encrypted_key_terms = self.cipher.encrypt(&outcome.key_terms);
            record.encrypted_issues_report = self.cipher.encrypt(&outcome.issues_report);
            record.encrypted_summary_short =
                self.cipher.encrypt(summaries.analysis_summary(SummaryLength::Short));
            record.encrypted_summary_normal =
                self.cipher.encrypt(summaries.analysis_summary(SummaryLength::Normal));
            record.encrypted_summary_detailed =
                self.cipher.encrypt(summaries.analysis_summary(SummaryLength::Detailed));
            record.encrypted_summary_doc_language =
                self.cipher.encrypt(&outcome.summary_doc_language);
        }

        info!(
            contract_type = record.contract_type,
            flagged = record.flagged_reference_count,
            retained_clear = options.retain_clear,
            "Document processed"
        );
        Ok(record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::MockChatClient;
    use crate::config::OcrConfig;
    use crate::extract::pdf::MockPageRenderer;
    use crate::ocr::{FallbackEngine, MockProvider};
    use crate::pii::PatternSanitizer;
    use std::collections::HashMap;
    use std::io::Write as _;
    use std::sync::Arc;

    fn extractor() -> DocumentExtractor {
        let config = OcrConfig::default();
        let provider = Arc::new(MockProvider::ok("google_vision", "szöveg"));
        let mut registry: HashMap<String, Arc<dyn crate::ocr::OcrProvider>> = HashMap::new();
        registry.insert("google_vision".into(), provider);
        let engine = FallbackEngine::with_providers(&config, registry).unwrap();
        DocumentExtractor::new(Box::new(MockPageRenderer::new(1, Vec::new())), engine, &config)
    }

    fn chat_client() -> Arc<MockChatClient> {
        Arc::new(
            MockChatClient::new()
                .with_reply("m10", "Hungarian")
                .with_reply("m11", "0")
                .with_reply("m12", "terms for [Party 1 company name]")
                .with_reply("m13", "")
                .with_reply("m21", "ok")
                .with_reply("m22", "ok")
                .with_reply("m23", "ok")
                .with_reply("m24", "ok")
                .with_reply("m25", "ok")
                .with_reply("m28", "no issues")
                .with_reply("m30", "summary of [Party 1 company name]'s contract")
                .with_reply("m31", "normal")
                .with_reply("m32", "short")
                .with_reply("m41", "en detailed")
                .with_reply("m42", "en normal")
                .with_reply("m43", "en short")
                .with_reply("m50", "magyar"),
        )
    }

    fn fast_analysis_config() -> AnalysisConfig {
        AnalysisConfig { retry_pause_secs: 0, ..AnalysisConfig::default() }
    }

    fn write_contract(dir: &tempfile::TempDir) -> std::path::PathBuf {
        let path = dir.path().join("szerzodes_hu.txt");
        let mut file = std::fs::File::create(&path).unwrap();
        file.write_all("egyrészről az Alfa Kft. köt szerződést".as_bytes())
            .unwrap();
        path
    }

    fn processor(
        sanitizer: Option<Box<dyn SanitizeStrategy>>,
        chat: Arc<MockChatClient>,
    ) -> DocumentProcessor {
        DocumentProcessor::new(
            extractor(),
            sanitizer,
            chat,
            Cipher::from_secret("test-secret"),
            fast_analysis_config(),
        )
    }

    #[test]
    fn retained_run_keeps_clear_fields() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_contract(&dir);
        let chat = chat_client();
        let processor = processor(None, Arc::clone(&chat));

        let options = ProcessOptions { retain_clear: true, use_pii_sanitizer: false };
        let record = processor.process(&path, options).unwrap();

        assert_eq!(record.contract_type, "msz");
        assert!(record.extracted_text.contains("Alfa Kft."));
        assert_eq!(record.summary_detailed, "summary of [Party 1 company name]'s contract");
        assert!(record.encrypted_text.is_empty());
        assert!(record.encrypted_summary_detailed.is_empty());
    }

    #[test]
    fn unretained_run_encrypts_and_blanks_clear_fields() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_contract(&dir);
        let processor = processor(None, chat_client());

        let options = ProcessOptions { retain_clear: false, use_pii_sanitizer: false };
        let record = processor.process(&path, options).unwrap();

        assert!(record.extracted_text.is_empty());
        assert!(record.summary_detailed.is_empty());
        assert!(!record.encrypted_text.is_empty());
        let cipher = Cipher::from_secret("test-secret");
        assert!(cipher.decrypt(&record.encrypted_text).contains("Alfa Kft."));
        assert_eq!(
            cipher.decrypt(&record.encrypted_summary_detailed),
            "summary of [Party 1 company name]'s contract"
        );
    }

    #[test]
    fn sanitizer_masks_analysis_input_and_restores_outputs() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_contract(&dir);
        let chat = chat_client();
        let processor = processor(Some(Box::new(PatternSanitizer)), Arc::clone(&chat));

        let options = ProcessOptions { retain_clear: true, use_pii_sanitizer: true };
        let record = processor.process(&path, options).unwrap();

        // the text sent to the model carries the placeholder, not the name
        let classified = chat.user_payloads("m11");
        assert!(classified[0].contains("[Party 1 company name]"));
        assert!(!classified[0].contains("Alfa Kft."));
        // restored output carries the name again
        assert!(record.summary_detailed.contains("Alfa Kft."));
        // only the masked form is persisted
        assert!(record.extracted_text.contains("[Party 1 company name]"));
        assert!(!record.extracted_text.contains("Alfa Kft."));
    }

    #[test]
    fn unretained_sanitized_run_encrypts_masked_text() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_contract(&dir);
        let processor = processor(Some(Box::new(PatternSanitizer)), chat_client());

        let options = ProcessOptions { retain_clear: false, use_pii_sanitizer: true };
        let record = processor.process(&path, options).unwrap();

        let cipher = Cipher::from_secret("test-secret");
        let stored = cipher.decrypt(&record.encrypted_text);
        assert!(stored.contains("[Party 1 company name]"));
        assert!(!stored.contains("Alfa Kft."));
        // the map is the recovery path back to the original wording
        let map: PiiMap = serde_json::from_str(&cipher.decrypt(&record.encrypted_pii_map)).unwrap();
        assert!(restore_text(&stored, &map).contains("Alfa Kft."));
    }

    #[test]
    fn store_flag_follows_retention() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_contract(&dir);
        let chat = chat_client();
        let processor = processor(None, Arc::clone(&chat));

        let options = ProcessOptions { retain_clear: false, use_pii_sanitizer: false };
        processor.process(&path, options).unwrap();
        // MockChatClient records calls regardless of the store flag; the
        // flag itself is covered by the client serialization tests. Here we
        // only assert the pipeline ran.
        assert_eq!(chat.call_count("m30"), 1);
    }

    #[test]
    fn unsupported_extension_is_an_extraction_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("contract.odt");
        std::fs::write(&path, b"x").unwrap();
        let processor = processor(None, chat_client());
        let options = ProcessOptions { retain_clear: true, use_pii_sanitizer: false };
        let err = processor.process(&path, options).unwrap_err();
        assert!(matches!(err, ProcessError::Extraction(_)));
    }
}
