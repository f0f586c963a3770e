//! The stage pipeline: runs the full analysis graph over extracted text.
//!
//! Every stage is one chat call. Independent stages fan out onto bounded
//! worker pools and the pipeline waits for each group before the dependent
//! stage starts. Per-reference rate limits are retried with backoff and
//! degrade to a sentinel verdict; any other stage error is fatal for the
//! whole document.

use std::sync::Mutex;
use std::time::Instant;

use tracing::{debug, info, warn};

use super::llm::{ChatClient, ChatRequest, LlmError};
use super::stages::{
    extraction_guide, AnalysisConfig, CONTRACT_TYPES, GUIDE_PREFIX, M10_PROMPT, M11_PROMPT,
    M12_PROMPT, M13_PROMPT, M26_PROMPT, M27_PROMPT, M28_PROMPT, M30_PROMPT, M31_PROMPT,
    M32_PROMPT, OTHER_CONTRACT_TYPE, PLACEHOLDER_NOTICE, RATE_LIMIT_SENTINEL, REFERENCE_POOL,
    REFERENCE_RETRIES, REVIEWER_POOL, REVIEWER_PROMPTS, TARGET_LANGUAGE, TRANSLATE_PROMPT,
};
use super::types::{
    AnalysisOutcome, LegalReference, ReferenceSuggestion, ReferenceVerdict, StageTiming,
    SummaryMatrix,
};
use super::AnalysisError;
use crate::pool;

/// Words taken from each end of the text for language detection. The
/// opening and closing formulas identify the language reliably; the body
/// adds nothing, so the sample stays small.
const LANGUAGE_SAMPLE_WORDS: usize = 15;

/// Dispatches stage calls, records one timing entry per call.
struct StageRunner<'a> {
    client: &'a dyn ChatClient,
    config: &'a AnalysisConfig,
    store: bool,
    timings: Mutex<Vec<StageTiming>>,
}

impl<'a> StageRunner<'a> {
    fn new(client: &'a dyn ChatClient, config: &'a AnalysisConfig, store: bool) -> Self {
        Self { client, config, store, timings: Mutex::new(Vec::new()) }
    }

    /// One timed call; the raw error is kept for the retry loops.
    fn call_raw(&self, stage: &str, system: &str, user: &str) -> Result<String, LlmError> {
        let system = format!("{system}\n\n{PLACEHOLDER_NOTICE}");
        let request = ChatRequest {
            stage,
            model: self.config.model_for(stage),
            system: &system,
            user,
            store: self.store,
        };
        let started = Instant::now();
        let result = self.client.chat(&request);
        let duration_secs = started.elapsed().as_secs_f64();
        debug!(stage, duration_secs, ok = result.is_ok(), "stage call finished");
        self.record(stage, duration_secs);
        result
    }

    fn call(&self, stage: &str, system: &str, user: &str) -> Result<String, AnalysisError> {
        self.call_raw(stage, system, user)
            .map_err(|source| AnalysisError::Stage { stage: stage.to_string(), source })
    }

    fn record(&self, stage: &str, duration_secs: f64) {
        self.timings
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .push(StageTiming { stage: stage.to_string(), duration_secs });
    }

    fn into_timings(self) -> Vec<StageTiming> {
        self.timings.into_inner().unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

/// Excerpt for language detection: the first and last words of the text.
fn language_sample(text: &str) -> String {
    let words: Vec<&str> = text.split_whitespace().collect();
    if words.len() <= 2 * LANGUAGE_SAMPLE_WORDS {
        return words.join(" ");
    }
    let head = words[..LANGUAGE_SAMPLE_WORDS].join(" ");
    let tail = words[words.len() - LANGUAGE_SAMPLE_WORDS..].join(" ");
    format!("{head}\n{tail}")
}

/// Coerces classification output to a category index. Anything other than
/// a single in-range digit falls into the "other" bucket.
fn parse_contract_type(raw: &str) -> usize {
    let trimmed = raw.trim();
    match trimmed.parse::<usize>() {
        Ok(index) if trimmed.len() == 1 && index < CONTRACT_TYPES.len() => index,
        _ => {
            debug!(raw = trimmed, "classification output coerced to the other category");
            OTHER_CONTRACT_TYPE
        }
    }
}

/// Splits the reference-extraction output into citations. Leading list
/// numbering ("3. ") is stripped.
fn parse_references(raw: &str) -> Vec<LegalReference> {
    raw.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(|line| {
            let citation = match line.split_once(". ") {
                Some((prefix, rest)) if prefix.chars().all(|c| c.is_ascii_digit()) => rest,
                _ => line,
            };
            LegalReference { citation: citation.trim().to_string() }
        })
        .collect()
}

/// Retries `stage` on rate limits with linear backoff. `Ok(None)` means the
/// retry budget was exhausted; any other error aborts.
fn call_with_rate_limit_retry(
    runner: &StageRunner<'_>,
    stage: &str,
    system: &str,
    user: &str,
) -> Result<Option<String>, AnalysisError> {
    let mut attempt = 0;
    loop {
        match runner.call_raw(stage, system, user) {
            Ok(reply) => return Ok(Some(reply)),
            Err(LlmError::RateLimited) if attempt < REFERENCE_RETRIES => {
                let pause = runner.config.reference_backoff(attempt);
                warn!(stage, attempt, pause_secs = pause.as_secs(), "rate limited, backing off");
                std::thread::sleep(pause);
                attempt += 1;
            }
            Err(LlmError::RateLimited) => {
                warn!(stage, "rate-limit retries exhausted");
                return Ok(None);
            }
            Err(source) => {
                return Err(AnalysisError::Stage { stage: stage.to_string(), source })
            }
        }
    }
}

/// Runs the full stage graph over `text` and assembles the outcome.
///
/// `store` forwards the caller's data-retention decision to every chat
/// call. The only non-fatal failures are per-reference rate-limit
/// exhaustions, which are recorded as sentinel verdicts.
pub fn analyze_document(
    text: &str,
    config: &AnalysisConfig,
    client: &dyn ChatClient,
    store: bool,
) -> Result<AnalysisOutcome, AnalysisError> {
    let started = Instant::now();
    let runner = StageRunner::new(client, config, store);

    // Language detection, classification and reference extraction have no
    // upstream dependency and run as one group.
    let opening_jobs = vec![
        ("m10", M10_PROMPT, language_sample(text)),
        ("m11", M11_PROMPT, text.to_string()),
        ("m13", M13_PROMPT, text.to_string()),
    ];
    let mut opening = pool::run_indexed(opening_jobs.len(), opening_jobs, |_, (stage, system, user)| {
        runner.call(stage, system, &user)
    });
    let references_raw = opening.pop().transpose()?.unwrap_or_default();
    let classification_raw = opening.pop().transpose()?.unwrap_or_default();
    let detected_language = opening
        .pop()
        .transpose()?
        .unwrap_or_default()
        .trim()
        .to_string();

    let contract_type_index = parse_contract_type(&classification_raw);
    let contract_type = CONTRACT_TYPES[contract_type_index].to_string();
    let references = parse_references(&references_raw);
    info!(
        contract_type,
        language = detected_language,
        references = references.len(),
        "contract classified"
    );

    // Structured extraction with the category-specific guide.
    let extraction_system = format!(
        "{M12_PROMPT}\n\n{GUIDE_PREFIX}{}",
        extraction_guide(contract_type_index)
    );
    let key_terms = runner.call("m12", &extraction_system, text)?;

    // Reviewer lenses, bounded group. Each reviewer's failure is isolated
    // by the pool and propagated only after the whole group finished.
    let review_input = format!("Key terms:\n{key_terms}\n\nContract text:\n{text}");
    let batch_started = Instant::now();
    let review_results = pool::run_indexed(
        REVIEWER_POOL,
        REVIEWER_PROMPTS.to_vec(),
        |_, (stage, system)| runner.call(stage, system, &review_input),
    );
    runner.record("m2x_batch", batch_started.elapsed().as_secs_f64());
    let reviews: Vec<String> = review_results.into_iter().collect::<Result<_, _>>()?;

    // Per-reference validation, rate-limit exhaustion degrades to the
    // sentinel verdict instead of aborting the batch.
    let reference_workers = REFERENCE_POOL.min(references.len().max(1));
    let verdict_results = pool::run_indexed(reference_workers, references, |_, reference| {
        let user = format!("Reference: {}\n\nContract text:\n{}", reference.citation, text);
        let verdict = match call_with_rate_limit_retry(&runner, "m26", M26_PROMPT, &user)? {
            Some(reply) => reply.trim().to_string(),
            None => RATE_LIMIT_SENTINEL.to_string(),
        };
        Ok(ReferenceVerdict { reference, verdict })
    });
    let verdicts: Vec<ReferenceVerdict> =
        verdict_results.into_iter().collect::<Result<_, AnalysisError>>()?;

    // Suggestions, only for the flagged subset.
    let flagged: Vec<ReferenceVerdict> =
        verdicts.iter().filter(|v| !v.is_valid()).cloned().collect();
    let suggestion_workers = REFERENCE_POOL.min(flagged.len().max(1));
    let suggestion_results = pool::run_indexed(suggestion_workers, flagged, |_, verdict| {
        let user = format!(
            "Reference: {}\nProblem found: {}\n\nContract text:\n{}",
            verdict.reference.citation, verdict.verdict, text
        );
        let suggestion = match call_with_rate_limit_retry(&runner, "m27", M27_PROMPT, &user)? {
            Some(reply) => reply.trim().to_string(),
            None => RATE_LIMIT_SENTINEL.to_string(),
        };
        Ok(ReferenceSuggestion {
            reference: verdict.reference,
            assessment: verdict.verdict,
            suggestion,
        })
    });
    let suggestions: Vec<ReferenceSuggestion> =
        suggestion_results.into_iter().collect::<Result<_, AnalysisError>>()?;

    // Consolidation over reviewer findings plus citation corrections.
    let suggestions_summary: String = suggestions
        .iter()
        .enumerate()
        .map(|(idx, s)| {
            format!(
                "{}. Reference: {}\n   Assessment: {}\n   Suggestion: {}",
                idx + 1,
                s.reference.citation,
                s.assessment,
                s.suggestion
            )
        })
        .collect::<Vec<_>>()
        .join("\n");
    let consolidation_input = if suggestions_summary.is_empty() {
        reviews.join(" | ")
    } else {
        format!("{}\n\n{}", reviews.join(" | "), suggestions_summary)
    };
    let issues_report = runner.call("m28", M28_PROMPT, &consolidation_input)?;

    // Summary tiers, derived top-down from the detailed summary.
    let summary_input = format!("Key terms:\n{key_terms}\n\nIssues found:\n{issues_report}");
    let detailed = runner.call("m30", M30_PROMPT, &summary_input)?;
    let mut summaries = SummaryMatrix::from_detailed(detailed.clone());

    let condense_jobs = vec![("m31", M31_PROMPT), ("m32", M32_PROMPT)];
    let mut condensed = pool::run_indexed(condense_jobs.len(), condense_jobs, |_, (stage, system)| {
        runner.call(stage, system, &detailed)
    });
    let short = condensed.pop().transpose()?.unwrap_or_default();
    let normal = condensed.pop().transpose()?.unwrap_or_default();
    summaries.set_condensed(normal.clone(), short.clone());

    let translate_system = format!("{TRANSLATE_PROMPT} Target language: {TARGET_LANGUAGE}.");
    let translate_jobs = vec![("m41", detailed.clone()), ("m42", normal), ("m43", short)];
    let mut translated = pool::run_indexed(translate_jobs.len(), translate_jobs, |_, (stage, tier)| {
        runner.call(stage, &translate_system, &tier)
    });
    let short_t = translated.pop().transpose()?.unwrap_or_default();
    let normal_t = translated.pop().transpose()?.unwrap_or_default();
    let detailed_t = translated.pop().transpose()?.unwrap_or_default();
    summaries.set_translations(detailed_t, normal_t, short_t);

    // Convenience rendition of the detailed summary in the source language.
    let rendering_input = format!(
        "Translated Output Language: {detected_language}\nText needing translation: {detailed}"
    );
    let summary_doc_language = runner.call("m50", TRANSLATE_PROMPT, &rendering_input)?;

    let timings = runner.into_timings();
    let api_time_secs = timings
        .iter()
        .filter(|t| !t.is_batch())
        .map(|t| t.duration_secs)
        .sum();
    let elapsed_secs = started.elapsed().as_secs_f64();
    info!(elapsed_secs, api_time_secs, "analysis pipeline finished");

    Ok(AnalysisOutcome {
        contract_type,
        contract_type_index,
        detected_language,
        key_terms,
        references: verdicts,
        suggestions,
        issues_report,
        summaries,
        summary_doc_language,
        timings,
        elapsed_secs,
        api_time_secs,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::llm::MockChatClient;
    use crate::analysis::types::SummaryLength;

    fn fast_config() -> AnalysisConfig {
        AnalysisConfig { retry_pause_secs: 0, ..AnalysisConfig::default() }
    }

    fn scripted_client() -> MockChatClient {
        MockChatClient::new()
            .with_reply("m10", "Hungarian")
            .with_reply("m11", "1")
            .with_reply("m12", "key terms")
            .with_reply("m13", "1. Ptk. 6:342. §\n2. Inytv. 29. §")
            .with_reply("m21", "format ok")
            .with_reply("m22", "risk found")
            .with_reply("m23", "sound")
            .with_reply("m24", "compliant")
            .with_reply("m25", "typo found")
            .with_reply("m26", "0")
            .with_reply("m28", "issues report")
            .with_reply("m30", "detailed summary")
            .with_reply("m31", "normal summary")
            .with_reply("m32", "short summary")
            .with_reply("m41", "detailed en")
            .with_reply("m42", "normal en")
            .with_reply("m43", "short en")
            .with_reply("m50", "magyar összefoglaló")
    }

    #[test]
    fn full_run_assembles_outcome() {
        let client = scripted_client();
        let outcome = analyze_document("szerződés", &fast_config(), &client, false).unwrap();
        assert_eq!(outcome.contract_type, "ingadvet");
        assert_eq!(outcome.detected_language, "Hungarian");
        assert_eq!(outcome.key_terms, "key terms");
        assert_eq!(outcome.references.len(), 2);
        assert!(outcome.references.iter().all(ReferenceVerdict::is_valid));
        assert!(outcome.suggestions.is_empty());
        assert_eq!(outcome.issues_report, "issues report");
        assert_eq!(outcome.summaries.analysis_summary(SummaryLength::Detailed), "detailed summary");
        assert_eq!(outcome.summaries.target_summary(SummaryLength::Short), "short en");
        assert_eq!(outcome.summary_doc_language, "magyar összefoglaló");
        assert!(outcome.api_time_secs >= 0.0);
        // one timing per chat call plus the reviewer batch aggregate
        assert_eq!(outcome.timings.len(), client.call_count("m26") + 18);
    }

    #[test]
    fn out_of_range_classification_becomes_other() {
        let client = scripted_client().with_reply("m11", "7");
        let outcome = analyze_document("szerződés", &fast_config(), &client, false).unwrap();
        assert_eq!(outcome.contract_type_index, OTHER_CONTRACT_TYPE);
        assert_eq!(outcome.contract_type, "egyeb");
    }

    #[test]
    fn malformed_classification_becomes_other() {
        let client = scripted_client().with_reply("m11", "category 2, probably");
        let outcome = analyze_document("szerződés", &fast_config(), &client, false).unwrap();
        assert_eq!(outcome.contract_type_index, OTHER_CONTRACT_TYPE);
    }

    #[test]
    fn suggestions_requested_only_for_flagged_references() {
        // All three references validate clean: no suggestion calls at all.
        let client = scripted_client()
            .with_reply("m13", "1. A\n2. B\n3. C")
            .with_reply("m26", "0")
            .with_reply("m27", "use Ptk. 6:343. § instead");
        // A flagged reference gets exactly one suggestion call.
        let flagged_client = scripted_client()
            .with_reply("m13", "1. A")
            .with_reply("m26", "citation is outdated")
            .with_reply("m27", "use Ptk. 6:343. § instead");

        let clean = analyze_document("t", &fast_config(), &client, false).unwrap();
        assert_eq!(client.call_count("m26"), 3);
        assert_eq!(client.call_count("m27"), 0);
        assert!(clean.suggestions.is_empty());

        let flagged = analyze_document("t", &fast_config(), &flagged_client, false).unwrap();
        assert_eq!(flagged_client.call_count("m26"), 1);
        assert_eq!(flagged_client.call_count("m27"), 1);
        assert_eq!(flagged.suggestions.len(), 1);
        assert_eq!(flagged.suggestions[0].assessment, "citation is outdated");
        assert_eq!(flagged.suggestions[0].suggestion, "use Ptk. 6:343. § instead");
    }

    #[test]
    fn mixed_verdicts_flag_one_suggestion() {
        let client = scripted_client()
            .with_reply("m13", "1. A\n2. B\n3. C")
            .with_replies("m26", &["0", "citation is outdated", "0"])
            .with_reply("m27", "use the current citation");
        let outcome = analyze_document("t", &fast_config(), &client, false).unwrap();
        assert_eq!(outcome.references.len(), 3);
        assert_eq!(outcome.references.iter().filter(|v| !v.is_valid()).count(), 1);
        assert_eq!(client.call_count("m27"), 1);
        assert_eq!(outcome.suggestions.len(), 1);
    }

    #[test]
    fn rate_limit_exhaustion_records_sentinel_and_continues() {
        let client = scripted_client()
            .with_reply("m13", "1. Ptk. 6:342. §")
            .rate_limited_times("m26", 100, "0");
        let outcome = analyze_document("t", &fast_config(), &client, false).unwrap();
        assert_eq!(outcome.references.len(), 1);
        assert_eq!(outcome.references[0].verdict, RATE_LIMIT_SENTINEL);
        // initial attempt plus the retry budget
        assert_eq!(client.call_count("m26"), 1 + REFERENCE_RETRIES as usize);
        // downstream stages still ran
        assert_eq!(outcome.issues_report, "issues report");
    }

    #[test]
    fn rate_limit_recovery_keeps_verdict() {
        let client = scripted_client()
            .with_reply("m13", "1. Ptk. 6:342. §")
            .rate_limited_times("m26", 2, "0");
        let outcome = analyze_document("t", &fast_config(), &client, false).unwrap();
        assert!(outcome.references[0].is_valid());
        assert_eq!(client.call_count("m26"), 3);
    }

    #[test]
    fn reviewer_failure_fails_the_run_after_the_group() {
        let client = scripted_client().failing_stage("m23");
        let err = analyze_document("t", &fast_config(), &client, false).unwrap_err();
        match err {
            AnalysisError::Stage { stage, .. } => assert_eq!(stage, "m23"),
        }
        // the sibling reviewers still completed before propagation
        assert_eq!(client.call_count("m21"), 1);
        assert_eq!(client.call_count("m25"), 1);
    }

    #[test]
    fn no_references_skips_validation() {
        let client = scripted_client().with_reply("m13", "");
        let outcome = analyze_document("t", &fast_config(), &client, false).unwrap();
        assert!(outcome.references.is_empty());
        assert_eq!(client.call_count("m26"), 0);
        assert_eq!(client.call_count("m27"), 0);
    }

    #[test]
    fn reference_lines_are_denumbered() {
        let parsed = parse_references("1. Ptk. 6:342. §\n\n2. Inytv. 29. §\nMt. 66. §");
        let citations: Vec<&str> = parsed.iter().map(|r| r.citation.as_str()).collect();
        assert_eq!(citations, vec!["Ptk. 6:342. §", "Inytv. 29. §", "Mt. 66. §"]);
    }

    #[test]
    fn language_sample_keeps_both_ends() {
        let words: Vec<String> = (0..400).map(|i| format!("w{i}")).collect();
        let sample = language_sample(&words.join(" "));
        assert!(sample.starts_with("w0 w1"));
        assert!(sample.ends_with("w398 w399"));
        assert!(!sample.contains("w200 "));
    }

    #[test]
    fn short_text_sampled_whole() {
        assert_eq!(language_sample("rövid  szerződés"), "rövid szerződés");
    }

    #[test]
    fn extraction_guide_reaches_the_model() {
        let client = scripted_client().with_reply("m11", "0");
        analyze_document("t", &fast_config(), &client, false).unwrap();
        // guide is part of the system prompt, the user payload stays the text
        assert_eq!(client.user_payloads("m12"), vec!["t".to_string()]);
        assert!(client.system_payloads("m12")[0].contains("service contracts"));
    }

    #[test]
    fn other_category_still_gets_a_guide() {
        let client = scripted_client().with_reply("m11", "banana");
        analyze_document("t", &fast_config(), &client, false).unwrap();
        let system = &client.system_payloads("m12")[0];
        assert!(system.contains("Here is a specific guide for evaluating this contract: "));
    }

    #[test]
    fn every_stage_carries_the_placeholder_notice() {
        let client = scripted_client();
        analyze_document("[Party 1 company name] szerződése", &fast_config(), &client, false)
            .unwrap();
        for stage in ["m12", "m30", "m41", "m50"] {
            assert!(
                client.system_payloads(stage)[0].contains(PLACEHOLDER_NOTICE),
                "{stage} prompt lacks the placeholder notice"
            );
        }
    }

    #[test]
    fn api_time_excludes_batch_aggregates() {
        let client = scripted_client();
        let outcome = analyze_document("t", &fast_config(), &client, false).unwrap();
        let total: f64 = outcome.timings.iter().map(|t| t.duration_secs).sum();
        assert!(outcome.api_time_secs <= total);
        assert!(outcome.timings.iter().any(StageTiming::is_batch));
    }
}
