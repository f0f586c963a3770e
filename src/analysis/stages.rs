//! Stage catalog: identifiers, prompts, category guides and model routing.
//!
//! Every external model call in the pipeline has a short stage code. Cheap
//! mechanical stages (classification, validation, translation) default to
//! the mini model; the stages whose output the user actually reads default
//! to the full model. Each stage's model can be overridden with a
//! `CMS_MODEL_<STAGE>` environment variable.

use std::collections::HashMap;

use crate::config::env_flag;

/// Contract categories, classification output indexes into this list.
pub const CONTRACT_TYPES: &[&str] = &["msz", "ingadvet", "aszf", "lemnyil", "figy", "egyeb"];

/// Index of the catch-all "other" category, used for malformed or
/// out-of-range classification output.
pub const OTHER_CONTRACT_TYPE: usize = 5;

/// Verdict text meaning "no issue found".
pub const NO_ISSUE_VERDICT: &str = "0";

/// Verdict recorded when a reference exhausts its rate-limit retries.
pub const RATE_LIMIT_SENTINEL: &str = "RATE LIMIT ERROR";

/// Retry budget for per-reference validation and suggestion calls.
pub const REFERENCE_RETRIES: u32 = 3;

/// Worker bound for the reviewer group.
pub const REVIEWER_POOL: usize = 3;

/// Worker bound for per-reference fan-outs: `min(4, n)`.
pub const REFERENCE_POOL: usize = 4;

/// Fixed target language of the translation group.
pub const TARGET_LANGUAGE: &str = "English";

/// All stage codes, in pipeline order.
pub const STAGES: &[&str] = &[
    "m10", "m11", "m12", "m13", "m21", "m22", "m23", "m24", "m25", "m26", "m27", "m28",
    "m30", "m31", "m32", "m41", "m42", "m43", "m50",
];

// ── System prompts ─────────────────────────────────────────

/// Appended to every stage's system prompt. Sanitized documents carry
/// `[Party N <label>]` placeholders; a model that rewrites one breaks the
/// restoration pass.
pub const PLACEHOLDER_NOTICE: &str = "The text may contain placeholders such as \
[Party 1 company name]. Treat them as opaque tokens: copy them exactly as written, \
never translate, rephrase or omit them.";

pub const M10_PROMPT: &str = "Identify the language of the following contract excerpt. \
Answer with the language name only, in English, e.g. Hungarian.";

pub const M11_PROMPT: &str = "Classify this contract into exactly one category: \
0 = service contract, 1 = real estate sale or lease, 2 = general terms and conditions, \
3 = waiver or declaration, 4 = warning or notice letter, 5 = other. \
Answer with the single digit only.";

pub const M12_PROMPT: &str = "Extract the key terms of this contract: parties and roles, \
subject, consideration and payment terms, duration, termination conditions and notable \
obligations. Answer as a concise structured list.";

/// Prefix prepended to the category-specific guide appended to [`M12_PROMPT`].
pub const GUIDE_PREFIX: &str = "Here is a specific guide for evaluating this contract: ";

pub const M13_PROMPT: &str = "List every legal reference cited in this contract (statutes, \
codes, section numbers). One reference per line, numbered.";

/// Reviewer lenses m21–m25, each an independent pass over the key terms
/// and the full text.
pub const REVIEWER_PROMPTS: &[(&str, &str)] = &[
    ("m21", "Review the contract for formal validity: required elements, signatures, \
dates, identification of the parties. Report only problems found."),
    ("m22", "Review the contract for risks to the weaker party: one-sided obligations, \
penalties, liability shifts. Report only problems found."),
    ("m23", "Review the contract for legal soundness: clauses that conflict with \
statutory law or established practice. Report only problems found."),
    ("m24", "Review the contract for regulatory compliance: consumer protection, data \
protection, sector rules. Report only problems found."),
    ("m25", "Review the contract for detail errors: typos, inconsistent names or \
amounts, broken cross-references. Report only problems found."),
];

pub const M26_PROMPT: &str = "Check whether the cited legal reference exists and is \
applicable in the context of the contract excerpt. If the citation is correct and \
applicable, answer with the single character 0. Otherwise describe the problem briefly.";

pub const M27_PROMPT: &str = "A legal citation in this contract was found to be wrong or \
inapplicable. Propose the correct citation for the intended rule. Answer with the \
corrected citation and one sentence of justification.";

pub const M28_PROMPT: &str = "Consolidate the following review findings and citation \
corrections into one structured issues report. Merge duplicates, order by severity, \
and keep every distinct issue.";

pub const M30_PROMPT: &str = "Write a plain-language summary of this contract in two \
parts: first what the document is and what it obligates each party to do, then the \
issues found during review.";

pub const M31_PROMPT: &str = "Condense the following summary to roughly half its length \
while keeping every distinct point.";

pub const M32_PROMPT: &str = "Condense the following summary into 2-3 sentences covering \
only the most important points.";

pub const TRANSLATE_PROMPT: &str = "Translate the following text. Answer with the \
translation only.";

/// Default model tiering: mini for mechanical stages, full model for the
/// prose the user reads.
fn default_model(stage: &str) -> &'static str {
    match stage {
        "m12" | "m28" | "m30" | "m31" | "m32" => "gpt-4o",
        _ => "gpt-4o-mini",
    }
}

/// Configuration snapshot for the analysis pipeline.
#[derive(Debug, Clone)]
pub struct AnalysisConfig {
    /// Model name per stage code.
    pub models: HashMap<String, String>,
    pub api_key: String,
    pub base_url: String,
    pub timeout_secs: u64,
    /// Forward the conversation-store flag and metadata envelope on calls.
    pub store_conversations: bool,
    /// Base backoff unit between rate-limit retries.
    pub retry_pause_secs: u64,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        let models = STAGES
            .iter()
            .map(|stage| (stage.to_string(), default_model(stage).to_string()))
            .collect();
        Self {
            models,
            api_key: String::new(),
            base_url: "https://api.openai.com/v1".into(),
            timeout_secs: 120,
            store_conversations: false,
            retry_pause_secs: 2,
        }
    }
}

impl AnalysisConfig {
    pub fn from_env() -> Self {
        let mut config = Self::default();
        for stage in STAGES {
            let key = format!("CMS_MODEL_{}", stage.to_uppercase());
            if let Ok(model) = std::env::var(&key) {
                let model = model.trim().to_string();
                if !model.is_empty() {
                    config.models.insert(stage.to_string(), model);
                }
            }
        }
        if let Ok(key) = std::env::var("OPENAI_API_KEY") {
            config.api_key = key.trim().to_string();
        }
        if let Ok(url) = std::env::var("OPENAI_BASE_URL") {
            let url = url.trim().trim_end_matches('/').to_string();
            if !url.is_empty() {
                config.base_url = url;
            }
        }
        if let Ok(raw) = std::env::var("CMS_MODEL_TIMEOUT") {
            if let Ok(secs) = raw.trim().parse() {
                config.timeout_secs = secs;
            }
        }
        config.store_conversations = env_flag("CMS_STORE_CONVERSATIONS", false);
        config
    }

    /// Model for a stage; unknown stage codes fall back to the mini tier.
    pub fn model_for(&self, stage: &str) -> &str {
        self.models
            .get(stage)
            .map(String::as_str)
            .unwrap_or("gpt-4o-mini")
    }

    /// Linear backoff before rate-limit retry `attempt` (0-based): with the
    /// default pause this yields 2s, 4s, 6s.
    pub fn reference_backoff(&self, attempt: u32) -> std::time::Duration {
        std::time::Duration::from_secs(self.retry_pause_secs * (attempt as u64 + 1))
    }
}

/// Category-specific extraction guide appended to the m12 prompt. Every
/// category carries one, the "other" bucket included.
pub fn extraction_guide(contract_type_index: usize) -> &'static str {
    match contract_type_index {
        0 => {
            "For service contracts check: exact service scope, fee and indexation, \
service levels and remedies, termination notice periods, IP ownership of deliverables."
        }
        1 => {
            "For real estate contracts check: property registry identification, \
purchase price or rent and deposit, handover conditions, encumbrances, who bears \
transfer costs and taxes."
        }
        2 => {
            "For general terms check: unilateral amendment rights, limitation of \
liability clauses, dispute forum, consumer withdrawal rights."
        }
        3 => {
            "For waivers and declarations check: who declares what, which rights are \
given up and toward whom, conditions and revocability, the declaration date."
        }
        4 => {
            "For warning and notice letters check: the obligation claimed to be \
breached, the demanded remedy, the deadline set, and the announced consequences."
        }
        _ => {
            "For uncategorized documents check: the parties and their roles, the \
subject and consideration, key dates and deadlines, and any obligation that \
binds either party."
        }
    }
}
