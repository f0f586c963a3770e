//! Result types assembled by the analysis pipeline.

use serde::{Deserialize, Serialize};
use tracing::warn;

use super::stages::NO_ISSUE_VERDICT;

/// One legal citation pulled out of the contract text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LegalReference {
    pub citation: String,
}

/// Validation outcome for one reference. The verdict is the model's text:
/// the literal no-issue sentinel means valid, anything else describes a
/// problem (including the rate-limit sentinel after exhausted retries).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReferenceVerdict {
    pub reference: LegalReference,
    pub verdict: String,
}

impl ReferenceVerdict {
    pub fn is_valid(&self) -> bool {
        self.verdict.trim() == NO_ISSUE_VERDICT
    }
}

/// Replacement citation proposed for a flagged reference.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReferenceSuggestion {
    pub reference: LegalReference,
    pub assessment: String,
    pub suggestion: String,
}

/// Summary length tiers. Tiers are derived top-down: detailed first, then
/// normal and short condensed from it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SummaryLength {
    Short,
    Normal,
    Detailed,
}

/// Summaries by length tier and language row.
///
/// The analysis row holds the summaries in the pipeline's working language;
/// the target row holds their translations. Cells stay `None` until their
/// producing stage ran; accessors return "" for unset cells rather than
/// synthesizing content.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SummaryMatrix {
    analysis: [Option<String>; 3],
    target: [Option<String>; 3],
}

fn tier_index(length: SummaryLength) -> usize {
    match length {
        SummaryLength::Short => 0,
        SummaryLength::Normal => 1,
        SummaryLength::Detailed => 2,
    }
}

impl SummaryMatrix {
    /// Seeds the matrix with the detailed summary, the root every other
    /// tier is derived from.
    pub fn from_detailed(detailed: String) -> Self {
        let mut matrix = Self::default();
        matrix.analysis[tier_index(SummaryLength::Detailed)] = Some(detailed);
        matrix
    }

    /// Records the two condensations. Refused when the detailed summary is
    /// missing: tiers are derived top-down, never seeded bottom-up.
    pub fn set_condensed(&mut self, normal: String, short: String) {
        if self.analysis[tier_index(SummaryLength::Detailed)].is_none() {
            warn!("Refusing to set condensed summaries without a detailed summary");
            return;
        }
        self.analysis[tier_index(SummaryLength::Normal)] = Some(normal);
        self.analysis[tier_index(SummaryLength::Short)] = Some(short);
    }

    /// Records the target-language translations of all three tiers.
    pub fn set_translations(&mut self, detailed: String, normal: String, short: String) {
        self.target[tier_index(SummaryLength::Detailed)] = Some(detailed);
        self.target[tier_index(SummaryLength::Normal)] = Some(normal);
        self.target[tier_index(SummaryLength::Short)] = Some(short);
    }

    pub fn analysis_summary(&self, length: SummaryLength) -> &str {
        self.analysis[tier_index(length)].as_deref().unwrap_or("")
    }

    pub fn target_summary(&self, length: SummaryLength) -> &str {
        self.target[tier_index(length)].as_deref().unwrap_or("")
    }

    /// Applies a text transform to every populated cell. Used by the
    /// driver's PII restoration pass.
    pub fn map_cells(&mut self, f: impl Fn(&str) -> String) {
        for cell in self.analysis.iter_mut().chain(self.target.iter_mut()) {
            if let Some(text) = cell.as_mut() {
                *text = f(text);
            }
        }
    }

    pub fn clear(&mut self) {
        self.analysis = Default::default();
        self.target = Default::default();
    }
}

/// Wall-clock duration of one stage call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageTiming {
    pub stage: String,
    pub duration_secs: f64,
}

impl StageTiming {
    /// Batch aggregates cover a whole fan-out group; they are excluded from
    /// the cumulative API-time sum to avoid double counting.
    pub fn is_batch(&self) -> bool {
        self.stage.ends_with("_batch")
    }
}

/// The single aggregate handed back to the pipeline's caller.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AnalysisOutcome {
    pub contract_type: String,
    pub contract_type_index: usize,
    pub detected_language: String,
    /// Structured key-term extraction output.
    pub key_terms: String,
    pub references: Vec<ReferenceVerdict>,
    pub suggestions: Vec<ReferenceSuggestion>,
    /// Consolidated issues report.
    pub issues_report: String,
    pub summaries: SummaryMatrix,
    /// Detailed summary rendered in the detected source language.
    pub summary_doc_language: String,
    pub timings: Vec<StageTiming>,
    pub elapsed_secs: f64,
    pub api_time_secs: f64,
}
