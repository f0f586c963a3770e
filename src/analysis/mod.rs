//! Contract analysis: classification, review, reference validation and
//! summaries over extracted document text.
//!
//! [`analyze_document`] runs the whole stage graph; [`stages`] holds the
//! stage catalog and configuration, [`llm`] the chat client used for every
//! external call.

pub mod llm;
pub mod pipeline;
pub mod stages;
pub mod types;

use thiserror::Error;

pub use llm::{ChatClient, ChatRequest, LlmError, MockChatClient, OpenAiChatClient};
pub use pipeline::analyze_document;
pub use stages::AnalysisConfig;
pub use types::{
    AnalysisOutcome, LegalReference, ReferenceSuggestion, ReferenceVerdict, StageTiming,
    SummaryLength, SummaryMatrix,
};

/// A pipeline stage failed outside the retry-protected reference loops.
/// Fatal for the document being analyzed.
#[derive(Debug, Error)]
pub enum AnalysisError {
    #[error("analysis stage {stage} failed: {source}")]
    Stage {
        stage: String,
        #[source]
        source: LlmError,
    },
}
