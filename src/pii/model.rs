//! LLM-assisted sanitizer for free-form documents.
//!
//! The pattern sanitizer only knows the standard preamble layout. For
//! scanned documents whose identity fields float anywhere in the text, a
//! small model lists the entities instead; the masking itself stays local
//! and deterministic. Any model failure degrades to a no-op so a PII pass
//! never blocks analysis.

use std::collections::HashMap;
use std::sync::Arc;

use serde::Deserialize;
use tracing::{debug, warn};

use crate::analysis::llm::{ChatClient, ChatRequest};

use super::{PiiMap, SanitizeStrategy};

const STAGE: &str = "pii";

const SYSTEM_PROMPT: &str = "You are a data protection assistant. Identify personally \
identifiable information in the contract text: party names, addresses, company \
registration numbers, tax numbers, representatives, emails and phone numbers. Respond \
with only a JSON array of objects with keys \"label\" and \"value\", where value is the \
exact text as it appears in the document. Use short lowercase labels such as \"name\", \
\"address\", \"tax number\". Return [] if nothing is found.";

pub struct LlmSanitizer {
    client: Arc<dyn ChatClient>,
    model: String,
}

impl LlmSanitizer {
    pub fn new(client: Arc<dyn ChatClient>, model: &str) -> Self {
        Self {
            client,
            model: model.to_string(),
        }
    }
}

#[derive(Deserialize)]
struct Entity {
    label: String,
    value: String,
}

impl SanitizeStrategy for LlmSanitizer {
    fn sanitize(&self, text: &str) -> (String, PiiMap) {
        let reply = match self.client.chat(&ChatRequest {
            stage: STAGE,
            model: &self.model,
            system: SYSTEM_PROMPT,
            user: text,
            store: false,
        }) {
            Ok(reply) => reply,
            Err(e) => {
                warn!(error = %e, "PII model call failed, keeping text unsanitized");
                return (text.to_string(), PiiMap::new());
            }
        };

        let entities = match parse_entities(&reply) {
            Some(entities) => entities,
            None => {
                warn!("PII model reply was not a JSON entity list, keeping text unsanitized");
                return (text.to_string(), PiiMap::new());
            }
        };

        let mut sanitized = text.to_string();
        let mut map = PiiMap::new();
        // One party counter per label, so a second "name" becomes Party 2.
        let mut seen: HashMap<String, usize> = HashMap::new();

        for entity in entities {
            if entity.value.is_empty() {
                continue;
            }
            let Some(start) = sanitized.find(&entity.value) else {
                // The model paraphrased instead of quoting; masking a value
                // that is not a substring would corrupt the text.
                warn!(label = %entity.label, "PII entity not found verbatim in text, skipping");
                continue;
            };
            let party = seen.entry(entity.label.clone()).or_insert(0);
            *party += 1;
            let placeholder = format!("[Party {} {}]", party, entity.label);
            map.insert(placeholder.clone(), entity.value.clone());
            sanitized.replace_range(start..start + entity.value.len(), &placeholder);
        }

        debug!(entities = map.len(), "Model sanitization complete");
        (sanitized, map)
    }
}

/// Pulls the JSON array out of a chatty model reply. Models often wrap the
/// payload in prose or code fences; everything outside the outermost
/// brackets is ignored.
fn parse_entities(reply: &str) -> Option<Vec<Entity>> {
    let start = reply.find('[')?;
    let end = reply.rfind(']')?;
    if end < start {
        return None;
    }
    serde_json::from_str(&reply[start..=end]).ok()
}
