//! PII masking before LLM analysis and restoration after.
//!
//! Contract text is sanitized before it leaves the machine: each detected
//! entity is replaced with a `[Party 1 name]`-style placeholder and the
//! mapping is kept so the analysis output can be restored verbatim. Two
//! strategies exist: a deterministic regex pass ([`pattern`]) and an
//! LLM-assisted pass ([`model`]) for free-form documents.

pub mod model;
pub mod pattern;

pub use model::LlmSanitizer;
pub use pattern::PatternSanitizer;

use serde::{Deserialize, Serialize};

/// Ordered placeholder-to-original mapping.
///
/// Insertion order matters: restoration replaces placeholders in the order
/// they were created, and serialization must round-trip that order, so this
/// is a vector of pairs rather than a map.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PiiMap(pub Vec<(String, String)>);

impl PiiMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, placeholder: String, original: String) {
        self.0.push((placeholder, original));
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &(String, String)> {
        self.0.iter()
    }
}

/// A sanitization strategy: masks entities and reports the mapping.
pub trait SanitizeStrategy: Send + Sync {
    fn sanitize(&self, text: &str) -> (String, PiiMap);
}

/// Replaces every placeholder in `text` with its original value.
///
/// Literal replacement, applied per mapping entry over the whole text, so
/// a placeholder that appears in several analysis fields is restored in
/// each. Idempotent once no placeholders remain.
pub fn restore_text(text: &str, map: &PiiMap) -> String {
    let mut restored = text.to_string();
    for (placeholder, original) in map.iter() {
        if restored.contains(placeholder.as_str()) {
            restored = restored.replace(placeholder.as_str(), original);
        }
    }
    restored
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn restore_replaces_all_occurrences() {
        let mut map = PiiMap::new();
        map.insert("[Party 1 name]".into(), "Minta Kft.".into());
        let text = "[Party 1 name] declares that [Party 1 name] owns the flat.";
        assert_eq!(
            restore_text(text, &map),
            "Minta Kft. declares that Minta Kft. owns the flat."
        );
    }

    #[test]
    fn restore_without_placeholders_is_identity() {
        let mut map = PiiMap::new();
        map.insert("[Party 1 name]".into(), "Minta Kft.".into());
        let text = "No placeholders here.";
        assert_eq!(restore_text(text, &map), text);
    }

    #[test]
    fn restore_is_idempotent() {
        let mut map = PiiMap::new();
        map.insert("[Party 1 name]".into(), "Minta Kft.".into());
        let once = restore_text("hello [Party 1 name]", &map);
        let twice = restore_text(&once, &map);
        assert_eq!(once, twice);
    }

    #[test]
    fn map_serialization_keeps_order() {
        let mut map = PiiMap::new();
        map.insert("[Party 1 name]".into(), "A".into());
        map.insert("[Party 1 address]".into(), "B".into());
        let json = serde_json::to_string(&map).unwrap();
        let back: PiiMap = serde_json::from_str(&json).unwrap();
        assert_eq!(back, map);
        assert_eq!(back.0[0].0, "[Party 1 name]");
    }
}
