//! Deterministic regex sanitizer for Hungarian contract preambles.
//!
//! Hungarian contracts open with a fixed formula ("egyrészről a ... mint
//! Bérbeadó") followed by labeled identity fields. Each pattern targets one
//! such field; the first match per pattern is masked. The captured span is
//! stored byte-exact so restoration reproduces the input text verbatim.

use std::sync::LazyLock;

use regex::Regex;
use tracing::debug;

use super::{PiiMap, SanitizeStrategy};

static PATTERNS: LazyLock<Vec<(&'static str, Regex)>> = LazyLock::new(|| {
    [
        // Party introduction: "egyrészről a Minta Kft. (székhelye: ...)"
        ("company name", r"(?i)egyrészről az? ([^\n(,]+)"),
        ("address", r"(?i)székhelye/lakhelye:\s*([^\n;)]+)"),
        ("governing organization", r"(?i)cégjegyzéket vezető bíróság:\s*([^\n;)]+)"),
        ("company registry number", r"(?i)cégjegyzékszáma:\s*([^\n;)]+)"),
        ("tax identification number", r"(?i)adószáma:\s*([^\n;)]+)"),
        ("representative", r"(?i)képviseli:\s*([^\n;)]+)"),
        ("email", r"[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}"),
    ]
    .iter()
    .map(|(label, pattern)| (*label, Regex::new(pattern).unwrap()))
    .collect()
});

/// Masks the first occurrence of each known identity field.
pub struct PatternSanitizer;

impl SanitizeStrategy for PatternSanitizer {
    fn sanitize(&self, text: &str) -> (String, PiiMap) {
        let mut sanitized = text.to_string();
        let mut map = PiiMap::new();

        for (label, regex) in PATTERNS.iter() {
            let span = match regex.captures(&sanitized) {
                Some(caps) => caps
                    .get(1)
                    .or_else(|| caps.get(0))
                    .map(|m| (m.start(), m.end())),
                None => None,
            };
            if let Some((start, end)) = span {
                let placeholder = format!("[Party 1 {label}]");
                // The captured span is kept byte-exact, trailing spaces
                // included, so restore(sanitize(text)) == text.
                map.insert(placeholder.clone(), sanitized[start..end].to_string());
                sanitized.replace_range(start..end, &placeholder);
            }
        }

        debug!(entities = map.len(), "Pattern sanitization complete");
        (sanitized, map)
    }
}
