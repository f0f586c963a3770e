//! OCR language selection from filename hints.
//!
//! Uploaders tag documents by embedding a language token in the filename
//! ("lease_en.pdf", "szerzodes-hungarian.docx"). The hint picks the
//! Tesseract-style language pack; without one the configured default wins.

use std::path::Path;

use tracing::debug;

const HINTS: &[(&str, &str)] = &[
    ("hungarian", "hun"),
    ("english", "eng"),
    ("german", "deu"),
    ("french", "fra"),
    ("spanish", "spa"),
    ("italian", "ita"),
    ("hu", "hun"),
    ("en", "eng"),
    ("de", "deu"),
    ("fr", "fra"),
    ("es", "spa"),
    ("it", "ita"),
];

/// Picks the OCR language for a document: a filename token match, or the
/// default. Tokens are split on `_`, `-`, `.` and space; longer hint names
/// are matched before two-letter codes so "german" never half-matches.
pub fn determine_language(path: &Path, default: &str) -> String {
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().to_lowercase())
        .unwrap_or_default();

    let tokens: Vec<&str> = stem
        .split(|c: char| c == '_' || c == '-' || c == '.' || c == ' ')
        .filter(|t| !t.is_empty())
        .collect();

    for (hint, lang) in HINTS {
        if tokens.iter().any(|t| t == hint) {
            debug!(path = %path.display(), hint, lang, "Language hint found in filename");
            return lang.to_string();
        }
    }

    default.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn filename_token_selects_language() {
        assert_eq!(determine_language(Path::new("lease_en.pdf"), "hun+eng"), "eng");
        assert_eq!(
            determine_language(Path::new("szerzodes-hungarian.docx"), "hun+eng"),
            "hun"
        );
        assert_eq!(
            determine_language(Path::new("vertrag.de.pdf"), "hun+eng"),
            "deu"
        );
    }

    #[test]
    fn no_hint_keeps_default() {
        assert_eq!(
            determine_language(Path::new("berleti_szerzodes.pdf"), "hun+eng"),
            "hun+eng"
        );
    }

    #[test]
    fn hint_must_be_whole_token() {
        // "en" inside "document" must not match.
        assert_eq!(
            determine_language(Path::new("document.pdf"), "hun+eng"),
            "hun+eng"
        );
    }

    #[test]
    fn matching_is_case_insensitive() {
        assert_eq!(determine_language(Path::new("Lease_EN.PDF"), "hun"), "eng");
    }
}
