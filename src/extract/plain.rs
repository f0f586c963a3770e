//! Plain-text file reading with legacy encoding fallback.
//!
//! Older Hungarian contract exports arrive as Latin-1/Latin-2 text files.
//! UTF-8 is tried first; on failure every byte is widened to a char, which
//! is exact for Latin-1 and close enough for the accented subset the
//! analysis stages need.

use std::path::Path;

use tracing::{debug, info};

use super::ExtractionError;

pub fn extract_plain_text(path: &Path) -> Result<String, ExtractionError> {
    let bytes = std::fs::read(path)?;

    let text = match String::from_utf8(bytes) {
        Ok(text) => text,
        Err(e) => {
            debug!(path = %path.display(), "File is not UTF-8, falling back to Latin-1");
            e.into_bytes().iter().map(|&b| b as char).collect()
        }
    };

    if text.trim().is_empty() {
        return Err(ExtractionError::EmptyDocument("txt"));
    }

    info!(
        path = %path.display(),
        text_length = text.chars().count(),
        "Plain text file read"
    );
    Ok(text)
}
