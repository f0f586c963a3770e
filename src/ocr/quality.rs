//! Heuristic quality score for OCR output.
//!
//! The score drives the provider fallback decision: a page whose text scores
//! above the configured threshold is accepted without trying the next
//! provider. The heuristic rewards letter density, reasonable spacing and
//! Hungarian diacritics, and penalizes symbol noise and garbage patterns
//! typical of OCR on degraded scans.

use std::sync::LazyLock;

use regex::Regex;

/// Diacritics of the Hungarian alphabet. A scan of a Hungarian contract that
/// produced none of these almost certainly mangled its accents.
const HUNGARIAN_DIACRITICS: &str = "áéíóöőúüűÁÉÍÓÖŐÚÜŰ";

/// Punctuation that counts as ordinary prose rather than noise.
const PROSE_PUNCTUATION: &str = ",.;:!?()/-";

static GARBAGE_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        // Single letters separated by periods: "a.b.c" artifacts.
        r"[A-Za-z]\.[A-Za-z]\.[A-Za-z]",
        // Character runs Tesseract emits on dithered backgrounds.
        r"\b(?:eee+|ccc+|000+)\b",
        // Three or more consecutive symbols.
        r"[^\w\s]{3,}",
    ]
    .iter()
    .map(|p| Regex::new(p).unwrap())
    .collect()
});

/// Scores recognized text in `[0.0, 1.0]`; empty or whitespace-only text
/// scores zero.
pub fn score_text_quality(text: &str) -> f64 {
    let text = text.trim();
    if text.is_empty() {
        return 0.0;
    }

    let total = text.chars().count() as f64;
    let mut letters = 0usize;
    let mut spaces = 0usize;
    let mut diacritics = 0usize;
    let mut noise = 0usize;
    for ch in text.chars() {
        if ch.is_alphabetic() {
            letters += 1;
        }
        if ch.is_whitespace() {
            spaces += 1;
        }
        if HUNGARIAN_DIACRITICS.contains(ch) {
            diacritics += 1;
        }
        if !ch.is_alphanumeric() && !ch.is_whitespace() && !PROSE_PUNCTUATION.contains(ch) {
            noise += 1;
        }
    }

    let letter_ratio = letters as f64 / total;
    let space_ratio = spaces as f64 / total;
    // Accent density is measured against the letters, not the whole text,
    // so digit-heavy pages are not punished for their numbers.
    let diacritic_ratio = diacritics as f64 / letters.max(1) as f64;
    let noise_ratio = noise as f64 / total;

    let garbage_hits: usize = GARBAGE_PATTERNS
        .iter()
        .map(|re| re.find_iter(text).count())
        .sum();

    let score = 0.55 * letter_ratio
        + 0.20 * (space_ratio * 3.0).min(1.0)
        + 0.15 * (1.0 - (noise_ratio * 4.0).min(1.0))
        + 0.10 * (diacritic_ratio * 8.0).min(1.0)
        - (garbage_hits as f64 * 0.03).min(0.30);

    score.clamp(0.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_and_whitespace_score_zero() {
        assert_eq!(score_text_quality(""), 0.0);
        assert_eq!(score_text_quality("   \n\t  "), 0.0);
    }

    #[test]
    fn clean_hungarian_prose_scores_high() {
        let text = "A szerződő felek megállapodnak abban, hogy a bérleti díj \
                    összege havonta fizetendő, a tárgyhónap ötödik napjáig.";
        assert!(score_text_quality(text) > 0.7);
    }

    #[test]
    fn newline_separated_output_is_not_undercredited() {
        // Providers often return one token per line; line breaks count as
        // spacing the same way blanks do.
        let text = "Szerződés\n2023.\n01.\n01.\n1.000.000\nFt\nbérleti\ndíj";
        let score = score_text_quality(text);
        assert!(score > 0.40, "scored {score}");
        assert!((score - score_text_quality(&text.replace('\n', " "))).abs() < 1e-9);
    }

    #[test]
    fn digit_heavy_text_keeps_diacritic_credit() {
        // Accent density is judged against the letters only.
        let with_digits = "bérleti díj 1.000.000 Ft 2023. 01. 01.";
        let flattened = with_digits.replace(['é', 'í'], "e");
        // 2 accents over 12 letters saturates the diacritic term even though
        // accents are rare relative to the whole string
        assert!(score_text_quality(with_digits) - score_text_quality(&flattened) >= 0.099);
    }

    #[test]
    fn symbol_soup_scores_low() {
        let text = "@@## $$%% ^^&& **(( §§±± ~~``";
        assert!(score_text_quality(text) < 0.3);
    }

    #[test]
    fn garbage_patterns_penalize() {
        let clean = "megfelelo minosegu szoveg tobb ertelmes szoval egymas utan";
        let garbled = "megfelelo eee ccc 000 a.b.c szoveg eee ccc 000 a.b.c utan";
        assert!(score_text_quality(garbled) < score_text_quality(clean));
    }

    #[test]
    fn diacritics_raise_score() {
        let plain = "a szerzodo felek megallapodnak a berleti dij osszegeben";
        let accented = "a szerződő felek megállapodnak a bérleti díj összegében";
        assert!(score_text_quality(accented) > score_text_quality(plain));
    }

    #[test]
    fn score_is_bounded() {
        for text in [
            "éééééééééé",
            "!!!!!!!!!!",
            "a b c d e f g h i j",
            "Normál magyar mondat, vesszővel és ponttal.",
        ] {
            let s = score_text_quality(text);
            assert!((0.0..=1.0).contains(&s), "{text:?} scored {s}");
        }
    }
}
