//! Metadata normalization
//!
//! Folds free-text artist/title strings into a comparable, locale-independent
//! key. Folding steps, in order:
//! 1. Lowercase, NFKD decomposition, combining marks stripped, lowercase again
//!    (compatibility forms like `ℌ` decompose to uppercase letters)
//! 2. Bracketed annotations removed: `(Remastered)`, `[Live]`, `{Demo}`
//! 3. Apostrophes dropped, other punctuation folded to spaces
//! 4. Featuring notations unified: `ft.`, `feat.`, `featuring` → `feat`
//! 5. Whitespace collapsed and trimmed
//!
//! The output contains only lowercase alphanumerics and single spaces, so
//! folding is idempotent.

use crate::types::{NormalizedKey, RawMetadata};
use once_cell::sync::Lazy;
use regex::Regex;
use unicode_normalization::char::is_combining_mark;
use unicode_normalization::UnicodeNormalization;

/// Innermost bracketed group (applied repeatedly for nesting)
static BRACKETED: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[\(\[\{][^\(\)\[\]\{\}]*[\)\]\}]").unwrap());

/// Featuring notations as whole words (periods are already spaces)
static FEATURING: Lazy<Regex> = Lazy::new(|| Regex::new(r"\b(?:featuring|feat|ft)\b").unwrap());

/// Normalize raw metadata into a lookup key.
///
/// Returns `None` when both artist and title fold to empty strings.
pub fn normalize(raw: &RawMetadata) -> Option<NormalizedKey> {
    let artist_key = fold(raw.artist.as_deref().unwrap_or(""));
    let title_key = fold(raw.title.as_deref().unwrap_or(""));

    if artist_key.is_empty() && title_key.is_empty() {
        return None;
    }
    Some(NormalizedKey {
        artist_key,
        title_key,
    })
}

/// Re-normalize an existing key (identity for keys produced by `normalize`)
pub fn normalize_key(key: &NormalizedKey) -> Option<NormalizedKey> {
    let artist_key = fold(&key.artist_key);
    let title_key = fold(&key.title_key);
    if artist_key.is_empty() && title_key.is_empty() {
        return None;
    }
    Some(NormalizedKey {
        artist_key,
        title_key,
    })
}

/// Fold one free-text field
pub fn fold(input: &str) -> String {
    let decomposed = strip_marks(&input.to_lowercase()).to_lowercase();
    let without_annotations = remove_annotations(&decomposed);
    // Word boundaries are only final once punctuation is folded: "f't" is "ft"
    let punctuation = fold_punctuation(&without_annotations);
    collapse(&FEATURING.replace_all(&punctuation, "feat"))
}

fn strip_marks(input: &str) -> String {
    input.nfkd().filter(|c| !is_combining_mark(*c)).collect()
}

/// Remove bracketed groups; keep the inner text if nothing else remains.
fn remove_annotations(input: &str) -> String {
    let mut current = input.to_string();
    loop {
        let next = BRACKETED.replace_all(&current, " ").into_owned();
        if next == current {
            break;
        }
        current = next;
    }

    if collapse(&fold_punctuation(&current)).is_empty() {
        // Whole value was an annotation, e.g. "(Untitled)"
        input
            .chars()
            .map(|c| if matches!(c, '(' | ')' | '[' | ']' | '{' | '}') { ' ' } else { c })
            .collect()
    } else {
        current
    }
}

fn fold_punctuation(input: &str) -> String {
    input
        .chars()
        .filter(|c| !matches!(c, '\'' | '\u{2019}' | '`'))
        .map(|c| if c.is_alphanumeric() { c } else { ' ' })
        .collect()
}

fn collapse(input: &str) -> String {
    input.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw(artist: &str, title: &str) -> RawMetadata {
        RawMetadata {
            artist: Some(artist.to_string()),
            title: Some(title.to_string()),
            ..Default::default()
        }
    }

    #[test]
    fn test_radio_edit_scenario() {
        let key = normalize(&raw("Daft Punk", "One More Time (Radio Edit)")).unwrap();
        assert_eq!(key.artist_key, "daft punk");
        assert_eq!(key.title_key, "one more time");
    }

    #[test]
    fn test_diacritics_and_case() {
        assert_eq!(fold("Beyoncé"), "beyonce");
        assert_eq!(fold("MÖTLEY CRÜE"), "motley crue");
        assert_eq!(fold("Sigur Rós"), "sigur ros");
    }

    #[test]
    fn test_compatibility_forms() {
        assert_eq!(fold("ℌello"), "hello");
        assert_eq!(fold("ﬁne"), "fine");
    }

    #[test]
    fn test_featuring_unified() {
        assert_eq!(fold("Artist ft. Guest"), "artist feat guest");
        assert_eq!(fold("Artist Feat Guest"), "artist feat guest");
        assert_eq!(fold("Artist featuring Guest"), "artist feat guest");
        assert_eq!(fold("Artist f't Guest"), "artist feat guest");
        // Only whole words
        assert_eq!(fold("Daft Punk"), "daft punk");
        assert_eq!(fold("Left Hand"), "left hand");
    }

    #[test]
    fn test_bracket_annotations_removed() {
        assert_eq!(fold("Song [Live] (2011 Remaster)"), "song");
        assert_eq!(fold("Song (Mix (Extended))"), "song");
        assert_eq!(fold("Song {Demo}"), "song");
    }

    #[test]
    fn test_annotation_only_keeps_inner_text() {
        assert_eq!(fold("(Untitled)"), "untitled");
    }

    #[test]
    fn test_punctuation_and_whitespace() {
        assert_eq!(fold("  Don't   Stop   Me-Now!! "), "dont stop me now");
        assert_eq!(fold("AC/DC"), "ac dc");
    }

    #[test]
    fn test_empty_returns_none() {
        assert!(normalize(&RawMetadata::default()).is_none());
        assert!(normalize(&raw("  ", "!!!")).is_none());
        // One side is enough
        let key = normalize(&raw("", "Title")).unwrap();
        assert_eq!(key.artist_key, "");
    }

    #[test]
    fn test_idempotent() {
        let samples = [
            ("Daft Punk", "One More Time (Radio Edit)"),
            ("Beyoncé ft. JAY-Z", "Crazy in Love [Remastered]"),
            ("İstanbul Ensemble", "ℌymn (Untitled)"),
            ("AC/DC", "(Untitled)"),
            ("Sigur Rós", "Hoppípolla"),
            ("Ｆｕｌｌｗｉｄｔｈ", "Ｔｉｔｌｅ ｆｔ． Ｘ"),
            ("", "  feat.  "),
            ("Guest f't Host", "snake_ft case"),
        ];
        for (artist, title) in samples {
            if let Some(first) = normalize(&raw(artist, title)) {
                let second = normalize_key(&first).unwrap();
                assert_eq!(first, second, "not idempotent for {:?} / {:?}", artist, title);
            }
        }
    }
}
