//! Deterministic text normalization shared by retrieval tokenization and
//! quote matching. Every substring comparison in the pipeline goes through
//! [`normalize`] so that PDF-extracted text and model-emitted quotes differ
//! only when their content differs.

use unicode_normalization::UnicodeNormalization;

/// Normalize text for matching.
///
/// Steps, in order: NFC composition; fold typographic quotes, en/em dashes
/// and Unicode spaces to their ASCII forms; drop zero-width code points;
/// lowercase; collapse whitespace runs to a single space; trim.
///
/// Idempotent: `normalize(normalize(s)) == normalize(s)`.
pub fn normalize(input: &str) -> String {
    let mut folded = String::with_capacity(input.len());

    for character in input.nfc() {
        match character {
            '\u{201C}' | '\u{201D}' => folded.push('"'),
            '\u{2018}' | '\u{2019}' => folded.push('\''),
            '\u{2013}' | '\u{2014}' => folded.push('-'),
            '\u{200B}' | '\u{200C}' | '\u{200D}' | '\u{2060}' | '\u{FEFF}' => {}
            character if character.is_whitespace() => folded.push(' '),
            character => folded.extend(character.to_lowercase()),
        }
    }

    folded.split_whitespace().collect::<Vec<&str>>().join(" ")
}

/// Tokenize for BM25 indexing and querying: normalize, then split on runs
/// of non-alphanumeric characters, discarding empty tokens.
pub fn tokenize(input: &str) -> Vec<String> {
    normalize(input)
        .split(|character: char| !character.is_alphanumeric())
        .filter(|token| !token.is_empty())
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_folds_typographic_characters() {
        assert_eq!(normalize("\u{201C}Quoted\u{201D}"), "\"quoted\"");
        assert_eq!(normalize("it\u{2019}s"), "it's");
        assert_eq!(normalize("2013\u{2013}2014 \u{2014} range"), "2013-2014 - range");
    }

    #[test]
    fn normalize_collapses_whitespace_and_trims() {
        assert_eq!(normalize("  a\t\tb\nc\u{00A0}d  "), "a b c d");
        assert_eq!(normalize("line one\n\n\nline two"), "line one line two");
    }

    #[test]
    fn normalize_drops_zero_width_codepoints() {
        assert_eq!(normalize("pass\u{200B}word"), "password");
        assert_eq!(normalize("\u{FEFF}lead"), "lead");
    }

    #[test]
    fn normalize_is_idempotent() {
        let samples = [
            "Mixed \u{201C}Case\u{201D}\twith\u{2014}punctuation \u{200B} and  spaces",
            "",
            "already normalized text",
            "caf\u{0065}\u{0301} composed",
        ];
        for sample in samples {
            let once = normalize(sample);
            assert_eq!(normalize(&once), once);
        }
    }

    #[test]
    fn tokenize_splits_on_non_alphanumeric_runs() {
        assert_eq!(
            tokenize("TLS 1.2, and/or TLS-1.3!"),
            vec!["tls", "1", "2", "and", "or", "tls", "1", "3"]
        );
        assert!(tokenize("  ...  ").is_empty());
    }
}
