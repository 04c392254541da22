//! Boundary normalisation of finished assistant text.
//!
//! Providers were seen prefixing answers with stray numeric tokens and
//! punctuation. This strips them without touching letters of the scripts
//! the client serves.
use regex_lite::Regex;
use std::sync::LazyLock;

static LEADING_DIGITS: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"^[0-9\s]+").ok());
static TRAILING_DIGITS: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"[0-9\s]+$").ok());

/// Letter ranges kept at the start of text even though they are not ASCII
/// word characters.
const SCRIPT_RANGES: &[(char, char)] = &[
    ('\u{00C0}', '\u{024F}'), // Latin-1 supplement and extended letters
    ('\u{0400}', '\u{04FF}'), // Cyrillic
    ('\u{0600}', '\u{06FF}'), // Arabic
    ('\u{0900}', '\u{097F}'), // Devanagari
    ('\u{0980}', '\u{09FF}'), // Bengali
    ('\u{3040}', '\u{30FF}'), // Hiragana, Katakana
    ('\u{4E00}', '\u{9FFF}'), // CJK unified ideographs
    ('\u{AC00}', '\u{D7AF}'), // Hangul syllables
];

fn is_kept_leading_char(c: char) -> bool {
    c.is_ascii_alphanumeric()
        || c == '_'
        || SCRIPT_RANGES
            .iter()
            .any(|&(start, end)| (start..=end).contains(&c))
}

fn strip_once(text: &str) -> &str {
    let mut text = text;
    if let Some(re) = LEADING_DIGITS.as_ref() {
        if let Some(m) = re.find(text) {
            text = &text[m.end()..];
        }
    }
    if let Some(re) = TRAILING_DIGITS.as_ref() {
        if let Some(m) = re.find(text) {
            text = &text[..m.start()];
        }
    }
    text.trim_start_matches(|c: char| !is_kept_leading_char(c))
}

/// Strip leading/trailing digit-and-whitespace runs and leading
/// non-letter characters, repeating until nothing changes.
///
/// Text that would be emptied entirely is returned trimmed instead, so an
/// answer of just `"42"` survives.
#[must_use]
pub fn clean_response(text: &str) -> String {
    let mut current = text;
    loop {
        let next = strip_once(current);
        if next.len() == current.len() {
            break;
        }
        current = next;
    }
    if current.is_empty() {
        text.trim().to_string()
    } else {
        current.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strips_leading_numeric_token() {
        assert_eq!(clean_response("42 Answer is 42."), "Answer is 42.");
    }

    #[test]
    fn test_strips_trailing_digits_and_whitespace() {
        assert_eq!(clean_response("Hello world 17\n"), "Hello world");
    }

    #[test]
    fn test_strips_leading_punctuation() {
        assert_eq!(clean_response(", - Hello"), "Hello");
        assert_eq!(clean_response("3. **Bold** text"), "Bold** text");
    }

    #[test]
    fn test_preserves_multi_script_text() {
        assert_eq!(clean_response("১২ নিউটনের সূত্র"), "১২ নিউটনের সূত্র");
        assert_eq!(clean_response("12 নিউটনের সূত্র"), "নিউটনের সূত্র");
        assert_eq!(clean_response("牛顿定律"), "牛顿定律");
        assert_eq!(clean_response("7 قانون نيوتن"), "قانون نيوتن");
        assert_eq!(clean_response("Élan vital"), "Élan vital");
    }

    #[test]
    fn test_all_digits_falls_back_to_trimmed() {
        assert_eq!(clean_response("  42 \n"), "42");
        assert_eq!(clean_response(""), "");
    }

    #[test]
    fn test_idempotent() {
        for input in [
            "42 Answer is 42.",
            "1 . 2 - Hello 3",
            "  42 ",
            ":) 9 ok",
            "১২৩ উত্তর",
            "plain text",
        ] {
            let once = clean_response(input);
            assert_eq!(clean_response(&once), once, "input: {input:?}");
        }
    }
}
