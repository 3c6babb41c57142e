//! Postcode extraction from sanitized console lines.
//!
//! A line yields at most one postcode. The rules below are tried in order and
//! the first one that matches anywhere in the line wins; only its first match
//! is used. The bare, word-bounded token is always tried first, then any two
//! hex digits, then the `0x` prefixed and `h` suffixed notations.

use std::sync::OnceLock;

use regex::Regex;
use serde::Serialize;

const RULES: [&str; 4] = [
    r"\b([0-9a-fA-F]{2})\b",
    r"([0-9a-fA-F]{2})",
    r"0x([0-9a-fA-F]{2})",
    r"([0-9a-fA-F]{2})h",
];

static COMPILED_RULES: OnceLock<Vec<Regex>> = OnceLock::new();

fn rules() -> &'static [Regex] {
    COMPILED_RULES.get_or_init(|| {
        RULES
            .iter()
            .map(|rule| Regex::new(rule).expect("Invalid postcode Regex"))
            .collect()
    })
}

/// Returns the postcode found in `line`, as two lowercase hex digits.
pub fn extract_postcode(line: &str) -> Option<String> {
    rules().iter().find_map(|rule| {
        rule.captures(line)
            .and_then(|caps| caps.get(1))
            .map(|code| code.as_str().to_ascii_lowercase())
    })
}

/// One postcode captured during a session.
#[derive(Debug, Clone, Eq, PartialEq, Serialize)]
pub struct PostcodeRecord {
    /// Two lowercase hex digits.
    pub code: String,
    /// Wall-clock time of capture, `HH:MM:SS`.
    pub timestamp: String,
    /// The sanitized line the code was extracted from.
    #[serde(rename = "raw")]
    pub raw_line: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bare_token() {
        assert_eq!(extract_postcode("e3").as_deref(), Some("e3"));
        assert_eq!(extract_postcode("POST: A1 done").as_deref(), Some("a1"));
    }

    #[test]
    fn no_hex_pair_yields_nothing() {
        assert_eq!(extract_postcode(""), None);
        assert_eq!(extract_postcode("Welcome to minicom"), None);
        assert_eq!(extract_postcode("x 7 z"), None);
    }

    #[test]
    fn word_bounded_token_wins_over_earlier_substring() {
        // `dead` contains hex pairs but the bounded `5a` is preferred.
        assert_eq!(extract_postcode("dead 5a").as_deref(), Some("5a"));
    }

    #[test]
    fn falls_back_to_any_substring() {
        assert_eq!(extract_postcode("id=beef").as_deref(), Some("be"));
        assert_eq!(extract_postcode("step7c").as_deref(), Some("7c"));
    }

    #[test]
    fn prefixed_and_suffixed_forms_are_captured_by_the_earlier_rules() {
        // `0x4F` has no word boundary between `x` and `4`, so the substring
        // rule matches first, on `4F`.
        assert_eq!(extract_postcode("0x4F").as_deref(), Some("4f"));
        assert_eq!(extract_postcode("b2h").as_deref(), Some("b2"));
    }

    #[test]
    fn only_the_first_match_is_used() {
        assert_eq!(extract_postcode("e3 a1 b2").as_deref(), Some("e3"));
    }

    #[test]
    fn result_is_lowercase() {
        assert_eq!(extract_postcode("FF").as_deref(), Some("ff"));
    }
}
