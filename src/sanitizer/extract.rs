//! Noise stripping shared by every parser.
//!
//! Models wrap JSON inconsistently: sometimes in a stray pair of quotes,
//! sometimes in a markdown fence, sometimes both. These helpers undo exactly
//! one layer of each and nothing more.

use std::sync::LazyLock;

use regex::Regex;

/// Whole-string fenced block: backticks, optional tag line, body, backticks.
static FENCE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^```[^\n]*\n([\s\S]*)\n```$").expect("valid regex"));

/// Strip one matching pair of straight quotes spanning the whole string,
/// then re-trim. Returns `None` when the text is not quoted.
///
/// # Examples
///
/// ```
/// use manual_flow::sanitizer::extract::strip_outer_quotes;
///
/// assert_eq!(strip_outer_quotes("' [1, 2] '"), Some("[1, 2]"));
/// assert_eq!(strip_outer_quotes("\"[]\""), Some("[]"));
/// assert_eq!(strip_outer_quotes("'mismatched\""), None);
/// ```
pub fn strip_outer_quotes(text: &str) -> Option<&str> {
    let bytes = text.as_bytes();
    if bytes.len() < 2 {
        return None;
    }
    let first = bytes[0];
    let last = bytes[bytes.len() - 1];
    if first == last && (first == b'"' || first == b'\'') {
        Some(text[1..text.len() - 1].trim())
    } else {
        None
    }
}

/// Inner content of a fenced code block spanning the whole string,
/// byte-for-byte, without the fence lines or the language tag.
///
/// # Examples
///
/// ```
/// use manual_flow::sanitizer::extract::extract_fenced;
///
/// assert_eq!(extract_fenced("```json\n[1, 2]\n```"), Some("[1, 2]"));
/// assert_eq!(extract_fenced("```\n{}\n```"), Some("{}"));
/// assert_eq!(extract_fenced("see ```json\n[]\n```"), None);
/// ```
pub fn extract_fenced(text: &str) -> Option<&str> {
    FENCE_RE
        .captures(text)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quote_strip_removes_exactly_one_pair() {
        assert_eq!(strip_outer_quotes("\"'x'\""), Some("'x'"));
        assert_eq!(strip_outer_quotes("'  spaced  '"), Some("spaced"));
    }

    #[test]
    fn test_quote_strip_ignores_partial_quotes() {
        assert_eq!(strip_outer_quotes("'[1]"), None);
        assert_eq!(strip_outer_quotes("[1]'"), None);
        assert_eq!(strip_outer_quotes("'"), None);
        assert_eq!(strip_outer_quotes("[\"a\"]"), None);
    }

    #[test]
    fn test_quote_strip_is_idempotent_on_unquoted_result() {
        let once = strip_outer_quotes("'[{\"a\": 1}]'").unwrap();
        assert_eq!(once, "[{\"a\": 1}]");
        assert_eq!(strip_outer_quotes(once), None);
    }

    #[test]
    fn test_empty_quotes_strip_to_empty() {
        assert_eq!(strip_outer_quotes("''"), Some(""));
    }

    #[test]
    fn test_fence_keeps_inner_bytes_exactly() {
        let inner = "  [\n    {\"a\": \"```\"}\n  ]  ";
        let fenced = format!("```json\n{}\n```", inner);
        assert_eq!(extract_fenced(&fenced), Some(inner));
    }

    #[test]
    fn test_fence_allows_empty_and_multiline_body() {
        assert_eq!(extract_fenced("```\n\n```"), Some(""));
        assert_eq!(extract_fenced("```js\na\nb\n```"), Some("a\nb"));
    }

    #[test]
    fn test_fence_must_span_whole_string() {
        assert_eq!(extract_fenced("```json\n[]\n``` trailing"), None);
        assert_eq!(extract_fenced("```json [] ```"), None);
        assert_eq!(extract_fenced("[1, 2]"), None);
    }
}
