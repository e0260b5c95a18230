//! # Response sanitizer
//!
//! Turns raw model text into strictly typed values. Every stage runs its
//! output through the same steps, since providers quote and fence
//! inconsistently from one call to the next:
//!
//! 1. Trim. Blank text is [`FlowError::EmptyResponse`]; nothing is parsed.
//! 2. Strip one pair of straight quotes spanning the whole text, re-trim.
//! 3. If the whole text is a fenced code block, take its inner content.
//! 4. Parse as JSON. Failure is [`FlowError::MalformedResponse`] carrying the
//!    exact post-stripping content.
//! 5. Check the shape. Failure is [`FlowError::Validation`], distinct from a
//!    parse failure.
//!
//! | Parser | Output |
//! |--------|--------|
//! | [`parse_json_value`] | untyped JSON |
//! | [`parse_json`] | any `DeserializeOwned` type |
//! | [`parse_quiz`] | validated [`QuizQuestion`](crate::model::QuizQuestion)s |
//! | [`parse_abstractions`] | bounded, index-checked abstractions |
//! | [`parse_relationships`] | index-checked relationship map |
//! | [`parse_chapter_order`] | a permutation of abstraction indices |

pub mod extract;
pub mod quiz;
pub mod tutorial;

pub use extract::{extract_fenced, strip_outer_quotes};
pub use quiz::parse_quiz;
pub use tutorial::{parse_abstractions, parse_chapter_order, parse_relationships};

use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::error::{FlowError, Result};

/// Text ready for the JSON parser, plus what was removed to get there.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sanitized<'a> {
    pub content: &'a str,
    pub stripped_quotes: bool,
    pub stripped_fence: bool,
}

/// Steps 1-3: trim, strip one quote pair, unwrap one fence.
///
/// # Examples
///
/// ```
/// use manual_flow::sanitizer::sanitize;
///
/// let s = sanitize("  '```json\n[1]\n```'  ").unwrap();
/// assert_eq!(s.content, "[1]");
/// assert!(s.stripped_quotes && s.stripped_fence);
/// assert!(sanitize("   ").is_err());
/// ```
pub fn sanitize(raw: &str) -> Result<Sanitized<'_>> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(FlowError::empty_response());
    }

    let (text, stripped_quotes) = match strip_outer_quotes(trimmed) {
        Some(inner) => (inner, true),
        None => (trimmed, false),
    };

    let (content, stripped_fence) = match extract_fenced(text) {
        Some(inner) => (inner, true),
        None => (text, false),
    };

    Ok(Sanitized {
        content,
        stripped_quotes,
        stripped_fence,
    })
}

/// Steps 1-4: sanitize and parse to an untyped JSON value.
pub fn parse_json_value(raw: &str) -> Result<Value> {
    let sanitized = sanitize(raw)?;
    serde_json::from_str(sanitized.content).map_err(|e| FlowError::MalformedResponse {
        content: sanitized.content.to_string(),
        reason: e.to_string(),
    })
}

/// Sanitize, parse, and deserialize into `T`.
///
/// Invalid JSON is `MalformedResponse`; valid JSON of the wrong shape is
/// `Validation`.
///
/// # Examples
///
/// ```
/// use manual_flow::sanitizer::parse_json;
/// use manual_flow::FlowError;
///
/// let order: Vec<usize> = parse_json("```json\n[2, 0, 1]\n```").unwrap();
/// assert_eq!(order, vec![2, 0, 1]);
///
/// let wrong_shape = parse_json::<Vec<usize>>("{\"a\": 1}");
/// assert!(matches!(wrong_shape, Err(FlowError::Validation(_))));
/// ```
pub fn parse_json<T: DeserializeOwned>(raw: &str) -> Result<T> {
    let value = parse_json_value(raw)?;
    from_value(value)
}

/// Deserialize an already-parsed value, mapping shape errors to `Validation`.
pub(crate) fn from_value<T: DeserializeOwned>(value: Value) -> Result<T> {
    serde_json::from_value(value)
        .map_err(|e| FlowError::Validation(format!("unexpected JSON shape: {}", e)))
}

/// Parse a JSON array, deserializing each element with its index in errors.
pub(crate) fn parse_array<T: DeserializeOwned>(raw: &str, what: &str) -> Result<Vec<T>> {
    let items = match parse_json_value(raw)? {
        Value::Array(items) => items,
        other => {
            return Err(FlowError::Validation(format!(
                "expected a JSON array of {}, got {}",
                what,
                json_type(&other)
            )))
        }
    };

    items
        .into_iter()
        .enumerate()
        .map(|(i, item)| {
            serde_json::from_value(item)
                .map_err(|e| FlowError::Validation(format!("{} {}: {}", what, i, e)))
        })
        .collect()
}

fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_empty_and_blank_are_empty_response() {
        for raw in ["", "   ", "\n\t "] {
            assert!(matches!(sanitize(raw), Err(FlowError::EmptyResponse { stage: None })));
            assert!(matches!(
                parse_json_value(raw),
                Err(FlowError::EmptyResponse { stage: None })
            ));
        }
    }

    #[test]
    fn test_plain_json_passes_through() {
        let s = sanitize(" [1] ").unwrap();
        assert_eq!(
            s,
            Sanitized {
                content: "[1]",
                stripped_quotes: false,
                stripped_fence: false
            }
        );
        assert_eq!(parse_json_value("{\"a\": true}").unwrap(), json!({"a": true}));
    }

    #[test]
    fn test_malformed_carries_post_strip_content() {
        let raw = "  '```json\n[{\"a\": 1,]\n```'  ";
        match parse_json_value(raw) {
            Err(FlowError::MalformedResponse { content, .. }) => {
                assert_eq!(content, "[{\"a\": 1,]");
            }
            other => panic!("expected MalformedResponse, got {:?}", other),
        }
    }

    #[test]
    fn test_malformed_without_stripping_carries_trimmed_text() {
        match parse_json_value("  not json  ") {
            Err(FlowError::MalformedResponse { content, reason }) => {
                assert_eq!(content, "not json");
                assert!(!reason.is_empty());
            }
            other => panic!("expected MalformedResponse, got {:?}", other),
        }
    }

    #[test]
    fn test_quotes_around_nothing_is_malformed_empty() {
        match parse_json_value("''") {
            Err(FlowError::MalformedResponse { content, .. }) => assert_eq!(content, ""),
            other => panic!("expected MalformedResponse, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_array_reports_element_index() {
        let err = parse_array::<u32>("[1, \"two\"]", "item").unwrap_err();
        match err {
            FlowError::Validation(msg) => assert!(msg.starts_with("item 1:"), "{}", msg),
            other => panic!("expected Validation, got {:?}", other),
        }

        let err = parse_array::<u32>("{}", "item").unwrap_err();
        assert_eq!(
            err.to_string(),
            "validation failed: expected a JSON array of item, got an object"
        );
    }
}
