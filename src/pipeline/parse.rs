//! Response Parser: recover a JSON object from free-form model output.
//!
//! Even with constrained decoding requested, models wrap JSON in prose or
//! markdown fences. Candidates are tried in a fixed order and the first one
//! that parses as a JSON *object* wins:
//!
//! 1. the whole text,
//! 2. each fenced code block, in order of appearance (language tag optional),
//! 3. brace-delimited spans, longest first.
//!
//! Nothing here interprets field semantics.

use crate::error::ExtractError;
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{Map, Value};

/// Outcome of [`parse_response`].
#[derive(Debug, Clone, PartialEq)]
pub enum ParsedResponse {
    Parsed(Map<String, Value>),
    Failed(String),
}

impl ParsedResponse {
    /// Convert into a `Result`, attaching `raw` to the failure for diagnostics.
    pub fn into_result(self, raw: &str) -> Result<Map<String, Value>, ExtractError> {
        match self {
            ParsedResponse::Parsed(map) => Ok(map),
            ParsedResponse::Failed(_) => Err(ExtractError::ParseFailure {
                raw: raw.to_string(),
            }),
        }
    }
}

static RE_FENCED: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)```[A-Za-z0-9_+-]*[ \t]*\r?\n?(.*?)```").unwrap());

/// Parse model output into a JSON object.
pub fn parse(raw: &str) -> Result<Map<String, Value>, ExtractError> {
    parse_response(raw).into_result(raw)
}

/// Layered best-effort parse; see the module docs for the order.
pub fn parse_response(raw: &str) -> ParsedResponse {
    if let Some(map) = as_object(raw) {
        return ParsedResponse::Parsed(map);
    }

    for caps in RE_FENCED.captures_iter(raw) {
        if let Some(map) = as_object(&caps[1]) {
            return ParsedResponse::Parsed(map);
        }
    }

    let mut candidates = brace_spans(raw);
    candidates.sort_by_key(|span| std::cmp::Reverse(span.len()));
    for candidate in candidates {
        if let Some(map) = as_object(candidate) {
            return ParsedResponse::Parsed(map);
        }
    }

    if raw.trim().is_empty() {
        ParsedResponse::Failed("model returned an empty response".into())
    } else {
        ParsedResponse::Failed("no JSON object found in model output".into())
    }
}

fn as_object(text: &str) -> Option<Map<String, Value>> {
    match serde_json::from_str::<Value>(text.trim()) {
        Ok(Value::Object(map)) => Some(map),
        _ => None,
    }
}

/// Non-overlapping `{…}` spans.
///
/// Yields every top-level balanced span (string literals respected) plus the
/// greedy span from the first `{` to the last `}`, which rescues objects whose
/// string values contain unbalanced braces.
fn brace_spans(text: &str) -> Vec<&str> {
    let mut spans = Vec::new();
    let mut depth = 0usize;
    let mut start = None;
    let mut in_string = false;
    let mut escaped = false;

    for (i, c) in text.char_indices() {
        if in_string {
            match c {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match c {
            '"' if depth > 0 => in_string = true,
            '{' => {
                if depth == 0 {
                    start = Some(i);
                }
                depth += 1;
            }
            '}' if depth > 0 => {
                depth -= 1;
                if depth == 0 {
                    if let Some(s) = start.take() {
                        spans.push(&text[s..=i]);
                    }
                }
            }
            _ => {}
        }
    }

    if let (Some(first), Some(last)) = (text.find('{'), text.rfind('}')) {
        if first < last {
            let greedy = &text[first..=last];
            if !spans.contains(&greedy) {
                spans.push(greedy);
            }
        }
    }
    spans
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn obj(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn direct_json_round_trips() {
        let original = json!({
            "student_name": "John Doe",
            "remit_amount": 12500.5,
            "iban": null,
            "nested": {"a": [1, 2, 3]}
        });
        let text = serde_json::to_string(&original).unwrap();
        assert_eq!(parse(&text).unwrap(), obj(original));
    }

    #[test]
    fn fenced_block_inside_prose() {
        let raw = "prose ```json\n{\"a\":1}\n``` more prose";
        assert_eq!(parse(raw).unwrap(), obj(json!({"a": 1})));
    }

    #[test]
    fn fenced_block_without_language_tag() {
        let raw = "Here you go:\n```\n{\"bsb\": \"123-456\"}\n```";
        assert_eq!(parse(raw).unwrap(), obj(json!({"bsb": "123-456"})));
    }

    #[test]
    fn first_parseable_fence_wins() {
        let raw = "```json\n{broken\n```\nthen\n```json\n{\"ok\": true}\n```\n```json\n{\"ok\": false}\n```";
        assert_eq!(parse(raw).unwrap(), obj(json!({"ok": true})));
    }

    #[test]
    fn longest_brace_span_first() {
        let raw = r#"Small {"a": 1} and larger {"a": 2, "b": {"c": 3}} done"#;
        assert_eq!(parse(raw).unwrap(), obj(json!({"a": 2, "b": {"c": 3}})));
    }

    #[test]
    fn braces_inside_strings_are_respected() {
        let raw = r#"Result: {"purpose": "fees } for {term 1", "amount": 10} thanks"#;
        assert_eq!(
            parse(raw).unwrap(),
            obj(json!({"purpose": "fees } for {term 1", "amount": 10}))
        );
    }

    #[test]
    fn non_object_json_is_not_a_mapping() {
        assert!(parse("[1, 2, 3]").is_err());
        assert!(parse("\"just a string\"").is_err());
    }

    #[test]
    fn no_json_fails_with_original_text() {
        let err = parse("no json here").unwrap_err();
        match err {
            ExtractError::ParseFailure { raw } => assert_eq!(raw, "no json here"),
            other => panic!("unexpected error: {other:?}"),
        }
        assert!(matches!(parse_response(""), ParsedResponse::Failed(_)));
    }
}
