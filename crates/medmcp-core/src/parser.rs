//! Best-effort extraction of a JSON object from free-form model output.
//!
//! Strategies run in order and the first success wins:
//! 1. the whole (trimmed) reply is an object,
//! 2. a fenced code block holds an object,
//! 3. the longest balanced `{...}` span that parses.
//!
//! When all three miss, the raw text is wrapped in a low-confidence fallback
//! object. Parsing never fails.

use serde_json::{json, Value};

/// Confidence reported by the fallback wrapper around unstructured text.
pub const FALLBACK_CONFIDENCE: f64 = 0.5;
/// Confidence floor used when the model returned nothing at all.
pub const EMPTY_RESPONSE_CONFIDENCE: f64 = 0.4;
pub const MANUAL_REVIEW_NOTE: &str = "Manual clinical review recommended";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseStrategy {
    Direct,
    FencedBlock,
    LargestObject,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FallbackReason {
    EmptyResponse,
    NoJson,
    /// JSON was found but none of it carried the expected key.
    MissingExpectedKey,
}

impl FallbackReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::EmptyResponse => "empty model response",
            Self::NoJson => "no JSON object in model response",
            Self::MissingExpectedKey => "model response lacked the expected field",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ParseOutcome {
    Parsed {
        value: Value,
        strategy: ParseStrategy,
    },
    Fallback {
        value: Value,
        reason: FallbackReason,
    },
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ResponseParser<'a> {
    expected_key: Option<&'a str>,
}

impl<'a> ResponseParser<'a> {
    pub fn new() -> Self {
        Self { expected_key: None }
    }

    /// Only accept objects that contain `key` at the top level.
    pub fn expecting(key: &'a str) -> Self {
        Self {
            expected_key: Some(key),
        }
    }

    pub fn parse(&self, raw: &str) -> ParseOutcome {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return ParseOutcome::Fallback {
                value: fallback_object(raw, EMPTY_RESPONSE_CONFIDENCE),
                reason: FallbackReason::EmptyResponse,
            };
        }

        let mut saw_json = false;

        if trimmed.starts_with('{') && trimmed.ends_with('}') {
            if let Some(value) = parse_object(trimmed) {
                if self.accepts(&value) {
                    tracing::debug!("parsed model response directly");
                    return ParseOutcome::Parsed {
                        value,
                        strategy: ParseStrategy::Direct,
                    };
                }
                saw_json = true;
            }
        }

        for block in fenced_blocks(trimmed) {
            if let Some(value) = parse_object(block) {
                if self.accepts(&value) {
                    tracing::debug!("parsed model response from fenced block");
                    return ParseOutcome::Parsed {
                        value,
                        strategy: ParseStrategy::FencedBlock,
                    };
                }
                saw_json = true;
            }
        }

        let mut best: Option<(usize, Value)> = None;
        for span in json_object_spans(trimmed) {
            let Some(value) = parse_object(span) else {
                continue;
            };
            saw_json = true;
            if !self.accepts(&value) {
                continue;
            }
            if best.as_ref().map(|(len, _)| span.len() > *len).unwrap_or(true) {
                best = Some((span.len(), value));
            }
        }
        if let Some((len, value)) = best {
            tracing::debug!(span_len = len, "parsed model response from embedded object");
            return ParseOutcome::Parsed {
                value,
                strategy: ParseStrategy::LargestObject,
            };
        }

        let reason = if saw_json && self.expected_key.is_some() {
            FallbackReason::MissingExpectedKey
        } else {
            FallbackReason::NoJson
        };
        tracing::debug!(reason = reason.as_str(), "falling back to raw-text wrapper");
        ParseOutcome::Fallback {
            value: fallback_object(raw, FALLBACK_CONFIDENCE),
            reason,
        }
    }

    fn accepts(&self, value: &Value) -> bool {
        match self.expected_key {
            Some(key) => value.get(key).is_some(),
            None => true,
        }
    }
}

pub fn parse_response(raw: &str, expected_key: Option<&str>) -> ParseOutcome {
    match expected_key {
        Some(key) => ResponseParser::expecting(key).parse(raw),
        None => ResponseParser::new().parse(raw),
    }
}

/// Wraps unstructured model text so callers always get an object back.
pub fn fallback_object(raw: &str, confidence: f64) -> Value {
    json!({
        "analysis": raw,
        "reasoning": raw,
        "confidence": confidence,
        "recommendations": [MANUAL_REVIEW_NOTE],
    })
}

fn parse_object(text: &str) -> Option<Value> {
    match serde_json::from_str::<Value>(text.trim()) {
        Ok(value @ Value::Object(_)) => Some(value),
        _ => None,
    }
}

/// Contents of every triple-backtick block, with an optional `json` tag
/// stripped. An unterminated final fence is ignored.
fn fenced_blocks(text: &str) -> Vec<&str> {
    let mut blocks = Vec::new();
    let mut rest = text;
    while let Some(open) = rest.find("```") {
        let after = &rest[open + 3..];
        let body = strip_language_tag(after);
        let Some(close) = body.find("```") else {
            break;
        };
        blocks.push(body[..close].trim());
        rest = &body[close + 3..];
    }
    blocks
}

fn strip_language_tag(text: &str) -> &str {
    match text.get(..4) {
        Some(tag) if tag.eq_ignore_ascii_case("json") => &text[4..],
        _ => text,
    }
}

/// Every balanced `{...}` span in `text`, at any nesting depth, ordered by
/// closing brace. Each `{` is scanned on its own with fresh string state, so
/// a truncated object or a stray quote cannot hide a later complete one.
pub fn json_object_spans(text: &str) -> Vec<&str> {
    let bytes = text.as_bytes();
    let mut spans: Vec<(usize, usize)> = bytes
        .iter()
        .enumerate()
        .filter(|(_, byte)| **byte == b'{')
        .filter_map(|(start, _)| matching_brace(&bytes[start..]).map(|len| (start, start + len)))
        .collect();
    spans.sort_by_key(|&(start, end)| (end, std::cmp::Reverse(start)));
    spans.into_iter().map(|(start, end)| &text[start..=end]).collect()
}

/// Offset of the `}` closing the `{` at `bytes[0]`, skipping braces inside
/// JSON strings.
fn matching_brace(bytes: &[u8]) -> Option<usize> {
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (i, byte) in bytes.iter().enumerate() {
        if in_string {
            if escaped {
                escaped = false;
            } else if *byte == b'\\' {
                escaped = true;
            } else if *byte == b'"' {
                in_string = false;
            }
            continue;
        }
        match byte {
            b'"' => in_string = true,
            b'{' => depth += 1,
            b'}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(i);
                }
            }
            _ => {}
        }
    }
    None
}

/// Normalises a model-reported confidence to 0.0..=1.0. Values above 1 are
/// read as percentages; strings like `"85%"` are accepted.
pub fn normalize_confidence(value: Option<&Value>, default: f64) -> f64 {
    let raw = match value {
        Some(Value::Number(n)) => n.as_f64(),
        Some(Value::String(s)) => s.trim().trim_end_matches('%').trim().parse::<f64>().ok(),
        _ => None,
    };
    let Some(raw) = raw.filter(|v| v.is_finite()) else {
        return default;
    };
    let scaled = if raw > 1.0 { raw / 100.0 } else { raw };
    scaled.clamp(0.0, 1.0)
}

/// Top-level string field, or `None` when absent or not a string.
pub fn string_field(value: &Value, key: &str) -> Option<String> {
    value
        .get(key)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

/// Top-level array of strings; non-string entries are skipped.
pub fn string_list(value: &Value, key: &str) -> Vec<String> {
    value
        .get(key)
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    impl ParseOutcome {
        fn value(&self) -> &Value {
            match self {
                Self::Parsed { value, .. } | Self::Fallback { value, .. } => value,
            }
        }

        fn is_fallback(&self) -> bool {
            matches!(self, Self::Fallback { .. })
        }
    }

    #[test]
    fn direct_object_is_parsed() {
        let outcome = parse_response("{\"medications\":[{\"name\":\"X\"}]}", Some("medications"));
        match outcome {
            ParseOutcome::Parsed { value, strategy } => {
                assert_eq!(strategy, ParseStrategy::Direct);
                assert_eq!(value["medications"][0]["name"], "X");
            }
            other => panic!("expected parsed outcome, got {other:?}"),
        }
    }

    #[test]
    fn fenced_json_block_is_parsed() {
        let text = "Here is the analysis:\n```json\n{\"confidence\": 0.8, \"possible_conditions\": []}\n```\nThanks";
        let outcome = parse_response(text, None);
        assert!(matches!(
            outcome,
            ParseOutcome::Parsed { strategy: ParseStrategy::FencedBlock, .. }
        ));
        assert_eq!(outcome.value()["confidence"], 0.8);
    }

    #[test]
    fn untagged_fence_is_parsed() {
        let text = "```\n{\"a\": 1}\n```";
        let outcome = parse_response(text, None);
        assert_eq!(outcome.value()["a"], 1);
    }

    #[test]
    fn malformed_fence_falls_through_to_embedded_object() {
        let text = "```json\n{\"a\": 1,,}\n```\nbut also {\"b\": 2}";
        let outcome = parse_response(text, None);
        match outcome {
            ParseOutcome::Parsed { value, strategy } => {
                assert_eq!(strategy, ParseStrategy::LargestObject);
                assert_eq!(value["b"], 2);
            }
            other => panic!("expected parsed outcome, got {other:?}"),
        }
    }

    #[test]
    fn free_text_falls_back_verbatim() {
        let text = "The patient likely has a viral infection; rest and fluids.";
        let outcome = parse_response(text, None);
        match &outcome {
            ParseOutcome::Fallback { value, reason } => {
                assert_eq!(*reason, FallbackReason::NoJson);
                assert_eq!(value["analysis"], text);
                assert_eq!(value["confidence"], FALLBACK_CONFIDENCE);
                assert_eq!(value["recommendations"][0], MANUAL_REVIEW_NOTE);
            }
            other => panic!("expected fallback, got {other:?}"),
        }
    }

    #[test]
    fn empty_response_uses_confidence_floor() {
        let outcome = parse_response("   \n", None);
        match outcome {
            ParseOutcome::Fallback { value, reason } => {
                assert_eq!(reason, FallbackReason::EmptyResponse);
                assert_eq!(value["confidence"], EMPTY_RESPONSE_CONFIDENCE);
            }
            other => panic!("expected fallback, got {other:?}"),
        }
    }

    #[test]
    fn largest_of_two_objects_wins() {
        let text = "First {\"a\": 1} then {\"medications\": [\"amoxicillin\"], \"notes\": \"take with food\"} done";
        let outcome = parse_response(text, None);
        match outcome {
            ParseOutcome::Parsed { value, strategy } => {
                assert_eq!(strategy, ParseStrategy::LargestObject);
                assert!(value.get("medications").is_some());
            }
            other => panic!("expected parsed outcome, got {other:?}"),
        }
    }

    #[test]
    fn expected_key_filters_candidates() {
        let text = "{\"long_but_irrelevant\": \"xxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxx\"} {\"medications\": []}";
        let outcome = parse_response(text, Some("medications"));
        assert!(!outcome.is_fallback());
        assert!(outcome.value().get("medications").is_some());
    }

    #[test]
    fn missing_expected_key_reports_reason() {
        let outcome = parse_response("{\"other\": 1}", Some("medications"));
        match outcome {
            ParseOutcome::Fallback { reason, .. } => {
                assert_eq!(reason, FallbackReason::MissingExpectedKey)
            }
            other => panic!("expected fallback, got {other:?}"),
        }
    }

    #[test]
    fn nested_object_is_extracted_whole() {
        let text = "Result: {\"medications\": [{\"name\": \"ibuprofen\", \"dose\": {\"mg\": 400}}]} end";
        let outcome = parse_response(text, Some("medications"));
        assert_eq!(outcome.value()["medications"][0]["dose"]["mg"], 400);
    }

    #[test]
    fn braces_inside_strings_do_not_break_spans() {
        let text = "x {\"note\": \"use } carefully {\", \"ok\": true} y";
        let spans = json_object_spans(text);
        assert_eq!(spans.len(), 1);
        assert_eq!(spans[0], "{\"note\": \"use } carefully {\", \"ok\": true}");
    }

    #[test]
    fn spans_include_inner_objects() {
        let spans = json_object_spans("{\"a\": {\"b\": 1}}");
        assert_eq!(spans, vec!["{\"b\": 1}", "{\"a\": {\"b\": 1}}"]);
    }

    #[test]
    fn normalize_confidence_handles_scales() {
        assert_eq!(normalize_confidence(Some(&json!(0.82)), 0.5), 0.82);
        assert_eq!(normalize_confidence(Some(&json!(85)), 0.5), 0.85);
        assert_eq!(normalize_confidence(Some(&json!("90%")), 0.5), 0.9);
        assert_eq!(normalize_confidence(Some(&json!(250)), 0.5), 1.0);
        assert_eq!(normalize_confidence(Some(&json!(-3)), 0.5), 0.0);
        assert_eq!(normalize_confidence(Some(&json!("high")), 0.5), 0.5);
        assert_eq!(normalize_confidence(None, 0.7), 0.7);
    }

    #[test]
    fn truncated_object_does_not_hide_corrected_one() {
        let text = "{\"possible_conditions\": [\"flu\n{\"possible_conditions\": [\"flu\"]}";
        let outcome = parse_response(text, Some("possible_conditions"));
        match outcome {
            ParseOutcome::Parsed { value, strategy } => {
                assert_eq!(strategy, ParseStrategy::LargestObject);
                assert_eq!(value["possible_conditions"][0], "flu");
            }
            other => panic!("expected parsed outcome, got {other:?}"),
        }
    }

    #[test]
    fn stray_quote_in_prose_braces_is_skipped() {
        let text = "Height {approx 5'10\" tall}. Result: {\"possible_conditions\": []}";
        let outcome = parse_response(text, Some("possible_conditions"));
        assert!(!outcome.is_fallback());
        assert_eq!(outcome.value()["possible_conditions"], json!([]));
    }
}
