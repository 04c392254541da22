//! Non-streaming fallback: extract the final answer from a fully buffered
//! response body.
use std::time::Duration;

use serde_json::Value;

use super::canonical::{CanonicalUpdate, CanonicalUpdates};
use super::free_form::output_text;

/// Substituted when the body matches no known envelope or is not JSON.
pub const GENERIC_ACKNOWLEDGEMENT: &str =
    "I received your message and processed it through the workflow.";

/// One rule in the envelope precedence ladder.
pub struct EnvelopeRule {
    pub name: &'static str,
    pub extract: fn(&Value) -> Option<&str>,
}

/// Ordered precedence ladder, most specific first.
pub const ENVELOPE_RULES: &[EnvelopeRule] = &[
    EnvelopeRule {
        name: "ai_response.content_blocks[0].data.content",
        extract: ai_response_content_block,
    },
    EnvelopeRule {
        name: "content_blocks[0].data.content",
        extract: top_level_content_block,
    },
    EnvelopeRule {
        name: "output",
        extract: output_text,
    },
    EnvelopeRule {
        name: "response",
        extract: response_text,
    },
    EnvelopeRule {
        name: "message",
        extract: message_text,
    },
    EnvelopeRule {
        name: "ai_response",
        extract: ai_response_text,
    },
];

const REASONING_POINTERS: &[&str] = &[
    "/reasoning",
    "/ai_response/reasoning",
    "/ai_response/content_blocks/0/data/reasoning",
    "/response/reasoning",
];

fn ai_response_content_block(body: &Value) -> Option<&str> {
    body.pointer("/ai_response/content_blocks/0/data/content")
        .and_then(Value::as_str)
}

fn top_level_content_block(body: &Value) -> Option<&str> {
    body.pointer("/content_blocks/0/data/content")
        .and_then(Value::as_str)
}

fn response_text(body: &Value) -> Option<&str> {
    string_or_object_text(body.get("response")?)
}

fn message_text(body: &Value) -> Option<&str> {
    string_or_object_text(body.get("message")?)
}

fn ai_response_text(body: &Value) -> Option<&str> {
    string_or_object_text(body.get("ai_response")?)
}

/// A field holding either the text itself or an object with `content`/`text`.
fn string_or_object_text(value: &Value) -> Option<&str> {
    match value {
        Value::String(s) => Some(s),
        Value::Object(_) => value
            .get("content")
            .or_else(|| value.get("text"))
            .and_then(Value::as_str),
        _ => None,
    }
}

/// Final text and reasoning pulled out of a buffered body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractedResponse {
    pub text: String,
    pub reasoning: Option<String>,
    /// Ladder rule that matched; `None` when the acknowledgement was used.
    pub matched_rule: Option<&'static str>,
}

impl ExtractedResponse {
    fn acknowledgement() -> Self {
        Self {
            text: GENERIC_ACKNOWLEDGEMENT.to_string(),
            reasoning: None,
            matched_rule: None,
        }
    }
}

/// Apply the envelope ladder to a raw body. Never fails: unparseable or
/// unrecognised bodies degrade to [`GENERIC_ACKNOWLEDGEMENT`].
#[must_use]
pub fn extract_buffered_response(body: &str) -> ExtractedResponse {
    if body.trim().is_empty() {
        return ExtractedResponse::acknowledgement();
    }
    let parsed: Value = match serde_json::from_str(body) {
        Ok(value) => value,
        Err(err) => {
            tracing::warn!(error = %err, body_len = body.len(), "buffered response is not JSON");
            return ExtractedResponse::acknowledgement();
        }
    };
    extract_from_value(&parsed)
}

/// Apply the envelope ladder to an already parsed body.
#[must_use]
pub fn extract_from_value(parsed: &Value) -> ExtractedResponse {
    let envelope = match parsed {
        Value::Array(items) => match items.first() {
            Some(first) => first,
            None => return ExtractedResponse::acknowledgement(),
        },
        other => other,
    };

    let matched = ENVELOPE_RULES
        .iter()
        .find_map(|rule| (rule.extract)(envelope).map(|text| (rule.name, text)));
    let Some((rule, text)) = matched else {
        tracing::debug!("buffered response matched no envelope rule");
        return ExtractedResponse::acknowledgement();
    };

    let reasoning = REASONING_POINTERS
        .iter()
        .find_map(|pointer| envelope.pointer(pointer).and_then(Value::as_str))
        .filter(|r| !r.trim().is_empty())
        .map(str::to_string);

    ExtractedResponse {
        text: text.to_string(),
        reasoning,
        matched_rule: Some(rule),
    }
}

/// Client-side typing effect for buffered responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypingEffect {
    /// Deliver the whole text in one replace.
    Disabled,
    /// One append per word, separated by `delay`.
    Words { delay: Duration },
}

impl TypingEffect {
    #[must_use]
    pub fn from_features(enabled: bool, delay_ms: u64) -> Self {
        if enabled {
            TypingEffect::Words {
                delay: Duration::from_millis(delay_ms),
            }
        } else {
            TypingEffect::Disabled
        }
    }

    #[must_use]
    pub fn delay(&self) -> Option<Duration> {
        match self {
            TypingEffect::Disabled => None,
            TypingEffect::Words { delay } if delay.is_zero() => None,
            TypingEffect::Words { delay } => Some(*delay),
        }
    }
}

/// Updates that replay an extracted response as if it were typed.
///
/// Word appends are followed by a replace with the exact original text so
/// that line breaks and repeated spaces survive the word split.
#[must_use]
pub fn synthesize_typing(extracted: &ExtractedResponse, effect: TypingEffect) -> Vec<CanonicalUpdate> {
    let mut out = Vec::new();
    if let TypingEffect::Words { .. } = effect {
        for (index, word) in extracted.text.split_whitespace().enumerate() {
            if index == 0 {
                out.push(CanonicalUpdate::append(word));
            } else {
                out.push(CanonicalUpdate::append(format!(" {word}")));
            }
        }
    }
    out.push(CanonicalUpdate::replace(extracted.text.clone()));
    if let Some(reasoning) = &extracted.reasoning {
        out.push(CanonicalUpdate::Reasoning(reasoning.clone()));
    }
    out
}

/// Buffered body decoded straight into canonical updates without delays.
#[must_use]
pub fn decode_buffered_body(body: &str) -> CanonicalUpdates {
    let extracted = extract_buffered_response(body);
    synthesize_typing(&extracted, TypingEffect::Disabled)
        .into_iter()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_response_field() {
        let extracted = extract_buffered_response(r#"{"response":"42 Answer is 42."}"#);
        assert_eq!(extracted.text, "42 Answer is 42.");
        assert_eq!(extracted.matched_rule, Some("response"));
    }

    #[test]
    fn test_content_block_beats_flat_fields() {
        let body = json!([{
            "ai_response": {"content_blocks": [{"data": {"content": "nested", "reasoning": "why"}}]},
            "response": "flat"
        }]);
        let extracted = extract_from_value(&body);
        assert_eq!(extracted.text, "nested");
        assert_eq!(extracted.reasoning.as_deref(), Some("why"));
    }

    #[test]
    fn test_string_or_object_fields() {
        assert_eq!(
            extract_from_value(&json!({"message":{"content":"from object"}})).text,
            "from object"
        );
        assert_eq!(
            extract_from_value(&json!({"ai_response":"plain"})).text,
            "plain"
        );
        assert_eq!(
            extract_from_value(&json!({"output":["first","second"]})).text,
            "first"
        );
    }

    #[test]
    fn test_unknown_shape_uses_acknowledgement() {
        let extracted = extract_buffered_response(r#"{"foo":"bar"}"#);
        assert_eq!(extracted.text, GENERIC_ACKNOWLEDGEMENT);
        assert_eq!(extracted.matched_rule, None);
    }

    #[test]
    fn test_invalid_and_empty_bodies_use_acknowledgement() {
        assert_eq!(
            extract_buffered_response("<html>502</html>").text,
            GENERIC_ACKNOWLEDGEMENT
        );
        assert_eq!(extract_buffered_response("  ").text, GENERIC_ACKNOWLEDGEMENT);
        assert_eq!(extract_buffered_response("[]").text, GENERIC_ACKNOWLEDGEMENT);
    }

    #[test]
    fn test_typing_emits_word_appends_then_exact_replace() {
        let extracted = ExtractedResponse {
            text: "one two\nthree".to_string(),
            reasoning: None,
            matched_rule: Some("response"),
        };
        let updates = synthesize_typing(
            &extracted,
            TypingEffect::Words {
                delay: Duration::from_millis(50),
            },
        );
        assert_eq!(
            updates,
            vec![
                CanonicalUpdate::append("one"),
                CanonicalUpdate::append(" two"),
                CanonicalUpdate::append(" three"),
                CanonicalUpdate::replace("one two\nthree"),
            ]
        );
    }

    #[test]
    fn test_disabled_typing_is_single_replace() {
        let updates = decode_buffered_body(r#"{"response":"done","reasoning":"r"}"#);
        assert_eq!(
            updates.as_slice(),
            &[
                CanonicalUpdate::replace("done"),
                CanonicalUpdate::Reasoning("r".to_string())
            ]
        );
    }

    #[test]
    fn test_zero_delay_has_no_sleep() {
        assert_eq!(TypingEffect::from_features(true, 0).delay(), None);
        assert_eq!(TypingEffect::from_features(false, 50).delay(), None);
        assert_eq!(
            TypingEffect::from_features(true, 50).delay(),
            Some(Duration::from_millis(50))
        );
    }
}
