//! Decoder for backends whose chunks carry no event tag.
//!
//! Chunk shape is matched against [`CONTENT_RULES`], most specific first.
//! The first rule that matches wins.
use serde_json::Value;

use super::canonical::{CanonicalUpdate, CanonicalUpdates, TextMode};

/// One rule in the free-form precedence list.
pub struct ContentRule {
    pub name: &'static str,
    pub mode: TextMode,
    pub extract: fn(&Value) -> Option<&str>,
}

/// Ordered precedence list. Adding a provider shape is an insertion here.
pub const CONTENT_RULES: &[ContentRule] = &[
    ContentRule {
        name: "output",
        // cumulative text, resent on every chunk
        mode: TextMode::Replace,
        extract: output_text,
    },
    ContentRule {
        name: "content",
        mode: TextMode::Append,
        extract: content_text,
    },
    ContentRule {
        name: "delta.content",
        mode: TextMode::Append,
        extract: delta_content_text,
    },
    ContentRule {
        name: "choices[0].delta.content",
        mode: TextMode::Append,
        extract: choice_delta_text,
    },
    ContentRule {
        name: "text",
        mode: TextMode::Append,
        extract: plain_text,
    },
];

/// `output` as a string, or the first element of an array wrapper.
pub(crate) fn output_text(chunk: &Value) -> Option<&str> {
    match chunk.get("output")? {
        Value::String(s) => Some(s),
        Value::Array(items) => match items.first()? {
            Value::String(s) => Some(s),
            item => item
                .get("text")
                .or_else(|| item.get("content"))
                .and_then(Value::as_str),
        },
        _ => None,
    }
}

fn content_text(chunk: &Value) -> Option<&str> {
    chunk.get("content").and_then(Value::as_str)
}

fn delta_content_text(chunk: &Value) -> Option<&str> {
    chunk.pointer("/delta/content").and_then(Value::as_str)
}

fn choice_delta_text(chunk: &Value) -> Option<&str> {
    chunk
        .pointer("/choices/0/delta/content")
        .and_then(Value::as_str)
}

fn plain_text(chunk: &Value) -> Option<&str> {
    chunk.get("text").and_then(Value::as_str)
}

/// Decode one free-form chunk.
#[must_use]
pub fn decode_free_form_chunk(chunk: &Value) -> CanonicalUpdates {
    let mut out = CanonicalUpdates::new();
    decode_free_form_chunk_into(chunk, &mut out);
    out
}

/// Decode one free-form chunk into a caller-provided buffer.
pub fn decode_free_form_chunk_into(chunk: &Value, out: &mut CanonicalUpdates) {
    // Array-wrapped chunk: look at its first element.
    let chunk = match chunk {
        Value::Array(items) => match items.first() {
            Some(first) => first,
            None => return,
        },
        other => other,
    };

    if let Some((rule, text)) = CONTENT_RULES
        .iter()
        .find_map(|rule| (rule.extract)(chunk).map(|text| (rule, text)))
    {
        tracing::trace!(rule = rule.name, "free-form chunk matched");
        // an empty append is a no-op, an empty replace still clears
        if rule.mode == TextMode::Replace || !text.is_empty() {
            out.push(CanonicalUpdate::TextDelta {
                text: text.to_string(),
                mode: rule.mode,
            });
        }
    }

    if let Some(reasoning) = chunk.get("reasoning").and_then(Value::as_str) {
        out.push(CanonicalUpdate::Reasoning(reasoning.to_string()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_output_replaces() {
        assert_eq!(
            decode_free_form_chunk(&json!({"output":"Hel"})).as_slice(),
            &[CanonicalUpdate::replace("Hel")]
        );
    }

    #[test]
    fn test_output_array_wrapper() {
        assert_eq!(
            decode_free_form_chunk(&json!({"output":["Hello"]})).as_slice(),
            &[CanonicalUpdate::replace("Hello")]
        );
        assert_eq!(
            decode_free_form_chunk(&json!([{"output":"Hi"}])).as_slice(),
            &[CanonicalUpdate::replace("Hi")]
        );
    }

    #[test]
    fn test_first_matching_rule_wins() {
        let updates = decode_free_form_chunk(&json!({"output":"full","content":"delta"}));
        assert_eq!(updates.as_slice(), &[CanonicalUpdate::replace("full")]);

        let updates = decode_free_form_chunk(&json!({"content":"a","text":"b"}));
        assert_eq!(updates.as_slice(), &[CanonicalUpdate::append("a")]);
    }

    #[test]
    fn test_append_shapes() {
        assert_eq!(
            decode_free_form_chunk(&json!({"delta":{"content":"x"}})).as_slice(),
            &[CanonicalUpdate::append("x")]
        );
        assert_eq!(
            decode_free_form_chunk(&json!({"choices":[{"delta":{"content":"y"}}]})).as_slice(),
            &[CanonicalUpdate::append("y")]
        );
        assert_eq!(
            decode_free_form_chunk(&json!({"text":"z"})).as_slice(),
            &[CanonicalUpdate::append("z")]
        );
    }

    #[test]
    fn test_reasoning_independent_of_content_rule() {
        let updates = decode_free_form_chunk(&json!({"output":"answer","reasoning":"because"}));
        assert_eq!(
            updates.as_slice(),
            &[
                CanonicalUpdate::replace("answer"),
                CanonicalUpdate::Reasoning("because".to_string())
            ]
        );

        let updates = decode_free_form_chunk(&json!({"reasoning":"thinking"}));
        assert_eq!(
            updates.as_slice(),
            &[CanonicalUpdate::Reasoning("thinking".to_string())]
        );
    }

    #[test]
    fn test_unmatched_chunk_yields_nothing() {
        assert!(decode_free_form_chunk(&json!({"type":"begin"})).is_empty());
        assert!(decode_free_form_chunk(&json!([])).is_empty());
        assert!(decode_free_form_chunk(&json!({"content":""})).is_empty());
    }
}
