//! Decoder for backends that tag every chunk with its event kind.
//!
//! ```text
//! {"event":"session","data":{"id":42,"title":"Kinematics"}}
//! {"event":"message","data":{"delta":"Hel"}}
//! {"event":"end"}
//! ```
use serde_json::Value;

use super::canonical::{CanonicalUpdate, CanonicalUpdates, ServerId};

const DISCRIMINATOR_KEYS: &[&str] = &["event", "type"];
const TITLE_KEYS: &[&str] = &["title", "name", "session_name"];
const USAGE_KEYS: &[&str] = &["used", "amount", "tokens", "used_tokens", "total"];

/// Event kinds this decoder understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EventKind {
    Session,
    MessageId,
    Status,
    Usage,
    Content,
    End,
}

fn event_kind(name: &str) -> Option<EventKind> {
    match name {
        "session" => Some(EventKind::Session),
        "message_id" => Some(EventKind::MessageId),
        "status" => Some(EventKind::Status),
        "token" | "tokens" | "usage" => Some(EventKind::Usage),
        "message" | "content" => Some(EventKind::Content),
        "end" | "done" => Some(EventKind::End),
        _ => None,
    }
}

/// Decode one event-tagged chunk. Unknown event kinds and chunks without a
/// discriminator produce nothing.
#[must_use]
pub fn decode_event_chunk(chunk: &Value) -> CanonicalUpdates {
    let mut out = CanonicalUpdates::new();
    decode_event_chunk_into(chunk, &mut out);
    out
}

/// Decode one event-tagged chunk into a caller-provided buffer.
pub fn decode_event_chunk_into(chunk: &Value, out: &mut CanonicalUpdates) {
    let Some(name) = DISCRIMINATOR_KEYS
        .iter()
        .find_map(|key| chunk.get(*key).and_then(Value::as_str))
    else {
        return;
    };
    let Some(kind) = event_kind(name) else {
        tracing::trace!(event = name, "ignoring unknown event kind");
        return;
    };
    let data = chunk.get("data").unwrap_or(&Value::Null);

    match kind {
        EventKind::Session => {
            if let Some(id) = id_field(data) {
                let title = TITLE_KEYS
                    .iter()
                    .find_map(|key| data.get(*key).and_then(Value::as_str))
                    .filter(|title| !title.trim().is_empty())
                    .map(str::to_string);
                out.push(CanonicalUpdate::Session { id, title });
            }
        }
        EventKind::MessageId => {
            if let Some(id) = id_field(data) {
                out.push(CanonicalUpdate::MessageId(id));
            }
        }
        EventKind::Status => {
            let state = data
                .as_str()
                .or_else(|| data.get("state").and_then(Value::as_str))
                .or_else(|| data.get("status").and_then(Value::as_str));
            if let Some(state) = state {
                out.push(CanonicalUpdate::Status(state.to_string()));
            }
        }
        EventKind::Usage => {
            let amount = data.as_f64().or_else(|| {
                USAGE_KEYS
                    .iter()
                    .find_map(|key| data.get(*key).and_then(Value::as_f64))
            });
            if let Some(amount) = amount {
                out.push(CanonicalUpdate::Usage(amount));
            }
        }
        EventKind::Content => {
            let delta = data
                .as_str()
                .or_else(|| data.get("delta").and_then(Value::as_str))
                .or_else(|| data.get("content").and_then(Value::as_str));
            if let Some(delta) = delta {
                if !delta.is_empty() {
                    out.push(CanonicalUpdate::append(delta));
                }
            }
        }
        EventKind::End => out.push(CanonicalUpdate::StreamEnd),
    }
}

/// `data` may be the id itself or an object carrying `id`.
fn id_field(data: &Value) -> Option<ServerId> {
    ServerId::from_json(data).or_else(|| data.get("id").and_then(ServerId::from_json))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_session_event_with_numeric_id() {
        let updates = decode_event_chunk(&json!({"event":"session","data":{"id":42}}));
        assert_eq!(
            updates.as_slice(),
            &[CanonicalUpdate::Session {
                id: ServerId::from(42),
                title: None
            }]
        );
    }

    #[test]
    fn test_session_event_carries_title() {
        let updates = decode_event_chunk(
            &json!({"event":"session","data":{"id":"s-1","title":"Newton's laws"}}),
        );
        assert_eq!(
            updates.as_slice(),
            &[CanonicalUpdate::Session {
                id: ServerId::from("s-1"),
                title: Some("Newton's laws".to_string())
            }]
        );
    }

    #[test]
    fn test_message_delta_is_always_append() {
        let updates = decode_event_chunk(&json!({"event":"message","data":{"delta":"Hello"}}));
        assert_eq!(updates.as_slice(), &[CanonicalUpdate::append("Hello")]);
    }

    #[test]
    fn test_empty_delta_skipped() {
        assert!(decode_event_chunk(&json!({"event":"message","data":{"delta":""}})).is_empty());
    }

    #[test]
    fn test_status_usage_and_message_id() {
        assert_eq!(
            decode_event_chunk(&json!({"event":"status","data":{"state":"analysing image"}}))
                .as_slice(),
            &[CanonicalUpdate::Status("analysing image".to_string())]
        );
        assert_eq!(
            decode_event_chunk(&json!({"event":"token","data":{"used":12.5}})).as_slice(),
            &[CanonicalUpdate::Usage(12.5)]
        );
        assert_eq!(
            decode_event_chunk(&json!({"event":"message_id","data":{"id":991}})).as_slice(),
            &[CanonicalUpdate::MessageId(ServerId::from(991))]
        );
    }

    #[test]
    fn test_end_event() {
        assert_eq!(
            decode_event_chunk(&json!({"event":"end"})).as_slice(),
            &[CanonicalUpdate::StreamEnd]
        );
    }

    #[test]
    fn test_unknown_and_untagged_chunks_ignored() {
        assert!(decode_event_chunk(&json!({"event":"heartbeat","data":{}})).is_empty());
        assert!(decode_event_chunk(&json!({"output":"not this family"})).is_empty());
        assert!(decode_event_chunk(&json!("bare string")).is_empty());
    }

    #[test]
    fn test_type_discriminator_fallback() {
        assert_eq!(
            decode_event_chunk(&json!({"type":"content","data":"chunk"})).as_slice(),
            &[CanonicalUpdate::append("chunk")]
        );
    }
}
