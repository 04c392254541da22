//! Canonical updates applied to the transcript.
//!
//! The only writer of message state. Updates for a missing target or for a
//! message that is already terminal are no-ops.
use crate::protocol::canonical::{CanonicalUpdate, TextMode};

use super::cleaner::clean_response;
use super::{MessageId, SessionInfo, Transcript};

/// Apply one update to `target`. Returns whether the transcript changed.
pub fn apply(transcript: &mut Transcript, target: MessageId, update: &CanonicalUpdate) -> bool {
    let Some(message) = transcript.get_mut(target) else {
        tracing::trace!(%target, "update for unknown message ignored");
        return false;
    };
    if !message.is_streaming {
        tracing::trace!(%target, "update for terminal message ignored");
        return false;
    }

    match update {
        CanonicalUpdate::TextDelta {
            text,
            mode: TextMode::Append,
        } => message.content.push_str(text),
        CanonicalUpdate::TextDelta {
            text,
            mode: TextMode::Replace,
        } => {
            message.content.clear();
            message.content.push_str(text);
        }
        CanonicalUpdate::Reasoning(text) => message.reasoning = Some(text.clone()),
        CanonicalUpdate::Session { id, title } => {
            let title = match (&message.session_info, title) {
                (_, Some(title)) => Some(title.clone()),
                (Some(existing), None) if existing.id == *id => existing.title.clone(),
                _ => None,
            };
            message.session_info = Some(SessionInfo {
                id: id.clone(),
                title,
            });
        }
        CanonicalUpdate::MessageId(id) => message.message_info = Some(id.clone()),
        CanonicalUpdate::Status(state) => {
            message.status_state = (!state.is_empty()).then(|| state.clone());
        }
        CanonicalUpdate::Usage(amount) => message.used_resource_units = Some(*amount),
        CanonicalUpdate::StreamEnd => {
            message.is_streaming = false;
            message.status_state = None;
        }
        CanonicalUpdate::Failed { notice } => {
            if message.content.trim().is_empty() {
                message.content.clone_from(notice);
            } else {
                message.content.push_str("\n\n");
                message.content.push_str(notice);
            }
            message.is_streaming = false;
            message.status_state = None;
            message.failed = true;
        }
    }
    true
}

/// Apply updates in order. Returns how many changed the transcript.
pub fn apply_all<'a>(
    transcript: &mut Transcript,
    target: MessageId,
    updates: impl IntoIterator<Item = &'a CanonicalUpdate>,
) -> usize {
    updates
        .into_iter()
        .filter(|update| apply(transcript, target, update))
        .count()
}

/// Run the cleaner over content and reasoning, then end the stream.
///
/// Returns the final content, or `None` when `target` is gone or already
/// terminal.
pub fn finalize(transcript: &mut Transcript, target: MessageId) -> Option<String> {
    let message = transcript.get(target)?;
    if !message.is_streaming {
        return None;
    }
    let content = clean_response(&message.content);
    let reasoning = message.reasoning.as_deref().map(clean_response);

    apply(transcript, target, &CanonicalUpdate::replace(content.clone()));
    if let Some(reasoning) = reasoning {
        apply(transcript, target, &CanonicalUpdate::Reasoning(reasoning));
    }
    apply(transcript, target, &CanonicalUpdate::StreamEnd);
    Some(content)
}
