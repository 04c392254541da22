//! Ordered message log shown to the user.
pub mod cleaner;
pub mod reducer;

pub use cleaner::clean_response;
pub use reducer::{apply, apply_all, finalize};

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::protocol::canonical::ServerId;
use crate::util::unix_now_millis;

/// Locally unique message id. Never reused within a process, even across
/// transcript resets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MessageId(u64);

impl MessageId {
    #[must_use]
    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

/// Uploaded image reference. While pending it sits in the caller's list;
/// on submit it is moved into the user message and becomes immutable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attachment {
    pub id: String,
    pub url: String,
    pub name: String,
    pub size: u64,
}

impl Attachment {
    /// Attachment known only by URL, as typed into the terminal client.
    #[must_use]
    pub fn from_url(url: impl Into<String>) -> Self {
        let url = url.into();
        let name = url
            .rsplit('/')
            .next()
            .filter(|segment| !segment.is_empty())
            .unwrap_or("image")
            .to_string();
        Self {
            id: crate::util::generate_local_id("att"),
            url,
            name,
            size: 0,
        }
    }
}

/// Server session a message was produced in.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionInfo {
    pub id: ServerId,
    pub title: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    pub id: MessageId,
    pub role: Role,
    pub content: String,
    /// Unix milliseconds at creation.
    pub timestamp: u64,
    pub is_streaming: bool,
    pub attachments: Vec<Attachment>,
    pub reasoning: Option<String>,
    pub session_info: Option<SessionInfo>,
    pub message_info: Option<ServerId>,
    pub used_resource_units: Option<f64>,
    pub status_state: Option<String>,
    /// Terminal because the exchange failed rather than completed.
    pub failed: bool,
}

impl Message {
    fn new(id: MessageId, role: Role, content: String, is_streaming: bool) -> Self {
        Self {
            id,
            role,
            content,
            timestamp: unix_now_millis(),
            is_streaming,
            attachments: Vec::new(),
            reasoning: None,
            session_info: None,
            message_info: None,
            used_resource_units: None,
            status_state: None,
            failed: false,
        }
    }
}

/// Append-only list of messages plus the id allocator.
#[derive(Debug, Default)]
pub struct Transcript {
    messages: Vec<Message>,
    next_id: u64,
}

impl Transcript {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn allocate_id(&mut self) -> MessageId {
        self.next_id += 1;
        MessageId(self.next_id)
    }

    /// Append a terminal user message carrying `attachments`.
    pub fn push_user(&mut self, text: impl Into<String>, attachments: Vec<Attachment>) -> MessageId {
        let id = self.allocate_id();
        let mut message = Message::new(id, Role::User, text.into(), false);
        message.attachments = attachments;
        self.messages.push(message);
        id
    }

    /// Append an empty streaming assistant message for a new exchange.
    pub fn push_assistant_placeholder(&mut self) -> MessageId {
        let id = self.allocate_id();
        self.messages
            .push(Message::new(id, Role::Assistant, String::new(), true));
        id
    }

    /// Append an already-terminal message, e.g. when restoring history.
    pub fn push_restored(&mut self, role: Role, content: impl Into<String>) -> MessageId {
        let id = self.allocate_id();
        self.messages
            .push(Message::new(id, role, content.into(), false));
        id
    }

    /// Drop every message. The id allocator keeps counting so updates for
    /// messages of the old transcript can never land on new ones.
    pub fn reset(&mut self) {
        self.messages.clear();
    }

    #[must_use]
    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    #[must_use]
    pub fn get(&self, id: MessageId) -> Option<&Message> {
        self.messages.iter().rev().find(|message| message.id == id)
    }

    pub(crate) fn get_mut(&mut self, id: MessageId) -> Option<&mut Message> {
        self.messages.iter_mut().rev().find(|message| message.id == id)
    }

    #[must_use]
    pub fn streaming_count(&self) -> usize {
        self.messages.iter().filter(|m| m.is_streaming).count()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.messages.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ids_survive_reset() {
        let mut transcript = Transcript::new();
        let first = transcript.push_user("hi", Vec::new());
        let reply = transcript.push_assistant_placeholder();
        transcript.reset();
        assert!(transcript.is_empty());
        assert!(transcript.get(reply).is_none());

        let next = transcript.push_user("again", Vec::new());
        assert!(next > reply);
        assert!(reply > first);
    }

    #[test]
    fn test_placeholder_is_streaming_and_empty() {
        let mut transcript = Transcript::new();
        let id = transcript.push_assistant_placeholder();
        let message = transcript.get(id).unwrap();
        assert!(message.is_streaming);
        assert!(message.content.is_empty());
        assert_eq!(message.role, Role::Assistant);
        assert_eq!(transcript.streaming_count(), 1);
    }

    #[test]
    fn test_user_message_keeps_attachments() {
        let mut transcript = Transcript::new();
        let attachment = Attachment::from_url("https://cdn.example.com/img/photo.png");
        assert_eq!(attachment.name, "photo.png");
        let id = transcript.push_user("look", vec![attachment.clone()]);
        let message = transcript.get(id).unwrap();
        assert_eq!(message.attachments, vec![attachment]);
        assert!(!message.is_streaming);
    }
}
