//! Persistence collaborator for sessions and exchanged messages.
use async_trait::async_trait;
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

use crate::error::ChatError;
use crate::util::unix_now_millis;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredSession {
    pub id: String,
    /// Routing label the session was opened under, e.g. a thread subject.
    pub label: Option<String>,
    pub title: Option<String>,
    pub created_at: u64,
}

/// One completed exchange to persist.
#[derive(Debug, Clone, PartialEq)]
pub struct NewMessage {
    pub session_id: String,
    pub question: String,
    pub request_payload: serde_json::Value,
    pub response_payload: serde_json::Value,
    pub final_text: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StoredMessage {
    pub id: i64,
    pub session_id: String,
    pub question: String,
    pub request_payload: serde_json::Value,
    pub response_payload: serde_json::Value,
    pub final_text: String,
    pub created_at: u64,
}

/// A stored session as shown in a session list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSummary {
    pub id: String,
    pub label: Option<String>,
    pub title: Option<String>,
    pub created_at: u64,
    pub message_count: usize,
}

impl SessionSummary {
    /// The title, or `Session 000042` style when the session has none.
    #[must_use]
    pub fn display_name(&self) -> String {
        match self.title.as_deref().map(str::trim) {
            Some(title) if !title.is_empty() => title.to_string(),
            _ => format!("Session {:0>6}", self.id),
        }
    }

    /// Coarse age such as `about 5 hours ago`.
    #[must_use]
    pub fn age(&self) -> String {
        self.age_at(unix_now_millis())
    }

    fn age_at(&self, now_ms: u64) -> String {
        let hours = now_ms.saturating_sub(self.created_at) / 3_600_000;
        match hours {
            0 => "less than an hour ago".to_string(),
            1..=23 => format!("about {hours} hours ago"),
            _ => format!("about {} days ago", hours / 24),
        }
    }
}

/// A user's rating of one stored answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeedbackKind {
    Helpful,
    NeedsImprovement,
}

impl FeedbackKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            FeedbackKind::Helpful => "helpful",
            FeedbackKind::NeedsImprovement => "needs_improvement",
        }
    }
}

impl FromStr for FeedbackKind {
    type Err = ChatError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "helpful" | "up" | "+" => Ok(FeedbackKind::Helpful),
            "needs_improvement" | "down" | "-" => Ok(FeedbackKind::NeedsImprovement),
            other => Err(ChatError::InvalidRequest(format!(
                "unknown feedback kind: {other}"
            ))),
        }
    }
}

/// Storage for sessions and their message history.
///
/// Callers on the exchange path treat every error as non-fatal.
#[async_trait]
pub trait ChatStore: Send + Sync {
    /// Conditionally insert a session. Returns `false` when a session with
    /// `id` already existed; never overwrites it.
    async fn create_session_if_absent(
        &self,
        id: &str,
        label: Option<&str>,
    ) -> Result<bool, ChatError>;

    /// Append a message and return its record id.
    async fn append_message(&self, message: NewMessage) -> Result<i64, ChatError>;

    async fn update_session_title(&self, id: &str, title: &str) -> Result<(), ChatError>;

    async fn load_session(&self, id: &str) -> Result<Option<StoredSession>, ChatError>;

    /// Messages of a session, oldest first.
    async fn load_messages(&self, session_id: &str) -> Result<Vec<StoredMessage>, ChatError>;

    /// Every session, newest first, with its message count.
    async fn list_sessions(&self) -> Result<Vec<SessionSummary>, ChatError>;

    /// Record `user_id`'s rating of stored message `message_id`, replacing
    /// an earlier rating by the same user. Returns `true` when the rating
    /// is new.
    async fn set_feedback(
        &self,
        message_id: i64,
        user_id: &str,
        kind: FeedbackKind,
    ) -> Result<bool, ChatError>;

    async fn load_feedback(
        &self,
        message_id: i64,
        user_id: &str,
    ) -> Result<Option<FeedbackKind>, ChatError>;
}

#[derive(Debug, Default)]
struct MemoryState {
    sessions: FxHashMap<String, StoredSession>,
    /// Session ids in creation order.
    session_order: Vec<String>,
    messages: Vec<StoredMessage>,
    feedback: FxHashMap<(i64, String), FeedbackKind>,
    next_message_id: i64,
}

/// In-process store. Conversations are lost on exit.
#[derive(Debug, Default)]
pub struct MemoryChatStore {
    state: Mutex<MemoryState>,
}

impl MemoryChatStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn session_count(&self) -> usize {
        self.state.lock().sessions.len()
    }
}

#[async_trait]
impl ChatStore for MemoryChatStore {
    async fn create_session_if_absent(
        &self,
        id: &str,
        label: Option<&str>,
    ) -> Result<bool, ChatError> {
        let mut state = self.state.lock();
        if state.sessions.contains_key(id) {
            return Ok(false);
        }
        state.sessions.insert(
            id.to_string(),
            StoredSession {
                id: id.to_string(),
                label: label.map(str::to_string),
                title: None,
                created_at: unix_now_millis(),
            },
        );
        state.session_order.push(id.to_string());
        Ok(true)
    }

    async fn append_message(&self, message: NewMessage) -> Result<i64, ChatError> {
        let mut state = self.state.lock();
        if !state.sessions.contains_key(&message.session_id) {
            return Err(ChatError::Persistence(format!(
                "unknown session {}",
                message.session_id
            )));
        }
        state.next_message_id += 1;
        let id = state.next_message_id;
        state.messages.push(StoredMessage {
            id,
            session_id: message.session_id,
            question: message.question,
            request_payload: message.request_payload,
            response_payload: message.response_payload,
            final_text: message.final_text,
            created_at: unix_now_millis(),
        });
        Ok(id)
    }

    async fn update_session_title(&self, id: &str, title: &str) -> Result<(), ChatError> {
        let mut state = self.state.lock();
        let session = state
            .sessions
            .get_mut(id)
            .ok_or_else(|| ChatError::Persistence(format!("unknown session {id}")))?;
        session.title = Some(title.to_string());
        Ok(())
    }

    async fn load_session(&self, id: &str) -> Result<Option<StoredSession>, ChatError> {
        Ok(self.state.lock().sessions.get(id).cloned())
    }

    async fn load_messages(&self, session_id: &str) -> Result<Vec<StoredMessage>, ChatError> {
        Ok(self
            .state
            .lock()
            .messages
            .iter()
            .filter(|message| message.session_id == session_id)
            .cloned()
            .collect())
    }

    async fn list_sessions(&self) -> Result<Vec<SessionSummary>, ChatError> {
        let state = self.state.lock();
        let mut counts: FxHashMap<&str, usize> = FxHashMap::default();
        for message in &state.messages {
            *counts.entry(message.session_id.as_str()).or_default() += 1;
        }
        let mut sessions: Vec<SessionSummary> = state
            .session_order
            .iter()
            .rev()
            .filter_map(|id| state.sessions.get(id))
            .map(|session| SessionSummary {
                id: session.id.clone(),
                label: session.label.clone(),
                title: session.title.clone(),
                created_at: session.created_at,
                message_count: counts.get(session.id.as_str()).copied().unwrap_or_default(),
            })
            .collect();
        // stable: equal timestamps keep newest-created first
        sessions.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(sessions)
    }

    async fn set_feedback(
        &self,
        message_id: i64,
        user_id: &str,
        kind: FeedbackKind,
    ) -> Result<bool, ChatError> {
        let mut state = self.state.lock();
        if !state.messages.iter().any(|message| message.id == message_id) {
            return Err(ChatError::Persistence(format!(
                "unknown message {message_id}"
            )));
        }
        Ok(state
            .feedback
            .insert((message_id, user_id.to_string()), kind)
            .is_none())
    }

    async fn load_feedback(
        &self,
        message_id: i64,
        user_id: &str,
    ) -> Result<Option<FeedbackKind>, ChatError> {
        Ok(self
            .state
            .lock()
            .feedback
            .get(&(message_id, user_id.to_string()))
            .copied())
    }
}
