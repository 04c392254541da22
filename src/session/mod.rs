//! Binds the local conversation to the session id the server issues.
pub mod sqlite;
pub mod store;

pub use sqlite::SqliteChatStore;
pub use store::{
    ChatStore, FeedbackKind, MemoryChatStore, NewMessage, SessionSummary, StoredMessage,
    StoredSession,
};

use std::sync::Arc;

use crate::protocol::canonical::ServerId;
use crate::util::generate_local_id;

/// Tracks which server session the conversation belongs to and mirrors it
/// into the store. Store failures are logged and never returned.
pub struct SessionReconciler<S: ChatStore> {
    store: Arc<S>,
    provisional_id: String,
    bound: Option<ServerId>,
    stored_title: Option<String>,
    label: Option<String>,
}

impl<S: ChatStore> SessionReconciler<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self {
            store,
            provisional_id: generate_local_id("session"),
            bound: None,
            stored_title: None,
            label: None,
        }
    }

    #[must_use]
    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// Label recorded on sessions this reconciler creates.
    pub fn set_label(&mut self, label: Option<&str>) {
        self.label = label.map(str::to_string);
    }

    /// Local id used in payloads until the server assigns one.
    #[must_use]
    pub fn provisional_id(&self) -> &str {
        &self.provisional_id
    }

    /// Server session subsequent requests are bound to.
    #[must_use]
    pub fn bound_session(&self) -> Option<&ServerId> {
        self.bound.as_ref()
    }

    /// Id the next exchange should be persisted under.
    #[must_use]
    pub fn effective_session_id(&self) -> &str {
        self.bound
            .as_ref()
            .map_or(self.provisional_id.as_str(), ServerId::as_str)
    }

    /// Forget the current binding and start a fresh provisional session.
    pub fn reset(&mut self) {
        self.provisional_id = generate_local_id("session");
        self.bound = None;
        self.stored_title = None;
    }

    /// Bind to an existing session, e.g. when resuming stored history.
    pub fn bind(&mut self, id: ServerId, title: Option<String>) {
        self.bound = Some(id);
        self.stored_title = title;
    }

    /// Handle a session event seen in a stream.
    ///
    /// The first id seen while unbound creates the session (conditional
    /// insert) and binds to it. The first non-empty title is written once
    /// per bound session; later titles are ignored.
    pub async fn observe_session(&mut self, id: &ServerId, title: Option<&str>) {
        if let Some(bound) = self.bound.as_ref().filter(|bound| *bound != id) {
            tracing::debug!(
                bound = %bound,
                observed = %id,
                "ignoring session event for a different session"
            );
            return;
        }
        if self.bound.is_none() {
            match self
                .store
                .create_session_if_absent(id.as_str(), self.label.as_deref())
                .await
            {
                Ok(created) => {
                    tracing::debug!(session_id = %id, created, "bound server session");
                }
                Err(err) => {
                    tracing::warn!(session_id = %id, error = %err, "failed to persist session");
                }
            }
            self.bound = Some(id.clone());
        }

        let Some(title) = title.map(str::trim).filter(|title| !title.is_empty()) else {
            return;
        };
        if self.stored_title.is_some() {
            return;
        }
        match self.store.update_session_title(id.as_str(), title).await {
            Ok(()) => tracing::debug!(session_id = %id, title, "stored session title"),
            Err(err) => {
                tracing::warn!(session_id = %id, error = %err, "failed to store session title");
            }
        }
        // Recorded even on failure so a flaky store is not retried per event.
        self.stored_title = Some(title.to_string());
    }

    /// Persist a completed exchange under the effective session. Returns the
    /// record id when the store accepted it.
    pub async fn record_exchange(
        &mut self,
        question: &str,
        request_payload: serde_json::Value,
        response_payload: serde_json::Value,
        final_text: &str,
    ) -> Option<i64> {
        let session_id = self.effective_session_id().to_string();
        if self.bound.is_none() {
            // No server session: the provisional id is the session.
            if let Err(err) = self
                .store
                .create_session_if_absent(&session_id, self.label.as_deref())
                .await
            {
                tracing::warn!(session_id = %session_id, error = %err, "failed to persist session");
            }
        }
        let message = NewMessage {
            session_id: session_id.clone(),
            question: question.to_string(),
            request_payload,
            response_payload,
            final_text: final_text.to_string(),
        };
        match self.store.append_message(message).await {
            Ok(record_id) => Some(record_id),
            Err(err) => {
                tracing::warn!(session_id = %session_id, error = %err, "failed to persist message");
                None
            }
        }
    }
}
