//! One user submission through to a terminal assistant message.
//!
//! [`Conversation::submit`] stages an [`Exchange`]; [`Conversation::run`]
//! drives it: transport, chunk parser, normalizer, then reducer and
//! session reconciler, strictly in arrival order.
mod driver;
mod timer;

pub use timer::ExchangeTimer;

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::config::{ApiConfig, AppConfig, RequesterConfig};
use crate::error::{ChatError, ErrorCategory, Notification};
use crate::protocol::canonical::{CanonicalUpdate, ServerId};
use crate::protocol::envelope::TypingEffect;
use crate::protocol::request::{build_request, OutboundRequest, RequestContext};
use crate::session::{ChatStore, FeedbackKind, SessionReconciler, SessionSummary};
use crate::transcript::{reducer, Attachment, MessageId, Role, Transcript};
use crate::util::unix_now_millis;

/// Cloneable control surface for an exchange.
#[derive(Debug, Clone)]
pub struct ExchangeHandle {
    id: u64,
    target: MessageId,
    cancel: CancellationToken,
}

impl ExchangeHandle {
    /// Abort the exchange. Its message ends in an error state.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    #[must_use]
    pub fn target(&self) -> MessageId {
        self.target
    }

    #[must_use]
    pub fn id(&self) -> u64 {
        self.id
    }
}

/// A submitted request waiting to be run.
#[derive(Debug)]
pub struct Exchange {
    id: u64,
    target: MessageId,
    question: String,
    had_attachments: bool,
    /// Snapshot taken at submit; later config edits do not reach it.
    api: ApiConfig,
    request: OutboundRequest,
    cancel: CancellationToken,
    timer: ExchangeTimer,
}

impl Exchange {
    #[must_use]
    pub fn handle(&self) -> ExchangeHandle {
        ExchangeHandle {
            id: self.id,
            target: self.target,
            cancel: self.cancel.clone(),
        }
    }

    #[must_use]
    pub fn id(&self) -> u64 {
        self.id
    }

    #[must_use]
    pub fn target(&self) -> MessageId {
        self.target
    }

    #[must_use]
    pub fn api(&self) -> &ApiConfig {
        &self.api
    }

    #[must_use]
    pub fn request(&self) -> &OutboundRequest {
        &self.request
    }

    #[must_use]
    pub fn timer(&self) -> &ExchangeTimer {
        &self.timer
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExchangeOutcome {
    Completed,
    Cancelled,
    Failed(ErrorCategory),
}

/// Summary of a finished exchange.
#[derive(Debug, Clone)]
pub struct ExchangeReport {
    pub id: u64,
    pub target: MessageId,
    pub outcome: ExchangeOutcome,
    /// Cleaned content on success; `None` on failure or when the message
    /// was dropped by a transcript reset.
    pub final_text: Option<String>,
    pub elapsed: Duration,
    pub streamed: bool,
    pub dropped_chunks: u64,
    pub used_resource_units: Option<f64>,
    pub notification: Option<Notification>,
    pub record_id: Option<i64>,
}

/// Transcript plus the session it belongs to.
pub struct Conversation<S: ChatStore> {
    transcript: Transcript,
    reconciler: SessionReconciler<S>,
    requester: RequesterConfig,
    typing: TypingEffect,
    in_flight: Vec<ExchangeHandle>,
    next_exchange_id: u64,
}

impl<S: ChatStore> Conversation<S> {
    pub fn new(store: Arc<S>, requester: RequesterConfig, typing: TypingEffect) -> Self {
        Self {
            transcript: Transcript::new(),
            reconciler: SessionReconciler::new(store),
            requester,
            typing,
            in_flight: Vec::new(),
            next_exchange_id: 0,
        }
    }

    pub fn from_config(store: Arc<S>, config: &AppConfig) -> Self {
        Self::new(
            store,
            config.requester.clone(),
            TypingEffect::from_features(
                config.features.typing_effect,
                config.features.typing_delay_ms,
            ),
        )
    }

    #[must_use]
    pub fn transcript(&self) -> &Transcript {
        &self.transcript
    }

    #[must_use]
    pub fn reconciler(&self) -> &SessionReconciler<S> {
        &self.reconciler
    }

    #[must_use]
    pub fn in_flight(&self) -> &[ExchangeHandle] {
        &self.in_flight
    }

    /// Stage one exchange: record the user message, open a streaming
    /// assistant message and build the provider payload. `pending` is
    /// drained into the user message.
    ///
    /// # Errors
    ///
    /// [`ChatError::InvalidRequest`] when there is neither text nor an
    /// attachment. Payload build failures are returned after the assistant
    /// message has been terminated with a notice.
    pub fn submit(
        &mut self,
        text: &str,
        pending: &mut Vec<Attachment>,
        api: &ApiConfig,
    ) -> Result<Exchange, ChatError> {
        let question = text.trim();
        if question.is_empty() && pending.is_empty() {
            return Err(ChatError::InvalidRequest(
                "message has no text and no attachments".to_string(),
            ));
        }

        let attachments = std::mem::take(pending);
        let attachment_urls: Vec<String> = attachments.iter().map(|a| a.url.clone()).collect();
        let user_id = self.transcript.push_user(question, attachments);
        let target = self.transcript.push_assistant_placeholder();
        self.reconciler.set_label(api.routing_label());

        let message_id = user_id.to_string();
        let ctx = RequestContext {
            question,
            attachment_urls: &attachment_urls,
            message_id: &message_id,
            server_session_id: self.reconciler.bound_session().map(ServerId::as_str),
            provisional_session_id: self.reconciler.provisional_id(),
            timestamp_ms: unix_now_millis(),
        };
        let request = match build_request(api, &self.requester, &ctx) {
            Ok(request) => request,
            Err(err) => {
                tracing::warn!(error = %err, %target, "failed to build chat request");
                reducer::apply(
                    &mut self.transcript,
                    target,
                    &CanonicalUpdate::Failed {
                        notice: err.to_string(),
                    },
                );
                return Err(err);
            }
        };

        self.next_exchange_id += 1;
        let exchange = Exchange {
            id: self.next_exchange_id,
            target,
            question: question.to_string(),
            had_attachments: !attachment_urls.is_empty(),
            api: api.clone(),
            request,
            cancel: CancellationToken::new(),
            timer: ExchangeTimer::start(),
        };
        self.in_flight.push(exchange.handle());
        tracing::debug!(
            exchange_id = exchange.id,
            %target,
            mode = %api.mode,
            attachments = attachment_urls.len(),
            "exchange submitted"
        );
        Ok(exchange)
    }

    /// Cancel every unresolved exchange and start an empty transcript with
    /// a fresh provisional session.
    pub fn new_chat(&mut self) {
        for handle in self.in_flight.drain(..) {
            handle.cancel();
        }
        self.transcript.reset();
        self.reconciler.reset();
    }

    /// Replace the transcript with the stored history of `session_id` and
    /// bind later requests to it. Returns the number of exchanges restored.
    ///
    /// # Errors
    ///
    /// [`ChatError::Persistence`] when the history cannot be loaded.
    pub async fn resume(&mut self, session_id: &str) -> Result<usize, ChatError> {
        let store = self.reconciler.store().clone();
        let messages = store.load_messages(session_id).await?;
        let session = store.load_session(session_id).await?;

        self.new_chat();
        for message in &messages {
            self.transcript.push_restored(Role::User, message.question.as_str());
            self.transcript
                .push_restored(Role::Assistant, message.final_text.as_str());
        }
        self.reconciler
            .bind(ServerId::new(session_id), session.and_then(|s| s.title));
        tracing::info!(session_id, restored = messages.len(), "resumed session");
        Ok(messages.len())
    }

    /// Stored sessions, newest first.
    ///
    /// # Errors
    ///
    /// [`ChatError::Persistence`] when the store cannot be read.
    pub async fn sessions(&self) -> Result<Vec<SessionSummary>, ChatError> {
        self.reconciler.store().list_sessions().await
    }

    /// Rate a stored answer as the configured requester. Rating again
    /// replaces the earlier rating; returns `true` for a first rating.
    ///
    /// # Errors
    ///
    /// [`ChatError::Persistence`] when the record is unknown or the store
    /// fails.
    pub async fn rate(&self, record_id: i64, kind: FeedbackKind) -> Result<bool, ChatError> {
        let created = self
            .reconciler
            .store()
            .set_feedback(record_id, &self.requester.user_id, kind)
            .await?;
        tracing::debug!(record_id, feedback = kind.as_str(), created, "stored feedback");
        Ok(created)
    }

    fn forget(&mut self, exchange_id: u64) {
        self.in_flight.retain(|handle| handle.id != exchange_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ApiMode;
    use crate::session::MemoryChatStore;

    fn conversation() -> Conversation<MemoryChatStore> {
        Conversation::new(
            Arc::new(MemoryChatStore::new()),
            RequesterConfig::default(),
            TypingEffect::Disabled,
        )
    }

    fn api() -> ApiConfig {
        ApiConfig {
            workflow_url: "http://127.0.0.1:9/hook".to_string(),
            ..ApiConfig::default()
        }
    }

    #[test]
    fn test_submit_rejects_empty_message() {
        let mut conversation = conversation();
        let err = conversation
            .submit("   ", &mut Vec::new(), &api())
            .unwrap_err();
        assert!(matches!(err, ChatError::InvalidRequest(_)));
        assert!(conversation.transcript().is_empty());
    }

    #[test]
    fn test_submit_drains_pending_and_opens_streaming_message() {
        let mut conversation = conversation();
        let mut pending = vec![Attachment::from_url("https://cdn.example.com/a.png")];
        let exchange = conversation.submit("", &mut pending, &api()).unwrap();
        assert!(pending.is_empty());

        let messages = conversation.transcript().messages();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].attachments.len(), 1);
        assert!(messages[1].is_streaming);
        assert_eq!(exchange.target(), messages[1].id);
        assert_eq!(
            exchange.request().payload["attachments"][0]["file_url"],
            "https://cdn.example.com/a.png"
        );
        assert_eq!(conversation.in_flight().len(), 1);
    }

    #[test]
    fn test_config_snapshot_is_isolated() {
        let mut conversation = conversation();
        let mut config = api();
        let exchange = conversation
            .submit("hi", &mut Vec::new(), &config)
            .unwrap();
        config.mode = ApiMode::Remote;
        config.workflow_url = "http://127.0.0.1:9/other".to_string();
        assert_eq!(exchange.api().mode, ApiMode::Workflow);
        assert_eq!(exchange.request().endpoint, "http://127.0.0.1:9/hook");
    }

    #[test]
    fn test_new_chat_cancels_in_flight() {
        let mut conversation = conversation();
        let exchange = conversation
            .submit("hi", &mut Vec::new(), &api())
            .unwrap();
        let handle = exchange.handle();
        let old_provisional = conversation.reconciler().provisional_id().to_string();

        conversation.new_chat();
        assert!(handle.is_cancelled());
        assert!(conversation.transcript().is_empty());
        assert!(conversation.in_flight().is_empty());
        assert_ne!(conversation.reconciler().provisional_id(), old_provisional);
    }

    #[tokio::test]
    async fn test_rate_uses_requester_identity() {
        let store = Arc::new(MemoryChatStore::new());
        let mut conversation = Conversation::new(
            store.clone(),
            RequesterConfig {
                user_id: "u-9".to_string(),
                ..RequesterConfig::default()
            },
            TypingEffect::Disabled,
        );
        let record = conversation
            .reconciler
            .record_exchange("q", serde_json::json!({}), serde_json::json!({}), "a")
            .await
            .unwrap();

        assert!(conversation.rate(record, FeedbackKind::Helpful).await.unwrap());
        assert!(!conversation
            .rate(record, FeedbackKind::NeedsImprovement)
            .await
            .unwrap());
        assert_eq!(
            store.load_feedback(record, "u-9").await.unwrap(),
            Some(FeedbackKind::NeedsImprovement)
        );
        assert!(conversation.rate(record + 1, FeedbackKind::Helpful).await.is_err());

        let sessions = conversation.sessions().await.unwrap();
        assert_eq!(sessions.len(), 1);
        assert_eq!(sessions[0].id, conversation.reconciler().provisional_id());
        assert_eq!(sessions[0].message_count, 1);
    }

    #[test]
    fn test_bad_token_terminates_placeholder() {
        let mut conversation = conversation();
        let config = ApiConfig {
            mode: ApiMode::Remote,
            authorization_token: "bad\ntoken".to_string(),
            ..ApiConfig::default()
        };
        let err = conversation
            .submit("hi", &mut Vec::new(), &config)
            .unwrap_err();
        assert!(matches!(err, ChatError::Config(_)));
        assert_eq!(conversation.transcript().streaming_count(), 0);
    }
}
