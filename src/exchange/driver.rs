use std::time::Duration;

use futures_util::StreamExt;
use serde_json::Value;
use tokio::time::{sleep, sleep_until, Instant};
use tokio_util::sync::CancellationToken;

use crate::error::{failure_notice, ChatError, FailureContext, TimeoutCause};
use crate::observability::log_exchange_complete;
use crate::protocol::canonical::{CanonicalUpdate, CanonicalUpdates, TextMode};
use crate::protocol::decode_chunk_into;
use crate::protocol::envelope::{
    extract_buffered_response, synthesize_typing, GENERIC_ACKNOWLEDGEMENT,
};
use crate::session::ChatStore;
use crate::stream::{chunk_stream, DropCounter};
use crate::transcript::{reducer, Message, MessageId};
use crate::transport::{HttpTransport, ResponseBody};

use super::{Conversation, Exchange, ExchangeOutcome, ExchangeReport};

const FAR_FUTURE: Duration = Duration::from_secs(86_400 * 365);

/// Raw material persisted alongside the final text.
struct Delivered {
    response_payload: Value,
    streamed: bool,
}

/// Await `fut` unless the exchange is cancelled or its deadline passes.
async fn guarded<T>(
    cancel: &CancellationToken,
    deadline: Instant,
    fut: impl std::future::Future<Output = T>,
) -> Result<T, ChatError> {
    tokio::select! {
        biased;
        () = cancel.cancelled() => Err(ChatError::Timeout(TimeoutCause::Cancelled)),
        () = sleep_until(deadline) => Err(ChatError::Timeout(TimeoutCause::Elapsed)),
        value = fut => Ok(value),
    }
}

impl<S: ChatStore> Conversation<S> {
    /// Drive `exchange` to a terminal message.
    pub async fn run(&mut self, exchange: Exchange, transport: &HttpTransport) -> ExchangeReport {
        self.run_with(exchange, transport, |_| {}).await
    }

    /// Like [`Conversation::run`], calling `on_change` with the target
    /// message after every update that changed it.
    pub async fn run_with<F>(
        &mut self,
        mut exchange: Exchange,
        transport: &HttpTransport,
        mut on_change: F,
    ) -> ExchangeReport
    where
        F: FnMut(&Message),
    {
        let target = exchange.target;
        let started = exchange.timer.started_at();
        let deadline = started
            .checked_add(exchange.api.timeout())
            .unwrap_or_else(|| started + FAR_FUTURE);
        let dropped = DropCounter::new();

        let result = self
            .deliver(&exchange, transport, deadline, &dropped, &mut on_change)
            .await;

        let mut report = ExchangeReport {
            id: exchange.id,
            target,
            outcome: ExchangeOutcome::Completed,
            final_text: None,
            elapsed: exchange.timer.stop(),
            streamed: false,
            dropped_chunks: dropped.get(),
            used_resource_units: None,
            notification: None,
            record_id: None,
        };

        match result {
            Ok(delivered) => {
                report.streamed = delivered.streamed;
                report.final_text = reducer::finalize(&mut self.transcript, target);
                self.notify(target, &mut on_change);
                if let Some(final_text) = &report.final_text {
                    report.record_id = self
                        .reconciler
                        .record_exchange(
                            &exchange.question,
                            exchange.request.payload.clone(),
                            delivered.response_payload,
                            final_text,
                        )
                        .await;
                }
            }
            Err(err) => {
                if matches!(err, ChatError::Timeout(TimeoutCause::Elapsed)) {
                    exchange.cancel.cancel();
                }
                let notice = failure_notice(
                    &err,
                    FailureContext {
                        endpoint: &exchange.request.endpoint,
                        had_attachments: exchange.had_attachments,
                    },
                );
                tracing::warn!(
                    exchange_id = exchange.id,
                    %target,
                    error = %err,
                    category = ?err.category(),
                    "exchange failed"
                );
                report.outcome = match &err {
                    ChatError::Timeout(TimeoutCause::Cancelled) => ExchangeOutcome::Cancelled,
                    _ => ExchangeOutcome::Failed(err.category()),
                };
                report.notification = Some(notice.notification);
                self.apply_update(
                    target,
                    &CanonicalUpdate::Failed {
                        notice: notice.message,
                    },
                    &mut on_change,
                )
                .await;
            }
        }

        report.used_resource_units = self
            .transcript
            .get(target)
            .and_then(|message| message.used_resource_units);
        self.forget(exchange.id);
        log_exchange_complete(&report);
        report
    }

    async fn deliver<F>(
        &mut self,
        exchange: &Exchange,
        transport: &HttpTransport,
        deadline: Instant,
        dropped: &DropCounter,
        on_change: &mut F,
    ) -> Result<Delivered, ChatError>
    where
        F: FnMut(&Message),
    {
        let family = exchange.api.provider_family();
        let response = guarded(
            &exchange.cancel,
            deadline,
            transport.send(&exchange.request, exchange.api.response_mode, family),
        )
        .await??;
        tracing::debug!(
            exchange_id = exchange.id,
            status = response.status,
            "response headers received"
        );

        match response.body {
            ResponseBody::Stream(bytes) => {
                let mut chunks = std::pin::pin!(chunk_stream(bytes, dropped.clone()));
                let mut raw_chunks = Vec::new();
                let mut updates = CanonicalUpdates::new();
                'read: while let Some(chunk) =
                    guarded(&exchange.cancel, deadline, chunks.next()).await?
                {
                    let chunk = chunk?;
                    updates.clear();
                    decode_chunk_into(family, &chunk, &mut updates);
                    raw_chunks.push(chunk);
                    for update in &updates {
                        if matches!(update, CanonicalUpdate::StreamEnd) {
                            // finalize() runs the cleaner before ending
                            break 'read;
                        }
                        self.apply_update(exchange.target, update, on_change).await;
                    }
                }
                let silent = self
                    .transcript
                    .get(exchange.target)
                    .is_some_and(|message| message.content.trim().is_empty());
                if silent {
                    tracing::debug!(
                        exchange_id = exchange.id,
                        chunks = raw_chunks.len(),
                        dropped_chunks = dropped.get(),
                        "stream carried no text, using the generic acknowledgement"
                    );
                    self.apply_update(
                        exchange.target,
                        &CanonicalUpdate::replace(GENERIC_ACKNOWLEDGEMENT),
                        on_change,
                    )
                    .await;
                }
                Ok(Delivered {
                    response_payload: Value::Array(raw_chunks),
                    streamed: true,
                })
            }
            ResponseBody::Buffered(body) => {
                let extracted = extract_buffered_response(&body);
                if extracted.matched_rule.is_none() {
                    tracing::debug!(
                        exchange_id = exchange.id,
                        "buffered response used the generic acknowledgement"
                    );
                }
                let delay = self.typing.delay();
                let mut first_word = true;
                for update in synthesize_typing(&extracted, self.typing) {
                    let is_word = matches!(
                        update,
                        CanonicalUpdate::TextDelta {
                            mode: TextMode::Append,
                            ..
                        }
                    );
                    if is_word && !first_word {
                        if let Some(delay) = delay {
                            guarded(&exchange.cancel, deadline, sleep(delay)).await?;
                        }
                    }
                    first_word &= !is_word;
                    self.apply_update(exchange.target, &update, on_change).await;
                }
                let response_payload =
                    serde_json::from_str(&body).unwrap_or(Value::String(body));
                Ok(Delivered {
                    response_payload,
                    streamed: false,
                })
            }
        }
    }

    /// Route one update to the reconciler (session events) and the reducer.
    async fn apply_update<F>(&mut self, target: MessageId, update: &CanonicalUpdate, on_change: &mut F)
    where
        F: FnMut(&Message),
    {
        if let CanonicalUpdate::Session { id, title } = update {
            self.reconciler.observe_session(id, title.as_deref()).await;
        }
        if reducer::apply(&mut self.transcript, target, update) {
            self.notify(target, on_change);
        }
    }

    fn notify<F>(&self, target: MessageId, on_change: &mut F)
    where
        F: FnMut(&Message),
    {
        if let Some(message) = self.transcript.get(target) {
            on_change(message);
        }
    }
}
