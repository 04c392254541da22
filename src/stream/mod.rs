//! Chunk parser: raw response bytes to decoded JSON chunks.
//!
//! Handles newline-delimited JSON, SSE-style `data:` lines and any mix of
//! the two. Malformed lines are counted and dropped, never raised.
pub mod lines;

pub use lines::{extract_data_payload, LineBuffer, DONE_SENTINEL};

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use futures_util::Stream;
use serde_json::Value;

use crate::error::ChatError;

/// Shared count of dropped malformed chunks for one exchange.
#[derive(Debug, Clone, Default)]
pub struct DropCounter(Arc<AtomicU64>);

impl DropCounter {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self) {
        self.0.fetch_add(1, Ordering::Relaxed);
    }

    #[must_use]
    pub fn get(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }
}

/// Incremental line-to-JSON parser. Single use: the buffer lives as long as
/// one response stream.
#[derive(Debug, Default)]
pub struct ChunkParser {
    lines: LineBuffer,
    dropped: DropCounter,
}

impl ChunkParser {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_counter(dropped: DropCounter) -> Self {
        Self {
            lines: LineBuffer::new(),
            dropped,
        }
    }

    /// Feed decoded text and return the chunks it completes.
    pub fn feed(&mut self, text: &str) -> Vec<Value> {
        let mut out = Vec::new();
        self.feed_into(text, &mut out);
        out
    }

    /// Feed decoded text and append completed chunks to `out`.
    pub fn feed_into(&mut self, text: &str, out: &mut impl Extend<Value>) {
        let dropped = &self.dropped;
        self.lines.feed(text, |line| {
            if let Some(chunk) = parse_line(line, dropped) {
                out.extend(std::iter::once(chunk));
            }
        });
    }

    /// One last decode attempt on the held-back partial line.
    pub fn finish(&mut self) -> Option<Value> {
        let partial = self.lines.take_partial()?;
        parse_line(&partial, &self.dropped)
    }

    #[must_use]
    pub fn dropped(&self) -> u64 {
        self.dropped.get()
    }
}

fn parse_line(line: &str, dropped: &DropCounter) -> Option<Value> {
    let payload = extract_data_payload(line)?;
    match serde_json::from_str::<Value>(payload) {
        Ok(chunk) => Some(chunk),
        Err(err) => {
            dropped.record();
            tracing::warn!(
                error = %err,
                payload_len = payload.len(),
                dropped_chunks = dropped.get(),
                "dropping malformed stream chunk"
            );
            None
        }
    }
}

/// Append `bytes` to the UTF-8 carry buffer and move every complete
/// character sequence into `text`. Invalid sequences become U+FFFD; an
/// incomplete trailing sequence stays in `remainder` for the next read.
fn decode_utf8_into(remainder: &mut Vec<u8>, bytes: &[u8], text: &mut String) {
    remainder.extend_from_slice(bytes);
    loop {
        match std::str::from_utf8(remainder) {
            Ok(valid) => {
                text.push_str(valid);
                remainder.clear();
                return;
            }
            Err(err) => {
                let valid_up_to = err.valid_up_to();
                text.push_str(&String::from_utf8_lossy(&remainder[..valid_up_to]));
                match err.error_len() {
                    Some(invalid_len) => {
                        text.push(char::REPLACEMENT_CHARACTER);
                        remainder.drain(..valid_up_to + invalid_len);
                    }
                    None => {
                        remainder.drain(..valid_up_to);
                        return;
                    }
                }
            }
        }
    }
}

struct ChunkStreamState<S> {
    stream: std::pin::Pin<Box<S>>,
    parser: ChunkParser,
    remainder: Vec<u8>,
    text: String,
    pending: VecDeque<Value>,
    finished: bool,
}

/// Turn a response byte stream into a lazily produced stream of decoded
/// chunks, in arrival order.
///
/// A transport error is yielded once and ends the stream. Dropped malformed
/// lines are recorded on `dropped`.
pub fn chunk_stream<S>(
    byte_stream: S,
    dropped: DropCounter,
) -> impl Stream<Item = Result<Value, ChatError>> + Send
where
    S: Stream<Item = Result<Bytes, ChatError>> + Send + 'static,
{
    use futures_util::StreamExt;

    let state = ChunkStreamState {
        stream: Box::pin(byte_stream),
        parser: ChunkParser::with_counter(dropped),
        remainder: Vec::new(),
        text: String::new(),
        pending: VecDeque::with_capacity(8),
        finished: false,
    };

    futures_util::stream::unfold(state, |mut state| async move {
        loop {
            if let Some(chunk) = state.pending.pop_front() {
                return Some((Ok(chunk), state));
            }
            if state.finished {
                return None;
            }

            match state.stream.as_mut().next().await {
                Some(Ok(bytes)) => {
                    state.text.clear();
                    decode_utf8_into(&mut state.remainder, &bytes, &mut state.text);
                    state.parser.feed_into(&state.text, &mut state.pending);
                }
                Some(Err(err)) => {
                    state.finished = true;
                    state.pending.clear();
                    return Some((Err(err), state));
                }
                None => {
                    state.finished = true;
                    if !state.remainder.is_empty() {
                        let tail = String::from_utf8_lossy(&state.remainder).into_owned();
                        state.remainder.clear();
                        state.parser.feed_into(&tail, &mut state.pending);
                    }
                    if let Some(last) = state.parser.finish() {
                        state.pending.push_back(last);
                    }
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::StreamExt;
    use serde_json::json;

    fn byte_source(
        parts: Vec<&'static [u8]>,
    ) -> impl Stream<Item = Result<Bytes, ChatError>> + Send + 'static {
        futures_util::stream::iter(
            parts
                .into_iter()
                .map(|part| Ok::<_, ChatError>(Bytes::from_static(part))),
        )
    }

    async fn collect_ok(
        parts: Vec<&'static [u8]>,
        dropped: DropCounter,
    ) -> Vec<Value> {
        chunk_stream(byte_source(parts), dropped)
            .map(|item| item.unwrap())
            .collect()
            .await
    }

    #[test]
    fn test_parser_ndjson_and_sse_lines() {
        let mut parser = ChunkParser::new();
        let chunks = parser.feed("{\"a\":1}\ndata: {\"b\":2}\n\ndata:{\"c\":3}\ndata: [DONE]\n");
        assert_eq!(chunks, vec![json!({"a":1}), json!({"b":2}), json!({"c":3})]);
        assert_eq!(parser.dropped(), 0);
    }

    #[test]
    fn test_parser_counts_malformed_line() {
        let mut parser = ChunkParser::new();
        let chunks = parser.feed("{\"output\":\"a\"}\n{not json\n{\"output\":\"b\"}\n");
        assert_eq!(chunks, vec![json!({"output":"a"}), json!({"output":"b"})]);
        assert_eq!(parser.dropped(), 1);
    }

    #[test]
    fn test_parser_finish_flushes_tail() {
        let mut parser = ChunkParser::new();
        assert!(parser.feed("{\"event\":\"end\"}").is_empty());
        assert_eq!(parser.finish(), Some(json!({"event":"end"})));

        let mut parser = ChunkParser::new();
        let _ = parser.feed("{\"a\":1}\n{\"trunc");
        assert_eq!(parser.finish(), None);
        assert_eq!(parser.dropped(), 1);
    }

    #[tokio::test]
    async fn test_stream_chunks_split_across_reads() {
        let chunks = collect_ok(
            vec![&b"{\"event\":\"mess"[..], &b"age\",\"data\":{\"delta\":\"Hel\"}}\n{\"ev"[..], &b"ent\":\"end\"}\n"[..]],
            DropCounter::new(),
        )
        .await;
        assert_eq!(
            chunks,
            vec![
                json!({"event":"message","data":{"delta":"Hel"}}),
                json!({"event":"end"})
            ]
        );
    }

    #[tokio::test]
    async fn test_stream_malformed_between_valid() {
        let dropped = DropCounter::new();
        let chunks = collect_ok(
            vec![&b"{\"output\":\"Hel\"}\n"[..], &b"{\"output\":\n"[..], &b"{\"output\":\"Hello\"}\n"[..]],
            dropped.clone(),
        )
        .await;
        assert_eq!(chunks, vec![json!({"output":"Hel"}), json!({"output":"Hello"})]);
        assert_eq!(dropped.get(), 1);
    }

    #[tokio::test]
    async fn test_stream_multibyte_split() {
        // "আ" is E0 A6 86 in UTF-8; split it across two reads.
        let chunks = collect_ok(
            vec![&b"{\"content\":\"\xE0\xA6"[..], &b"\x86\"}\r\n"[..]],
            DropCounter::new(),
        )
        .await;
        assert_eq!(chunks, vec![json!({"content":"আ"})]);
    }

    #[tokio::test]
    async fn test_stream_flushes_final_partial_line() {
        let chunks = collect_ok(
            vec![&b"data: {\"text\":\"a\"}\n"[..], &b"{\"text\":\"b\"}"[..]],
            DropCounter::new(),
        )
        .await;
        assert_eq!(chunks, vec![json!({"text":"a"}), json!({"text":"b"})]);
    }

    #[tokio::test]
    async fn test_stream_error_ends_stream() {
        let source = futures_util::stream::iter(vec![
            Ok(Bytes::from_static(b"{\"a\":1}\n")),
            Err(ChatError::Network("connection reset".to_string())),
            Ok(Bytes::from_static(b"{\"b\":2}\n")),
        ]);
        let items: Vec<_> = chunk_stream(source, DropCounter::new()).collect().await;
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].as_ref().unwrap(), &json!({"a":1}));
        assert!(matches!(items[1], Err(ChatError::Network(_))));
    }

    #[test]
    fn test_invalid_utf8_replaced() {
        let mut remainder = Vec::new();
        let mut text = String::new();
        decode_utf8_into(&mut remainder, b"a\xFFb", &mut text);
        assert_eq!(text, "a\u{FFFD}b");
        assert!(remainder.is_empty());
    }
}
