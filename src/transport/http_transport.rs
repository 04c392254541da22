use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use futures_util::stream::BoxStream;
use futures_util::StreamExt;
use http::header::CONTENT_TYPE;
use http::HeaderMap;
use parking_lot::RwLock;
use rustc_hash::FxHashMap;

use crate::config::{ApiConfig, ResponseMode};
use crate::error::{ChatError, TimeoutCause};
use crate::protocol::canonical::ProviderFamily;
use crate::protocol::request::OutboundRequest;

const PARSED_ENDPOINT_CACHE_MAX_ENTRIES: usize = 64;
const ERROR_BODY_PREVIEW_CHARS: usize = 512;

/// Content types that are consumed incrementally in `auto` mode.
const STREAMING_CONTENT_TYPES: &[&str] = &[
    "text/event-stream",
    "application/x-ndjson",
    "application/ndjson",
    "application/jsonl",
    "application/x-jsonlines",
    "application/json-seq",
];

fn build_reqwest_client(timeout: Duration) -> Result<reqwest::Client, ChatError> {
    reqwest::Client::builder()
        .tcp_nodelay(true)
        .connect_timeout(Duration::from_secs(5))
        .redirect(reqwest::redirect::Policy::none())
        .timeout(timeout)
        .build()
        .map_err(|err| ChatError::Config(format!("Failed to build HTTP client: {err}")))
}

/// Response body, either still streaming or fully read.
pub enum ResponseBody {
    Stream(BoxStream<'static, Result<Bytes, ChatError>>),
    Buffered(String),
}

impl std::fmt::Debug for ResponseBody {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ResponseBody::Stream(_) => f.write_str("ResponseBody::Stream(..)"),
            ResponseBody::Buffered(body) => f
                .debug_tuple("ResponseBody::Buffered")
                .field(&body.len())
                .finish(),
        }
    }
}

/// A successful (2xx) response.
#[derive(Debug)]
pub struct TransportResponse {
    pub status: u16,
    pub headers: HeaderMap,
    pub body: ResponseBody,
}

/// Posts chat requests. One POST per exchange: chat submissions are not
/// idempotent, so nothing is retried here.
pub struct HttpTransport {
    client: reqwest::Client,
    parsed_url_cache: RwLock<FxHashMap<String, Arc<url::Url>>>,
}

impl HttpTransport {
    /// Create a transport whose requests are bounded by `timeout`.
    ///
    /// # Errors
    ///
    /// Returns [`ChatError::Config`] when the HTTP client cannot be built.
    pub fn new(timeout: Duration) -> Result<Self, ChatError> {
        Ok(Self {
            client: build_reqwest_client(timeout)?,
            parsed_url_cache: RwLock::new(FxHashMap::default()),
        })
    }

    /// Create a transport using the configured request timeout.
    ///
    /// # Errors
    ///
    /// Returns [`ChatError::Config`] when the HTTP client cannot be built.
    pub fn from_config(api: &ApiConfig) -> Result<Self, ChatError> {
        Self::new(api.timeout())
    }

    fn parsed_url(&self, url: &str) -> Result<Arc<url::Url>, ChatError> {
        if let Some(cached) = self.parsed_url_cache.read().get(url) {
            return Ok(cached.clone());
        }

        let parsed = url::Url::parse(url)
            .map_err(|e| ChatError::Config(format!("Invalid endpoint URL: {e}")))?;

        let mut cache = self.parsed_url_cache.write();
        if let Some(existing) = cache.get(url) {
            return Ok(existing.clone());
        }
        if cache.len() >= PARSED_ENDPOINT_CACHE_MAX_ENTRIES {
            cache.clear();
        }
        let parsed = Arc::new(parsed);
        cache.insert(url.to_string(), parsed.clone());
        Ok(parsed)
    }

    /// POST `request` and return its body as a stream or a buffered string.
    ///
    /// # Errors
    ///
    /// Returns [`ChatError::Transport`] on a non-2xx status,
    /// [`ChatError::Timeout`] when the client timeout elapses and
    /// [`ChatError::Network`] for any other failure to complete the request.
    pub async fn send(
        &self,
        request: &OutboundRequest,
        response_mode: ResponseMode,
        family: ProviderFamily,
    ) -> Result<TransportResponse, ChatError> {
        let url = self.parsed_url(&request.endpoint)?;
        let mut outbound = reqwest::Request::new(http::Method::POST, url.as_ref().clone());
        *outbound.headers_mut() = request.headers.clone();
        *outbound.body_mut() = Some(reqwest::Body::from(request.body.clone()));

        tracing::debug!(
            endpoint = %request.endpoint,
            body_len = request.body.len(),
            "sending chat request"
        );
        let response = self
            .client
            .execute(outbound)
            .await
            .map_err(map_reqwest_error)?;

        let status = response.status();
        let headers = response.headers().clone();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::warn!(
                status = status.as_u16(),
                body_preview = %preview(&body),
                "chat request failed"
            );
            return Err(ChatError::Transport {
                status: status.as_u16(),
                message: preview(&body),
            });
        }

        let content_type = headers
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok());
        let body = if should_stream(response_mode, family, content_type) {
            ResponseBody::Stream(
                response
                    .bytes_stream()
                    .map(|chunk| chunk.map_err(map_reqwest_error))
                    .boxed(),
            )
        } else {
            ResponseBody::Buffered(response.text().await.map_err(map_reqwest_error)?)
        };

        Ok(TransportResponse {
            status: status.as_u16(),
            headers,
            body,
        })
    }
}

/// Whether a response is consumed as a stream.
#[must_use]
pub fn should_stream(
    response_mode: ResponseMode,
    family: ProviderFamily,
    content_type: Option<&str>,
) -> bool {
    match response_mode {
        ResponseMode::Stream => true,
        ResponseMode::Buffered => false,
        ResponseMode::Auto => {
            family == ProviderFamily::EventTagged
                || content_type.is_some_and(|value| {
                    let essence = value
                        .split(';')
                        .next()
                        .unwrap_or_default()
                        .trim()
                        .to_ascii_lowercase();
                    STREAMING_CONTENT_TYPES.contains(&essence.as_str())
                })
        }
    }
}

/// Map a reqwest failure onto the error taxonomy, keeping the source chain
/// in the message so protocol mismatches can be recognised later.
fn map_reqwest_error(err: reqwest::Error) -> ChatError {
    if err.is_timeout() {
        return ChatError::Timeout(TimeoutCause::Elapsed);
    }
    let mut message = err.to_string();
    let mut source = std::error::Error::source(&err);
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }
    ChatError::Network(message)
}

fn preview(body: &str) -> String {
    if body.chars().count() <= ERROR_BODY_PREVIEW_CHARS {
        body.to_string()
    } else {
        let mut out: String = body.chars().take(ERROR_BODY_PREVIEW_CHARS).collect();
        out.push_str("...");
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_forced_modes() {
        assert!(should_stream(
            ResponseMode::Stream,
            ProviderFamily::FreeForm,
            Some("application/json")
        ));
        assert!(!should_stream(
            ResponseMode::Buffered,
            ProviderFamily::EventTagged,
            Some("text/event-stream")
        ));
    }

    #[test]
    fn test_auto_mode_uses_family_and_content_type() {
        assert!(should_stream(
            ResponseMode::Auto,
            ProviderFamily::EventTagged,
            Some("application/json")
        ));
        assert!(should_stream(
            ResponseMode::Auto,
            ProviderFamily::FreeForm,
            Some("text/event-stream; charset=utf-8")
        ));
        assert!(should_stream(
            ResponseMode::Auto,
            ProviderFamily::FreeForm,
            Some("Application/X-NDJSON")
        ));
        assert!(!should_stream(
            ResponseMode::Auto,
            ProviderFamily::FreeForm,
            Some("application/json")
        ));
        assert!(!should_stream(ResponseMode::Auto, ProviderFamily::FreeForm, None));
    }

    #[test]
    fn test_preview_truncates() {
        let long = "é".repeat(600);
        let shown = preview(&long);
        assert_eq!(shown.chars().count(), ERROR_BODY_PREVIEW_CHARS + 3);
        assert_eq!(preview("short"), "short");
    }

    #[tokio::test]
    async fn test_connection_refused_is_network_error() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let transport = HttpTransport::new(Duration::from_secs(5)).unwrap();
        let request = OutboundRequest {
            endpoint: format!("http://{addr}/chat"),
            headers: HeaderMap::new(),
            body: Bytes::from_static(b"{}"),
            payload: serde_json::json!({}),
        };
        let err = transport
            .send(&request, ResponseMode::Auto, ProviderFamily::FreeForm)
            .await
            .unwrap_err();
        assert!(matches!(err, ChatError::Network(_)), "{err:?}");
        assert!(err.is_terminal());
    }

    #[tokio::test]
    async fn test_invalid_endpoint_is_config_error() {
        let transport = HttpTransport::new(Duration::from_secs(5)).unwrap();
        let request = OutboundRequest {
            endpoint: "not a url".to_string(),
            headers: HeaderMap::new(),
            body: Bytes::new(),
            payload: serde_json::Value::Null,
        };
        let err = transport
            .send(&request, ResponseMode::Auto, ProviderFamily::FreeForm)
            .await
            .unwrap_err();
        assert!(matches!(err, ChatError::Config(_)));
    }
}
