//! Outbound request payloads for both provider families.
use bytes::Bytes;
use http::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use serde::Serialize;

use crate::config::{ApiConfig, RequesterConfig, Routing};
use crate::error::ChatError;

use super::canonical::ProviderFamily;

const DEFAULT_PROGRAM_NAME: &str = "General";

/// Per-submission facts that go into the payload.
#[derive(Debug, Clone, Copy)]
pub struct RequestContext<'a> {
    pub question: &'a str,
    pub attachment_urls: &'a [String],
    /// Local id of the user message.
    pub message_id: &'a str,
    /// Server session bound by an earlier exchange, if any.
    pub server_session_id: Option<&'a str>,
    /// Locally generated id used until the server issues one.
    pub provisional_session_id: &'a str,
    pub timestamp_ms: u64,
}

/// Workflow-webhook payload: flat object with requester identity.
#[derive(Debug, Serialize)]
pub struct WorkflowRequest<'a> {
    pub auth_user_id: &'a str,
    pub user_name: &'a str,
    pub session_id: &'a str,
    pub live_class_id: &'a str,
    pub date: u64,
    pub question: &'a str,
    #[serde(rename = "messageId")]
    pub message_id: &'a str,
    pub program_name: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub course_name: Option<&'a str>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub attachments: Vec<WorkflowAttachment<'a>>,
}

#[derive(Debug, Serialize)]
pub struct WorkflowAttachment<'a> {
    pub file_url: &'a str,
}

/// Event-streaming payload: nested body plus routing fields.
#[derive(Debug, Serialize)]
pub struct EventStreamRequest<'a> {
    pub body: EventStreamBody<'a>,
    pub session_id: Option<&'a str>,
    #[serde(flatten)]
    pub routing: RoutingFields<'a>,
}

#[derive(Debug, Serialize)]
pub struct EventStreamBody<'a> {
    pub text: &'a str,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub attachments: Vec<EventStreamAttachment<'a>>,
}

#[derive(Debug, Serialize)]
pub struct EventStreamAttachment<'a> {
    pub url: &'a str,
    #[serde(rename = "type")]
    pub kind: &'static str,
}

/// Sub-mode routing, flattened into the top level of the payload.
#[derive(Debug, Serialize)]
#[serde(untagged)]
pub enum RoutingFields<'a> {
    Thread {
        thread_id: u32,
    },
    Content {
        content_type: &'a str,
        content_id: &'a str,
        segment_id: &'a str,
    },
    Exam {
        exam_id: &'a str,
        question_id: &'a str,
    },
}

impl<'a> From<&'a Routing> for RoutingFields<'a> {
    fn from(routing: &'a Routing) -> Self {
        match routing {
            Routing::Thread { thread_id } => RoutingFields::Thread {
                thread_id: *thread_id,
            },
            Routing::Content {
                content_type,
                content_id,
                segment_id,
            } => RoutingFields::Content {
                content_type,
                content_id,
                segment_id,
            },
            Routing::Exam {
                exam_id,
                question_id,
            } => RoutingFields::Exam {
                exam_id,
                question_id,
            },
        }
    }
}

/// A serialized request ready for the transport.
#[derive(Debug, Clone)]
pub struct OutboundRequest {
    pub endpoint: String,
    pub headers: HeaderMap,
    pub body: Bytes,
    /// Same payload as `body`, kept for persistence.
    pub payload: serde_json::Value,
}

/// Build the provider-specific request for one submission.
///
/// # Errors
///
/// Returns [`ChatError::Config`] when the authorization token cannot be used
/// as a header value, or [`ChatError::InvalidRequest`] when serialization fails.
pub fn build_request(
    api: &ApiConfig,
    requester: &RequesterConfig,
    ctx: &RequestContext<'_>,
) -> Result<OutboundRequest, ChatError> {
    let payload = match api.provider_family() {
        ProviderFamily::FreeForm => serde_json::to_value(workflow_request(api, requester, ctx)),
        ProviderFamily::EventTagged => serde_json::to_value(event_stream_request(api, ctx)),
    }
    .map_err(|e| ChatError::InvalidRequest(format!("Failed to serialize request: {e}")))?;
    let body = serde_json::to_vec(&payload)
        .map_err(|e| ChatError::InvalidRequest(format!("Failed to serialize request: {e}")))?;

    Ok(OutboundRequest {
        endpoint: api.endpoint().to_string(),
        headers: build_headers(api)?,
        body: Bytes::from(body),
        payload,
    })
}

fn workflow_request<'a>(
    api: &'a ApiConfig,
    requester: &'a RequesterConfig,
    ctx: &RequestContext<'a>,
) -> WorkflowRequest<'a> {
    let program_name = requester
        .program_name
        .as_deref()
        .or_else(|| api.routing_label())
        .unwrap_or(DEFAULT_PROGRAM_NAME);
    WorkflowRequest {
        auth_user_id: &requester.user_id,
        user_name: &requester.user_name,
        session_id: ctx
            .server_session_id
            .unwrap_or(ctx.provisional_session_id),
        live_class_id: &requester.live_class_id,
        date: ctx.timestamp_ms,
        question: ctx.question,
        message_id: ctx.message_id,
        program_name,
        course_name: requester.course_name.as_deref(),
        attachments: ctx
            .attachment_urls
            .iter()
            .map(|url| WorkflowAttachment { file_url: url })
            .collect(),
    }
}

fn event_stream_request<'a>(api: &'a ApiConfig, ctx: &RequestContext<'a>) -> EventStreamRequest<'a> {
    EventStreamRequest {
        body: EventStreamBody {
            text: ctx.question,
            attachments: ctx
                .attachment_urls
                .iter()
                .map(|url| EventStreamAttachment { url, kind: "image" })
                .collect(),
        },
        session_id: ctx.server_session_id.or(api.session_id.as_deref()),
        routing: RoutingFields::from(&api.routing),
    }
}

/// `Content-Type` always; `Authorization` only for the event-streaming family.
///
/// # Errors
///
/// Returns [`ChatError::Config`] when the token contains bytes not allowed in
/// a header value.
pub fn build_headers(api: &ApiConfig) -> Result<HeaderMap, ChatError> {
    let mut headers = HeaderMap::with_capacity(2);
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    if api.provider_family() == ProviderFamily::EventTagged {
        if let Some(token) = api.bearer_token() {
            let mut value = HeaderValue::from_str(&token).map_err(|_| {
                ChatError::Config("authorization_token is not a valid header value".to_string())
            })?;
            value.set_sensitive(true);
            headers.insert(AUTHORIZATION, value);
        }
    }
    Ok(headers)
}
