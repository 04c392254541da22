use std::fmt;

/// Why an exchange stopped waiting for the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeoutCause {
    /// The wall-clock bound elapsed.
    Elapsed,
    /// The exchange handle was cancelled (new chat, user abort).
    Cancelled,
}

impl fmt::Display for TimeoutCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TimeoutCause::Elapsed => write!(f, "deadline elapsed"),
            TimeoutCause::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// Error type used across all modules.
#[derive(Debug, thiserror::Error)]
pub enum ChatError {
    #[error("Config error: {0}")]
    Config(String),
    #[error("Invalid request: {0}")]
    InvalidRequest(String),
    #[error("Network error: {0}")]
    Network(String),
    #[error("Transport error: status={status}, message={message}")]
    Transport { status: u16, message: String },
    #[error("Timeout error: {0}")]
    Timeout(TimeoutCause),
    #[error("Parse error: {0}")]
    Parse(String),
    #[error("Persistence error: {0}")]
    Persistence(String),
}

/// Broad error category.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    InvalidRequest,
    Authentication,
    Permission,
    RateLimit,
    ServerError,
    Connectivity,
    Timeout,
    Internal,
}

/// Map a backend HTTP status code to an error category.
#[must_use]
pub fn category_from_status(status: u16) -> ErrorCategory {
    match status {
        400 | 404 | 405 | 413 | 415 | 422 => ErrorCategory::InvalidRequest,
        401 => ErrorCategory::Authentication,
        403 => ErrorCategory::Permission,
        429 => ErrorCategory::RateLimit,
        _ => ErrorCategory::ServerError,
    }
}

impl ChatError {
    #[must_use]
    pub fn category(&self) -> ErrorCategory {
        match self {
            ChatError::InvalidRequest(_) => ErrorCategory::InvalidRequest,
            ChatError::Network(_) => ErrorCategory::Connectivity,
            ChatError::Transport { status, .. } => category_from_status(*status),
            ChatError::Timeout(_) => ErrorCategory::Timeout,
            ChatError::Config(_) | ChatError::Parse(_) | ChatError::Persistence(_) => {
                ErrorCategory::Internal
            }
        }
    }

    /// Only these errors finalize the in-flight message; everything else is
    /// absorbed before it reaches the transcript.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ChatError::Network(_) | ChatError::Transport { .. } | ChatError::Timeout(_)
        )
    }
}

/// Short toast-style notification shown next to a failed exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub title: String,
    pub description: String,
}

/// User-visible rendering of a terminal failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailureNotice {
    /// Text that becomes (or is appended to) the assistant message.
    pub message: String,
    pub notification: Notification,
}

/// Facts about the failed exchange that shape the explanation.
#[derive(Debug, Clone, Copy)]
pub struct FailureContext<'a> {
    pub endpoint: &'a str,
    pub had_attachments: bool,
}

pub const TIMEOUT_WITH_IMAGES_MESSAGE: &str = "The request timed out while the attached images were being analysed. Please try again with fewer or smaller images.";
pub const TIMEOUT_MESSAGE: &str =
    "The request timed out before the assistant finished responding. Please try again.";
pub const CANCELLED_MESSAGE: &str =
    "The request was cancelled before the assistant finished responding.";
pub const MIXED_CONTENT_MESSAGE: &str = "Could not reach the chat service: the endpoint uses plain HTTP or does not speak the expected protocol. Check that the URL scheme (http/https) matches the server.";
pub const CONNECTIVITY_MESSAGE: &str = "Sorry, I could not reach the chat service. Please check your connection and the endpoint URL, then try again.";

/// Format a terminal error for display.
#[must_use]
pub fn failure_notice(err: &ChatError, ctx: FailureContext<'_>) -> FailureNotice {
    let (message, title, description) = match err {
        ChatError::Timeout(TimeoutCause::Cancelled) => (
            CANCELLED_MESSAGE.to_string(),
            "Request cancelled",
            "The previous request was abandoned.".to_string(),
        ),
        ChatError::Timeout(TimeoutCause::Elapsed) if ctx.had_attachments => (
            TIMEOUT_WITH_IMAGES_MESSAGE.to_string(),
            "Request timed out",
            "Image analysis took too long.".to_string(),
        ),
        ChatError::Timeout(TimeoutCause::Elapsed) => (
            TIMEOUT_MESSAGE.to_string(),
            "Request timed out",
            "The chat service did not answer in time.".to_string(),
        ),
        ChatError::Transport { status, .. } => (
            format!(
                "Sorry, the chat service rejected the request (HTTP {status}). Please check your configuration and try again."
            ),
            "Error",
            transport_description(*status),
        ),
        ChatError::Network(detail) if is_protocol_mismatch(ctx.endpoint, detail) => (
            MIXED_CONTENT_MESSAGE.to_string(),
            "Connection blocked",
            "The endpoint protocol does not match the server.".to_string(),
        ),
        _ => (
            CONNECTIVITY_MESSAGE.to_string(),
            "Error",
            "Failed to connect to the chat service. Please check your configuration.".to_string(),
        ),
    };

    FailureNotice {
        message,
        notification: Notification {
            title: title.to_string(),
            description,
        },
    }
}

fn transport_description(status: u16) -> String {
    match category_from_status(status) {
        ErrorCategory::Authentication | ErrorCategory::Permission => {
            "The authorization token was rejected.".to_string()
        }
        ErrorCategory::RateLimit => "Too many requests, slow down.".to_string(),
        _ => format!("The chat service returned status {status}."),
    }
}

/// A plain `http://` endpoint pointing at a non-loopback host, or a failure
/// whose detail indicates a TLS/protocol handshake problem.
fn is_protocol_mismatch(endpoint: &str, detail: &str) -> bool {
    let lower = detail.to_ascii_lowercase();
    if lower.contains("tls") || lower.contains("certificate") || lower.contains("invalid http") {
        return true;
    }
    let Ok(url) = url::Url::parse(endpoint) else {
        return false;
    };
    url.scheme() == "http" && !is_loopback_host(url.host_str().unwrap_or_default())
}

fn is_loopback_host(host: &str) -> bool {
    matches!(host, "localhost" | "127.0.0.1" | "[::1]" | "::1") || host.ends_with(".localhost")
}
