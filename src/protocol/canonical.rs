use serde::{Deserialize, Serialize};
use smallvec::SmallVec;
use std::fmt;

/// Wire dialect a backend speaks. Chosen once per exchange from
/// configuration, never re-inferred from chunk shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProviderFamily {
    /// Every chunk names its event kind (`session`, `message`, `end`, ...).
    EventTagged,
    /// Chunks are matched against an ordered list of known field shapes.
    FreeForm,
}

/// How a text delta combines with the content already shown.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TextMode {
    Append,
    /// The provider resent the cumulative text.
    Replace,
}

/// Server-issued identifier. Backends send these as numbers or strings.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ServerId(String);

impl ServerId {
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Accept a JSON string or integer; anything else is not an id.
    #[must_use]
    pub fn from_json(value: &serde_json::Value) -> Option<Self> {
        match value {
            serde_json::Value::String(s) if !s.trim().is_empty() => Some(Self(s.clone())),
            serde_json::Value::Number(n) => Some(Self(n.to_string())),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ServerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<i64> for ServerId {
    fn from(value: i64) -> Self {
        Self(value.to_string())
    }
}

impl From<&str> for ServerId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// Transport-agnostic update produced by the normalizer and consumed by the
/// transcript reducer.
#[derive(Debug, Clone, PartialEq)]
pub enum CanonicalUpdate {
    TextDelta { text: String, mode: TextMode },
    Reasoning(String),
    Session {
        id: ServerId,
        title: Option<String>,
    },
    MessageId(ServerId),
    Status(String),
    Usage(f64),
    StreamEnd,
    /// Terminal failure; `notice` is the explanatory text for the user.
    Failed { notice: String },
}

impl CanonicalUpdate {
    #[must_use]
    pub fn append(text: impl Into<String>) -> Self {
        CanonicalUpdate::TextDelta {
            text: text.into(),
            mode: TextMode::Append,
        }
    }

    #[must_use]
    pub fn replace(text: impl Into<String>) -> Self {
        CanonicalUpdate::TextDelta {
            text: text.into(),
            mode: TextMode::Replace,
        }
    }

    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            CanonicalUpdate::StreamEnd | CanonicalUpdate::Failed { .. }
        )
    }
}

/// Updates decoded from a single chunk. Most chunks yield one or two.
pub type CanonicalUpdates = SmallVec<[CanonicalUpdate; 2]>;

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_server_id_accepts_numbers_and_strings() {
        assert_eq!(ServerId::from_json(&json!(42)), Some(ServerId::from(42)));
        assert_eq!(
            ServerId::from_json(&json!("abc-1")).map(|id| id.to_string()),
            Some("abc-1".to_string())
        );
        assert_eq!(ServerId::from_json(&json!("  ")), None);
        assert_eq!(ServerId::from_json(&json!(null)), None);
        assert_eq!(ServerId::from_json(&json!({"id": 1})), None);
    }

    #[test]
    fn test_terminal_updates() {
        assert!(CanonicalUpdate::StreamEnd.is_terminal());
        assert!(CanonicalUpdate::Failed {
            notice: "x".into()
        }
        .is_terminal());
        assert!(!CanonicalUpdate::append("x").is_terminal());
    }
}
