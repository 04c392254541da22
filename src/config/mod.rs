pub mod threads;
pub mod validation;

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

use crate::protocol::canonical::ProviderFamily;

use self::threads::ThreadEnvironment;
use self::validation::validate_config;

/// Error type for configuration loading and validation.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("Config validation error: {0}")]
    Validation(String),
}

/// Which backend the client talks to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ApiMode {
    /// Workflow-automation webhook.
    #[default]
    Workflow,
    /// Hosted event-streaming message API.
    Remote,
    /// Event-streaming message API on a developer machine.
    Local,
}

impl ApiMode {
    #[must_use]
    pub fn provider_family(self) -> ProviderFamily {
        match self {
            ApiMode::Workflow => ProviderFamily::FreeForm,
            ApiMode::Remote | ApiMode::Local => ProviderFamily::EventTagged,
        }
    }
}

impl fmt::Display for ApiMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ApiMode::Workflow => write!(f, "workflow"),
            ApiMode::Remote => write!(f, "remote"),
            ApiMode::Local => write!(f, "local"),
        }
    }
}

/// How the response body is consumed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ResponseMode {
    /// Decide from the provider family and the response `Content-Type`.
    #[default]
    Auto,
    Stream,
    Buffered,
}

/// Routing identifiers for the event-streaming family.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Routing {
    Thread {
        thread_id: u32,
    },
    Content {
        content_type: String,
        content_id: String,
        segment_id: String,
    },
    Exam {
        exam_id: String,
        question_id: String,
    },
}

impl Default for Routing {
    fn default() -> Self {
        Routing::Thread { thread_id: 1 }
    }
}

/// Backend endpoint configuration. Cloned into every exchange.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    #[serde(default)]
    pub mode: ApiMode,
    #[serde(default)]
    pub workflow_url: String,
    #[serde(default = "default_remote_url")]
    pub remote_url: String,
    #[serde(default = "default_local_url")]
    pub local_url: String,
    #[serde(default)]
    pub authorization_token: String,
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub routing: Routing,
    #[serde(default)]
    pub environment: ThreadEnvironment,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default)]
    pub response_mode: ResponseMode,
}

fn default_remote_url() -> String {
    "https://api.example.com/chat-service/api/v1/messages".to_string()
}
fn default_local_url() -> String {
    "http://localhost:8000/api/v1/messages".to_string()
}
fn default_timeout_secs() -> u64 {
    600
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            mode: ApiMode::default(),
            workflow_url: String::new(),
            remote_url: default_remote_url(),
            local_url: default_local_url(),
            authorization_token: String::new(),
            session_id: None,
            routing: Routing::default(),
            environment: ThreadEnvironment::default(),
            timeout_secs: default_timeout_secs(),
            response_mode: ResponseMode::default(),
        }
    }
}

impl ApiConfig {
    #[must_use]
    pub fn provider_family(&self) -> ProviderFamily {
        self.mode.provider_family()
    }

    /// The URL requests are posted to for the configured mode.
    #[must_use]
    pub fn endpoint(&self) -> &str {
        match self.mode {
            ApiMode::Workflow => &self.workflow_url,
            ApiMode::Remote => &self.remote_url,
            ApiMode::Local => &self.local_url,
        }
    }

    #[must_use]
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// `Authorization` header value, adding the `Bearer ` prefix when the
    /// configured token lacks it.
    #[must_use]
    pub fn bearer_token(&self) -> Option<String> {
        let token = self.authorization_token.trim();
        if token.is_empty() {
            return None;
        }
        if token.starts_with("Bearer ") {
            Some(token.to_string())
        } else {
            Some(format!("Bearer {token}"))
        }
    }

    /// Human label for the current routing, e.g. the subject of a thread.
    #[must_use]
    pub fn routing_label(&self) -> Option<&'static str> {
        match self.routing {
            Routing::Thread { thread_id } => {
                threads::label_for_thread(self.environment, thread_id)
            }
            Routing::Content { .. } | Routing::Exam { .. } => None,
        }
    }
}

/// Identity fields sent by the workflow family.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct RequesterConfig {
    #[serde(default)]
    pub user_id: String,
    #[serde(default)]
    pub user_name: String,
    #[serde(default)]
    pub live_class_id: String,
    #[serde(default)]
    pub program_name: Option<String>,
    #[serde(default)]
    pub course_name: Option<String>,
}

/// Feature flags and settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeaturesConfig {
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default = "default_true")]
    pub typing_effect: bool,
    #[serde(default = "default_typing_delay_ms")]
    pub typing_delay_ms: u64,
}

fn default_true() -> bool {
    true
}
fn default_log_level() -> String {
    "INFO".to_string()
}
fn default_typing_delay_ms() -> u64 {
    50
}

impl Default for FeaturesConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            typing_effect: true,
            typing_delay_ms: default_typing_delay_ms(),
        }
    }
}

/// Conversation persistence.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct StoreConfig {
    /// SQLite database file. `None` keeps conversations in memory.
    #[serde(default)]
    pub path: Option<String>,
}

/// Top-level application configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub requester: RequesterConfig,
    #[serde(default)]
    pub features: FeaturesConfig,
    #[serde(default)]
    pub store: StoreConfig,
}

/// Load configuration from a YAML file and validate it.
///
/// # Errors
///
/// Returns [`ConfigError::Io`] when reading the file fails, [`ConfigError::Yaml`]
/// when parsing fails, or [`ConfigError::Validation`] when semantic validation fails.
pub fn load_config(path: &str) -> Result<AppConfig, ConfigError> {
    let contents = std::fs::read_to_string(path)?;
    parse_config(&contents)
}

/// Parse and validate configuration from YAML text.
///
/// # Errors
///
/// Returns [`ConfigError::Yaml`] or [`ConfigError::Validation`].
pub fn parse_config(contents: &str) -> Result<AppConfig, ConfigError> {
    let config: AppConfig = serde_yaml::from_str(contents)?;
    validate_config(&config)?;
    Ok(config)
}
