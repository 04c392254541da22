use super::{ApiMode, AppConfig, ConfigError, Routing};

/// Validate the full application config, returning an error if any rule is violated.
///
/// # Errors
///
/// Returns [`ConfigError::Validation`] when any configuration invariant is violated.
pub fn validate_config(config: &AppConfig) -> Result<(), ConfigError> {
    validate_endpoint(config)?;
    validate_authorization(config)?;
    validate_routing(config)?;
    validate_timeouts(config)?;
    validate_log_level(config)?;
    Ok(())
}

fn validation_err(msg: impl Into<String>) -> ConfigError {
    ConfigError::Validation(msg.into())
}

fn validate_endpoint(config: &AppConfig) -> Result<(), ConfigError> {
    let field = match config.api.mode {
        ApiMode::Workflow => "api.workflow_url",
        ApiMode::Remote => "api.remote_url",
        ApiMode::Local => "api.local_url",
    };
    let endpoint = config.api.endpoint().trim();
    if endpoint.is_empty() {
        return Err(validation_err(format!(
            "{field} must be set when api.mode is '{}'",
            config.api.mode
        )));
    }
    let parsed = url::Url::parse(endpoint)
        .map_err(|err| validation_err(format!("{field} is not a valid URL: {err}")))?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(validation_err(format!(
            "{field} must use http:// or https://"
        )));
    }
    Ok(())
}

fn validate_authorization(config: &AppConfig) -> Result<(), ConfigError> {
    if config.api.mode != ApiMode::Workflow && config.api.bearer_token().is_none() {
        return Err(validation_err(format!(
            "api.authorization_token cannot be empty when api.mode is '{}'",
            config.api.mode
        )));
    }
    Ok(())
}

fn validate_routing(config: &AppConfig) -> Result<(), ConfigError> {
    match &config.api.routing {
        Routing::Thread { thread_id } => {
            if *thread_id == 0 {
                return Err(validation_err("api.routing.thread_id must be greater than 0"));
            }
        }
        Routing::Content {
            content_type,
            content_id,
            segment_id,
        } => {
            for (name, value) in [
                ("content_type", content_type),
                ("content_id", content_id),
                ("segment_id", segment_id),
            ] {
                if value.trim().is_empty() {
                    return Err(validation_err(format!(
                        "api.routing.{name} cannot be empty for content routing"
                    )));
                }
            }
        }
        Routing::Exam {
            exam_id,
            question_id,
        } => {
            if exam_id.trim().is_empty() || question_id.trim().is_empty() {
                return Err(validation_err(
                    "api.routing.exam_id and api.routing.question_id are required for exam routing",
                ));
            }
        }
    }
    Ok(())
}

fn validate_timeouts(config: &AppConfig) -> Result<(), ConfigError> {
    if config.api.timeout_secs == 0 {
        return Err(validation_err("api.timeout_secs must be greater than 0"));
    }
    Ok(())
}

const VALID_LOG_LEVELS: &[&str] = &[
    "DEBUG", "INFO", "WARNING", "WARN", "ERROR", "CRITICAL", "TRACE", "DISABLED",
];

fn validate_log_level(config: &AppConfig) -> Result<(), ConfigError> {
    let level = config.features.log_level.to_uppercase();
    if !VALID_LOG_LEVELS.contains(&level.as_str()) {
        return Err(validation_err(format!(
            "Invalid log_level '{}'. Must be one of: {}",
            config.features.log_level,
            VALID_LOG_LEVELS.join(", ")
        )));
    }
    Ok(())
}
