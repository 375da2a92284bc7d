use super::{AppConfig, ConfigError};

const VALID_LOG_LEVELS: [&str; 6] = ["DEBUG", "INFO", "WARNING", "ERROR", "CRITICAL", "DISABLED"];

/// Validate the full application config, returning an error if any rule is violated.
///
/// # Errors
///
/// Returns [`ConfigError::Validation`] when any configuration invariant is violated.
pub fn validate_config(config: &AppConfig) -> Result<(), ConfigError> {
    validate_server_config(config)?;
    validate_upstream(config)?;
    validate_models(config)?;
    validate_limits(config)?;
    validate_log_level(config)?;
    Ok(())
}

fn validation_err(msg: impl Into<String>) -> ConfigError {
    ConfigError::Validation(msg.into())
}

fn validate_server_config(config: &AppConfig) -> Result<(), ConfigError> {
    let server = &config.server;
    if server.http_pool_max_idle_per_host == 0 {
        return Err(validation_err(
            "server.http_pool_max_idle_per_host must be greater than 0",
        ));
    }
    if server.timeout == 0 {
        return Err(validation_err("server.timeout must be greater than 0"));
    }
    if let Some(worker_threads) = server.runtime_worker_threads {
        if worker_threads == 0 {
            return Err(validation_err(
                "server.runtime_worker_threads must be greater than 0 when set",
            ));
        }
    }
    if !server.base_path.is_empty() && !server.base_path.starts_with('/') {
        return Err(validation_err("server.base_path must start with '/'"));
    }
    Ok(())
}

fn validate_upstream(config: &AppConfig) -> Result<(), ConfigError> {
    let upstream = &config.upstream;
    if upstream.api_key.trim().is_empty() {
        return Err(validation_err(
            "upstream.api_key is required (set it in the config file or OPENAI_API_KEY)",
        ));
    }
    if !upstream.base_url.starts_with("http://") && !upstream.base_url.starts_with("https://") {
        return Err(validation_err(format!(
            "upstream.base_url must start with http:// or https://, got {:?}",
            upstream.base_url
        )));
    }
    Ok(())
}

fn validate_models(config: &AppConfig) -> Result<(), ConfigError> {
    let models = &config.models;
    for (field, value) in [
        ("big_model", &models.big_model),
        ("middle_model", &models.middle_model),
        ("small_model", &models.small_model),
    ] {
        if value.trim().is_empty() {
            return Err(validation_err(format!("models.{field} cannot be empty")));
        }
    }
    if models
        .passthrough_prefixes
        .iter()
        .any(|prefix| prefix.is_empty())
    {
        return Err(validation_err(
            "models.passthrough_prefixes contains an empty prefix",
        ));
    }
    Ok(())
}

fn validate_limits(config: &AppConfig) -> Result<(), ConfigError> {
    let limits = &config.limits;
    if limits.min_tokens == 0 {
        return Err(validation_err("limits.min_tokens must be greater than 0"));
    }
    if limits.min_tokens > limits.max_tokens {
        return Err(validation_err(format!(
            "limits.min_tokens ({}) must not exceed limits.max_tokens ({})",
            limits.min_tokens, limits.max_tokens
        )));
    }
    Ok(())
}

fn validate_log_level(config: &AppConfig) -> Result<(), ConfigError> {
    if !VALID_LOG_LEVELS.contains(&config.features.log_level.to_uppercase().as_str()) {
        return Err(validation_err(format!(
            "log_level must be one of {VALID_LOG_LEVELS:?}"
        )));
    }
    Ok(())
}
