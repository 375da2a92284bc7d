pub mod validation;

use serde::{Deserialize, Serialize};

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

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_host")]
    pub host: String,
    /// Upstream request timeout in seconds.
    #[serde(default = "default_timeout")]
    pub timeout: u64,
    #[serde(default)]
    pub base_path: String,
    #[serde(default = "default_http_pool_max_idle_per_host")]
    pub http_pool_max_idle_per_host: usize,
    #[serde(default = "default_http_pool_idle_timeout_secs")]
    pub http_pool_idle_timeout_secs: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub runtime_worker_threads: Option<usize>,
}

fn default_port() -> u16 {
    8082
}
fn default_host() -> String {
    "0.0.0.0".to_string()
}
fn default_timeout() -> u64 {
    90
}
fn default_http_pool_max_idle_per_host() -> usize {
    16
}
fn default_http_pool_idle_timeout_secs() -> u64 {
    15
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            host: default_host(),
            timeout: default_timeout(),
            base_path: String::new(),
            http_pool_max_idle_per_host: default_http_pool_max_idle_per_host(),
            http_pool_idle_timeout_secs: default_http_pool_idle_timeout_secs(),
            runtime_worker_threads: None,
        }
    }
}

/// Chat Completions upstream.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpstreamConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default)]
    pub api_key: String,
}

fn default_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            api_key: String::new(),
        }
    }
}

/// Model tiers and the prefixes that bypass tiering.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelsConfig {
    #[serde(default = "default_big_model")]
    pub big_model: String,
    /// Empty means "same as `big_model`"; resolved after overrides.
    #[serde(default)]
    pub middle_model: String,
    #[serde(default = "default_small_model")]
    pub small_model: String,
    #[serde(default = "default_passthrough_prefixes")]
    pub passthrough_prefixes: Vec<String>,
}

fn default_big_model() -> String {
    "gpt-4o".to_string()
}
fn default_small_model() -> String {
    "gpt-4o-mini".to_string()
}
fn default_passthrough_prefixes() -> Vec<String> {
    ["gpt-", "o1-", "o3-", "o4-", "chatgpt-", "ep-", "doubao-", "deepseek-"]
        .into_iter()
        .map(str::to_string)
        .collect()
}

impl Default for ModelsConfig {
    fn default() -> Self {
        Self {
            big_model: default_big_model(),
            middle_model: String::new(),
            small_model: default_small_model(),
            passthrough_prefixes: default_passthrough_prefixes(),
        }
    }
}

/// Bounds applied to the caller's `max_tokens`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenLimits {
    #[serde(default = "default_min_tokens")]
    pub min_tokens: u64,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u64,
}

fn default_min_tokens() -> u64 {
    100
}
fn default_max_tokens() -> u64 {
    4096
}

impl Default for TokenLimits {
    fn default() -> Self {
        Self {
            min_tokens: default_min_tokens(),
            max_tokens: default_max_tokens(),
        }
    }
}

impl TokenLimits {
    /// Clamp a caller-supplied (possibly negative) token count into range.
    #[must_use]
    pub fn clamp(&self, requested: i64) -> u64 {
        let requested = u64::try_from(requested).unwrap_or(0);
        requested.max(self.min_tokens).min(self.max_tokens)
    }
}

/// Client authentication configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ClientAuthConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
}

/// Feature flags and settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeaturesConfig {
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_log_level() -> String {
    "INFO".to_string()
}

impl Default for FeaturesConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
        }
    }
}

/// Top-level application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub upstream: UpstreamConfig,
    #[serde(default)]
    pub models: ModelsConfig,
    #[serde(default)]
    pub limits: TokenLimits,
    #[serde(default)]
    pub client_authentication: ClientAuthConfig,
    #[serde(default)]
    pub features: FeaturesConfig,
}

impl AppConfig {
    /// Fill values that default to other values.
    pub fn resolve_defaults(&mut self) {
        if self.models.middle_model.trim().is_empty() {
            self.models.middle_model.clone_from(&self.models.big_model);
        }
        if let Some(key) = &self.client_authentication.api_key {
            if key.trim().is_empty() {
                self.client_authentication.api_key = None;
            }
        }
    }
}

fn parse_env<T: std::str::FromStr>(name: &str, raw: &str) -> Result<T, ConfigError> {
    raw.trim()
        .parse()
        .map_err(|_| ConfigError::Validation(format!("{name} has an invalid value: {raw:?}")))
}

/// Apply environment overrides on top of file values.
///
/// `lookup` abstracts the environment so callers (and tests) can supply their
/// own source.
///
/// # Errors
///
/// Returns [`ConfigError::Validation`] when a numeric variable does not parse.
pub fn apply_env_overrides<F>(config: &mut AppConfig, lookup: F) -> Result<(), ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(v) = lookup("OPENAI_API_KEY") {
        config.upstream.api_key = v;
    }
    if let Some(v) = lookup("OPENAI_BASE_URL") {
        config.upstream.base_url = v;
    }
    if let Some(v) = lookup("ANTHROPIC_API_KEY") {
        config.client_authentication.api_key = Some(v);
    }
    if let Some(v) = lookup("HOST") {
        config.server.host = v;
    }
    if let Some(v) = lookup("PORT") {
        config.server.port = parse_env("PORT", &v)?;
    }
    if let Some(v) = lookup("LOG_LEVEL") {
        config.features.log_level = v;
    }
    if let Some(v) = lookup("MAX_TOKENS_LIMIT") {
        config.limits.max_tokens = parse_env("MAX_TOKENS_LIMIT", &v)?;
    }
    if let Some(v) = lookup("MIN_TOKENS_LIMIT") {
        config.limits.min_tokens = parse_env("MIN_TOKENS_LIMIT", &v)?;
    }
    if let Some(v) = lookup("REQUEST_TIMEOUT") {
        config.server.timeout = parse_env("REQUEST_TIMEOUT", &v)?;
    }
    if let Some(v) = lookup("BIG_MODEL") {
        config.models.big_model = v;
    }
    if let Some(v) = lookup("MIDDLE_MODEL") {
        config.models.middle_model = v;
    }
    if let Some(v) = lookup("SMALL_MODEL") {
        config.models.small_model = v;
    }
    Ok(())
}

/// Parse YAML config text without environment overrides.
///
/// # Errors
///
/// Returns [`ConfigError::Yaml`] when parsing fails or
/// [`ConfigError::Validation`] when semantic validation fails.
pub fn parse_config(contents: &str) -> Result<AppConfig, ConfigError> {
    let mut config: AppConfig = if contents.trim().is_empty() {
        AppConfig::default()
    } else {
        serde_yaml::from_str(contents)?
    };
    config.resolve_defaults();
    validate_config(&config)?;
    Ok(config)
}

/// Load configuration from a YAML file, apply environment overrides and
/// validate. A missing file yields the defaults.
///
/// # Errors
///
/// Returns [`ConfigError::Io`] when reading the file fails, [`ConfigError::Yaml`]
/// when parsing fails, or [`ConfigError::Validation`] when semantic validation fails.
pub fn load_config(path: &str) -> Result<AppConfig, ConfigError> {
    load_config_with(path, |name| std::env::var(name).ok())
}

/// [`load_config`] with an explicit environment source.
///
/// # Errors
///
/// Same as [`load_config`].
pub fn load_config_with<F>(path: &str, lookup: F) -> Result<AppConfig, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let mut config: AppConfig = match std::fs::read_to_string(path) {
        Ok(contents) if contents.trim().is_empty() => AppConfig::default(),
        Ok(contents) => serde_yaml::from_str(&contents)?,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => AppConfig::default(),
        Err(err) => return Err(err.into()),
    };
    apply_env_overrides(&mut config, lookup)?;
    config.resolve_defaults();
    validate_config(&config)?;
    Ok(config)
}
