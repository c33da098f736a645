use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::schema::WEATHER_TOOL;
use crate::policy::RateLimits;

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub llm: LlmConfig,
    pub policy: PolicyConfig,
    pub conversation: ConversationConfig,
    pub tools: ToolsConfig,
    pub server: ServerConfig,
    pub logging: LoggingConfig,
}

#[derive(Clone, Debug)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub timeout_secs: u64,
}

#[derive(Clone, Debug)]
pub struct LlmConfig {
    pub provider: LlmProvider,
    pub api_key: Option<SecretString>,
    pub base_url: Option<String>,
    pub model: String,
    pub timeout_secs: u64,
}

#[derive(Clone, Debug)]
pub struct PolicyConfig {
    pub moderation_enabled: bool,
    pub tool_allowlist: Vec<String>,
    /// Zero disables the chat limit.
    pub rate_limit_chat_per_minute: u32,
    /// Zero disables the tool limit.
    pub rate_limit_tool_per_minute: u32,
}

#[derive(Clone, Debug)]
pub struct ConversationConfig {
    pub history_window: usize,
    pub classifier_min_confidence: f32,
    pub classifier_timeout_ms: u64,
    pub tool_timeout_ms: u64,
    /// Zero keeps sessions forever.
    pub session_ttl_secs: u64,
    pub stream_buffer: usize,
    pub stream_send_timeout_ms: u64,
}

#[derive(Clone, Debug, Default)]
pub struct ToolsConfig {
    pub weather_base_url: Option<String>,
}

#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub bind_address: String,
    pub port: u16,
    pub graceful_shutdown_secs: u64,
}

#[derive(Clone, Debug)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LlmProvider {
    Disabled,
    #[serde(rename = "openai")]
    OpenAi,
    Ollama,
}

impl LlmProvider {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Disabled => "disabled",
            Self::OpenAi => "openai",
            Self::Ollama => "ollama",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    Compact,
    Pretty,
    Json,
}

impl LogFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Compact => "compact",
            Self::Pretty => "pretty",
            Self::Json => "json",
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct ConfigOverrides {
    pub database_url: Option<String>,
    pub log_level: Option<String>,
    pub llm_provider: Option<LlmProvider>,
    pub llm_model: Option<String>,
    pub moderation_enabled: Option<bool>,
    pub server_port: Option<u16>,
}

#[derive(Clone, Debug, Default)]
pub struct LoadOptions {
    pub config_path: Option<PathBuf>,
    pub require_file: bool,
    pub overrides: ConfigOverrides,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read config file `{path}`: {source}")]
    ReadFile { path: PathBuf, source: std::io::Error },
    #[error("could not parse config file `{path}`: {source}")]
    ParseFile { path: PathBuf, source: toml::de::Error },
    #[error("required config file was not found: `{0}`")]
    MissingConfigFile(PathBuf),
    #[error("environment variable interpolation failed for `{var}`")]
    MissingEnvInterpolation { var: String },
    #[error("unterminated environment interpolation expression")]
    UnterminatedInterpolation,
    #[error("invalid environment override for `{key}`: `{value}`")]
    InvalidEnvOverride { key: String, value: String },
    #[error("configuration validation failed: {0}")]
    Validation(String),
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database: DatabaseConfig {
                url: "sqlite://parley.db".to_string(),
                max_connections: 5,
                timeout_secs: 30,
            },
            llm: LlmConfig {
                provider: LlmProvider::Disabled,
                api_key: None,
                base_url: None,
                model: "gpt-4o-mini".to_string(),
                timeout_secs: 30,
            },
            policy: PolicyConfig {
                moderation_enabled: true,
                tool_allowlist: vec![WEATHER_TOOL.to_string()],
                rate_limit_chat_per_minute: 30,
                rate_limit_tool_per_minute: 10,
            },
            conversation: ConversationConfig {
                history_window: 40,
                classifier_min_confidence: 0.5,
                classifier_timeout_ms: 3_000,
                tool_timeout_ms: 5_000,
                session_ttl_secs: 86_400,
                stream_buffer: 16,
                stream_send_timeout_ms: 10_000,
            },
            tools: ToolsConfig::default(),
            server: ServerConfig {
                bind_address: "127.0.0.1".to_string(),
                port: 8080,
                graceful_shutdown_secs: 15,
            },
            logging: LoggingConfig { level: "info".to_string(), format: LogFormat::Compact },
        }
    }
}

impl PolicyConfig {
    pub fn rate_limits(&self) -> RateLimits {
        RateLimits::per_minute(self.rate_limit_chat_per_minute, self.rate_limit_tool_per_minute)
    }
}

impl ConversationConfig {
    pub fn classifier_timeout(&self) -> Duration {
        Duration::from_millis(self.classifier_timeout_ms)
    }

    pub fn tool_timeout(&self) -> Duration {
        Duration::from_millis(self.tool_timeout_ms)
    }

    pub fn stream_send_timeout(&self) -> Duration {
        Duration::from_millis(self.stream_send_timeout_ms)
    }

    pub fn session_ttl(&self) -> Option<Duration> {
        (self.session_ttl_secs > 0).then(|| Duration::from_secs(self.session_ttl_secs))
    }
}

fn secret_value(value: String) -> SecretString {
    value.into()
}

impl std::str::FromStr for LlmProvider {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "disabled" | "none" => Ok(Self::Disabled),
            "openai" => Ok(Self::OpenAi),
            "ollama" => Ok(Self::Ollama),
            other => Err(ConfigError::Validation(format!(
                "unsupported llm provider `{other}` (expected disabled|openai|ollama)"
            ))),
        }
    }
}

impl std::str::FromStr for LogFormat {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "compact" => Ok(Self::Compact),
            "pretty" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            other => Err(ConfigError::Validation(format!(
                "unsupported log format `{other}` (expected compact|pretty|json)"
            ))),
        }
    }
}

impl AppConfig {
    pub fn load(options: LoadOptions) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        let maybe_path = resolve_config_path(options.config_path.as_deref());

        if let Some(path) = maybe_path {
            let patch = read_patch(&path)?;
            config.apply_patch(patch);
        } else if options.require_file {
            let expected = options.config_path.unwrap_or_else(|| PathBuf::from("parley.toml"));
            return Err(ConfigError::MissingConfigFile(expected));
        }

        config.apply_env_overrides()?;
        config.apply_overrides(options.overrides);
        config.validate()?;

        Ok(config)
    }

    fn apply_patch(&mut self, patch: ConfigPatch) {
        if let Some(database) = patch.database {
            if let Some(url) = database.url {
                self.database.url = url;
            }
            if let Some(max_connections) = database.max_connections {
                self.database.max_connections = max_connections;
            }
            if let Some(timeout_secs) = database.timeout_secs {
                self.database.timeout_secs = timeout_secs;
            }
        }

        if let Some(llm) = patch.llm {
            if let Some(provider) = llm.provider {
                self.llm.provider = provider;
            }
            if let Some(api_key) = llm.api_key {
                self.llm.api_key = Some(secret_value(api_key));
            }
            if let Some(base_url) = llm.base_url {
                self.llm.base_url = Some(base_url);
            }
            if let Some(model) = llm.model {
                self.llm.model = model;
            }
            if let Some(timeout_secs) = llm.timeout_secs {
                self.llm.timeout_secs = timeout_secs;
            }
        }

        if let Some(policy) = patch.policy {
            if let Some(moderation_enabled) = policy.moderation_enabled {
                self.policy.moderation_enabled = moderation_enabled;
            }
            if let Some(tool_allowlist) = policy.tool_allowlist {
                self.policy.tool_allowlist = tool_allowlist;
            }
            if let Some(limit) = policy.rate_limit_chat_per_minute {
                self.policy.rate_limit_chat_per_minute = limit;
            }
            if let Some(limit) = policy.rate_limit_tool_per_minute {
                self.policy.rate_limit_tool_per_minute = limit;
            }
        }

        if let Some(conversation) = patch.conversation {
            if let Some(history_window) = conversation.history_window {
                self.conversation.history_window = history_window;
            }
            if let Some(min_confidence) = conversation.classifier_min_confidence {
                self.conversation.classifier_min_confidence = min_confidence;
            }
            if let Some(timeout_ms) = conversation.classifier_timeout_ms {
                self.conversation.classifier_timeout_ms = timeout_ms;
            }
            if let Some(timeout_ms) = conversation.tool_timeout_ms {
                self.conversation.tool_timeout_ms = timeout_ms;
            }
            if let Some(ttl) = conversation.session_ttl_secs {
                self.conversation.session_ttl_secs = ttl;
            }
            if let Some(stream_buffer) = conversation.stream_buffer {
                self.conversation.stream_buffer = stream_buffer;
            }
            if let Some(timeout_ms) = conversation.stream_send_timeout_ms {
                self.conversation.stream_send_timeout_ms = timeout_ms;
            }
        }

        if let Some(tools) = patch.tools {
            if let Some(weather_base_url) = tools.weather_base_url {
                self.tools.weather_base_url = Some(weather_base_url);
            }
        }

        if let Some(server) = patch.server {
            if let Some(bind_address) = server.bind_address {
                self.server.bind_address = bind_address;
            }
            if let Some(port) = server.port {
                self.server.port = port;
            }
            if let Some(graceful_shutdown_secs) = server.graceful_shutdown_secs {
                self.server.graceful_shutdown_secs = graceful_shutdown_secs;
            }
        }

        if let Some(logging) = patch.logging {
            if let Some(level) = logging.level {
                self.logging.level = level;
            }
            if let Some(format) = logging.format {
                self.logging.format = format;
            }
        }
    }

    fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Some(value) = read_env("PARLEY_DATABASE_URL") {
            self.database.url = value;
        }
        if let Some(value) = read_env("PARLEY_DATABASE_MAX_CONNECTIONS") {
            self.database.max_connections = parse_u32("PARLEY_DATABASE_MAX_CONNECTIONS", &value)?;
        }
        if let Some(value) = read_env("PARLEY_DATABASE_TIMEOUT_SECS") {
            self.database.timeout_secs = parse_u64("PARLEY_DATABASE_TIMEOUT_SECS", &value)?;
        }

        if let Some(value) = read_env("PARLEY_LLM_PROVIDER") {
            self.llm.provider = value.parse()?;
        }
        if let Some(value) = read_env("PARLEY_LLM_API_KEY") {
            self.llm.api_key = Some(secret_value(value));
        }
        if let Some(value) = read_env("PARLEY_LLM_BASE_URL") {
            self.llm.base_url = Some(value);
        }
        if let Some(value) = read_env("PARLEY_LLM_MODEL") {
            self.llm.model = value;
        }
        if let Some(value) = read_env("PARLEY_LLM_TIMEOUT_SECS") {
            self.llm.timeout_secs = parse_u64("PARLEY_LLM_TIMEOUT_SECS", &value)?;
        }

        if let Some(value) = read_env("PARLEY_POLICY_MODERATION_ENABLED") {
            self.policy.moderation_enabled =
                parse_bool("PARLEY_POLICY_MODERATION_ENABLED", &value)?;
        }
        if let Some(value) = read_env("PARLEY_POLICY_TOOL_ALLOWLIST") {
            self.policy.tool_allowlist = parse_list(&value);
        }
        if let Some(value) = read_env("PARLEY_POLICY_RATE_LIMIT_CHAT_PER_MINUTE") {
            self.policy.rate_limit_chat_per_minute =
                parse_u32("PARLEY_POLICY_RATE_LIMIT_CHAT_PER_MINUTE", &value)?;
        }
        if let Some(value) = read_env("PARLEY_POLICY_RATE_LIMIT_TOOL_PER_MINUTE") {
            self.policy.rate_limit_tool_per_minute =
                parse_u32("PARLEY_POLICY_RATE_LIMIT_TOOL_PER_MINUTE", &value)?;
        }

        if let Some(value) = read_env("PARLEY_CONVERSATION_HISTORY_WINDOW") {
            self.conversation.history_window =
                parse_usize("PARLEY_CONVERSATION_HISTORY_WINDOW", &value)?;
        }
        if let Some(value) = read_env("PARLEY_CONVERSATION_CLASSIFIER_MIN_CONFIDENCE") {
            self.conversation.classifier_min_confidence =
                parse_f32("PARLEY_CONVERSATION_CLASSIFIER_MIN_CONFIDENCE", &value)?;
        }
        if let Some(value) = read_env("PARLEY_CONVERSATION_CLASSIFIER_TIMEOUT_MS") {
            self.conversation.classifier_timeout_ms =
                parse_u64("PARLEY_CONVERSATION_CLASSIFIER_TIMEOUT_MS", &value)?;
        }
        if let Some(value) = read_env("PARLEY_CONVERSATION_TOOL_TIMEOUT_MS") {
            self.conversation.tool_timeout_ms =
                parse_u64("PARLEY_CONVERSATION_TOOL_TIMEOUT_MS", &value)?;
        }
        if let Some(value) = read_env("PARLEY_CONVERSATION_SESSION_TTL_SECS") {
            self.conversation.session_ttl_secs =
                parse_u64("PARLEY_CONVERSATION_SESSION_TTL_SECS", &value)?;
        }
        if let Some(value) = read_env("PARLEY_CONVERSATION_STREAM_BUFFER") {
            self.conversation.stream_buffer =
                parse_usize("PARLEY_CONVERSATION_STREAM_BUFFER", &value)?;
        }
        if let Some(value) = read_env("PARLEY_CONVERSATION_STREAM_SEND_TIMEOUT_MS") {
            self.conversation.stream_send_timeout_ms =
                parse_u64("PARLEY_CONVERSATION_STREAM_SEND_TIMEOUT_MS", &value)?;
        }

        if let Some(value) = read_env("PARLEY_TOOLS_WEATHER_BASE_URL") {
            self.tools.weather_base_url = Some(value);
        }

        if let Some(value) = read_env("PARLEY_SERVER_BIND_ADDRESS") {
            self.server.bind_address = value;
        }
        if let Some(value) = read_env("PARLEY_SERVER_PORT") {
            self.server.port = parse_u16("PARLEY_SERVER_PORT", &value)?;
        }
        if let Some(value) = read_env("PARLEY_SERVER_GRACEFUL_SHUTDOWN_SECS") {
            self.server.graceful_shutdown_secs =
                parse_u64("PARLEY_SERVER_GRACEFUL_SHUTDOWN_SECS", &value)?;
        }

        let log_level = read_env("PARLEY_LOGGING_LEVEL").or_else(|| read_env("PARLEY_LOG_LEVEL"));
        if let Some(value) = log_level {
            self.logging.level = value;
        }
        let log_format =
            read_env("PARLEY_LOGGING_FORMAT").or_else(|| read_env("PARLEY_LOG_FORMAT"));
        if let Some(value) = log_format {
            self.logging.format = value.parse()?;
        }

        Ok(())
    }

    fn apply_overrides(&mut self, overrides: ConfigOverrides) {
        if let Some(database_url) = overrides.database_url {
            self.database.url = database_url;
        }
        if let Some(log_level) = overrides.log_level {
            self.logging.level = log_level;
        }
        if let Some(llm_provider) = overrides.llm_provider {
            self.llm.provider = llm_provider;
        }
        if let Some(llm_model) = overrides.llm_model {
            self.llm.model = llm_model;
        }
        if let Some(moderation_enabled) = overrides.moderation_enabled {
            self.policy.moderation_enabled = moderation_enabled;
        }
        if let Some(port) = overrides.server_port {
            self.server.port = port;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_database(&self.database)?;
        validate_llm(&self.llm)?;
        validate_policy(&self.policy)?;
        validate_conversation(&self.conversation)?;
        validate_tools(&self.tools)?;
        validate_server(&self.server)?;
        validate_logging(&self.logging)?;
        Ok(())
    }
}

fn resolve_config_path(explicit_path: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit_path {
        return path.exists().then_some(path.to_path_buf());
    }

    [PathBuf::from("parley.toml"), PathBuf::from("config/parley.toml")]
        .into_iter()
        .find(|path| path.exists())
}

fn read_patch(path: &Path) -> Result<ConfigPatch, ConfigError> {
    let raw = fs::read_to_string(path)
        .map_err(|source| ConfigError::ReadFile { path: path.to_path_buf(), source })?;

    let interpolated = interpolate_env_vars(&raw)?;
    toml::from_str::<ConfigPatch>(&interpolated)
        .map_err(|source| ConfigError::ParseFile { path: path.to_path_buf(), source })
}

fn interpolate_env_vars(input: &str) -> Result<String, ConfigError> {
    let mut output = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch == '$' && matches!(chars.peek(), Some('{')) {
            chars.next();
            let mut key = String::new();

            loop {
                match chars.next() {
                    Some('}') => break,
                    Some(next) => key.push(next),
                    None => return Err(ConfigError::UnterminatedInterpolation),
                }
            }

            let value = env::var(&key)
                .map_err(|_| ConfigError::MissingEnvInterpolation { var: key.clone() })?;
            output.push_str(&value);
            continue;
        }

        output.push(ch);
    }

    Ok(output)
}

fn validate_database(database: &DatabaseConfig) -> Result<(), ConfigError> {
    let url = database.url.trim();
    let sqlite_url =
        url.starts_with("sqlite://") || url.starts_with("sqlite::") || url == ":memory:";
    if !sqlite_url {
        return Err(ConfigError::Validation(
            "database.url must be a sqlite URL (`sqlite://...`, `sqlite::...`, or `:memory:`)"
                .to_string(),
        ));
    }

    if database.max_connections == 0 {
        return Err(ConfigError::Validation(
            "database.max_connections must be greater than zero".to_string(),
        ));
    }

    if database.timeout_secs == 0 || database.timeout_secs > 300 {
        return Err(ConfigError::Validation(
            "database.timeout_secs must be in range 1..=300".to_string(),
        ));
    }

    Ok(())
}

fn validate_llm(llm: &LlmConfig) -> Result<(), ConfigError> {
    if llm.timeout_secs == 0 || llm.timeout_secs > 300 {
        return Err(ConfigError::Validation(
            "llm.timeout_secs must be in range 1..=300".to_string(),
        ));
    }

    match llm.provider {
        LlmProvider::Disabled => {}
        LlmProvider::OpenAi => {
            let missing = llm
                .api_key
                .as_ref()
                .map(|value| value.expose_secret().trim().is_empty())
                .unwrap_or(true);
            if missing {
                return Err(ConfigError::Validation(
                    "llm.api_key is required for the openai provider".to_string(),
                ));
            }
        }
        LlmProvider::Ollama => {
            let missing =
                llm.base_url.as_ref().map(|value| value.trim().is_empty()).unwrap_or(true);
            if missing {
                return Err(ConfigError::Validation(
                    "llm.base_url is required for the ollama provider".to_string(),
                ));
            }
        }
    }

    if llm.provider != LlmProvider::Disabled && llm.model.trim().is_empty() {
        return Err(ConfigError::Validation("llm.model must not be empty".to_string()));
    }

    Ok(())
}

fn validate_policy(policy: &PolicyConfig) -> Result<(), ConfigError> {
    if policy.tool_allowlist.iter().any(|name| name.trim().is_empty()) {
        return Err(ConfigError::Validation(
            "policy.tool_allowlist must not contain empty tool names".to_string(),
        ));
    }

    Ok(())
}

fn validate_conversation(conversation: &ConversationConfig) -> Result<(), ConfigError> {
    if !(0.0..=1.0).contains(&conversation.classifier_min_confidence) {
        return Err(ConfigError::Validation(
            "conversation.classifier_min_confidence must be in range 0.0..=1.0".to_string(),
        ));
    }

    if conversation.classifier_timeout_ms == 0 || conversation.tool_timeout_ms == 0 {
        return Err(ConfigError::Validation(
            "conversation classifier/tool timeouts must be greater than zero".to_string(),
        ));
    }

    if conversation.stream_buffer == 0 {
        return Err(ConfigError::Validation(
            "conversation.stream_buffer must be greater than zero".to_string(),
        ));
    }

    if conversation.stream_send_timeout_ms == 0 {
        return Err(ConfigError::Validation(
            "conversation.stream_send_timeout_ms must be greater than zero".to_string(),
        ));
    }

    Ok(())
}

fn validate_tools(tools: &ToolsConfig) -> Result<(), ConfigError> {
    if let Some(base_url) = &tools.weather_base_url {
        if !base_url.starts_with("http://") && !base_url.starts_with("https://") {
            return Err(ConfigError::Validation(
                "tools.weather_base_url must start with http:// or https://".to_string(),
            ));
        }
    }

    Ok(())
}

fn validate_server(server: &ServerConfig) -> Result<(), ConfigError> {
    if server.port == 0 {
        return Err(ConfigError::Validation("server.port must be greater than zero".to_string()));
    }

    if server.graceful_shutdown_secs == 0 {
        return Err(ConfigError::Validation(
            "server.graceful_shutdown_secs must be greater than zero".to_string(),
        ));
    }

    Ok(())
}

fn validate_logging(logging: &LoggingConfig) -> Result<(), ConfigError> {
    let level = logging.level.trim().to_ascii_lowercase();
    match level.as_str() {
        "trace" | "debug" | "info" | "warn" | "error" => Ok(()),
        _ => Err(ConfigError::Validation(
            "logging.level must be one of trace|debug|info|warn|error".to_string(),
        )),
    }
}

fn read_env(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn invalid(key: &str, value: &str) -> ConfigError {
    ConfigError::InvalidEnvOverride { key: key.to_string(), value: value.to_string() }
}

fn parse_u16(key: &str, value: &str) -> Result<u16, ConfigError> {
    value.parse::<u16>().map_err(|_| invalid(key, value))
}

fn parse_u32(key: &str, value: &str) -> Result<u32, ConfigError> {
    value.parse::<u32>().map_err(|_| invalid(key, value))
}

fn parse_u64(key: &str, value: &str) -> Result<u64, ConfigError> {
    value.parse::<u64>().map_err(|_| invalid(key, value))
}

fn parse_usize(key: &str, value: &str) -> Result<usize, ConfigError> {
    value.parse::<usize>().map_err(|_| invalid(key, value))
}

fn parse_f32(key: &str, value: &str) -> Result<f32, ConfigError> {
    value.parse::<f32>().map_err(|_| invalid(key, value))
}

fn parse_bool(key: &str, value: &str) -> Result<bool, ConfigError> {
    value.parse::<bool>().map_err(|_| invalid(key, value))
}

/// Comma-separated list; blank entries are dropped.
fn parse_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(ToString::to_string)
        .collect()
}

#[derive(Debug, Default, Deserialize)]
struct ConfigPatch {
    database: Option<DatabasePatch>,
    llm: Option<LlmPatch>,
    policy: Option<PolicyPatch>,
    conversation: Option<ConversationPatch>,
    tools: Option<ToolsPatch>,
    server: Option<ServerPatch>,
    logging: Option<LoggingPatch>,
}

#[derive(Debug, Default, Deserialize)]
struct DatabasePatch {
    url: Option<String>,
    max_connections: Option<u32>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct LlmPatch {
    provider: Option<LlmProvider>,
    api_key: Option<String>,
    base_url: Option<String>,
    model: Option<String>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct PolicyPatch {
    moderation_enabled: Option<bool>,
    tool_allowlist: Option<Vec<String>>,
    rate_limit_chat_per_minute: Option<u32>,
    rate_limit_tool_per_minute: Option<u32>,
}

#[derive(Debug, Default, Deserialize)]
struct ConversationPatch {
    history_window: Option<usize>,
    classifier_min_confidence: Option<f32>,
    classifier_timeout_ms: Option<u64>,
    tool_timeout_ms: Option<u64>,
    session_ttl_secs: Option<u64>,
    stream_buffer: Option<usize>,
    stream_send_timeout_ms: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct ToolsPatch {
    weather_base_url: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct ServerPatch {
    bind_address: Option<String>,
    port: Option<u16>,
    graceful_shutdown_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct LoggingPatch {
    level: Option<String>,
    format: Option<LogFormat>,
}
