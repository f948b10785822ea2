use serde::{Deserialize, Serialize};
use spark_contracts::{classify, IdentifierKind, DEFAULT_API_BASE};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config {0}")]
    Read(String),
    #[error("config is not valid yaml: {0}")]
    Parse(String),
    #[error("cannot load config schema: {0}")]
    SchemaLoad(String),
    #[error("config does not match schema: {0}")]
    SchemaValidation(String),
    #[error("config rejected: {0}")]
    UnsupportedConfig(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub server: Server,
    #[serde(default)]
    pub api: Api,
    pub bot: Bot,
    pub webhook: Webhook,
    #[serde(default)]
    pub cache: Cache,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Server {
    pub listen_addr: String,
    #[serde(default = "default_webhook_path")]
    pub webhook_path: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Api {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_token_env")]
    pub token_env: String,
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default = "default_retry_after_secs")]
    pub retry_after_default_secs: u64,
}

impl Default for Api {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            token_env: default_token_env(),
            token: None,
            timeout_ms: default_timeout_ms(),
            retry_after_default_secs: default_retry_after_secs(),
        }
    }
}

impl Api {
    /// Inline token wins, then the named environment variable.
    pub fn resolve_token(&self) -> Result<String, ConfigError> {
        if let Some(token) = self.token.as_ref().filter(|v| !v.trim().is_empty()) {
            return Ok(token.clone());
        }
        match std::env::var(&self.token_env) {
            Ok(v) if !v.trim().is_empty() => Ok(v),
            _ => Err(ConfigError::UnsupportedConfig(format!(
                "no api token: set api.token or the {} environment variable",
                self.token_env
            ))),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Bot {
    pub id: String,
    pub email: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Webhook {
    pub target_url: String,
    #[serde(default = "default_webhook_name")]
    pub name: String,
    #[serde(default)]
    pub ephemeral: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Cache {
    #[serde(default)]
    pub reload_interval_secs: u64,
}

fn default_webhook_path() -> String {
    "/incoming".to_string()
}

fn default_base_url() -> String {
    DEFAULT_API_BASE.to_string()
}

fn default_token_env() -> String {
    "SPARK_TOKEN".to_string()
}

fn default_timeout_ms() -> u64 {
    10_000
}

fn default_retry_after_secs() -> u64 {
    15
}

fn default_webhook_name() -> String {
    "Spark Errbot Webhook".to_string()
}

/// Reads, schema-checks and runtime-checks a YAML config file.
pub fn load_and_validate(path: &str) -> Result<Config, ConfigError> {
    let text = std::fs::read_to_string(path)
        .map_err(|e| ConfigError::Read(format!("{path}: {e}")))?;
    parse_config(&text)
}

pub fn parse_config(text: &str) -> Result<Config, ConfigError> {
    let yaml: serde_yaml::Value =
        serde_yaml::from_str(text).map_err(|e| ConfigError::Parse(e.to_string()))?;
    let document =
        serde_json::to_value(yaml).map_err(|e| ConfigError::Parse(e.to_string()))?;
    check_schema(&document)?;

    let cfg = Config::deserialize(document).map_err(|e| ConfigError::Parse(e.to_string()))?;
    validate_runtime_support(&cfg)?;
    Ok(cfg)
}

const SCHEMA_FILE: &str = "config/config.schema.json";

fn locate_schema() -> Result<std::path::PathBuf, ConfigError> {
    let workspace = std::path::Path::new(env!("CARGO_MANIFEST_DIR")).join("../..");
    [std::path::PathBuf::from(SCHEMA_FILE), workspace.join(SCHEMA_FILE)]
        .into_iter()
        .find(|p| p.is_file())
        .ok_or_else(|| {
            ConfigError::SchemaLoad(format!(
                "{SCHEMA_FILE} not found in the working directory or the workspace"
            ))
        })
}

fn check_schema(document: &serde_json::Value) -> Result<(), ConfigError> {
    let schema_text = std::fs::read_to_string(locate_schema()?)
        .map_err(|e| ConfigError::SchemaLoad(e.to_string()))?;
    let schema = serde_json::from_str::<serde_json::Value>(&schema_text)
        .map_err(|e| ConfigError::SchemaLoad(e.to_string()))?;
    let validator =
        jsonschema::validator_for(&schema).map_err(|e| ConfigError::SchemaLoad(e.to_string()))?;
    validator
        .validate(document)
        .map_err(|first| ConfigError::SchemaValidation(first.to_string()))
}

fn validate_runtime_support(cfg: &Config) -> Result<(), ConfigError> {
    if classify(&cfg.bot.id) != IdentifierKind::Person {
        return Err(ConfigError::UnsupportedConfig(format!(
            "bot.id={} is not a person id",
            cfg.bot.id
        )));
    }
    if classify(&cfg.bot.email) != IdentifierKind::Email {
        return Err(ConfigError::UnsupportedConfig(format!(
            "bot.email={} is not an email address",
            cfg.bot.email
        )));
    }
    if cfg.api.timeout_ms == 0 {
        return Err(ConfigError::UnsupportedConfig(
            "api.timeout_ms must be >= 1".to_string(),
        ));
    }
    if !(cfg.webhook.target_url.starts_with("http://")
        || cfg.webhook.target_url.starts_with("https://"))
    {
        return Err(ConfigError::UnsupportedConfig(format!(
            "webhook.target_url={} must be an http(s) url",
            cfg.webhook.target_url
        )));
    }
    if !cfg.server.webhook_path.starts_with('/') {
        return Err(ConfigError::UnsupportedConfig(
            "server.webhook_path must start with '/'".to_string(),
        ));
    }
    Ok(())
}
