//! Configuration loader and validator for the Telegram→commerce bot.
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("YAML parse error: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("Invalid configuration: {0}")]
    Invalid(&'static str),
}

/// Root configuration struct mirroring the YAML schema exactly.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Config {
    pub app: App,
    pub telegram: Telegram,
    #[serde(default)]
    pub delivery: Delivery,
    pub vision: Vision,
    pub commerce: Commerce,
}

/// App-level settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct App {
    pub data_dir: String,
    pub listen_addr: String,
    /// Externally reachable base URL; the webhook is registered under it.
    #[serde(default)]
    pub public_base_url: String,
    #[serde(default = "default_conversation_ttl")]
    pub conversation_ttl_secs: u64,
    #[serde(default = "default_media_group_window")]
    pub media_group_window_ms: u64,
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_secs: u64,
}

/// Telegram bot settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Telegram {
    pub bot_token: String,
    #[serde(default)]
    pub allowed_users: Vec<i64>,
    #[serde(default = "default_webhook_path")]
    pub webhook_path: String,
    #[serde(default)]
    pub webhook_secret: Option<String>,
}

/// Retry policy for messages sent back to Telegram.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Delivery {
    pub max_attempts: u32,
    pub attempt_timeout_ms: u64,
    pub backoff_step_ms: u64,
}

impl Default for Delivery {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            attempt_timeout_ms: 10_000,
            backoff_step_ms: 1_000,
        }
    }
}

/// Multimodal model endpoint (OpenAI-compatible chat completions).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Vision {
    pub api_base: String,
    pub api_key: String,
    pub model: String,
    #[serde(default = "default_vision_timeout")]
    pub timeout_secs: u64,
}

/// Commerce API settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Commerce {
    pub base_url: String,
    pub token: String,
}

fn default_conversation_ttl() -> u64 {
    1800
}

fn default_media_group_window() -> u64 {
    2000
}

fn default_sweep_interval() -> u64 {
    60
}

fn default_webhook_path() -> String {
    "/telegram/webhook".to_string()
}

fn default_vision_timeout() -> u64 {
    60
}

impl Config {
    /// Ensure required directories exist (creates `app.data_dir` if missing).
    pub fn ensure_dirs(&self) -> Result<(), std::io::Error> {
        if self.app.data_dir.trim().is_empty() {
            return Ok(());
        }
        fs::create_dir_all(&self.app.data_dir)
    }

    pub fn conversation_ttl(&self) -> Duration {
        Duration::from_secs(self.app.conversation_ttl_secs)
    }

    pub fn media_group_window(&self) -> Duration {
        Duration::from_millis(self.app.media_group_window_ms)
    }

    /// Full URL Telegram should post updates to, if a public base URL is set.
    pub fn webhook_url(&self) -> Option<String> {
        let base = self.app.public_base_url.trim().trim_end_matches('/');
        if base.is_empty() {
            return None;
        }
        Some(format!("{}{}", base, self.telegram.webhook_path))
    }

    /// Secrets and the public URL may come from the environment instead of the file.
    fn apply_env_overrides(&mut self) {
        let read = |key: &str| std::env::var(key).ok().filter(|v| !v.trim().is_empty());
        if let Some(v) = read("TELEGRAM_BOT_TOKEN") {
            self.telegram.bot_token = v;
        }
        if let Some(v) = read("VISION_API_KEY") {
            self.vision.api_key = v;
        }
        if let Some(v) = read("COMMERCE_API_TOKEN") {
            self.commerce.token = v;
        }
        if let Some(v) = read("PUBLIC_BASE_URL") {
            self.app.public_base_url = v;
        }
    }
}

/// Load configuration from a YAML file, apply env overrides and validate it.
/// - If `path` is None, uses `config.yaml` in the current working directory.
pub fn load(path: Option<&Path>) -> Result<Config, ConfigError> {
    let path = path.unwrap_or_else(|| Path::new("config.yaml"));
    let content = fs::read_to_string(path)?;
    let mut cfg: Config = serde_yaml::from_str(&content)?;
    cfg.apply_env_overrides();
    validate(&cfg)?;
    Ok(cfg)
}

/// Validate a configuration instance.
fn validate(cfg: &Config) -> Result<(), ConfigError> {
    if cfg.app.data_dir.trim().is_empty() {
        return Err(ConfigError::Invalid("app.data_dir must be non-empty"));
    }
    if cfg.app.listen_addr.parse::<std::net::SocketAddr>().is_err() {
        return Err(ConfigError::Invalid("app.listen_addr must be a socket address"));
    }
    if cfg.app.conversation_ttl_secs == 0 {
        return Err(ConfigError::Invalid("app.conversation_ttl_secs must be > 0"));
    }
    if cfg.app.sweep_interval_secs == 0 {
        return Err(ConfigError::Invalid("app.sweep_interval_secs must be > 0"));
    }

    if cfg.telegram.bot_token.trim().is_empty() {
        return Err(ConfigError::Invalid("telegram.bot_token must be non-empty"));
    }
    if !cfg.telegram.webhook_path.starts_with('/') {
        return Err(ConfigError::Invalid("telegram.webhook_path must start with '/'"));
    }

    if cfg.delivery.max_attempts == 0 {
        return Err(ConfigError::Invalid("delivery.max_attempts must be > 0"));
    }
    if cfg.delivery.attempt_timeout_ms == 0 {
        return Err(ConfigError::Invalid("delivery.attempt_timeout_ms must be > 0"));
    }

    if cfg.vision.api_base.trim().is_empty() {
        return Err(ConfigError::Invalid("vision.api_base must be non-empty"));
    }
    if cfg.vision.model.trim().is_empty() {
        return Err(ConfigError::Invalid("vision.model must be non-empty"));
    }
    // An empty vision.api_key is allowed: analysis then always degrades to manual entry.

    if cfg.commerce.base_url.trim().is_empty() {
        return Err(ConfigError::Invalid("commerce.base_url must be non-empty"));
    }
    if cfg.commerce.token.trim().is_empty() {
        return Err(ConfigError::Invalid("commerce.token must be non-empty"));
    }

    Ok(())
}

/// Returns the example YAML shipped with the bot.
pub fn example() -> &'static str {
    r#"app:
  data_dir: "./data"
  listen_addr: "0.0.0.0:8080"
  public_base_url: "https://bot.example.com"
  conversation_ttl_secs: 1800
  media_group_window_ms: 2000
  sweep_interval_secs: 60

telegram:
  bot_token: "YOUR_TELEGRAM_BOT_TOKEN"
  allowed_users:
    - 123456789
  webhook_path: "/telegram/webhook"
  webhook_secret: "CHANGE_ME"

delivery:
  max_attempts: 5
  attempt_timeout_ms: 10000
  backoff_step_ms: 1000

vision:
  api_base: "https://api.openai.com/v1/"
  api_key: "YOUR_VISION_API_KEY"
  model: "gpt-4o-mini"
  timeout_secs: 60

commerce:
  base_url: "https://shop.example.com/api/"
  token: "YOUR_COMMERCE_API_TOKEN"
"#
}
