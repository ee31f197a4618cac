//! Outbound messages to Telegram with bounded retries.
use crate::config;
use anyhow::{Context, Result};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use teloxide::net::Download;
use teloxide::prelude::*;
use teloxide::types::ParseMode;
use tracing::{error, info, instrument, warn};

/// The slice of the Telegram Bot API the bot talks to.
#[async_trait]
pub trait ChatApi: Send + Sync {
    /// Send a message rendered with Telegram's HTML parse mode.
    async fn send_html(&self, chat_id: i64, html: &str) -> Result<()>;

    /// Public download URL for a file id.
    async fn file_url(&self, file_id: &str) -> Result<String>;

    async fn download(&self, file_id: &str) -> Result<Vec<u8>>;
}

pub struct TelegramApi {
    bot: Bot,
}

impl TelegramApi {
    pub fn new(bot: Bot) -> Self {
        Self { bot }
    }
}

#[async_trait]
impl ChatApi for TelegramApi {
    async fn send_html(&self, chat_id: i64, html: &str) -> Result<()> {
        self.bot
            .send_message(ChatId(chat_id), html)
            .parse_mode(ParseMode::Html)
            .await?;
        Ok(())
    }

    async fn file_url(&self, file_id: &str) -> Result<String> {
        let file = self.bot.get_file(file_id).await?;
        let url = self
            .bot
            .api_url()
            .join(&format!("file/bot{}/{}", self.bot.token(), file.path))
            .context("invalid Telegram file URL")?;
        Ok(url.to_string())
    }

    async fn download(&self, file_id: &str) -> Result<Vec<u8>> {
        let file = self.bot.get_file(file_id).await?;
        let mut buf = Vec::with_capacity(file.meta.size as usize);
        self.bot.download_file(&file.path, &mut buf).await?;
        Ok(buf)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub attempt_timeout: Duration,
    /// Wait after attempt `n` is `n * backoff_step`.
    pub backoff_step: Duration,
}

impl From<&config::Delivery> for RetryPolicy {
    fn from(cfg: &config::Delivery) -> Self {
        Self {
            max_attempts: cfg.max_attempts.max(1),
            attempt_timeout: Duration::from_millis(cfg.attempt_timeout_ms),
            backoff_step: Duration::from_millis(cfg.backoff_step_ms),
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&config::Delivery::default())
    }
}

/// Best-effort sender; callers only learn whether the message got through.
#[derive(Clone)]
pub struct Outbound {
    api: Arc<dyn ChatApi>,
    policy: RetryPolicy,
}

impl Outbound {
    pub fn new(api: Arc<dyn ChatApi>, policy: RetryPolicy) -> Self {
        Self { api, policy }
    }

    pub fn api(&self) -> &Arc<dyn ChatApi> {
        &self.api
    }

    #[instrument(skip_all, fields(chat_id))]
    pub async fn send(&self, chat_id: i64, html: &str) -> bool {
        let max = self.policy.max_attempts.max(1);
        for attempt in 1..=max {
            match tokio::time::timeout(self.policy.attempt_timeout, self.api.send_html(chat_id, html))
                .await
            {
                Ok(Ok(())) => {
                    if attempt > 1 {
                        info!(chat_id, attempt, "message delivered after retry");
                    }
                    return true;
                }
                Ok(Err(err)) => warn!(?err, chat_id, attempt, "telegram send failed"),
                Err(_) => warn!(
                    chat_id,
                    attempt,
                    timeout_ms = self.policy.attempt_timeout.as_millis() as u64,
                    "telegram send timed out"
                ),
            }
            if attempt < max {
                tokio::time::sleep(self.policy.backoff_step * attempt).await;
            }
        }
        error!(chat_id, attempts = max, "giving up on telegram message");
        false
    }
}
