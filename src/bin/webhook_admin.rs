use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use std::fs;
use std::path::PathBuf;
use teloxide::prelude::*;
use tg_stockbot::config::{App as AppCfg, Telegram as TelegramCfg};
use tg_stockbot::webhook;

#[derive(Debug, Parser)]
#[command(author, version, about = "Manage the bot's Telegram webhook registration")]
struct Args {
    /// Path to YAML config file (reads only `app` and `telegram`)
    #[arg(long, default_value = "config.yaml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Register the webhook (defaults to app.public_base_url + telegram.webhook_path)
    Set {
        #[arg(long)]
        url: Option<String>,
    },
    /// Remove the webhook registration
    Delete {
        /// Also drop updates Telegram is still holding
        #[arg(long, default_value_t = false)]
        drop_pending: bool,
    },
    /// Print the current registration as reported by Telegram
    Info,
}

#[derive(Debug, serde::Deserialize)]
struct WebhookOnlyConfig {
    app: AppCfg,
    telegram: TelegramCfg,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_target(false)
        .compact()
        .init();

    let args = Args::parse();
    let content = fs::read_to_string(&args.config)?;
    let mut cfg: WebhookOnlyConfig = serde_yaml::from_str(&content)?;
    if let Ok(token) = std::env::var("TELEGRAM_BOT_TOKEN") {
        cfg.telegram.bot_token = token;
    }
    if let Ok(base) = std::env::var("PUBLIC_BASE_URL") {
        cfg.app.public_base_url = base;
    }
    if cfg.telegram.bot_token.trim().is_empty() {
        bail!("telegram.bot_token must be non-empty");
    }
    let bot = Bot::new(cfg.telegram.bot_token.clone());

    match args.command {
        Command::Set { url } => {
            let url = match url {
                Some(url) => url,
                None => {
                    let base = cfg.app.public_base_url.trim().trim_end_matches('/');
                    if base.is_empty() {
                        bail!("pass --url or set app.public_base_url");
                    }
                    format!("{}{}", base, cfg.telegram.webhook_path)
                }
            };
            webhook::register(&bot, &url, cfg.telegram.webhook_secret.as_deref()).await?;
            println!("webhook set to {}", url);
        }
        Command::Delete { drop_pending } => {
            bot.delete_webhook().drop_pending_updates(drop_pending).await?;
            println!("webhook deleted");
        }
        Command::Info => {
            let info = bot.get_webhook_info().await?;
            println!("{:#?}", info);
        }
    }
    Ok(())
}
