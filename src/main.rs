use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use teloxide::prelude::*;
use tg_stockbot::commerce::CommerceClient;
use tg_stockbot::delivery::{Outbound, RetryPolicy, TelegramApi};
use tg_stockbot::handlers::{self, App};
use tg_stockbot::media_group::MediaGroupAggregator;
use tg_stockbot::vision::OpenAiVision;
use tg_stockbot::{config, db, webhook};
use tokio::sync::mpsc;
use tracing::{error, info, warn};

#[derive(Debug, Parser)]
#[command(author, version, about)]
struct Args {
    /// Path to YAML config file
    #[arg(long, default_value = "config.yaml")]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_target(false)
        .compact()
        .init();

    let args = Args::parse();
    let cfg = config::load(Some(&args.config))?;
    cfg.ensure_dirs()?;

    let database_url = std::env::var("DATABASE_URL")
        .unwrap_or_else(|_| format!("sqlite://{}/stockbot.db", cfg.app.data_dir));
    let pool = db::init_pool(&database_url).await?;
    db::run_migrations(&pool).await?;

    let bot = Bot::new(cfg.telegram.bot_token.clone());
    let outbound = Outbound::new(
        Arc::new(TelegramApi::new(bot.clone())),
        RetryPolicy::from(&cfg.delivery),
    );
    let commerce = Arc::new(CommerceClient::new(&cfg.commerce.base_url, cfg.commerce.token.clone())?);
    let vision = Arc::new(OpenAiVision::from_config(&cfg.vision));
    if cfg.vision.api_key.trim().is_empty() {
        warn!("vision.api_key is empty; photos will always need manual entry");
    }

    let (batch_tx, batch_rx) = mpsc::unbounded_channel();
    let aggregator = MediaGroupAggregator::new(pool.clone(), cfg.media_group_window(), batch_tx);
    let app = App::new(
        pool.clone(),
        outbound,
        commerce,
        vision,
        aggregator,
        cfg.conversation_ttl(),
        cfg.telegram.allowed_users.clone(),
    );

    tokio::spawn(handlers::run_batches(app.clone(), batch_rx));

    // Expiry sweeper
    let sweep_pool = pool.clone();
    let sweep_every = Duration::from_secs(cfg.app.sweep_interval_secs);
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(sweep_every);
        loop {
            ticker.tick().await;
            match db::purge_expired(&sweep_pool).await {
                Ok(counts) if counts.total() > 0 => info!(
                    conversations = counts.conversations,
                    media_groups = counts.media_groups,
                    photo_adds = counts.pending_photo_adds,
                    updates = counts.seen_updates,
                    "purged expired state"
                ),
                Ok(_) => {}
                Err(err) => error!(?err, "expiry sweep failed"),
            }
        }
    });

    match cfg.webhook_url() {
        Some(url) => match webhook::register(&bot, &url, cfg.telegram.webhook_secret.as_deref()).await {
            Ok(()) => info!(%url, "webhook registered"),
            Err(err) => warn!(?err, %url, "could not register webhook; continuing"),
        },
        None => info!("app.public_base_url not set; register the webhook with webhook_admin"),
    }

    let router = webhook::router(app, &cfg.telegram.webhook_path, cfg.telegram.webhook_secret.clone());
    let listener = tokio::net::TcpListener::bind(&cfg.app.listen_addr)
        .await
        .with_context(|| format!("failed to bind {}", cfg.app.listen_addr))?;
    info!(addr = %cfg.app.listen_addr, path = %cfg.telegram.webhook_path, "starting webhook server");
    axum::serve(listener, router)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("shutting down");
        })
        .await?;

    Ok(())
}
