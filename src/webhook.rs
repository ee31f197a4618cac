//! Telegram webhook endpoint. Every request is acknowledged with `200 OK`;
//! the update itself is handled on a spawned task.
use crate::db;
use crate::handlers::{self, App};
use anyhow::Context;
use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::routing::{get, post};
use axum::Router;
use std::sync::Arc;
use std::time::Duration;
use teloxide::prelude::*;
use teloxide::types::Update;
use tower_http::trace::TraceLayer;
use tracing::{debug, error, warn};

pub const SECRET_HEADER: &str = "x-telegram-bot-api-secret-token";

/// How long an update id is remembered for redelivery detection.
pub const SEEN_UPDATE_TTL: Duration = Duration::from_secs(24 * 60 * 60);

#[derive(Clone)]
struct WebhookState {
    app: App,
    secret: Option<Arc<str>>,
}

pub fn router(app: App, path: &str, secret: Option<String>) -> Router {
    let state = WebhookState {
        app,
        secret: secret.filter(|s| !s.is_empty()).map(Arc::from),
    };
    Router::new()
        .route("/health", get(health))
        .route(path, post(receive))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

async fn health() -> &'static str {
    "ok"
}

async fn receive(State(state): State<WebhookState>, headers: HeaderMap, body: Bytes) -> StatusCode {
    if let Some(expected) = state.secret.as_deref() {
        let provided = headers.get(SECRET_HEADER).and_then(|v| v.to_str().ok());
        if provided != Some(expected) {
            warn!("webhook call with a missing or wrong secret token; dropping");
            return StatusCode::OK;
        }
    }

    let update: Update = match serde_json::from_slice(&body) {
        Ok(update) => update,
        Err(err) => {
            warn!(%err, bytes = body.len(), "unparsable webhook body; acknowledging anyway");
            return StatusCode::OK;
        }
    };

    tokio::spawn(async move {
        if let Err(err) = dispatch(&state.app, update).await {
            error!(?err, "failed to handle update");
        }
    });
    StatusCode::OK
}

async fn dispatch(app: &App, update: Update) -> anyhow::Result<()> {
    let update_id = i64::from(update.id);
    if !db::mark_update_seen(&app.pool, update_id, SEEN_UPDATE_TTL).await? {
        debug!(update_id, "redelivered update; skipping");
        return Ok(());
    }
    let Some(event) = handlers::event_from_update(&update) else {
        debug!(update_id, "update carries no message");
        return Ok(());
    };
    handlers::handle_event(app, event).await
}

/// Point Telegram at `url`, optionally with a secret echoed back in [`SECRET_HEADER`].
pub async fn register(bot: &Bot, url: &str, secret: Option<&str>) -> anyhow::Result<()> {
    let url = reqwest::Url::parse(url).with_context(|| format!("invalid webhook URL {url}"))?;
    let mut request = bot.set_webhook(url);
    if let Some(secret) = secret.filter(|s| !s.is_empty()) {
        request = request.secret_token(secret.to_string());
    }
    request.await.context("setWebhook failed")?;
    Ok(())
}
