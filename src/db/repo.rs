use super::model::{AppendOutcome, PurgeCounts};
use crate::model::{Conversation, MediaBatch, MediaItem, MediaKind, PendingPhotoAdd};
use anyhow::{anyhow, Context, Result};
use chrono::Utc;
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::Row;
use sqlx::SqlitePool;
use std::time::Duration;
use tracing::{instrument, warn};

pub type Pool = SqlitePool;

pub async fn init_pool(database_url: &str) -> Result<Pool> {
    let normalized = prepare_sqlite_url(database_url);
    let pool = SqlitePoolOptions::new()
        .max_connections(8)
        .connect(&normalized)
        .await?;
    // WAL lets the webhook handlers read while the sweeper writes.
    sqlx::query("PRAGMA journal_mode=WAL;")
        .execute(&pool)
        .await?;
    sqlx::query("PRAGMA synchronous=FULL;")
        .execute(&pool)
        .await?;
    sqlx::query("PRAGMA busy_timeout=5000;")
        .execute(&pool)
        .await?;
    Ok(pool)
}

/// If using a file-backed SQLite URL, expand a leading `~/`, ensure the parent
/// directory exists and ask SQLite to create the file. Leaves in-memory URLs
/// untouched. Returns possibly-updated URL.
fn prepare_sqlite_url(url: &str) -> String {
    if !url.starts_with("sqlite:") || url.starts_with("sqlite::memory") {
        return url.to_string();
    }

    let rest = &url["sqlite:".len()..];
    let path_with_query = rest.strip_prefix("//").unwrap_or(rest);
    let (path_part, query_part) = match path_with_query.split_once('?') {
        Some((p, q)) => (p, Some(q)),
        None => (path_with_query, None),
    };
    if path_part.is_empty() {
        return url.to_string();
    }

    let expanded_path = match (path_part.strip_prefix("~/"), std::env::var("HOME")) {
        (Some(rest), Ok(home)) => format!("{}/{}", home.trim_end_matches('/'), rest),
        _ => path_part.to_string(),
    };

    if let Some(parent) = std::path::Path::new(&expanded_path).parent() {
        if !parent.as_os_str().is_empty() {
            let _ = std::fs::create_dir_all(parent);
        }
    }

    let mut rebuilt = format!("sqlite://{}", expanded_path);
    match query_part {
        Some(q) if q.contains("mode=") => {
            rebuilt.push('?');
            rebuilt.push_str(q);
        }
        Some(q) => {
            rebuilt.push('?');
            rebuilt.push_str(q);
            rebuilt.push_str("&mode=rwc");
        }
        None => rebuilt.push_str("?mode=rwc"),
    }
    rebuilt
}

pub async fn run_migrations(pool: &Pool) -> Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

fn expiry_after(ttl: Duration) -> i64 {
    now_ms().saturating_add(i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX))
}

fn decode_list(raw: &str) -> Vec<String> {
    serde_json::from_str(raw).unwrap_or_default()
}

fn encode_list(items: &[String]) -> Result<String> {
    serde_json::to_string(items).context("failed to encode list")
}

// ---------------------------------------------------------------------------
// Conversation state
// ---------------------------------------------------------------------------

/// Current dialogue state for a user. Missing, expired or unreadable rows read as idle.
#[instrument(skip_all)]
pub async fn load_conversation(pool: &Pool, user_id: i64) -> Result<Conversation> {
    let data: Option<String> = sqlx::query_scalar(
        "SELECT data FROM conversations WHERE user_id = ? AND expires_at > ?",
    )
    .bind(user_id)
    .bind(now_ms())
    .fetch_optional(pool)
    .await?;

    let Some(data) = data else {
        return Ok(Conversation::Idle);
    };
    match serde_json::from_str::<Conversation>(&data) {
        Ok(conv) => Ok(conv),
        Err(err) => {
            warn!(?err, user_id, "discarding unreadable conversation state");
            clear_conversation(pool, user_id).await?;
            Ok(Conversation::Idle)
        }
    }
}

/// Overwrite the user's state. Saving `Idle` removes the row.
#[instrument(skip_all)]
pub async fn save_conversation(
    pool: &Pool,
    user_id: i64,
    chat_id: i64,
    conv: &Conversation,
    ttl: Duration,
) -> Result<()> {
    if matches!(conv, Conversation::Idle) {
        clear_conversation(pool, user_id).await?;
        return Ok(());
    }
    let data = serde_json::to_string(conv).context("failed to encode conversation")?;
    sqlx::query(
        "INSERT INTO conversations (user_id, chat_id, action, data, updated_at, expires_at) \
         VALUES (?, ?, ?, ?, ?, ?) \
         ON CONFLICT(user_id) DO UPDATE SET chat_id = excluded.chat_id, action = excluded.action, \
         data = excluded.data, updated_at = excluded.updated_at, expires_at = excluded.expires_at",
    )
    .bind(user_id)
    .bind(chat_id)
    .bind(conv.action().as_str())
    .bind(data)
    .bind(now_ms())
    .bind(expiry_after(ttl))
    .execute(pool)
    .await?;
    Ok(())
}

/// Returns whether an unexpired state was removed.
#[instrument(skip_all)]
pub async fn clear_conversation(pool: &Pool, user_id: i64) -> Result<bool> {
    let existed: Option<i64> = sqlx::query_scalar(
        "DELETE FROM conversations WHERE user_id = ? RETURNING expires_at",
    )
    .bind(user_id)
    .fetch_optional(pool)
    .await?;
    Ok(existed.map_or(false, |exp| exp > now_ms()))
}

// ---------------------------------------------------------------------------
// Media groups
// ---------------------------------------------------------------------------

fn split_item(item: &MediaItem) -> (Vec<String>, Vec<String>) {
    match item.kind {
        MediaKind::Photo => (vec![item.file_id.clone()], Vec::new()),
        MediaKind::Video => (Vec::new(), vec![item.file_id.clone()]),
    }
}

/// Add one item to the buffer of `group_id`, creating or restarting the buffer as needed.
#[allow(clippy::too_many_arguments)]
#[instrument(skip_all)]
pub async fn append_media(
    pool: &Pool,
    group_id: &str,
    chat_id: i64,
    user_id: i64,
    item: &MediaItem,
    caption: Option<&str>,
    retention: Duration,
) -> Result<AppendOutcome> {
    let (photos, videos) = split_item(item);
    let photos = encode_list(&photos)?;
    let videos = encode_list(&videos)?;

    // Each step is a single conditional statement; a lost race falls through to the next.
    for _ in 0..3 {
        let now = now_ms();
        let inserted = sqlx::query(
            "INSERT INTO media_groups (group_id, chat_id, user_id, photos, videos, caption, first_seen_at, expires_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?) ON CONFLICT(group_id) DO NOTHING",
        )
        .bind(group_id)
        .bind(chat_id)
        .bind(user_id)
        .bind(&photos)
        .bind(&videos)
        .bind(caption)
        .bind(now)
        .bind(expiry_after(retention))
        .execute(pool)
        .await?;
        if inserted.rows_affected() == 1 {
            return Ok(AppendOutcome::Created);
        }

        let (photos_expr, videos_expr) = match item.kind {
            MediaKind::Photo => ("json_insert(photos, '$[#]', ?)", "videos"),
            MediaKind::Video => ("photos", "json_insert(videos, '$[#]', ?)"),
        };
        let sql = format!(
            "UPDATE media_groups SET photos = {}, videos = {}, caption = COALESCE(?, caption) \
             WHERE group_id = ? AND flushed_at IS NULL",
            photos_expr, videos_expr
        );
        let appended = sqlx::query(&sql)
            .bind(&item.file_id)
            .bind(caption)
            .bind(group_id)
            .execute(pool)
            .await?;
        if appended.rows_affected() == 1 {
            return Ok(AppendOutcome::Appended);
        }

        let restarted = sqlx::query(
            "UPDATE media_groups SET chat_id = ?, user_id = ?, photos = ?, videos = ?, caption = ?, \
             first_seen_at = ?, flushed_at = NULL, expires_at = ? \
             WHERE group_id = ? AND flushed_at IS NOT NULL",
        )
        .bind(chat_id)
        .bind(user_id)
        .bind(&photos)
        .bind(&videos)
        .bind(caption)
        .bind(now)
        .bind(expiry_after(retention))
        .bind(group_id)
        .execute(pool)
        .await?;
        if restarted.rows_affected() == 1 {
            return Ok(AppendOutcome::Restarted);
        }
    }
    Err(anyhow!("media group {} kept changing while appending", group_id))
}

/// Atomically mark the buffer flushed and return its contents.
/// Only the first caller for a collecting buffer receives `Some`.
#[instrument(skip_all)]
pub async fn take_media_group(pool: &Pool, group_id: &str) -> Result<Option<MediaBatch>> {
    let row = sqlx::query(
        "UPDATE media_groups SET flushed_at = ? WHERE group_id = ? AND flushed_at IS NULL \
         RETURNING chat_id, user_id, photos, videos, caption",
    )
    .bind(now_ms())
    .bind(group_id)
    .fetch_optional(pool)
    .await?;

    Ok(row.map(|row| MediaBatch {
        group_id: Some(group_id.to_string()),
        chat_id: row.get("chat_id"),
        user_id: row.get("user_id"),
        photos: decode_list(row.get::<String, _>("photos").as_str()),
        videos: decode_list(row.get::<String, _>("videos").as_str()),
        caption: row.try_get::<Option<String>, _>("caption").ok().flatten(),
    }))
}

#[instrument(skip_all)]
pub async fn discard_media_group(pool: &Pool, group_id: &str) -> Result<bool> {
    let res = sqlx::query("DELETE FROM media_groups WHERE group_id = ?")
        .bind(group_id)
        .execute(pool)
        .await?;
    Ok(res.rows_affected() > 0)
}

// ---------------------------------------------------------------------------
// Pending photo additions
// ---------------------------------------------------------------------------

/// Start (or restart) collecting photos for an existing product.
#[instrument(skip_all)]
pub async fn start_photo_add(
    pool: &Pool,
    pending: &PendingPhotoAdd,
    user_id: i64,
    ttl: Duration,
) -> Result<()> {
    sqlx::query(
        "INSERT INTO pending_photo_adds (sku, product_id, user_id, photos, expires_at) VALUES (?, ?, ?, ?, ?) \
         ON CONFLICT(sku) DO UPDATE SET product_id = excluded.product_id, user_id = excluded.user_id, \
         photos = excluded.photos, expires_at = excluded.expires_at",
    )
    .bind(&pending.sku)
    .bind(&pending.product_id)
    .bind(user_id)
    .bind(encode_list(&pending.photos)?)
    .bind(expiry_after(ttl))
    .execute(pool)
    .await?;
    Ok(())
}

/// Append resolved photo URLs; returns the new total, or `None` if nothing is pending for `sku`.
#[instrument(skip_all)]
pub async fn append_pending_photos(
    pool: &Pool,
    sku: &str,
    urls: &[String],
    ttl: Duration,
) -> Result<Option<usize>> {
    let mut tx = pool.begin().await?;
    let current: Option<String> = sqlx::query_scalar(
        "SELECT photos FROM pending_photo_adds WHERE sku = ? AND expires_at > ?",
    )
    .bind(sku)
    .bind(now_ms())
    .fetch_optional(&mut *tx)
    .await?;
    let Some(current) = current else {
        return Ok(None);
    };
    let mut photos = decode_list(&current);
    for url in urls {
        if !photos.contains(url) {
            photos.push(url.clone());
        }
    }
    sqlx::query("UPDATE pending_photo_adds SET photos = ?, expires_at = ? WHERE sku = ?")
        .bind(encode_list(&photos)?)
        .bind(expiry_after(ttl))
        .bind(sku)
        .execute(&mut *tx)
        .await?;
    tx.commit().await?;
    Ok(Some(photos.len()))
}

#[instrument(skip_all)]
pub async fn load_photo_add(pool: &Pool, sku: &str) -> Result<Option<PendingPhotoAdd>> {
    let row = sqlx::query(
        "SELECT sku, product_id, photos FROM pending_photo_adds WHERE sku = ? AND expires_at > ?",
    )
    .bind(sku)
    .bind(now_ms())
    .fetch_optional(pool)
    .await?;
    Ok(row.map(|row| PendingPhotoAdd {
        sku: row.get("sku"),
        product_id: row.get("product_id"),
        photos: decode_list(row.get::<String, _>("photos").as_str()),
    }))
}

#[instrument(skip_all)]
pub async fn clear_photo_add(pool: &Pool, sku: &str) -> Result<()> {
    sqlx::query("DELETE FROM pending_photo_adds WHERE sku = ?")
        .bind(sku)
        .execute(pool)
        .await?;
    Ok(())
}

// ---------------------------------------------------------------------------
// SKU counters
// ---------------------------------------------------------------------------

/// Reserve the next number for `prefix`: `max(last reserved, floor) + 1`, in one statement.
#[instrument(skip_all)]
pub async fn reserve_sku_number(pool: &Pool, prefix: &str, floor: i64) -> Result<i64> {
    let next: i64 = sqlx::query_scalar(
        "INSERT INTO sku_counters (prefix, last, updated_at) VALUES (?, ? + 1, ?) \
         ON CONFLICT(prefix) DO UPDATE SET last = MAX(sku_counters.last, excluded.last - 1) + 1, \
         updated_at = excluded.updated_at \
         RETURNING last",
    )
    .bind(prefix)
    .bind(floor.max(0))
    .bind(now_ms())
    .fetch_one(pool)
    .await?;
    Ok(next)
}

// ---------------------------------------------------------------------------
// Update de-duplication and expiry sweeping
// ---------------------------------------------------------------------------

/// Record an update id; returns `false` if it was already seen and has not expired.
#[instrument(skip_all)]
pub async fn mark_update_seen(pool: &Pool, update_id: i64, ttl: Duration) -> Result<bool> {
    let now = now_ms();
    let res = sqlx::query(
        "INSERT INTO seen_updates (update_id, expires_at) VALUES (?, ?) \
         ON CONFLICT(update_id) DO UPDATE SET expires_at = excluded.expires_at \
         WHERE seen_updates.expires_at <= ?",
    )
    .bind(update_id)
    .bind(expiry_after(ttl))
    .bind(now)
    .execute(pool)
    .await?;
    Ok(res.rows_affected() == 1)
}

#[instrument(skip_all)]
pub async fn purge_expired(pool: &Pool) -> Result<PurgeCounts> {
    let now = now_ms();
    let mut counts = PurgeCounts::default();
    counts.conversations = sqlx::query("DELETE FROM conversations WHERE expires_at <= ?")
        .bind(now)
        .execute(pool)
        .await?
        .rows_affected();
    counts.media_groups = sqlx::query("DELETE FROM media_groups WHERE expires_at <= ?")
        .bind(now)
        .execute(pool)
        .await?
        .rows_affected();
    counts.pending_photo_adds =
        sqlx::query("DELETE FROM pending_photo_adds WHERE expires_at <= ?")
            .bind(now)
            .execute(pool)
            .await?
            .rows_affected();
    counts.seen_updates = sqlx::query("DELETE FROM seen_updates WHERE expires_at <= ?")
        .bind(now)
        .execute(pool)
        .await?
        .rows_affected();
    Ok(counts)
}
