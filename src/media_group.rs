//! Reassembles Telegram albums: items sharing a `media_group_id` arrive as
//! separate updates and are released together once the window closes.
use crate::db::{self, AppendOutcome, Pool};
use crate::model::{MediaBatch, MediaItem};
use anyhow::Result;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::mpsc::UnboundedSender;
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};

/// How long a buffer row survives in storage after its last change.
const RETENTION: Duration = Duration::from_secs(600);

struct Timer {
    generation: u64,
    handle: JoinHandle<()>,
}

#[derive(Clone)]
pub struct MediaGroupAggregator {
    pool: Pool,
    window: Duration,
    out: UnboundedSender<MediaBatch>,
    timers: Arc<Mutex<HashMap<String, Timer>>>,
    generation: Arc<AtomicU64>,
}

impl MediaGroupAggregator {
    /// Completed batches are delivered on `out`.
    pub fn new(pool: Pool, window: Duration, out: UnboundedSender<MediaBatch>) -> Self {
        Self {
            pool,
            window,
            out,
            timers: Arc::new(Mutex::new(HashMap::new())),
            generation: Arc::new(AtomicU64::new(0)),
        }
    }

    fn timers(&self) -> MutexGuard<'_, HashMap<String, Timer>> {
        self.timers.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Buffer one item. The first item of a group starts the flush timer.
    #[instrument(skip_all, fields(group_id))]
    pub async fn ingest(
        &self,
        group_id: &str,
        chat_id: i64,
        user_id: i64,
        item: &MediaItem,
        caption: Option<&str>,
    ) -> Result<AppendOutcome> {
        let outcome =
            db::append_media(&self.pool, group_id, chat_id, user_id, item, caption, RETENTION).await?;
        match outcome {
            AppendOutcome::Created => debug!(group_id, "media group opened"),
            AppendOutcome::Appended => debug!(group_id, "media group item appended"),
            AppendOutcome::Restarted => {
                warn!(group_id, "item arrived for an already flushed media group; starting a new batch")
            }
        }
        if outcome.starts_window() {
            self.schedule(group_id);
        }
        Ok(outcome)
    }

    fn schedule(&self, group_id: &str) {
        let generation = self.generation.fetch_add(1, Ordering::Relaxed);
        let this = self.clone();
        let key = group_id.to_string();
        // Held across spawn so the task cannot look itself up before it is registered.
        let mut timers = self.timers();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(this.window).await;
            // Deregister before flushing: once the take has happened nothing may abort us.
            let owned = {
                let mut timers = this.timers();
                if timers.get(&key).map(|t| t.generation) == Some(generation) {
                    timers.remove(&key);
                    true
                } else {
                    false
                }
            };
            if !owned {
                return;
            }
            if let Err(err) = this.flush(&key).await {
                warn!(?err, group_id = %key, "media group flush failed");
            }
        });
        if let Some(previous) = timers.insert(group_id.to_string(), Timer { generation, handle }) {
            previous.handle.abort();
        }
    }

    fn cancel_timer(&self, group_id: &str) {
        if let Some(timer) = self.timers().remove(group_id) {
            timer.handle.abort();
        }
    }

    async fn flush(&self, group_id: &str) -> Result<bool> {
        let Some(batch) = db::take_media_group(&self.pool, group_id).await? else {
            return Ok(false);
        };
        if batch.is_empty() {
            return Ok(false);
        }
        info!(group_id, items = batch.len(), "media group flushed");
        if self.out.send(batch).is_err() {
            warn!(group_id, "batch consumer is gone; dropping media group");
        }
        Ok(true)
    }

    /// Release the group immediately instead of waiting for its timer.
    /// Returns whether a batch was emitted.
    pub async fn flush_now(&self, group_id: &str) -> Result<bool> {
        self.cancel_timer(group_id);
        self.flush(group_id).await
    }

    /// Drop the group and its timer without emitting anything.
    pub async fn abort(&self, group_id: &str) -> Result<bool> {
        self.cancel_timer(group_id);
        db::discard_media_group(&self.pool, group_id).await
    }

    pub fn pending_timers(&self) -> usize {
        self.timers().len()
    }
}
