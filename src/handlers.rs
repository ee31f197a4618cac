use crate::caption::{self, parse_caption, parse_price, parse_stock_args};
use crate::category::CategoryResolver;
use crate::commerce::CommerceApi;
use crate::db::{self, Pool};
use crate::delivery::Outbound;
use crate::flows::{self, FlowError, ReceiptOutcome};
use crate::format;
use crate::media_group::MediaGroupAggregator;
use crate::model::{
    Conversation, InboundEvent, ImageKind, LedgerAnalysis, MediaBatch, PendingPhotoAdd,
    PhotoSize, ProductAnalysis, ProductDraft, ReceiptAnalysis,
};
use crate::sku::SkuMinter;
use crate::vision::{Classifier, VisionModel};
use anyhow::Result;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use teloxide::types::{Message, Update, UpdateKind};
use teloxide::utils::html::escape;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::sync::OwnedMutexGuard;
use tracing::{debug, error, info, instrument, warn};

/// Per-user turn locks. A user's events are handled one at a time so a
/// double-tapped /confirm cannot commit the same draft twice.
#[derive(Clone, Default)]
pub struct TurnLocks {
    locks: Arc<Mutex<HashMap<i64, Arc<tokio::sync::Mutex<()>>>>>,
}

impl TurnLocks {
    pub async fn acquire(&self, user_id: i64) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
            // Entries only the map still references belong to finished turns.
            locks.retain(|_, lock| Arc::strong_count(lock) > 1);
            locks.entry(user_id).or_default().clone()
        };
        lock.lock_owned().await
    }

    pub fn tracked_users(&self) -> usize {
        self.locks.lock().unwrap_or_else(|poisoned| poisoned.into_inner()).len()
    }
}

/// Everything a handler needs; cheap to clone into spawned tasks.
#[derive(Clone)]
pub struct App {
    pub pool: Pool,
    pub outbound: Outbound,
    pub commerce: Arc<dyn CommerceApi>,
    pub classifier: Classifier,
    pub minter: SkuMinter,
    pub resolver: CategoryResolver,
    pub aggregator: MediaGroupAggregator,
    pub conversation_ttl: Duration,
    pub allowed_users: Arc<Vec<i64>>,
    pub turns: TurnLocks,
}

impl App {
    pub fn new(
        pool: Pool,
        outbound: Outbound,
        commerce: Arc<dyn CommerceApi>,
        vision: Arc<dyn VisionModel>,
        aggregator: MediaGroupAggregator,
        conversation_ttl: Duration,
        allowed_users: Vec<i64>,
    ) -> Self {
        let minter = SkuMinter::new(commerce.clone(), pool.clone());
        Self {
            classifier: Classifier::new(vision, minter.clone()),
            resolver: CategoryResolver::new(commerce.clone()),
            minter,
            pool,
            outbound,
            commerce,
            aggregator,
            conversation_ttl,
            allowed_users: Arc::new(allowed_users),
            turns: TurnLocks::default(),
        }
    }

    fn is_allowed(&self, user_id: i64) -> bool {
        self.allowed_users.is_empty() || self.allowed_users.contains(&user_id)
    }

    async fn reply(&self, chat_id: i64, html: &str) {
        self.outbound.send(chat_id, html).await;
    }

    /// Tell the user a turn died on an internal error; the caller logs it.
    async fn report_failure<T>(&self, chat_id: i64, result: &Result<T>) {
        if result.is_err() {
            self.reply(chat_id, format::INTERNAL_ERROR).await;
        }
    }

    /// `key` is `(user_id, chat_id)`.
    async fn save(&self, key: (i64, i64), conv: &Conversation) -> Result<()> {
        db::save_conversation(&self.pool, key.0, key.1, conv, self.conversation_ttl).await
    }
}

/// How the dispatcher treats an inbound event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventKind {
    Command { name: String, args: String },
    Text(String),
    Photo,
    Video,
    Grouped(String),
    Ignored,
}

pub fn classify(event: &InboundEvent) -> EventKind {
    let media = event.media_item().is_some();
    if let (Some(group), true) = (&event.media_group_id, media) {
        return EventKind::Grouped(group.clone());
    }
    if event.best_photo().is_some() {
        return EventKind::Photo;
    }
    if event.video.is_some() {
        return EventKind::Video;
    }
    let Some(text) = event.text.as_deref().map(str::trim).filter(|t| !t.is_empty()) else {
        return EventKind::Ignored;
    };
    match text.strip_prefix('/') {
        Some(rest) => {
            let (head, args) = rest.split_once(char::is_whitespace).unwrap_or((rest, ""));
            // `/cmd@BotName` in group chats
            let name = head.split('@').next().unwrap_or(head).to_lowercase();
            EventKind::Command {
                name,
                args: args.trim().to_string(),
            }
        }
        None => EventKind::Text(text.to_string()),
    }
}

/// Reduce a Telegram message to an event; messages without a sender are dropped.
pub fn event_from_message(update_id: Option<i64>, msg: &Message) -> Option<InboundEvent> {
    let user = msg.from()?;
    Some(InboundEvent {
        update_id,
        user_id: user.id.0 as i64,
        chat_id: msg.chat.id.0,
        date: msg.date,
        text: msg.text().map(str::to_owned),
        caption: msg.caption().map(str::to_owned),
        photo_sizes: msg
            .photo()
            .unwrap_or_default()
            .iter()
            .map(|p| PhotoSize {
                file_id: p.file.id.clone(),
                width: p.width,
                height: p.height,
                file_size: p.file.size,
            })
            .collect(),
        video: msg.video().map(|v| v.file.id.clone()),
        media_group_id: msg.media_group_id().map(str::to_owned),
    })
}

pub fn event_from_update(update: &Update) -> Option<InboundEvent> {
    match &update.kind {
        UpdateKind::Message(msg) => event_from_message(Some(i64::from(update.id)), msg),
        _ => None,
    }
}

#[instrument(skip_all, fields(user_id = event.user_id))]
pub async fn handle_event(app: &App, event: InboundEvent) -> Result<()> {
    if !app.is_allowed(event.user_id) {
        info!(user_id = event.user_id, "ignoring message from user not on the allow list");
        return Ok(());
    }

    let chat_id = event.chat_id;
    let _turn = app.turns.acquire(event.user_id).await;
    let result = route_event(app, event).await;
    app.report_failure(chat_id, &result).await;
    result
}

async fn route_event(app: &App, event: InboundEvent) -> Result<()> {
    match classify(&event) {
        EventKind::Command { name, args } => handle_command(app, &event, &name, &args).await,
        EventKind::Text(text) => handle_text(app, &event, &text).await,
        EventKind::Photo | EventKind::Video => {
            let Some(item) = event.media_item() else {
                return Ok(());
            };
            let batch = MediaBatch::single(event.chat_id, event.user_id, item, event.caption.clone());
            handle_batch(app, batch).await
        }
        EventKind::Grouped(group_id) => {
            if let Some(item) = event.media_item() {
                app.aggregator
                    .ingest(&group_id, event.chat_id, event.user_id, &item, event.caption.as_deref())
                    .await?;
            }
            Ok(())
        }
        EventKind::Ignored => {
            debug!("nothing to do for message");
            Ok(())
        }
    }
}

/// Drain flushed media groups. Runs until every sender is dropped.
pub async fn run_batches(app: App, mut rx: UnboundedReceiver<MediaBatch>) {
    while let Some(batch) = rx.recv().await {
        let app = app.clone();
        tokio::spawn(async move {
            if let Err(err) = process_batch(&app, batch).await {
                error!(?err, "failed to process media batch");
            }
        });
    }
}

/// One logical upload: a lone photo/video or a whole album.
#[instrument(skip_all, fields(user_id = batch.user_id, items = batch.len()))]
pub async fn process_batch(app: &App, batch: MediaBatch) -> Result<()> {
    let chat_id = batch.chat_id;
    let _turn = app.turns.acquire(batch.user_id).await;
    let result = handle_batch(app, batch).await;
    app.report_failure(chat_id, &result).await;
    result
}

async fn handle_batch(app: &App, batch: MediaBatch) -> Result<()> {
    let key = (batch.user_id, batch.chat_id);

    if let Conversation::AwaitingPhotoAdd { sku } = db::load_conversation(&app.pool, batch.user_id).await? {
        let urls = flows::resolve_urls(app.outbound.api().as_ref(), &batch.photos).await;
        match db::append_pending_photos(&app.pool, &sku, &urls, app.conversation_ttl).await? {
            Some(total) => {
                app.save(key, &Conversation::AwaitingPhotoAdd { sku: sku.clone() }).await?;
                let msg = format!(
                    "Collected {} photo(s) for <b>{}</b>. Send more or /confirm to add them.",
                    total,
                    escape(&sku)
                );
                app.reply(batch.chat_id, &msg).await;
                return Ok(());
            }
            None => {
                db::clear_conversation(&app.pool, batch.user_id).await?;
                app.reply(batch.chat_id, "The photo session expired; treating this as a new upload.")
                    .await;
            }
        }
    }

    let mut draft = ProductDraft::with_media(batch.photos.clone(), batch.videos.clone());
    if let Some(parsed) = batch.caption.as_deref().and_then(parse_caption) {
        draft.sku = Some(parsed.sku);
        draft.name = Some(parsed.name);
        draft.price = Some(parsed.price);
        return present_draft(app, key, draft).await;
    }

    let Some(first) = batch.photos.first() else {
        return present_draft(app, key, draft).await;
    };
    let image = match app.outbound.api().download(first).await {
        Ok(bytes) => bytes,
        Err(err) => {
            warn!(?err, "could not download photo for analysis");
            app.reply(batch.chat_id, format::VISION_UNAVAILABLE).await;
            return present_draft(app, key, draft).await;
        }
    };

    match app.classifier.detect_type(&image).await {
        Some(ImageKind::Ledger) => match app.classifier.analyze_ledger(&image).await {
            Some(ledger) => present_ledger(app, key, ledger).await,
            None => {
                app.reply(batch.chat_id, "Could not read the ledger page. Try a sharper photo.")
                    .await;
                Ok(())
            }
        },
        Some(ImageKind::Receipt) => match app.classifier.analyze_receipt(&image).await {
            Some(receipt) => present_receipt(app, key, receipt).await,
            None => {
                app.reply(batch.chat_id, "Could not read the receipt. Try a sharper photo.")
                    .await;
                Ok(())
            }
        },
        Some(ImageKind::Product) => {
            match app.classifier.analyze_product(&image).await {
                Some(analysis) => merge_analysis(&mut draft, analysis),
                None => app.reply(batch.chat_id, format::VISION_UNAVAILABLE).await,
            }
            present_draft(app, key, draft).await
        }
        Some(ImageKind::Other) | None => {
            app.reply(batch.chat_id, format::VISION_UNAVAILABLE).await;
            present_draft(app, key, draft).await
        }
    }
}

fn merge_analysis(draft: &mut ProductDraft, analysis: ProductAnalysis) {
    draft.sku_minted = analysis.auto_sku.is_some();
    draft.sku = analysis.auto_sku;
    draft.name = analysis.suggested_name;
    draft.brand = analysis.brand;
    draft.color = analysis.color;
    draft.category = analysis.suggested_category;
    draft.size_type = analysis.size_type;
}

async fn present_draft(app: &App, key: (i64, i64), draft: ProductDraft) -> Result<()> {
    let text = format::product_draft(&draft);
    app.save(key, &Conversation::AwaitingProductConfirm(draft)).await?;
    app.reply(key.1, &text).await;
    Ok(())
}

async fn present_ledger(app: &App, key: (i64, i64), ledger: LedgerAnalysis) -> Result<()> {
    let text = format::ledger(&ledger);
    app.save(key, &Conversation::AwaitingLedgerConfirm(ledger)).await?;
    app.reply(key.1, &text).await;
    Ok(())
}

async fn present_receipt(app: &App, key: (i64, i64), receipt: ReceiptAnalysis) -> Result<()> {
    let text = format::receipt(&receipt);
    app.save(key, &Conversation::AwaitingReceiptConfirm(receipt)).await?;
    app.reply(key.1, &text).await;
    Ok(())
}

async fn handle_text(app: &App, event: &InboundEvent, text: &str) -> Result<()> {
    let key = (event.user_id, event.chat_id);
    if let Conversation::AwaitingProductConfirm(mut draft) = db::load_conversation(&app.pool, event.user_id).await? {
        if let Some(parsed) = parse_caption(text) {
            draft.sku = Some(parsed.sku);
            draft.sku_minted = false;
            draft.name = Some(parsed.name);
            draft.price = Some(parsed.price);
            return present_draft(app, key, draft).await;
        }
    }
    app.reply(event.chat_id, format::TEXT_HINT).await;
    Ok(())
}

async fn handle_command(app: &App, event: &InboundEvent, name: &str, args: &str) -> Result<()> {
    let chat_id = event.chat_id;
    match name {
        "start" | "help" => app.reply(chat_id, format::HELP).await,
        "ping" => app.reply(chat_id, "pong").await,
        "cancel" => cancel(app, event).await?,
        "confirm" => confirm(app, event).await?,
        "set" => set_field(app, event, args).await?,
        "stock" => stock(app, event, args).await,
        "addphotos" => add_photos(app, event, args).await?,
        other => {
            let msg = format!("Unknown command /{}. See /help.", escape(other));
            app.reply(chat_id, &msg).await;
        }
    }
    Ok(())
}

async fn cancel(app: &App, event: &InboundEvent) -> Result<()> {
    let conv = db::load_conversation(&app.pool, event.user_id).await?;
    if let Conversation::AwaitingPhotoAdd { sku } = &conv {
        db::clear_photo_add(&app.pool, sku).await?;
    }
    let had_state = db::clear_conversation(&app.pool, event.user_id).await?;
    let msg = if had_state && conv != Conversation::Idle {
        format::CANCELLED
    } else {
        format::NOTHING_PENDING
    };
    app.reply(event.chat_id, msg).await;
    Ok(())
}

/// Message for a failed commit. The conversation is kept in every case.
fn flow_error_message(err: &FlowError) -> String {
    match err {
        FlowError::Data(msg) => escape(msg),
        FlowError::Commerce(e) => {
            warn!(error = %e, "commerce call failed");
            "The shop backend is not reachable right now. Try /confirm again later.".to_string()
        }
    }
}

async fn confirm(app: &App, event: &InboundEvent) -> Result<()> {
    let chat_id = event.chat_id;
    let api = app.outbound.api().clone();
    let msg = match db::load_conversation(&app.pool, event.user_id).await? {
        Conversation::Idle => format::NOTHING_PENDING.to_string(),
        Conversation::AwaitingProductConfirm(draft) => {
            match flows::commit_product(app.commerce.as_ref(), api.as_ref(), &app.minter, &app.resolver, &draft).await {
                Ok(created) => {
                    db::clear_conversation(&app.pool, event.user_id).await?;
                    format!(
                        "Product <b>{}</b> created with {} photo(s).",
                        escape(&created.sku),
                        created.images
                    )
                }
                Err(err) => flow_error_message(&err),
            }
        }
        Conversation::AwaitingLedgerConfirm(ledger) => match flows::commit_ledger(app.commerce.as_ref(), &ledger).await {
            Ok(()) => {
                db::clear_conversation(&app.pool, event.user_id).await?;
                format!("Ledger recorded. Net: <b>{}</b>", format::money(ledger.summary.net))
            }
            Err(err) => flow_error_message(&err),
        },
        Conversation::AwaitingReceiptConfirm(receipt) => match flows::commit_receipt(app.commerce.as_ref(), &receipt).await {
            Ok(outcome) => {
                db::clear_conversation(&app.pool, event.user_id).await?;
                receipt_message(&outcome)
            }
            Err(err) => flow_error_message(&err),
        },
        Conversation::AwaitingPhotoAdd { sku } => match db::load_photo_add(&app.pool, &sku).await? {
            None => {
                db::clear_conversation(&app.pool, event.user_id).await?;
                format!("The photo session for <b>{}</b> expired. Start again with /addphotos.", escape(&sku))
            }
            Some(pending) => match flows::commit_photo_add(app.commerce.as_ref(), &pending).await {
                Ok(count) => {
                    db::clear_photo_add(&app.pool, &sku).await?;
                    db::clear_conversation(&app.pool, event.user_id).await?;
                    format!("Added {} photo(s) to <b>{}</b>.", count, escape(&sku))
                }
                Err(err) => flow_error_message(&err),
            },
        },
    };
    app.reply(chat_id, &msg).await;
    Ok(())
}

fn receipt_message(outcome: &ReceiptOutcome) -> String {
    let mut msg = String::from("<b>Receipt applied</b>\n");
    for (sku, qty) in &outcome.deducted {
        msg.push_str(&format!("• {} -{}\n", escape(sku), qty));
    }
    if !outcome.unmatched.is_empty() {
        let list: Vec<String> = outcome.unmatched.iter().map(|s| escape(s)).collect();
        msg.push_str(&format!("Not in catalog: {}\n", list.join(", ")));
    }
    if !outcome.failed.is_empty() {
        let list: Vec<String> = outcome.failed.iter().map(|s| escape(s)).collect();
        msg.push_str(&format!("Failed, adjust with /stock: {}\n", list.join(", ")));
    }
    msg
}

async fn set_field(app: &App, event: &InboundEvent, args: &str) -> Result<()> {
    let chat_id = event.chat_id;
    let Conversation::AwaitingProductConfirm(mut draft) = db::load_conversation(&app.pool, event.user_id).await? else {
        app.reply(chat_id, "There is no product draft to edit.").await;
        return Ok(());
    };
    let (field, value) = args.split_once(char::is_whitespace).unwrap_or((args, ""));
    let value = value.trim();
    if field.is_empty() || value.is_empty() {
        app.reply(chat_id, "Usage: /set &lt;field&gt; &lt;value&gt;").await;
        return Ok(());
    }

    let text_value = || Some(value.to_string());
    let error = match field.to_lowercase().as_str() {
        "sku" if caption::is_sku(value) => {
            draft.sku = Some(value.to_uppercase());
            draft.sku_minted = false;
            None
        }
        "sku" => Some("SKU must be letters followed by digits, e.g. LCST08."),
        "name" => {
            draft.name = text_value();
            None
        }
        "price" => match parse_price(value) {
            Some(price) if price > 0.0 => {
                draft.price = Some(price);
                None
            }
            _ => Some("Price must be a positive number, e.g. 450 or 1.250,50."),
        },
        "brand" => {
            draft.brand = text_value();
            None
        }
        "color" | "colour" => {
            draft.color = text_value();
            None
        }
        "category" => {
            draft.category = text_value();
            None
        }
        "stock" => match value.parse::<i64>() {
            Ok(n) if n >= 0 => {
                draft.stock = n;
                None
            }
            _ => Some("Stock must be a whole number of at least 0."),
        },
        _ => Some("Unknown field. Use sku, name, price, brand, color, category or stock."),
    };

    match error {
        Some(msg) => {
            app.reply(chat_id, msg).await;
            Ok(())
        }
        None => present_draft(app, (event.user_id, chat_id), draft).await,
    }
}

async fn stock(app: &App, event: &InboundEvent, args: &str) {
    let Some(parsed) = parse_stock_args(args) else {
        app.reply(
            event.chat_id,
            "Usage: /stock &lt;SKU&gt; &lt;±N&gt; [sale|restock|adjustment|return]",
        )
        .await;
        return;
    };
    let msg = match flows::apply_stock(app.commerce.as_ref(), &parsed).await {
        Ok(_) => format!(
            "Stock of <b>{}</b> changed by {:+} ({}).",
            escape(&parsed.sku),
            parsed.delta,
            parsed.reason.as_str()
        ),
        Err(FlowError::Data(msg)) => escape(&msg),
        Err(FlowError::Commerce(err)) => {
            warn!(error = %err, "stock update failed");
            "The shop backend is not reachable right now. Try again later.".to_string()
        }
    };
    app.reply(event.chat_id, &msg).await;
}

async fn add_photos(app: &App, event: &InboundEvent, args: &str) -> Result<()> {
    let chat_id = event.chat_id;
    let sku = args.trim();
    if !caption::is_sku(sku) {
        app.reply(chat_id, "Usage: /addphotos &lt;SKU&gt;").await;
        return Ok(());
    }
    let sku = sku.to_uppercase();
    let product = match flows::find_product(app.commerce.as_ref(), &sku).await {
        Ok(Some(product)) => product,
        Ok(None) => {
            app.reply(chat_id, &format!("No product with SKU <b>{}</b>.", escape(&sku))).await;
            return Ok(());
        }
        Err(err) => {
            let msg = flow_error_message(&err);
            app.reply(chat_id, &msg).await;
            return Ok(());
        }
    };

    let pending = PendingPhotoAdd {
        sku: sku.clone(),
        product_id: product.id,
        photos: Vec::new(),
    };
    db::start_photo_add(&app.pool, &pending, event.user_id, app.conversation_ttl).await?;
    app.save((event.user_id, chat_id), &Conversation::AwaitingPhotoAdd { sku: sku.clone() })
        .await?;
    let msg = format!("Send the photos for <b>{}</b>, then /confirm.", escape(&sku));
    app.reply(chat_id, &msg).await;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn text(t: &str) -> InboundEvent {
        InboundEvent {
            text: Some(t.into()),
            ..Default::default()
        }
    }

    #[test]
    fn classifies_commands_and_text() {
        assert_eq!(
            classify(&text("/set@StockBot price 450")),
            EventKind::Command {
                name: "set".into(),
                args: "price 450".into()
            }
        );
        assert_eq!(
            classify(&text("/CONFIRM")),
            EventKind::Command {
                name: "confirm".into(),
                args: String::new()
            }
        );
        assert_eq!(classify(&text("  hello ")), EventKind::Text("hello".into()));
        assert_eq!(classify(&text("   ")), EventKind::Ignored);
    }

    #[test]
    fn classifies_media() {
        let photo = PhotoSize {
            file_id: "f".into(),
            width: 10,
            height: 10,
            file_size: 100,
        };
        let mut event = InboundEvent {
            photo_sizes: vec![photo],
            caption: Some("/not a command".into()),
            ..Default::default()
        };
        assert_eq!(classify(&event), EventKind::Photo);
        event.media_group_id = Some("g1".into());
        assert_eq!(classify(&event), EventKind::Grouped("g1".into()));

        let video = InboundEvent {
            video: Some("v".into()),
            ..Default::default()
        };
        assert_eq!(classify(&video), EventKind::Video);
    }

    #[test]
    fn analysis_fills_draft_with_minted_sku() {
        let mut draft = ProductDraft::with_media(vec!["p".into()], vec![]);
        merge_analysis(
            &mut draft,
            ProductAnalysis {
                brand: Some("Lacoste".into()),
                suggested_name: Some("Lacoste Lacivert Polo".into()),
                auto_sku: Some("LCST08".into()),
                ..Default::default()
            },
        );
        assert_eq!(draft.sku.as_deref(), Some("LCST08"));
        assert!(draft.sku_minted);
        assert_eq!(draft.missing_fields(), vec!["price"]);
    }

    #[test]
    fn receipt_message_reports_unmatched() {
        let outcome = ReceiptOutcome {
            deducted: vec![("LCST08".into(), 2)],
            unmatched: vec!["<Mystery>".into()],
            failed: vec![],
        };
        let msg = receipt_message(&outcome);
        assert!(msg.contains("• LCST08 -2"));
        assert!(msg.contains("Not in catalog: &lt;Mystery&gt;"));
        assert!(!msg.contains("Failed"));
    }

    #[tokio::test]
    async fn turn_locks_serialize_one_user_and_are_pruned() {
        let locks = TurnLocks::default();
        let first = locks.acquire(1).await;
        // Other users are not blocked.
        let other = locks.acquire(2).await;
        let waiting = tokio::time::timeout(Duration::from_millis(50), locks.acquire(1)).await;
        assert!(waiting.is_err());

        drop(first);
        drop(other);
        let again = tokio::time::timeout(Duration::from_millis(50), locks.acquire(1)).await;
        assert!(again.is_ok());
        drop(again);
        let _third = locks.acquire(3).await;
        assert_eq!(locks.tracked_users(), 1);
    }
}
