#![allow(dead_code)]

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tg_stockbot::commerce::model::{
    Category, LedgerRecord, NewCategory, NewProduct, Product, StockUpdate,
};
use tg_stockbot::commerce::{CommerceApi, CommerceError, CommerceResult};
use tg_stockbot::db::Pool;
use tg_stockbot::delivery::{ChatApi, Outbound, RetryPolicy};
use tg_stockbot::handlers::App;
use tg_stockbot::media_group::MediaGroupAggregator;
use tg_stockbot::model::{InboundEvent, MediaBatch, PhotoSize};
use tg_stockbot::vision::{prompt, VisionError, VisionModel};
use tokio::sync::mpsc::{self, UnboundedReceiver};
use tokio::sync::Mutex;

pub async fn setup_pool() -> Pool {
    let pool = sqlx::sqlite::SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .unwrap();
    sqlx::migrate!("./migrations").run(&pool).await.unwrap();
    pool
}

// ---------------------------------------------------------------------------
// Telegram
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct RecordingChat {
    sent: Mutex<Vec<(i64, String)>>,
}

impl RecordingChat {
    pub async fn sent(&self) -> Vec<(i64, String)> {
        self.sent.lock().await.clone()
    }

    pub async fn last(&self) -> String {
        self.sent
            .lock()
            .await
            .last()
            .map(|(_, text)| text.clone())
            .unwrap_or_default()
    }

    /// Poll until a message containing `needle` was sent, or give up after two seconds.
    pub async fn wait_for(&self, needle: &str) -> bool {
        for _ in 0..100 {
            if self.sent().await.iter().any(|(_, t)| t.contains(needle)) {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        false
    }
}

#[async_trait]
impl ChatApi for RecordingChat {
    async fn send_html(&self, chat_id: i64, html: &str) -> Result<()> {
        self.sent.lock().await.push((chat_id, html.to_string()));
        Ok(())
    }

    async fn file_url(&self, file_id: &str) -> Result<String> {
        if file_id.starts_with("broken") {
            return Err(anyhow!("file is gone"));
        }
        Ok(format!("https://files.test/{file_id}"))
    }

    async fn download(&self, file_id: &str) -> Result<Vec<u8>> {
        let mut bytes = vec![0xff, 0xd8, 0xff];
        bytes.extend_from_slice(file_id.as_bytes());
        Ok(bytes)
    }
}

// ---------------------------------------------------------------------------
// Commerce
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct CommerceState {
    pub categories: Vec<Category>,
    pub products: Vec<Product>,
    pub created: Vec<NewProduct>,
    pub created_categories: Vec<NewCategory>,
    pub stock_updates: Vec<StockUpdate>,
    pub ledgers: Vec<LedgerRecord>,
    pub images: Vec<(String, Vec<String>)>,
    pub unavailable: bool,
}

/// In-memory catalog; creating a product with a taken SKU answers `Conflict`.
#[derive(Default)]
pub struct FakeCommerce {
    pub state: Mutex<CommerceState>,
}

impl FakeCommerce {
    pub async fn with_products(skus: &[(&str, &str)]) -> Self {
        let fake = Self::default();
        {
            let mut state = fake.state.lock().await;
            for (i, (sku, name)) in skus.iter().enumerate() {
                state.products.push(product(&format!("p{}", i + 1), sku, name));
            }
        }
        fake
    }

    pub async fn set_unavailable(&self, unavailable: bool) {
        self.state.lock().await.unavailable = unavailable;
    }

    async fn check(&self) -> CommerceResult<tokio::sync::MutexGuard<'_, CommerceState>> {
        let state = self.state.lock().await;
        if state.unavailable {
            return Err(CommerceError::Status {
                status: 503,
                body: "maintenance".into(),
            });
        }
        Ok(state)
    }
}

pub fn product(id: &str, sku: &str, name: &str) -> Product {
    Product {
        id: id.into(),
        sku: Some(sku.into()),
        name: name.into(),
        price: Some(100.0),
        variants: vec![],
    }
}

#[async_trait]
impl CommerceApi for FakeCommerce {
    async fn list_categories(&self) -> CommerceResult<Vec<Category>> {
        Ok(self.check().await?.categories.clone())
    }

    async fn create_category(&self, category: &NewCategory) -> CommerceResult<Category> {
        let mut state = self.check().await?;
        let created = Category {
            id: format!("c{}", state.categories.len() + 1),
            name: category.name.clone(),
            slug: Some(category.slug.clone()),
        };
        state.created_categories.push(category.clone());
        state.categories.push(created.clone());
        Ok(created)
    }

    async fn list_products(&self) -> CommerceResult<Vec<Product>> {
        Ok(self.check().await?.products.clone())
    }

    async fn create_product(&self, new: &NewProduct) -> CommerceResult<Product> {
        let mut state = self.check().await?;
        if state
            .products
            .iter()
            .any(|p| p.sku.as_deref() == Some(new.sku.as_str()))
        {
            return Err(CommerceError::Conflict(format!("sku {} exists", new.sku)));
        }
        let created = Product {
            id: format!("p{}", state.products.len() + 1),
            sku: Some(new.sku.clone()),
            name: new.name.clone(),
            price: Some(new.price),
            variants: new.variants.clone(),
        };
        state.created.push(new.clone());
        state.products.push(created.clone());
        Ok(created)
    }

    async fn add_product_images(&self, product_id: &str, urls: &[String]) -> CommerceResult<()> {
        self.check()
            .await?
            .images
            .push((product_id.to_string(), urls.to_vec()));
        Ok(())
    }

    async fn update_stock(&self, update: &StockUpdate) -> CommerceResult<()> {
        self.check().await?.stock_updates.push(update.clone());
        Ok(())
    }

    async fn record_ledger(&self, record: &LedgerRecord) -> CommerceResult<()> {
        self.check().await?.ledgers.push(record.clone());
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Vision
// ---------------------------------------------------------------------------

/// Answers each prompt with a canned reply; prompts without one fail.
#[derive(Default)]
pub struct ScriptedVision {
    replies: Mutex<HashMap<&'static str, String>>,
    calls: Mutex<Vec<&'static str>>,
}

impl ScriptedVision {
    pub async fn reply(&self, instruction: &'static str, text: &str) {
        self.replies.lock().await.insert(instruction, text.to_string());
    }

    pub async fn product(&self, json: &str) {
        self.reply(prompt::DETECT_TYPE, "product").await;
        self.reply(prompt::PRODUCT, json).await;
    }

    pub async fn calls(&self) -> Vec<&'static str> {
        self.calls.lock().await.clone()
    }
}

fn prompt_name(instruction: &str) -> &'static str {
    [
        (prompt::DETECT_TYPE, "detect"),
        (prompt::PRODUCT, "product"),
        (prompt::LEDGER, "ledger"),
        (prompt::RECEIPT, "receipt"),
    ]
    .into_iter()
    .find(|(p, _)| *p == instruction)
    .map(|(_, name)| name)
    .unwrap_or("unknown")
}

#[async_trait]
impl VisionModel for ScriptedVision {
    async fn complete(&self, _image: &[u8], instruction: &str, _max_tokens: u32) -> Result<String, VisionError> {
        self.calls.lock().await.push(prompt_name(instruction));
        let replies = self.replies.lock().await;
        replies
            .iter()
            .find(|(p, _)| **p == instruction)
            .map(|(_, r)| r.clone())
            .ok_or(VisionError::NotConfigured)
    }
}

// ---------------------------------------------------------------------------
// Wiring
// ---------------------------------------------------------------------------

pub const USER: i64 = 42;
pub const CHAT: i64 = 4200;

pub struct Harness {
    pub app: App,
    pub pool: Pool,
    pub chat: Arc<RecordingChat>,
    pub commerce: Arc<FakeCommerce>,
    pub vision: Arc<ScriptedVision>,
    pub batches: UnboundedReceiver<MediaBatch>,
}

pub async fn harness(commerce: FakeCommerce) -> Harness {
    harness_with(commerce, Duration::from_millis(60), Duration::from_secs(1800)).await
}

pub async fn harness_with(commerce: FakeCommerce, window: Duration, ttl: Duration) -> Harness {
    let pool = setup_pool().await;
    let chat = Arc::new(RecordingChat::default());
    let commerce = Arc::new(commerce);
    let vision = Arc::new(ScriptedVision::default());
    let policy = RetryPolicy {
        max_attempts: 1,
        attempt_timeout: Duration::from_secs(1),
        backoff_step: Duration::ZERO,
    };
    let (tx, rx) = mpsc::unbounded_channel();
    let aggregator = MediaGroupAggregator::new(pool.clone(), window, tx);
    let app = App::new(
        pool.clone(),
        Outbound::new(chat.clone(), policy),
        commerce.clone(),
        vision.clone(),
        aggregator,
        ttl,
        vec![],
    );
    Harness {
        app,
        pool,
        chat,
        commerce,
        vision,
        batches: rx,
    }
}

pub fn text_event(text: &str) -> InboundEvent {
    InboundEvent {
        user_id: USER,
        chat_id: CHAT,
        text: Some(text.into()),
        ..Default::default()
    }
}

pub fn photo_event(file_id: &str, caption: Option<&str>, group: Option<&str>) -> InboundEvent {
    InboundEvent {
        user_id: USER,
        chat_id: CHAT,
        caption: caption.map(Into::into),
        media_group_id: group.map(Into::into),
        photo_sizes: vec![
            PhotoSize {
                file_id: format!("{file_id}-thumb"),
                width: 90,
                height: 90,
                file_size: 1_000,
            },
            PhotoSize {
                file_id: file_id.into(),
                width: 1280,
                height: 960,
                file_size: 200_000,
            },
        ],
        ..Default::default()
    }
}
