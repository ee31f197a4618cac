use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Telegram refuses bot downloads above this size.
pub const MAX_DOWNLOAD_BYTES: u32 = 20 * 1024 * 1024;

/// One resolution of a photo as sent by Telegram.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PhotoSize {
    pub file_id: String,
    pub width: u32,
    pub height: u32,
    pub file_size: u32,
}

/// An inbound message reduced to the fields the dispatcher consumes.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct InboundEvent {
    pub update_id: Option<i64>,
    pub user_id: i64,
    pub chat_id: i64,
    pub date: DateTime<Utc>,
    pub text: Option<String>,
    pub caption: Option<String>,
    pub photo_sizes: Vec<PhotoSize>,
    pub video: Option<String>,
    pub media_group_id: Option<String>,
}

impl InboundEvent {
    /// Largest photo resolution Telegram will still let the bot download.
    pub fn best_photo(&self) -> Option<&PhotoSize> {
        self.photo_sizes
            .iter()
            .filter(|p| p.file_size == 0 || p.file_size <= MAX_DOWNLOAD_BYTES)
            .max_by_key(|p| u64::from(p.width) * u64::from(p.height))
    }

    pub fn media_item(&self) -> Option<MediaItem> {
        if let Some(photo) = self.best_photo() {
            return Some(MediaItem::photo(&photo.file_id));
        }
        self.video.as_deref().map(MediaItem::video)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Photo,
    Video,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaItem {
    pub kind: MediaKind,
    pub file_id: String,
}

impl MediaItem {
    pub fn photo(file_id: &str) -> Self {
        Self {
            kind: MediaKind::Photo,
            file_id: file_id.to_string(),
        }
    }

    pub fn video(file_id: &str) -> Self {
        Self {
            kind: MediaKind::Video,
            file_id: file_id.to_string(),
        }
    }
}

/// The media of one logical upload, handed to processing as a unit.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MediaBatch {
    pub group_id: Option<String>,
    pub chat_id: i64,
    pub user_id: i64,
    pub photos: Vec<String>,
    pub videos: Vec<String>,
    pub caption: Option<String>,
}

impl MediaBatch {
    pub fn single(chat_id: i64, user_id: i64, item: MediaItem, caption: Option<String>) -> Self {
        let mut batch = Self {
            chat_id,
            user_id,
            caption,
            ..Default::default()
        };
        match item.kind {
            MediaKind::Photo => batch.photos.push(item.file_id),
            MediaKind::Video => batch.videos.push(item.file_id),
        }
        batch
    }

    pub fn len(&self) -> usize {
        self.photos.len() + self.videos.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Coarse routing label returned by the vision model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageKind {
    Product,
    Ledger,
    Receipt,
    Other,
}

impl ImageKind {
    pub fn parse(raw: &str) -> Option<Self> {
        let token = raw
            .trim()
            .trim_matches(|c: char| !c.is_alphanumeric())
            .to_lowercase();
        match token.as_str() {
            "product" => Some(ImageKind::Product),
            "ledger" => Some(ImageKind::Ledger),
            "receipt" => Some(ImageKind::Receipt),
            "other" => Some(ImageKind::Other),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Confidence {
    High,
    Medium,
    #[default]
    Low,
}

impl Confidence {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_lowercase().as_str() {
            "high" => Some(Confidence::High),
            "medium" => Some(Confidence::Medium),
            "low" => Some(Confidence::Low),
            _ => None,
        }
    }
}

/// Garment size taxonomy; decides which variants a new product gets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SizeType {
    Letter,
    Numeric,
    Standard,
}

impl SizeType {
    pub fn sizes(&self) -> &'static [&'static str] {
        match self {
            SizeType::Letter => &["S", "M", "L", "XL", "XXL"],
            SizeType::Numeric => &["28", "29", "30", "31", "32", "33", "34", "36", "38"],
            SizeType::Standard => &["STD"],
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SizeType::Letter => "letter",
            SizeType::Numeric => "numeric",
            SizeType::Standard => "standard",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_lowercase().as_str() {
            "letter" | "harf" => Some(SizeType::Letter),
            "numeric" | "number" | "numara" => Some(SizeType::Numeric),
            "standard" | "standart" | "std" => Some(SizeType::Standard),
            _ => None,
        }
    }
}

/// Structured attributes the vision model extracted from a product photo.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ProductAnalysis {
    pub brand: Option<String>,
    pub product_type: Option<String>,
    pub color: Option<String>,
    pub suggested_name: Option<String>,
    pub suggested_category: Option<String>,
    pub suggested_slug: Option<String>,
    pub auto_sku: Option<String>,
    pub confidence: Confidence,
    pub is_packaging: bool,
    pub size_type: Option<SizeType>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentType {
    CreditCard,
    Cash,
    OpenAccount,
}

impl PaymentType {
    /// Accepts the short codes written on ledger pages as well as spelled-out names.
    pub fn parse(raw: &str) -> Option<Self> {
        let folded = crate::category::fold_case(raw.trim());
        match folded.as_str() {
            "kk" | "k.k." | "kredi karti" | "kart" | "credit_card" | "credit card"
            | "card" => Some(PaymentType::CreditCard),
            "n" | "nakit" | "cash" => Some(PaymentType::Cash),
            "ah" | "a.h." | "açik hesap" | "acik hesap" | "open_account" | "open account" => {
                Some(PaymentType::OpenAccount)
            }
            _ => None,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            PaymentType::CreditCard => "KK",
            PaymentType::Cash => "Nakit",
            PaymentType::OpenAccount => "AH",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub description: String,
    pub amount: f64,
    pub payment_type: Option<PaymentType>,
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct LedgerSummary {
    pub credit_card: f64,
    pub cash: f64,
    pub total_income: f64,
    pub total_expense: f64,
    pub net: f64,
}

/// One day of a handwritten cash ledger.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct LedgerAnalysis {
    pub date: Option<String>,
    pub incomes: Vec<LedgerEntry>,
    pub expenses: Vec<LedgerEntry>,
    pub summary: LedgerSummary,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReceiptItem {
    pub description: String,
    pub sku: Option<String>,
    pub quantity: i64,
    pub amount: Option<f64>,
}

/// Items sold according to a receipt photo.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ReceiptAnalysis {
    pub items: Vec<ReceiptItem>,
    pub total: Option<f64>,
}

/// A product being assembled before the user confirms it.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ProductDraft {
    pub sku: Option<String>,
    /// Set when `sku` came from the minter, so a conflict may re-mint it.
    #[serde(default)]
    pub sku_minted: bool,
    pub name: Option<String>,
    pub price: Option<f64>,
    pub brand: Option<String>,
    pub color: Option<String>,
    pub category: Option<String>,
    pub size_type: Option<SizeType>,
    pub stock: i64,
    #[serde(default)]
    pub photos: Vec<String>,
    #[serde(default)]
    pub videos: Vec<String>,
}

impl ProductDraft {
    pub fn with_media(photos: Vec<String>, videos: Vec<String>) -> Self {
        Self {
            stock: 1,
            photos,
            videos,
            ..Default::default()
        }
    }

    /// Names of required fields that are still empty.
    pub fn missing_fields(&self) -> Vec<&'static str> {
        let mut missing = Vec::new();
        if self.name.as_deref().map_or(true, |n| n.trim().is_empty()) {
            missing.push("name");
        }
        if self.price.is_none() {
            missing.push("price");
        }
        missing
    }
}

/// Photos collected for an existing product across several messages.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingPhotoAdd {
    pub sku: String,
    pub product_id: String,
    pub photos: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Idle,
    AwaitingProductConfirm,
    AwaitingLedgerConfirm,
    AwaitingReceiptConfirm,
    AwaitingPhotoAdd,
}

impl Action {
    pub fn as_str(&self) -> &'static str {
        match self {
            Action::Idle => "idle",
            Action::AwaitingProductConfirm => "awaiting_product_confirm",
            Action::AwaitingLedgerConfirm => "awaiting_ledger_confirm",
            Action::AwaitingReceiptConfirm => "awaiting_receipt_confirm",
            Action::AwaitingPhotoAdd => "awaiting_photo_add",
        }
    }

    pub fn parse_action(s: &str) -> Option<Self> {
        match s {
            "idle" => Some(Action::Idle),
            "awaiting_product_confirm" => Some(Action::AwaitingProductConfirm),
            "awaiting_ledger_confirm" => Some(Action::AwaitingLedgerConfirm),
            "awaiting_receipt_confirm" => Some(Action::AwaitingReceiptConfirm),
            "awaiting_photo_add" => Some(Action::AwaitingPhotoAdd),
            _ => None,
        }
    }
}

/// Dialogue state of one user together with the draft it carries.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(tag = "action", content = "data", rename_all = "snake_case")]
pub enum Conversation {
    #[default]
    Idle,
    AwaitingProductConfirm(ProductDraft),
    AwaitingLedgerConfirm(LedgerAnalysis),
    AwaitingReceiptConfirm(ReceiptAnalysis),
    AwaitingPhotoAdd { sku: String },
}

impl Conversation {
    pub fn action(&self) -> Action {
        match self {
            Conversation::Idle => Action::Idle,
            Conversation::AwaitingProductConfirm(_) => Action::AwaitingProductConfirm,
            Conversation::AwaitingLedgerConfirm(_) => Action::AwaitingLedgerConfirm,
            Conversation::AwaitingReceiptConfirm(_) => Action::AwaitingReceiptConfirm,
            Conversation::AwaitingPhotoAdd { .. } => Action::AwaitingPhotoAdd,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StockReason {
    Sale,
    Restock,
    Adjustment,
    Return,
}

impl StockReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            StockReason::Sale => "sale",
            StockReason::Restock => "restock",
            StockReason::Adjustment => "adjustment",
            StockReason::Return => "return",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_lowercase().as_str() {
            "sale" | "satis" | "satış" => Some(StockReason::Sale),
            "restock" | "giris" | "giriş" => Some(StockReason::Restock),
            "adjustment" | "duzeltme" | "düzeltme" => Some(StockReason::Adjustment),
            "return" | "iade" => Some(StockReason::Return),
            _ => None,
        }
    }
}
