//! Commit operations run on `/confirm` and `/stock`: they turn a confirmed
//! draft into commerce API calls.
use crate::caption::StockArgs;
use crate::category::{self, fold_case, CategoryResolver};
use crate::commerce::model::{LedgerRecord, NewProduct, Product, ProductImage, StockUpdate, Variant};
use crate::commerce::{CommerceApi, CommerceError};
use crate::delivery::ChatApi;
use crate::model::{
    LedgerAnalysis, PendingPhotoAdd, ProductDraft, ReceiptAnalysis, ReceiptItem, SizeType,
    StockReason,
};
use crate::sku::SkuMinter;
use thiserror::Error;
use tracing::{info, instrument, warn};

/// Attempts at creating a product before a duplicate SKU is reported to the user.
pub const MAX_CREATE_ATTEMPTS: usize = 3;

#[derive(Debug, Error)]
pub enum FlowError {
    /// Problem with the draft itself; the user can fix it and confirm again.
    #[error("{0}")]
    Data(String),
    #[error("commerce API error: {0}")]
    Commerce(#[from] CommerceError),
}

pub type FlowResult<T> = Result<T, FlowError>;

#[derive(Debug, Clone, PartialEq)]
pub struct CreatedProduct {
    pub product: Product,
    pub sku: String,
    pub images: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReceiptOutcome {
    /// `(sku, quantity)` of every deducted line.
    pub deducted: Vec<(String, i64)>,
    pub unmatched: Vec<String>,
    pub failed: Vec<String>,
}

/// Resolve Telegram file ids to URLs the commerce backend can fetch.
/// Ids that cannot be resolved are skipped.
pub async fn resolve_urls(chat: &dyn ChatApi, file_ids: &[String]) -> Vec<String> {
    let mut urls = Vec::with_capacity(file_ids.len());
    for id in file_ids {
        match chat.file_url(id).await {
            Ok(url) => urls.push(url),
            Err(err) => warn!(?err, file_id = %id, "could not resolve file URL; skipping"),
        }
    }
    urls
}

/// One variant per size of the taxonomy; the whole initial stock sits on the first.
pub fn variants_for(size_type: SizeType, stock: i64) -> Vec<Variant> {
    size_type
        .sizes()
        .iter()
        .enumerate()
        .map(|(i, size)| Variant {
            size: size.to_string(),
            stock: if i == 0 { stock.max(0) } else { 0 },
        })
        .collect()
}

fn validate_draft(draft: &ProductDraft) -> FlowResult<(String, f64)> {
    let missing = draft.missing_fields();
    if !missing.is_empty() {
        return Err(FlowError::Data(format!("Missing fields: {}.", missing.join(", "))));
    }
    let name = draft.name.clone().unwrap_or_default().trim().to_string();
    let price = draft.price.unwrap_or_default();
    if !price.is_finite() || price <= 0.0 {
        return Err(FlowError::Data("Price must be a positive amount.".into()));
    }
    if draft.stock < 0 {
        return Err(FlowError::Data("Stock cannot be negative.".into()));
    }
    Ok((name, price))
}

#[instrument(skip_all)]
pub async fn commit_product(
    commerce: &dyn CommerceApi,
    chat: &dyn ChatApi,
    minter: &SkuMinter,
    resolver: &CategoryResolver,
    draft: &ProductDraft,
) -> FlowResult<CreatedProduct> {
    let (name, price) = validate_draft(draft)?;

    let category_name = draft
        .category
        .clone()
        .unwrap_or_else(|| category::top_level_category(&name).to_string());
    let category_id = resolver.resolve(&category_name).await;
    if category_id.is_none() {
        warn!(category = %category_name, "creating product without a category");
    }
    let size_type = draft
        .size_type
        .unwrap_or_else(|| category::size_type_for(&name));

    let photo_urls = resolve_urls(chat, &draft.photos).await;
    let video_urls = resolve_urls(chat, &draft.videos).await;
    let images: Vec<ProductImage> = photo_urls
        .into_iter()
        .enumerate()
        .map(|(i, url)| ProductImage {
            url,
            position: i as u32,
        })
        .collect();

    let mut minted = draft.sku_minted || draft.sku.is_none();
    let mut sku = match &draft.sku {
        Some(sku) => sku.clone(),
        None => minter.next_sku(draft.brand.as_deref()).await,
    };

    for attempt in 1..=MAX_CREATE_ATTEMPTS {
        let new = NewProduct {
            sku: sku.clone(),
            name: name.clone(),
            slug: category::slugify(&format!("{} {}", name, sku)),
            price,
            category_id: category_id.clone(),
            brand: draft.brand.clone(),
            color: draft.color.clone(),
            variants: variants_for(size_type, draft.stock),
            images: images.clone(),
            videos: video_urls.clone(),
        };
        match commerce.create_product(&new).await {
            Ok(product) => {
                info!(%sku, id = %product.id, attempt, "product created");
                return Ok(CreatedProduct {
                    product,
                    sku,
                    images: images.len(),
                });
            }
            Err(CommerceError::Conflict(body)) if minted && attempt < MAX_CREATE_ATTEMPTS => {
                warn!(%sku, attempt, %body, "SKU taken; minting another");
                sku = minter.next_sku(draft.brand.as_deref()).await;
                minted = true;
            }
            Err(CommerceError::Conflict(_)) => {
                return Err(FlowError::Data(format!(
                    "SKU {} already exists. Choose another with /set sku.",
                    sku
                )));
            }
            Err(err) => return Err(err.into()),
        }
    }
    Err(FlowError::Data(format!(
        "Could not find a free SKU after {} attempts.",
        MAX_CREATE_ATTEMPTS
    )))
}

#[instrument(skip_all)]
pub async fn commit_ledger(commerce: &dyn CommerceApi, ledger: &LedgerAnalysis) -> FlowResult<()> {
    if ledger.incomes.is_empty() && ledger.expenses.is_empty() {
        return Err(FlowError::Data("The ledger has no entries.".into()));
    }
    let all = ledger.incomes.iter().chain(&ledger.expenses);
    if all.clone().any(|e| !e.amount.is_finite() || e.amount < 0.0) {
        return Err(FlowError::Data("The ledger contains an invalid amount.".into()));
    }
    let record = LedgerRecord {
        date: ledger.date.clone(),
        incomes: ledger.incomes.clone(),
        expenses: ledger.expenses.clone(),
        summary: ledger.summary,
    };
    commerce.record_ledger(&record).await?;
    info!(entries = all.count(), net = ledger.summary.net, "ledger recorded");
    Ok(())
}

fn sku_matches(product: &Product, sku: &str) -> bool {
    product
        .sku
        .as_deref()
        .is_some_and(|p| p.trim().eq_ignore_ascii_case(sku.trim()))
}

/// Catalog entry for a receipt line: exact SKU first, then a name that
/// contains or is contained by the description.
pub fn match_item<'a>(products: &'a [Product], item: &ReceiptItem) -> Option<&'a Product> {
    if let Some(sku) = item.sku.as_deref() {
        if let Some(p) = products.iter().find(|p| sku_matches(p, sku)) {
            return Some(p);
        }
    }
    let wanted = fold_case(item.description.trim());
    if wanted.len() < 3 {
        return None;
    }
    products.iter().filter(|p| p.sku.is_some()).find(|p| {
        let name = fold_case(p.name.trim());
        !name.is_empty() && (name.contains(&wanted) || wanted.contains(&name))
    })
}

/// Deduct each matched receipt line from stock as a sale.
#[instrument(skip_all)]
pub async fn commit_receipt(commerce: &dyn CommerceApi, receipt: &ReceiptAnalysis) -> FlowResult<ReceiptOutcome> {
    if receipt.items.is_empty() {
        return Err(FlowError::Data("The receipt has no items.".into()));
    }
    let products = commerce.list_products().await?;
    let mut outcome = ReceiptOutcome::default();
    for item in &receipt.items {
        let label = item
            .sku
            .clone()
            .unwrap_or_else(|| item.description.clone());
        let Some(product) = match_item(&products, item) else {
            outcome.unmatched.push(label);
            continue;
        };
        let sku = product.sku.clone().unwrap_or_default();
        let update = StockUpdate {
            product_id: product.id.clone(),
            sku: sku.clone(),
            delta: -item.quantity.max(1),
            reason: StockReason::Sale,
        };
        match commerce.update_stock(&update).await {
            Ok(()) => outcome.deducted.push((sku, item.quantity.max(1))),
            Err(err) => {
                warn!(?err, %sku, "stock deduction failed");
                outcome.failed.push(label);
            }
        }
    }
    info!(
        deducted = outcome.deducted.len(),
        unmatched = outcome.unmatched.len(),
        failed = outcome.failed.len(),
        "receipt applied"
    );
    Ok(outcome)
}

pub async fn find_product(commerce: &dyn CommerceApi, sku: &str) -> FlowResult<Option<Product>> {
    let products = commerce.list_products().await?;
    Ok(products.into_iter().find(|p| sku_matches(p, sku)))
}

#[instrument(skip_all)]
pub async fn commit_photo_add(commerce: &dyn CommerceApi, pending: &PendingPhotoAdd) -> FlowResult<usize> {
    if pending.photos.is_empty() {
        return Err(FlowError::Data(format!(
            "No photos collected for {} yet. Send them first.",
            pending.sku
        )));
    }
    commerce
        .add_product_images(&pending.product_id, &pending.photos)
        .await?;
    info!(sku = %pending.sku, count = pending.photos.len(), "photos added to product");
    Ok(pending.photos.len())
}

#[instrument(skip_all)]
pub async fn apply_stock(commerce: &dyn CommerceApi, args: &StockArgs) -> FlowResult<Product> {
    let Some(product) = find_product(commerce, &args.sku).await? else {
        return Err(FlowError::Data(format!("No product with SKU {}.", args.sku)));
    };
    let update = StockUpdate {
        product_id: product.id.clone(),
        sku: args.sku.clone(),
        delta: args.delta,
        reason: args.reason,
    };
    commerce.update_stock(&update).await?;
    info!(sku = %args.sku, delta = args.delta, reason = args.reason.as_str(), "stock updated");
    Ok(product)
}
