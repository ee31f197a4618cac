mod common;

use common::{product, setup_pool, FakeCommerce, RecordingChat};
use futures::future::join_all;
use std::collections::HashSet;
use std::sync::Arc;
use tg_stockbot::caption::StockArgs;
use tg_stockbot::category::CategoryResolver;
use tg_stockbot::commerce::CommerceApi;
use tg_stockbot::flows::{self, FlowError};
use tg_stockbot::model::{
    LedgerAnalysis, LedgerEntry, PaymentType, ProductDraft, ReceiptAnalysis, ReceiptItem,
    SizeType, StockReason,
};
use tg_stockbot::sku::SkuMinter;

async fn minter(commerce: Arc<FakeCommerce>) -> SkuMinter {
    SkuMinter::new(commerce, setup_pool().await)
}

#[tokio::test]
async fn sku_continues_catalog_sequence() {
    let skus: Vec<(String, String)> = (1..=7)
        .map(|n| (format!("LCST{n:02}"), format!("Polo {n}")))
        .collect();
    let refs: Vec<(&str, &str)> = skus.iter().map(|(s, n)| (s.as_str(), n.as_str())).collect();
    let commerce = Arc::new(FakeCommerce::with_products(&refs).await);
    let minter = minter(commerce).await;

    assert_eq!(minter.next_sku(Some("Lacoste")).await, "LCST08");
    // Reserved numbers are not handed out twice, even before the product exists.
    assert_eq!(minter.next_sku(Some("LACOSTE")).await, "LCST09");
}

#[tokio::test]
async fn unknown_brand_on_empty_catalog_starts_generic_sequence() {
    let minter = minter(Arc::new(FakeCommerce::default())).await;
    assert_eq!(minter.next_sku(Some("No Name Textiles")).await, "GNL01");
    assert_eq!(minter.next_sku(None).await, "GNL02");
}

#[tokio::test]
async fn catalog_outage_still_mints() {
    let commerce = Arc::new(FakeCommerce::default());
    commerce.set_unavailable(true).await;
    let minter = minter(commerce).await;
    assert_eq!(minter.next_sku(Some("Gant")).await, "GANT01");
}

#[tokio::test]
async fn concurrent_minting_never_collides() {
    let commerce = Arc::new(FakeCommerce::with_products(&[("BOSS04", "Gömlek")]).await);
    let minter = minter(commerce).await;
    let skus = join_all((0..12).map(|_| minter.next_sku(Some("Hugo Boss")))).await;
    let unique: HashSet<&String> = skus.iter().collect();
    assert_eq!(unique.len(), skus.len());
    assert!(skus.contains(&"BOSS05".to_string()));
    assert!(skus.contains(&"BOSS16".to_string()));
}

#[tokio::test]
async fn category_resolution_is_idempotent() {
    let commerce = Arc::new(FakeCommerce::default());
    let resolver = CategoryResolver::new(commerce.clone());

    let first = resolver.resolve("Yeni Sezon Çanta").await.unwrap();
    let second = resolver.resolve("YENİ SEZON ÇANTA").await.unwrap();
    assert_eq!(first, second);

    let state = commerce.state.lock().await;
    assert_eq!(state.created_categories.len(), 1);
    let slug = &state.created_categories[0].slug;
    assert_eq!(slug, "yeni-sezon-canta");
    assert!(slug.chars().all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-'));
    assert!(!slug.starts_with('-') && !slug.ends_with('-'));
}

#[tokio::test]
async fn category_creation_failure_is_none() {
    let commerce = Arc::new(FakeCommerce::default());
    commerce.set_unavailable(true).await;
    let resolver = CategoryResolver::new(commerce);
    assert_eq!(resolver.resolve("Aksesuar").await, None);
}

fn draft(sku: Option<&str>, minted: bool) -> ProductDraft {
    ProductDraft {
        sku: sku.map(Into::into),
        sku_minted: minted,
        name: Some("Lacoste Lacivert Polo".into()),
        price: Some(450.0),
        brand: Some("Lacoste".into()),
        category: Some("Üst Giyim".into()),
        size_type: Some(SizeType::Letter),
        stock: 2,
        ..ProductDraft::with_media(vec!["p1".into(), "broken-p2".into()], vec![])
    }
}

#[tokio::test]
async fn product_commit_builds_variants_and_images() {
    let commerce = Arc::new(FakeCommerce::default());
    let chat = RecordingChat::default();
    let minter = minter(commerce.clone()).await;
    let resolver = CategoryResolver::new(commerce.clone());

    let created = flows::commit_product(commerce.as_ref(), &chat, &minter, &resolver, &draft(Some("LCST08"), false))
        .await
        .unwrap();
    assert_eq!(created.sku, "LCST08");
    assert_eq!(created.images, 1);

    let state = commerce.state.lock().await;
    let new = &state.created[0];
    assert_eq!(new.category_id.as_deref(), Some("c1"));
    assert_eq!(new.images[0].url, "https://files.test/p1");
    assert_eq!(new.variants.len(), 5);
    assert_eq!(new.variants[0].stock, 2);
    assert_eq!(new.slug, "lacoste-lacivert-polo-lcst08");
}

#[tokio::test]
async fn minted_sku_conflict_is_retried_with_new_sku() {
    let commerce = Arc::new(FakeCommerce::with_products(&[("LCST03", "Eski Polo")]).await);
    let chat = RecordingChat::default();
    let minter = minter(commerce.clone()).await;
    let resolver = CategoryResolver::new(commerce.clone());

    let created = flows::commit_product(commerce.as_ref(), &chat, &minter, &resolver, &draft(Some("LCST03"), true))
        .await
        .unwrap();
    assert_eq!(created.sku, "LCST04");
}

#[tokio::test]
async fn typed_sku_conflict_is_a_data_error() {
    let commerce = Arc::new(FakeCommerce::with_products(&[("LCST03", "Eski Polo")]).await);
    let chat = RecordingChat::default();
    let minter = minter(commerce.clone()).await;
    let resolver = CategoryResolver::new(commerce.clone());

    let err = flows::commit_product(commerce.as_ref(), &chat, &minter, &resolver, &draft(Some("LCST03"), false))
        .await
        .unwrap_err();
    assert!(matches!(err, FlowError::Data(msg) if msg.contains("LCST03")));
    assert!(commerce.state.lock().await.created.is_empty());
}

#[tokio::test]
async fn missing_sku_is_minted_at_commit() {
    let commerce = Arc::new(FakeCommerce::default());
    let chat = RecordingChat::default();
    let minter = minter(commerce.clone()).await;
    let resolver = CategoryResolver::new(commerce.clone());

    let created = flows::commit_product(commerce.as_ref(), &chat, &minter, &resolver, &draft(None, false))
        .await
        .unwrap();
    assert_eq!(created.sku, "LCST01");
}

#[tokio::test]
async fn receipt_deducts_matched_items() {
    let commerce = Arc::new(
        FakeCommerce::with_products(&[("LCST08", "Lacoste Polo"), ("GNL03", "Deri Kemer")]).await,
    );
    let receipt = ReceiptAnalysis {
        items: vec![
            ReceiptItem {
                description: "polo".into(),
                sku: Some("lcst08".into()),
                quantity: 2,
                amount: Some(900.0),
            },
            ReceiptItem {
                description: "Deri Kemer".into(),
                sku: None,
                quantity: 1,
                amount: None,
            },
            ReceiptItem {
                description: "Hediye Paketi".into(),
                sku: None,
                quantity: 1,
                amount: None,
            },
        ],
        total: Some(1200.0),
    };

    let outcome = flows::commit_receipt(commerce.as_ref(), &receipt).await.unwrap();
    assert_eq!(
        outcome.deducted,
        vec![("LCST08".to_string(), 2), ("GNL03".to_string(), 1)]
    );
    assert_eq!(outcome.unmatched, vec!["Hediye Paketi".to_string()]);

    let state = commerce.state.lock().await;
    assert_eq!(state.stock_updates.len(), 2);
    assert_eq!(state.stock_updates[0].delta, -2);
    assert_eq!(state.stock_updates[0].reason, StockReason::Sale);
    assert_eq!(state.stock_updates[1].product_id, "p2");
}

#[tokio::test]
async fn ledger_commit_posts_summary() {
    let commerce = Arc::new(FakeCommerce::default());
    let entry = |amount, payment_type| LedgerEntry {
        description: "x".into(),
        amount,
        payment_type,
    };
    let ledger = LedgerAnalysis::new(
        Some("2024-05-01".into()),
        vec![
            entry(500.0, Some(PaymentType::CreditCard)),
            entry(300.0, Some(PaymentType::OpenAccount)),
        ],
        vec![entry(100.0, None)],
    );
    flows::commit_ledger(commerce.as_ref(), &ledger).await.unwrap();

    let state = commerce.state.lock().await;
    let summary = state.ledgers[0].summary;
    assert_eq!(summary.credit_card, 500.0);
    assert_eq!(summary.cash, 300.0);
    assert_eq!(summary.total_income, 800.0);
    assert_eq!(summary.total_expense, 100.0);
    assert_eq!(summary.net, 700.0);
    drop(state);

    let empty = LedgerAnalysis::default();
    assert!(matches!(
        flows::commit_ledger(commerce.as_ref(), &empty).await,
        Err(FlowError::Data(_))
    ));
}

#[tokio::test]
async fn stock_adjustment_requires_known_sku() {
    let commerce = Arc::new(FakeCommerce::with_products(&[("LCST08", "Lacoste Polo")]).await);
    let args = StockArgs {
        sku: "LCST08".into(),
        delta: 5,
        reason: StockReason::Restock,
    };
    let product = flows::apply_stock(commerce.as_ref(), &args).await.unwrap();
    assert_eq!(product.id, "p1");

    let missing = StockArgs {
        sku: "NOPE01".into(),
        ..args
    };
    assert!(matches!(
        flows::apply_stock(commerce.as_ref(), &missing).await,
        Err(FlowError::Data(_))
    ));

    commerce.set_unavailable(true).await;
    let outage = StockArgs {
        sku: "LCST08".into(),
        delta: -1,
        reason: StockReason::Sale,
    };
    assert!(matches!(
        flows::apply_stock(commerce.as_ref(), &outage).await,
        Err(FlowError::Commerce(_))
    ));
}

#[tokio::test]
async fn catalog_lookup_ignores_sku_case() {
    let commerce = FakeCommerce::with_products(&[("LCST08", "Lacoste Polo")]).await;
    let found = flows::find_product(&commerce, "lcst08").await.unwrap();
    assert_eq!(found, Some(product("p1", "LCST08", "Lacoste Polo")));
    assert!(commerce.list_products().await.unwrap().len() == 1);
}
