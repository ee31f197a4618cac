//! SKU minting: brand prefix plus the next free two-digit (or wider) number.
use crate::commerce::CommerceApi;
use crate::db;
use crate::db::Pool;
use std::sync::Arc;
use tracing::{debug, instrument, warn};

pub const GENERIC_PREFIX: &str = "GNL";

const BRAND_PREFIXES: &[(&str, &str)] = &[
    ("lacoste", "LCST"),
    ("tommy hilfiger", "TMHF"),
    ("ralph lauren", "RLPH"),
    ("hugo boss", "BOSS"),
    ("gant", "GANT"),
    ("massimo dutti", "MSDT"),
    ("burberry", "BRBR"),
    ("armani", "ARMN"),
    ("calvin klein", "CKLN"),
    ("hackett", "HCKT"),
    ("paul & shark", "PSHK"),
    ("louis vuitton", "LVTN"),
    ("gucci", "GUCC"),
    ("prada", "PRDA"),
    ("levi's", "LEVI"),
    ("levis", "LEVI"),
    ("nike", "NIKE"),
    ("adidas", "ADDS"),
];

/// Prefix for a brand. Matches when either name contains the other, ignoring case.
pub fn brand_prefix(brand: Option<&str>) -> &'static str {
    let Some(brand) = brand.map(|b| crate::category::fold_case(b.trim())) else {
        return GENERIC_PREFIX;
    };
    if brand.is_empty() {
        return GENERIC_PREFIX;
    }
    BRAND_PREFIXES
        .iter()
        .find(|(name, _)| brand.contains(name) || (brand.len() >= 3 && name.contains(&brand)))
        .map(|(_, prefix)| *prefix)
        .unwrap_or(GENERIC_PREFIX)
}

/// Numeric suffix of `sku` if it is `prefix` followed only by digits.
pub fn sku_number(sku: &str, prefix: &str) -> Option<i64> {
    let sku = sku.trim();
    if sku.len() <= prefix.len() || !sku.is_char_boundary(prefix.len()) {
        return None;
    }
    let (head, tail) = sku.split_at(prefix.len());
    if !head.eq_ignore_ascii_case(prefix) || !tail.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    tail.parse().ok()
}

pub fn format_sku(prefix: &str, number: i64) -> String {
    format!("{}{:02}", prefix, number)
}

#[derive(Clone)]
pub struct SkuMinter {
    commerce: Arc<dyn CommerceApi>,
    pool: Pool,
}

impl SkuMinter {
    pub fn new(commerce: Arc<dyn CommerceApi>, pool: Pool) -> Self {
        Self { commerce, pool }
    }

    /// Next SKU for `brand`. Never fails: catalog or counter errors fall back
    /// to what is known, down to `01`.
    #[instrument(skip_all)]
    pub async fn next_sku(&self, brand: Option<&str>) -> String {
        let prefix = brand_prefix(brand);
        let catalog_max = match self.commerce.list_products().await {
            Ok(products) => products
                .iter()
                .filter_map(|p| p.sku.as_deref())
                .filter_map(|sku| sku_number(sku, prefix))
                .max()
                .unwrap_or(0),
            Err(err) => {
                warn!(?err, prefix, "could not read catalog for SKU minting");
                0
            }
        };

        let number = match db::reserve_sku_number(&self.pool, prefix, catalog_max).await {
            Ok(n) => n,
            Err(err) => {
                warn!(?err, prefix, "SKU counter unavailable; using catalog maximum");
                catalog_max + 1
            }
        };
        let sku = format_sku(prefix, number);
        debug!(%sku, catalog_max, "minted SKU");
        sku
    }
}
