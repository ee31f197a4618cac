//! Wire types of the commerce API.
use crate::model::{LedgerEntry, LedgerSummary, StockReason};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

/// Ids arrive as strings from some deployments and as integers from others.
fn deserialize_id<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    match Value::deserialize(deserializer)? {
        Value::String(s) => Ok(s),
        Value::Number(n) => Ok(n.to_string()),
        other => Err(serde::de::Error::custom(format!("unexpected id: {other}"))),
    }
}

/// List endpoints return either a bare array or `{ "data": [...] }`.
#[derive(Deserialize)]
#[serde(untagged)]
pub(crate) enum ListResponse<T> {
    Bare(Vec<T>),
    Wrapped { data: Vec<T> },
}

impl<T> ListResponse<T> {
    pub(crate) fn into_vec(self) -> Vec<T> {
        match self {
            ListResponse::Bare(items) => items,
            ListResponse::Wrapped { data } => data,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Category {
    #[serde(deserialize_with = "deserialize_id")]
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub slug: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NewCategory {
    pub name: String,
    pub slug: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Variant {
    pub size: String,
    #[serde(default)]
    pub stock: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Product {
    #[serde(deserialize_with = "deserialize_id")]
    pub id: String,
    #[serde(default)]
    pub sku: Option<String>,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub price: Option<f64>,
    #[serde(default)]
    pub variants: Vec<Variant>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProductImage {
    pub url: String,
    pub position: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NewProduct {
    pub sku: String,
    pub name: String,
    pub slug: String,
    pub price: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub brand: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
    pub variants: Vec<Variant>,
    pub images: Vec<ProductImage>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub videos: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StockUpdate {
    pub product_id: String,
    pub sku: String,
    pub delta: i64,
    pub reason: StockReason,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LedgerRecord {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub date: Option<String>,
    pub incomes: Vec<LedgerEntry>,
    pub expenses: Vec<LedgerEntry>,
    pub summary: LedgerSummary,
}
