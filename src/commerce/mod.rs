use async_trait::async_trait;
use reqwest::{Client, Method, StatusCode, Url};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{json, Value};
use std::fmt;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};
use uuid::Uuid;

pub mod model;

use model::{
    Category, LedgerRecord, ListResponse, NewCategory, NewProduct, Product, StockUpdate,
};

#[derive(Debug, Error)]
pub enum CommerceError {
    /// The API rejected a write because of a uniqueness constraint (e.g. duplicate SKU).
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("commerce API error {status}: {body}")]
    Status { status: u16, body: String },
    #[error("failed to reach commerce API: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("invalid commerce API response: {0}")]
    Decode(String),
    #[error("invalid commerce API URL: {0}")]
    Url(String),
}

pub type CommerceResult<T> = Result<T, CommerceError>;

/// Operations the bot performs against the store backend.
#[async_trait]
pub trait CommerceApi: Send + Sync {
    async fn list_categories(&self) -> CommerceResult<Vec<Category>>;

    async fn create_category(&self, category: &NewCategory) -> CommerceResult<Category>;

    async fn list_products(&self) -> CommerceResult<Vec<Product>>;

    async fn create_product(&self, product: &NewProduct) -> CommerceResult<Product>;

    async fn add_product_images(&self, product_id: &str, urls: &[String]) -> CommerceResult<()>;

    async fn update_stock(&self, update: &StockUpdate) -> CommerceResult<()>;

    async fn record_ledger(&self, record: &LedgerRecord) -> CommerceResult<()>;
}

#[derive(Clone)]
pub struct CommerceClient {
    http: Client,
    base_url: Url,
    token: String,
}

impl fmt::Debug for CommerceClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommerceClient")
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

impl CommerceClient {
    pub fn new(base_url: &str, token: String) -> CommerceResult<Self> {
        // A trailing slash keeps `join` from dropping the last path segment.
        let base = if base_url.ends_with('/') {
            base_url.to_string()
        } else {
            format!("{}/", base_url)
        };
        let http = Client::builder()
            .user_agent("tg-stockbot/0.1")
            .timeout(Duration::from_secs(30))
            .build()?;
        Ok(Self {
            http,
            base_url: Url::parse(&base).map_err(|e| CommerceError::Url(e.to_string()))?,
            token,
        })
    }

    pub fn build_request(
        &self,
        method: Method,
        path: &str,
        body: Option<&Value>,
    ) -> CommerceResult<reqwest::Request> {
        let endpoint = self
            .base_url
            .join(path)
            .map_err(|e| CommerceError::Url(e.to_string()))?;
        let mut builder = self
            .http
            .request(method.clone(), endpoint)
            .header("Authorization", format!("Bearer {}", self.token))
            .header("Accept", "application/json");
        if method == Method::POST {
            if let Some(key) = idempotency_key(path, body) {
                builder = builder.header("Idempotency-Key", key);
            }
        }
        if let Some(body) = body {
            builder = builder.json(body);
        }
        Ok(builder.build()?)
    }

    async fn execute(&self, method: Method, path: &str, body: Option<Value>) -> CommerceResult<String> {
        let request = self.build_request(method, path, body.as_ref())?;
        debug!(method=%request.method(), url=%request.url(), "sending commerce request");
        let res = self.http.execute(request).await?;

        let status = res.status();
        let text = res.text().await.unwrap_or_default();
        if status == StatusCode::CONFLICT {
            warn!(path, body = %text, "commerce API reported a conflict");
            return Err(CommerceError::Conflict(text));
        }
        if !status.is_success() {
            warn!(path, %status, body = %text, "commerce API error");
            return Err(CommerceError::Status {
                status: status.as_u16(),
                body: text,
            });
        }
        Ok(text)
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> CommerceResult<T> {
        let text = self.execute(Method::GET, path, None).await?;
        serde_json::from_str(&text).map_err(|e| CommerceError::Decode(e.to_string()))
    }

    async fn post_json<B: Serialize, T: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> CommerceResult<T> {
        let body = serde_json::to_value(body).map_err(|e| CommerceError::Decode(e.to_string()))?;
        let text = self.execute(Method::POST, path, Some(body)).await?;
        decode_entity(&text)
    }

    async fn post_unit<B: Serialize>(&self, path: &str, body: &B) -> CommerceResult<()> {
        let body = serde_json::to_value(body).map_err(|e| CommerceError::Decode(e.to_string()))?;
        self.execute(Method::POST, path, Some(body)).await?;
        Ok(())
    }
}

const STOCK_UPDATE_PATH: &str = "stock-update";

/// Key for a write, derived from its path and body so a re-sent commit of the
/// same draft reuses it. Stock movements repeat legitimately and carry none.
pub fn idempotency_key(path: &str, body: Option<&Value>) -> Option<String> {
    if path == STOCK_UPDATE_PATH {
        return None;
    }
    let body = body.map(Value::to_string).unwrap_or_default();
    let name = format!("{}\n{}", path, body);
    Some(Uuid::new_v5(&Uuid::NAMESPACE_URL, name.as_bytes()).to_string())
}

/// Single-entity responses come bare or wrapped in `{ "data": {...} }`.
fn decode_entity<T: DeserializeOwned>(text: &str) -> CommerceResult<T> {
    let value: Value =
        serde_json::from_str(text).map_err(|e| CommerceError::Decode(e.to_string()))?;
    let inner = match value {
        Value::Object(mut map) if map.contains_key("data") && !map.contains_key("id") => {
            map.remove("data").unwrap_or(Value::Null)
        }
        other => other,
    };
    serde_json::from_value(inner).map_err(|e| CommerceError::Decode(e.to_string()))
}

#[async_trait]
impl CommerceApi for CommerceClient {
    async fn list_categories(&self) -> CommerceResult<Vec<Category>> {
        let list: ListResponse<Category> = self.get_json("categories").await?;
        Ok(list.into_vec())
    }

    async fn create_category(&self, category: &NewCategory) -> CommerceResult<Category> {
        self.post_json("categories", category).await
    }

    async fn list_products(&self) -> CommerceResult<Vec<Product>> {
        let list: ListResponse<Product> = self.get_json("products").await?;
        Ok(list.into_vec())
    }

    async fn create_product(&self, product: &NewProduct) -> CommerceResult<Product> {
        self.post_json("products", product).await
    }

    async fn add_product_images(&self, product_id: &str, urls: &[String]) -> CommerceResult<()> {
        let body = json!({ "images": urls });
        self.post_unit(&format!("products/{}/images", product_id), &body)
            .await
    }

    async fn update_stock(&self, update: &StockUpdate) -> CommerceResult<()> {
        self.post_unit(STOCK_UPDATE_PATH, update).await
    }

    async fn record_ledger(&self, record: &LedgerRecord) -> CommerceResult<()> {
        self.post_unit("ledger", record).await
    }
}
