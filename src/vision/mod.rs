//! Image classification and structured extraction through a multimodal model.
pub mod parse;
pub mod prompt;

use crate::category::{self, ACCESSORY, LOWER_BODY, UPPER_BODY};
use crate::config;
use crate::model::{ImageKind, LedgerAnalysis, ProductAnalysis, ReceiptAnalysis, SizeType};
use crate::sku::SkuMinter;
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, instrument, warn};

#[derive(Debug, Error)]
pub enum VisionError {
    #[error("vision model is not configured")]
    NotConfigured,
    #[error("http error: {0}")]
    Http(String),
    #[error("invalid response: {0}")]
    InvalidResponse(String),
}

/// A model that answers one instruction about one image with free text.
#[async_trait]
pub trait VisionModel: Send + Sync {
    async fn complete(&self, image: &[u8], instruction: &str, max_tokens: u32) -> Result<String, VisionError>;
}

/// OpenAI-compatible `chat/completions` client.
pub struct OpenAiVision {
    http: Client,
    api_base: String,
    api_key: String,
    model: String,
}

impl OpenAiVision {
    pub fn from_config(cfg: &config::Vision) -> Self {
        let mut api_base = cfg.api_base.trim().to_string();
        if !api_base.ends_with('/') {
            api_base.push('/');
        }
        let http = Client::builder()
            .timeout(Duration::from_secs(cfg.timeout_secs.max(1)))
            .connect_timeout(Duration::from_secs(5))
            .build()
            .unwrap_or_else(|_| Client::new());
        Self {
            http,
            api_base,
            api_key: cfg.api_key.trim().to_string(),
            model: cfg.model.clone(),
        }
    }
}

/// Best-effort MIME type from the leading magic bytes; JPEG when unknown.
pub fn sniff_mime(image: &[u8]) -> &'static str {
    match image {
        [0x89, b'P', b'N', b'G', ..] => "image/png",
        [b'G', b'I', b'F', b'8', ..] => "image/gif",
        [b'R', b'I', b'F', b'F', _, _, _, _, b'W', b'E', b'B', b'P', ..] => "image/webp",
        _ => "image/jpeg",
    }
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    temperature: f32,
    messages: Vec<ChatMessage>,
}

#[derive(Debug, Serialize)]
struct ChatMessage {
    role: &'static str,
    content: Vec<ContentPart>,
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ContentPart {
    Text { text: String },
    ImageUrl { image_url: ImageUrl },
}

#[derive(Debug, Serialize)]
struct ImageUrl {
    url: String,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    #[serde(default)]
    content: Value,
}

/// Text of a reply whose `content` is either a string or a list of typed parts.
fn content_text(content: &Value) -> Option<String> {
    match content {
        Value::String(s) => Some(s.clone()),
        Value::Array(parts) => {
            let text: Vec<&str> = parts
                .iter()
                .filter_map(|p| p.get("text").and_then(Value::as_str))
                .collect();
            (!text.is_empty()).then(|| text.join(""))
        }
        _ => None,
    }
}

#[async_trait]
impl VisionModel for OpenAiVision {
    async fn complete(&self, image: &[u8], instruction: &str, max_tokens: u32) -> Result<String, VisionError> {
        if self.api_key.is_empty() {
            return Err(VisionError::NotConfigured);
        }
        let data_url = format!("data:{};base64,{}", sniff_mime(image), STANDARD.encode(image));
        let body = ChatRequest {
            model: &self.model,
            max_tokens,
            temperature: 0.0,
            messages: vec![ChatMessage {
                role: "user",
                content: vec![
                    ContentPart::Text {
                        text: instruction.to_string(),
                    },
                    ContentPart::ImageUrl {
                        image_url: ImageUrl { url: data_url },
                    },
                ],
            }],
        };

        let response = self
            .http
            .post(format!("{}chat/completions", self.api_base))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|err| VisionError::Http(err.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(VisionError::Http(format!("HTTP {}: {}", status, text)));
        }

        let payload: ChatResponse = response
            .json()
            .await
            .map_err(|err| VisionError::InvalidResponse(err.to_string()))?;
        payload
            .choices
            .into_iter()
            .next()
            .and_then(|c| content_text(&c.message.content))
            .ok_or_else(|| VisionError::InvalidResponse("missing message content".into()))
    }
}

/// Routes images to the right prompt and turns replies into typed analyses.
/// Every method answers `None` when the model is unreachable or unintelligible.
#[derive(Clone)]
pub struct Classifier {
    model: Arc<dyn VisionModel>,
    minter: SkuMinter,
}

impl Classifier {
    pub fn new(model: Arc<dyn VisionModel>, minter: SkuMinter) -> Self {
        Self { model, minter }
    }

    async fn ask(&self, image: &[u8], instruction: &str, max_tokens: u32) -> Option<String> {
        match self.model.complete(image, instruction, max_tokens).await {
            Ok(reply) => {
                debug!(len = reply.len(), "vision reply");
                Some(reply)
            }
            Err(err) => {
                warn!(error = %err, "vision request failed");
                None
            }
        }
    }

    #[instrument(skip_all)]
    pub async fn detect_type(&self, image: &[u8]) -> Option<ImageKind> {
        let reply = self.ask(image, prompt::DETECT_TYPE, 8).await?;
        let kind = reply.split_whitespace().next().and_then(ImageKind::parse);
        if kind.is_none() {
            warn!(reply = %reply.trim(), "unrecognised image type");
        }
        kind
    }

    #[instrument(skip_all)]
    pub async fn analyze_product(&self, image: &[u8]) -> Option<ProductAnalysis> {
        let reply = self.ask(image, prompt::PRODUCT, 400).await?;
        let Some(mut analysis) = parse::parse_product(&reply) else {
            warn!("product reply held no usable JSON");
            return None;
        };
        classify_product(&mut analysis);
        analysis.auto_sku = Some(self.minter.next_sku(analysis.brand.as_deref()).await);
        Some(analysis)
    }

    #[instrument(skip_all)]
    pub async fn analyze_ledger(&self, image: &[u8]) -> Option<LedgerAnalysis> {
        let reply = self.ask(image, prompt::LEDGER, 1500).await?;
        let ledger = parse::parse_ledger(&reply);
        if ledger.is_none() {
            warn!("ledger reply held no usable entries");
        }
        ledger
    }

    #[instrument(skip_all)]
    pub async fn analyze_receipt(&self, image: &[u8]) -> Option<ReceiptAnalysis> {
        let reply = self.ask(image, prompt::RECEIPT, 1000).await?;
        let receipt = parse::parse_receipt(&reply);
        if receipt.is_none() {
            warn!("receipt reply held no usable items");
        }
        receipt
    }
}

/// Applies the shop's category and size rules on top of what the model saw.
/// The model's own category guess is replaced; only the product type counts.
pub fn classify_product(analysis: &mut ProductAnalysis) {
    let (category, size_type) = if analysis.is_packaging {
        (ACCESSORY, SizeType::Standard)
    } else {
        let kind = analysis.product_type.as_deref().unwrap_or_default();
        (category::top_level_category(kind), category::size_type_for(kind))
    };
    analysis.suggested_category = Some(category.to_string());
    analysis.suggested_slug = Some(category::slugify(category));
    analysis.size_type = Some(size_type);
}
