use std::time::Duration;

use async_trait::async_trait;
use cartpilot_core::config::OrdersConfig;
use cartpilot_core::{AddressId, ProductId, RuleId, UserId};
use cartpilot_rules::StockUpdate;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::OrderError;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderItem {
    pub product_id: ProductId,
    pub quantity: u32,
    /// Unit price at the time of the triggering evaluation.
    pub price: f64,
}

/// Body of the storefront's order endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderRequest {
    pub user_id: UserId,
    pub items: Vec<OrderItem>,
    pub total: f64,
    pub address_id: AddressId,
    /// Always true for orders placed by a rule, so the storefront can tell them apart.
    pub auto_ordered: bool,
    pub agent_rule_id: RuleId,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderReceipt {
    #[serde(default)]
    pub order_id: Option<String>,
    /// Post-order stock levels to merge back into the catalog.
    #[serde(default)]
    pub updated_products: Vec<StockUpdate>,
}

/// Places real orders on behalf of a user.
#[async_trait]
pub trait OrderService: Send + Sync {
    async fn place_order(&self, req: &OrderRequest) -> Result<OrderReceipt, OrderError>;
}

/// [`OrderService`] backed by the storefront's REST endpoint.
pub struct HttpOrderService {
    client: reqwest::Client,
    url: String,
    timeout_ms: u64,
}

impl HttpOrderService {
    pub fn new(config: &OrdersConfig) -> Result<Self, OrderError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()
            .map_err(|e| OrderError::Network(e.to_string()))?;
        Ok(Self {
            client,
            url: format!("{}{}", config.base_url.trim_end_matches('/'), config.path),
            timeout_ms: config.timeout_ms,
        })
    }
}

#[async_trait]
impl OrderService for HttpOrderService {
    async fn place_order(&self, req: &OrderRequest) -> Result<OrderReceipt, OrderError> {
        debug!(rule_id = %req.agent_rule_id, url = %self.url, "placing auto-order");

        let resp = self
            .client
            .post(&self.url)
            .json(req)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    OrderError::Timeout { ms: self.timeout_ms }
                } else {
                    OrderError::Network(e.to_string())
                }
            })?;

        let status = resp.status().as_u16();
        if !resp.status().is_success() {
            let text = resp.text().await.unwrap_or_default();
            warn!(status, body = %text, "order endpoint error");
            return Err(classify_failure(status, &text));
        }

        resp.json::<OrderReceipt>()
            .await
            .map_err(|e| OrderError::Parse(e.to_string()))
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ErrorBody {
    #[serde(default, alias = "message")]
    error: Option<String>,
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    product_id: Option<ProductId>,
}

/// Map a non-success response onto an [`OrderError`].
///
/// HTTP 409 or a body code of `INSUFFICIENT_STOCK` means the stock ran out;
/// everything else is a plain rejection carrying the server's message.
pub fn classify_failure(status: u16, body: &str) -> OrderError {
    let parsed: Option<ErrorBody> = serde_json::from_str(body).ok();
    let (message, code, product_id) = match parsed {
        Some(b) => (b.error.unwrap_or_else(|| body.to_string()), b.code, b.product_id),
        None => (body.to_string(), None, None),
    };

    let out_of_stock = status == 409
        || code.as_deref() == Some("INSUFFICIENT_STOCK")
        || message.to_ascii_lowercase().contains("insufficient stock");
    if out_of_stock {
        OrderError::InsufficientStock { product_id, message }
    } else {
        OrderError::Rejected { status, message }
    }
}
