use cartpilot_core::{ProductId, UserId};
use cartpilot_rules::StockUpdate;

use crate::error::SinkError;

/// Who is confirming the dispatch.
#[derive(Debug, Clone, Default)]
pub struct Session {
    pub user_id: Option<UserId>,
}

impl Session {
    pub fn anonymous() -> Self {
        Self { user_id: None }
    }

    pub fn signed_in(user_id: impl Into<UserId>) -> Self {
        Self {
            user_id: Some(user_id.into()),
        }
    }

    pub fn is_authenticated(&self) -> bool {
        self.user_id.is_some()
    }
}

/// Host cart, mutated by the AddToCart action.
pub trait CartSink: Send + Sync {
    fn add_to_cart(&self, product_id: &ProductId, quantity: u32) -> Result<(), SinkError>;
}

/// Host catalog view, refreshed with stock levels after an order.
pub trait CatalogSink: Send + Sync {
    fn apply_stock_updates(&self, updates: &[StockUpdate]);
}
