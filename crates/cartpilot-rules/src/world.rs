use std::collections::HashMap;

use cartpilot_core::ProductId;
use serde::{Deserialize, Serialize};

/// A catalog entry as seen by the rule engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Product {
    pub id: ProductId,
    pub name: String,
    pub price: f64,
    pub stock: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
}

/// New stock level for one product, returned by the order service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StockUpdate {
    pub product_id: ProductId,
    pub stock: u32,
}

/// Snapshot of the storefront state rules are evaluated against.
///
/// Supplied by the host on every pass; the engine never reaches into
/// application state on its own.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct World {
    #[serde(default)]
    pub catalog: HashMap<ProductId, Product>,
    /// Product id -> quantity in cart. Absent means zero.
    #[serde(default)]
    pub cart: HashMap<ProductId, u32>,
}

impl World {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_product(mut self, product: Product) -> Self {
        self.catalog.insert(product.id.clone(), product);
        self
    }

    pub fn with_cart_item(mut self, product_id: impl Into<ProductId>, qty: u32) -> Self {
        self.cart.insert(product_id.into(), qty);
        self
    }

    pub fn product(&self, id: &ProductId) -> Option<&Product> {
        self.catalog.get(id)
    }

    pub fn cart_qty(&self, id: &ProductId) -> u32 {
        self.cart.get(id).copied().unwrap_or(0)
    }

    /// Merge stock levels reported by a placed order. Unknown ids are ignored.
    pub fn apply_stock_updates(&mut self, updates: &[StockUpdate]) {
        for u in updates {
            if let Some(p) = self.catalog.get_mut(&u.product_id) {
                p.stock = u.stock;
            }
        }
    }
}

impl Product {
    pub fn new(id: impl Into<ProductId>, name: impl Into<String>, price: f64, stock: u32) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            price,
            stock,
            image: None,
        }
    }
}
