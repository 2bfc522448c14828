use std::sync::Arc;
use std::time::Duration;

use cartpilot_core::RuleId;
use cartpilot_rules::{ActionMode, MatchEvent, Rule, SharedRules, StockUpdate};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::error::{DispatchError, OrderError, Result};
use crate::order::{OrderItem, OrderRequest, OrderService};
use crate::sinks::{CartSink, CatalogSink, Session};

/// The side effect a successful dispatch performed.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum ActionTaken {
    Notified,
    AddedToCart {
        quantity: u32,
    },
    Ordered {
        order_id: Option<String>,
        quantity: u32,
        updated: Vec<StockUpdate>,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DispatchOutcome {
    pub rule_id: RuleId,
    pub action: ActionTaken,
    /// True when the rule was one-shot and has been deleted.
    pub retired: bool,
    pub triggered_at: DateTime<Utc>,
}

/// Executes confirmed match events and applies the rule bookkeeping.
///
/// Dispatches are serialized: at most one is in flight per dispatcher, so
/// concurrent confirmations can't interleave cart or stock mutations.
pub struct ActionDispatcher {
    rules: SharedRules,
    cart: Arc<dyn CartSink>,
    catalog: Arc<dyn CatalogSink>,
    orders: Arc<dyn OrderService>,
    order_timeout: Duration,
    in_flight: Mutex<()>,
}

impl ActionDispatcher {
    pub fn new(
        rules: SharedRules,
        cart: Arc<dyn CartSink>,
        catalog: Arc<dyn CatalogSink>,
        orders: Arc<dyn OrderService>,
        order_timeout: Duration,
    ) -> Self {
        Self {
            rules,
            cart,
            catalog,
            orders,
            order_timeout,
            in_flight: Mutex::new(()),
        }
    }

    /// Carry out the action for `event`'s rule.
    ///
    /// The rule is re-read from the registry so edits made since the pass
    /// (pausing, revoked consent, removed address) are honoured. Nothing about the
    /// rule changes unless the action succeeds.
    pub async fn dispatch(&self, event: &MatchEvent, session: &Session) -> Result<DispatchOutcome> {
        let _guard = self.in_flight.lock().await;

        let rule = self
            .rules
            .get(&event.rule_id)
            .ok_or_else(|| DispatchError::RuleNotFound {
                id: event.rule_id.clone(),
            })?;
        if !rule.active {
            info!(rule_id = %rule.id, "rule paused since evaluation; dispatch skipped");
            return Err(DispatchError::RulePaused { id: rule.id });
        }

        let action = match rule.action_mode {
            ActionMode::AutoOrder => self.auto_order(&rule, event, session).await?,
            ActionMode::AddToCart => {
                let quantity = rule.action_quantity();
                self.cart.add_to_cart(&rule.product_id, quantity)?;
                ActionTaken::AddedToCart { quantity }
            }
            ActionMode::Notify => ActionTaken::Notified,
        };

        let now = Utc::now();
        let retired = self.settle(&rule, now);
        info!(
            rule_id = %rule.id,
            mode = %rule.action_mode,
            retired,
            "rule dispatched"
        );
        Ok(DispatchOutcome {
            rule_id: rule.id,
            action,
            retired,
            triggered_at: now,
        })
    }

    /// The user declined the event: re-arm the snooze window without acting
    /// and without consuming a one-shot rule.
    pub fn dismiss(&self, rule_id: &RuleId) -> Result<DateTime<Utc>> {
        let now = Utc::now();
        self.rules.mark_triggered(rule_id, now)?;
        info!(rule_id = %rule_id, "match dismissed; rule snoozed");
        Ok(now)
    }

    async fn auto_order(
        &self,
        rule: &Rule,
        event: &MatchEvent,
        session: &Session,
    ) -> Result<ActionTaken> {
        // Checked in this order; each is reported distinctly and stops the dispatch.
        let Some(ref user_id) = session.user_id else {
            return Err(DispatchError::NotAuthenticated);
        };
        if !rule.user_consent {
            warn!(rule_id = %rule.id, "auto-order rule without consent reached dispatch");
            return Err(DispatchError::ConsentMissing);
        }
        let Some(ref address_id) = rule.address_id else {
            warn!(rule_id = %rule.id, "auto-order rule without address reached dispatch");
            return Err(DispatchError::AddressMissing);
        };

        let quantity = rule.action_quantity();
        let price = event.product.price;
        let req = OrderRequest {
            user_id: user_id.clone(),
            items: vec![OrderItem {
                product_id: rule.product_id.clone(),
                quantity,
                price,
            }],
            total: price * f64::from(quantity),
            address_id: address_id.clone(),
            auto_ordered: true,
            agent_rule_id: rule.id.clone(),
        };

        let receipt = match tokio::time::timeout(self.order_timeout, self.orders.place_order(&req)).await {
            Ok(Ok(receipt)) => receipt,
            Ok(Err(e)) => {
                warn!(rule_id = %rule.id, error = %e, "auto-order failed");
                return Err(e.into());
            }
            Err(_) => {
                let ms = self.order_timeout.as_millis() as u64;
                warn!(rule_id = %rule.id, timeout_ms = ms, "auto-order timed out");
                return Err(OrderError::Timeout { ms }.into());
            }
        };

        self.catalog.apply_stock_updates(&receipt.updated_products);
        info!(
            rule_id = %rule.id,
            order_id = receipt.order_id.as_deref().unwrap_or("-"),
            quantity,
            "auto-order placed"
        );
        Ok(ActionTaken::Ordered {
            order_id: receipt.order_id,
            quantity,
            updated: receipt.updated_products,
        })
    }

    /// Post-action bookkeeping. Returns true if the rule was retired.
    fn settle(&self, rule: &Rule, now: DateTime<Utc>) -> bool {
        if !rule.keep_active {
            self.rules.retire(&rule.id);
            return true;
        }
        if let Err(e) = self.rules.mark_triggered(&rule.id, now) {
            // Removed by the user while the action ran; nothing left to snooze.
            warn!(rule_id = %rule.id, error = %e, "could not record trigger");
        }
        false
    }
}
