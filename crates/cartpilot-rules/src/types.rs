use cartpilot_core::{AddressId, ProductId, RuleId};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Result, RuleError};

/// Which condition a rule watches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleType {
    PriceDrop,
    AutoRestock,
    CartReminder,
    /// Stored or received with a type this build doesn't know. Never matches.
    #[serde(other)]
    Unknown,
}

impl std::fmt::Display for RuleType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            RuleType::PriceDrop => "price_drop",
            RuleType::AutoRestock => "auto_restock",
            RuleType::CartReminder => "cart_reminder",
            RuleType::Unknown => "unknown",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for RuleType {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "price_drop" => Ok(RuleType::PriceDrop),
            "auto_restock" => Ok(RuleType::AutoRestock),
            "cart_reminder" => Ok(RuleType::CartReminder),
            other => Err(format!("unknown rule type: {other}")),
        }
    }
}

/// What happens when a matching event is confirmed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionMode {
    /// Surface the event only. No cart or order side effect.
    #[default]
    Notify,
    AddToCart,
    /// Place a real order. Requires `user_consent` and an `address_id`.
    AutoOrder,
}

impl std::fmt::Display for ActionMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ActionMode::Notify => "notify",
            ActionMode::AddToCart => "add_to_cart",
            ActionMode::AutoOrder => "auto_order",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for ActionMode {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "notify" => Ok(ActionMode::Notify),
            "add_to_cart" => Ok(ActionMode::AddToCart),
            "auto_order" => Ok(ActionMode::AutoOrder),
            other => Err(format!("unknown action mode: {other}")),
        }
    }
}

/// A persisted automation directive.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Rule {
    pub id: RuleId,
    #[serde(rename = "type")]
    pub rule_type: RuleType,
    pub product_id: ProductId,
    /// Target price. PriceDrop only.
    #[serde(default)]
    pub threshold: Option<f64>,
    /// Target cart quantity. AutoRestock only; also the quantity used by cart/order actions.
    #[serde(default)]
    pub restock_qty: Option<u32>,
    /// Dwell time before firing. CartReminder only.
    #[serde(default)]
    pub timeout_hours: Option<f64>,
    pub active: bool,
    /// When false the rule is deleted after its first successful dispatch.
    #[serde(default)]
    pub keep_active: bool,
    pub snooze_hours: f64,
    #[serde(default)]
    pub action_mode: ActionMode,
    #[serde(default)]
    pub address_id: Option<AddressId>,
    #[serde(default)]
    pub user_consent: bool,
    pub created_at: DateTime<Utc>,
}

impl Rule {
    /// Units to add to the cart or order when the rule's action runs.
    pub fn action_quantity(&self) -> u32 {
        self.restock_qty.unwrap_or(1).max(1)
    }

    /// False when the snooze window is negative, non-finite or beyond
    /// [`MAX_WINDOW_HOURS`]; such rows can only come from storage.
    pub fn has_valid_snooze(&self) -> bool {
        is_valid_window(self.snooze_hours)
    }

    /// Check every invariant a stored rule must hold.
    ///
    /// The type-specific target must be present; AutoOrder additionally needs
    /// an address and explicit consent.
    pub fn validate(&self) -> Result<()> {
        if !is_valid_window(self.snooze_hours) {
            return Err(RuleError::Invalid(format!(
                "snooze_hours must be between 0 and {MAX_WINDOW_HOURS}, got {}",
                self.snooze_hours
            )));
        }

        match self.rule_type {
            RuleType::PriceDrop => match self.threshold {
                Some(t) if t.is_finite() && t >= 0.0 => {}
                Some(t) => {
                    return Err(RuleError::Invalid(format!(
                        "threshold must be a non-negative number, got {t}"
                    )))
                }
                None => return Err(RuleError::Invalid("price_drop rule needs a threshold".into())),
            },
            RuleType::AutoRestock => match self.restock_qty {
                Some(q) if q >= 1 => {}
                _ => {
                    return Err(RuleError::Invalid(
                        "auto_restock rule needs restock_qty >= 1".into(),
                    ))
                }
            },
            RuleType::CartReminder => match self.timeout_hours {
                Some(h) if is_valid_window(h) => {}
                _ => {
                    return Err(RuleError::Invalid(format!(
                        "cart_reminder rule needs timeout_hours between 0 and {MAX_WINDOW_HOURS}"
                    )))
                }
            },
            RuleType::Unknown => return Err(RuleError::Invalid("unknown rule type".into())),
        }

        if self.action_mode == ActionMode::AutoOrder {
            if self.address_id.is_none() {
                return Err(RuleError::Invalid("auto_order rule needs an address_id".into()));
            }
            if !self.user_consent {
                return Err(RuleError::Invalid(
                    "auto_order rule needs explicit user consent".into(),
                ));
            }
        }

        Ok(())
    }
}

/// Input for [`crate::RuleRegistry::create`]. Id, `created_at` and `active` are assigned there.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewRule {
    #[serde(rename = "type")]
    pub rule_type: RuleType,
    pub product_id: ProductId,
    #[serde(default)]
    pub threshold: Option<f64>,
    #[serde(default)]
    pub restock_qty: Option<u32>,
    #[serde(default)]
    pub timeout_hours: Option<f64>,
    #[serde(default)]
    pub keep_active: bool,
    /// Falls back to the engine's default snooze window when unset.
    #[serde(default)]
    pub snooze_hours: Option<f64>,
    #[serde(default)]
    pub action_mode: ActionMode,
    #[serde(default)]
    pub address_id: Option<AddressId>,
    #[serde(default)]
    pub user_consent: bool,
}

impl NewRule {
    pub fn price_drop(product_id: impl Into<ProductId>, threshold: f64) -> Self {
        Self::base(RuleType::PriceDrop, product_id.into()).with(|r| r.threshold = Some(threshold))
    }

    pub fn auto_restock(product_id: impl Into<ProductId>, restock_qty: u32) -> Self {
        Self::base(RuleType::AutoRestock, product_id.into())
            .with(|r| r.restock_qty = Some(restock_qty))
    }

    pub fn cart_reminder(product_id: impl Into<ProductId>, timeout_hours: f64) -> Self {
        Self::base(RuleType::CartReminder, product_id.into())
            .with(|r| r.timeout_hours = Some(timeout_hours))
    }

    /// Apply an arbitrary tweak; handy for builder-style construction.
    pub fn with(mut self, f: impl FnOnce(&mut Self)) -> Self {
        f(&mut self);
        self
    }

    fn base(rule_type: RuleType, product_id: ProductId) -> Self {
        Self {
            rule_type,
            product_id,
            threshold: None,
            restock_qty: None,
            timeout_hours: None,
            keep_active: false,
            snooze_hours: None,
            action_mode: ActionMode::Notify,
            address_id: None,
            user_consent: false,
        }
    }

    /// Materialise with an explicit id and creation time. New rules are active.
    pub fn into_rule(self, id: RuleId, default_snooze_hours: f64, now: DateTime<Utc>) -> Rule {
        Rule {
            id,
            rule_type: self.rule_type,
            product_id: self.product_id,
            threshold: self.threshold,
            restock_qty: self.restock_qty,
            timeout_hours: self.timeout_hours,
            active: true,
            keep_active: self.keep_active,
            snooze_hours: self.snooze_hours.unwrap_or(default_snooze_hours),
            action_mode: self.action_mode,
            address_id: self.address_id,
            user_consent: self.user_consent,
            created_at: now,
        }
    }
}

/// Partial update; `None` leaves the field unchanged.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RulePatch {
    pub threshold: Option<f64>,
    pub restock_qty: Option<u32>,
    pub timeout_hours: Option<f64>,
    pub active: Option<bool>,
    pub keep_active: Option<bool>,
    pub snooze_hours: Option<f64>,
    pub action_mode: Option<ActionMode>,
    pub address_id: Option<AddressId>,
    pub user_consent: Option<bool>,
}

impl RulePatch {
    pub(crate) fn apply(&self, rule: &mut Rule) {
        if let Some(v) = self.threshold {
            rule.threshold = Some(v);
        }
        if let Some(v) = self.restock_qty {
            rule.restock_qty = Some(v);
        }
        if let Some(v) = self.timeout_hours {
            rule.timeout_hours = Some(v);
        }
        if let Some(v) = self.active {
            rule.active = v;
        }
        if let Some(v) = self.keep_active {
            rule.keep_active = v;
        }
        if let Some(v) = self.snooze_hours {
            rule.snooze_hours = v;
        }
        if let Some(v) = self.action_mode {
            rule.action_mode = v;
        }
        if let Some(ref v) = self.address_id {
            rule.address_id = Some(v.clone());
        }
        if let Some(v) = self.user_consent {
            rule.user_consent = v;
        }
    }
}

/// Longest snooze or dwell window a rule may declare (100 years).
pub const MAX_WINDOW_HOURS: f64 = 876_000.0;

/// Bound on |ms| accepted by `Duration::milliseconds`, with headroom below `i64::MAX`.
const MAX_DURATION_MS: f64 = 9.0e18;

/// Convert fractional hours to a chrono duration at millisecond precision.
///
/// Total: out-of-range input saturates and NaN maps to zero, so values read
/// back from storage without validation can't panic here.
pub(crate) fn hours_to_duration(hours: f64) -> Duration {
    let ms = (hours * 3_600_000.0).round();
    if ms.is_nan() {
        return Duration::zero();
    }
    Duration::milliseconds(ms.clamp(-MAX_DURATION_MS, MAX_DURATION_MS) as i64)
}

/// True for a window in `0..=MAX_WINDOW_HOURS`.
pub(crate) fn is_valid_window(hours: f64) -> bool {
    hours.is_finite() && (0.0..=MAX_WINDOW_HOURS).contains(&hours)
}

/// Elapsed time as fractional hours.
pub(crate) fn duration_to_hours(d: Duration) -> f64 {
    d.num_milliseconds() as f64 / 3_600_000.0
}
