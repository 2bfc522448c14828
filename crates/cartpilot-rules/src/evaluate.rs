use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{duration_to_hours, hours_to_duration, is_valid_window, Rule, RuleType};
use crate::world::{Product, World};

/// Why a rule could not be evaluated. Always a non-match, never an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    /// The watched product is no longer in the catalog (e.g. discontinued).
    ProductNotFound,
    /// PriceDrop without a usable (finite) threshold.
    NoThreshold,
    NoRestockQty,
    /// CartReminder whose dwell window is missing, negative or out of range.
    NoTimeout,
    /// CartReminder whose item has left the cart.
    NotInCart,
    UnknownRuleType,
}

impl SkipReason {
    /// True for reasons caused by an incomplete or unrecognised rule definition.
    pub fn is_malformed_rule(&self) -> bool {
        matches!(
            self,
            SkipReason::NoThreshold
                | SkipReason::NoRestockQty
                | SkipReason::NoTimeout
                | SkipReason::UnknownRuleType
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SkipReason::ProductNotFound => "product_not_found",
            SkipReason::NoThreshold => "no_threshold",
            SkipReason::NoRestockQty => "no_restock_qty",
            SkipReason::NoTimeout => "no_timeout",
            SkipReason::NotInCart => "not_in_cart",
            SkipReason::UnknownRuleType => "unknown_rule_type",
        }
    }
}

impl std::fmt::Display for SkipReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The values behind a verdict, enough to render or act on it without re-reading state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MatchDetail {
    PriceDrop { current_price: f64, threshold: f64 },
    Restock { current_qty: u32, target_qty: u32 },
    CartDwell { elapsed_hours: f64, timeout_hours: f64 },
    Skipped { reason: SkipReason },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchResult {
    pub matched: bool,
    pub detail: MatchDetail,
    /// Snapshot of the watched product; `None` only when it is missing from the catalog.
    pub product: Option<Product>,
    pub message: String,
}

impl MatchResult {
    fn skipped(reason: SkipReason, product: Option<&Product>) -> Self {
        let message = match reason {
            SkipReason::ProductNotFound => "product no longer in catalog".to_string(),
            SkipReason::NotInCart => match product {
                Some(p) => format!("{} is no longer in the cart", p.name),
                None => "item is no longer in the cart".to_string(),
            },
            other => format!("rule cannot be evaluated: {other}"),
        };
        Self {
            matched: false,
            detail: MatchDetail::Skipped { reason },
            product: product.cloned(),
            message,
        }
    }

    pub fn skip_reason(&self) -> Option<SkipReason> {
        match self.detail {
            MatchDetail::Skipped { reason } => Some(reason),
            _ => None,
        }
    }
}

/// Decide whether `rule`'s condition holds against `world` at `now`.
///
/// Pure: identical inputs always give identical results. Activity and
/// snoozing are the caller's concern; this only looks at the condition.
pub fn evaluate(rule: &Rule, world: &World, now: DateTime<Utc>) -> MatchResult {
    let Some(product) = world.product(&rule.product_id) else {
        return MatchResult::skipped(SkipReason::ProductNotFound, None);
    };

    match rule.rule_type {
        RuleType::PriceDrop => {
            let Some(threshold) = rule.threshold.filter(|t| t.is_finite()) else {
                return MatchResult::skipped(SkipReason::NoThreshold, Some(product));
            };
            let matched = product.price <= threshold;
            let message = if matched {
                format!(
                    "{} dropped to {} (target {})",
                    product.name, product.price, threshold
                )
            } else {
                format!(
                    "{} is {}, above target {}",
                    product.name, product.price, threshold
                )
            };
            MatchResult {
                matched,
                detail: MatchDetail::PriceDrop {
                    current_price: product.price,
                    threshold,
                },
                product: Some(product.clone()),
                message,
            }
        }

        RuleType::AutoRestock => {
            let Some(target) = rule.restock_qty else {
                return MatchResult::skipped(SkipReason::NoRestockQty, Some(product));
            };
            let current = world.cart_qty(&rule.product_id);
            let matched = current < target;
            let message = if matched {
                format!(
                    "{}: {} in cart, below target of {}",
                    product.name, current, target
                )
            } else {
                format!("{}: {} in cart, target {} met", product.name, current, target)
            };
            MatchResult {
                matched,
                detail: MatchDetail::Restock {
                    current_qty: current,
                    target_qty: target,
                },
                product: Some(product.clone()),
                message,
            }
        }

        RuleType::CartReminder => {
            let Some(timeout_hours) = rule.timeout_hours.filter(|h| is_valid_window(*h)) else {
                return MatchResult::skipped(SkipReason::NoTimeout, Some(product));
            };
            if world.cart_qty(&rule.product_id) == 0 {
                return MatchResult::skipped(SkipReason::NotInCart, Some(product));
            }
            let elapsed = now - rule.created_at;
            let elapsed_hours = duration_to_hours(elapsed);
            let matched = elapsed >= hours_to_duration(timeout_hours);
            let message = if matched {
                format!(
                    "{} has been waiting in your cart for {:.1}h",
                    product.name, elapsed_hours
                )
            } else {
                format!(
                    "{} in cart for {:.1}h of {}h",
                    product.name, elapsed_hours, timeout_hours
                )
            };
            MatchResult {
                matched,
                detail: MatchDetail::CartDwell {
                    elapsed_hours,
                    timeout_hours,
                },
                product: Some(product.clone()),
                message,
            }
        }

        RuleType::Unknown => MatchResult::skipped(SkipReason::UnknownRuleType, Some(product)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::NewRule;
    use cartpilot_core::RuleId;
    use chrono::Duration;

    fn rule(new: NewRule, created_at: DateTime<Utc>) -> Rule {
        new.into_rule(RuleId::new(), 24.0, created_at)
    }

    fn catalog(price: f64) -> World {
        World::new()
            .with_product(Product::new("7", "Espresso machine", price, 10))
            .with_product(Product::new("3", "Coffee beans", 12.0, 50))
            .with_product(Product::new("9", "Grinder", 80.0, 2))
    }

    #[test]
    fn price_at_threshold_matches() {
        let now = Utc::now();
        let r = rule(NewRule::price_drop("7", 500.0), now);
        let res = evaluate(&r, &catalog(500.0), now);
        assert!(res.matched);
        assert_eq!(
            res.detail,
            MatchDetail::PriceDrop {
                current_price: 500.0,
                threshold: 500.0
            }
        );
        assert_eq!(res.message.matches("500").count(), 2);
        assert_eq!(res.product.unwrap().name, "Espresso machine");
    }

    #[test]
    fn price_above_threshold_does_not_match() {
        let now = Utc::now();
        let r = rule(NewRule::price_drop("7", 500.0), now);
        assert!(!evaluate(&r, &catalog(501.0), now).matched);
    }

    #[test]
    fn missing_threshold_is_distinct_non_match() {
        let now = Utc::now();
        let mut r = rule(NewRule::price_drop("7", 500.0), now);
        r.threshold = None;
        let res = evaluate(&r, &catalog(1.0), now);
        assert!(!res.matched);
        assert_eq!(res.skip_reason(), Some(SkipReason::NoThreshold));
    }

    #[test]
    fn restock_compares_cart_quantity() {
        let now = Utc::now();
        let r = rule(NewRule::auto_restock("3", 2), now);

        let res = evaluate(&r, &catalog(1.0).with_cart_item("3", 1), now);
        assert!(res.matched);
        assert_eq!(
            res.detail,
            MatchDetail::Restock {
                current_qty: 1,
                target_qty: 2
            }
        );

        assert!(!evaluate(&r, &catalog(1.0).with_cart_item("3", 2), now).matched);
        // absent from cart counts as zero
        assert!(evaluate(&r, &catalog(1.0), now).matched);
    }

    #[test]
    fn cart_reminder_fires_after_dwell_time() {
        let now = Utc::now();
        let r = rule(NewRule::cart_reminder("9", 24.0), now - Duration::hours(25));

        let res = evaluate(&r, &catalog(1.0).with_cart_item("9", 1), now);
        assert!(res.matched);
        match res.detail {
            MatchDetail::CartDwell { elapsed_hours, .. } => assert_eq!(elapsed_hours, 25.0),
            other => panic!("unexpected detail: {other:?}"),
        }

        let early = rule(NewRule::cart_reminder("9", 24.0), now - Duration::hours(23));
        assert!(!evaluate(&early, &catalog(1.0).with_cart_item("9", 1), now).matched);
    }

    #[test]
    fn unusable_windows_and_thresholds_are_skipped() {
        let now = Utc::now();
        let cart = catalog(1.0).with_cart_item("9", 1);
        for bad in [-1e300, -1.0, f64::NAN, f64::INFINITY, 1e12] {
            let mut r = rule(NewRule::cart_reminder("9", 24.0), now - Duration::days(3));
            r.timeout_hours = Some(bad);
            let res = evaluate(&r, &cart, now);
            assert!(!res.matched);
            assert_eq!(res.skip_reason(), Some(SkipReason::NoTimeout), "timeout {bad}");
        }

        let mut r = rule(NewRule::price_drop("7", 500.0), now);
        r.threshold = Some(f64::NAN);
        assert_eq!(
            evaluate(&r, &catalog(1.0), now).skip_reason(),
            Some(SkipReason::NoThreshold)
        );
    }

    #[test]
    fn cart_reminder_ignores_items_that_left_the_cart() {
        let now = Utc::now();
        let r = rule(NewRule::cart_reminder("9", 24.0), now - Duration::days(30));
        let res = evaluate(&r, &catalog(1.0), now);
        assert!(!res.matched);
        assert_eq!(res.skip_reason(), Some(SkipReason::NotInCart));
    }

    #[test]
    fn missing_product_short_circuits() {
        let now = Utc::now();
        let r = rule(NewRule::price_drop("404", 1_000.0), now);
        let res = evaluate(&r, &catalog(1.0), now);
        assert!(!res.matched);
        assert_eq!(res.skip_reason(), Some(SkipReason::ProductNotFound));
        assert!(res.product.is_none());
        assert!(!SkipReason::ProductNotFound.is_malformed_rule());
    }

    #[test]
    fn unknown_type_never_matches() {
        let now = Utc::now();
        let mut r = rule(NewRule::price_drop("7", 1_000.0), now);
        r.rule_type = RuleType::Unknown;
        let res = evaluate(&r, &catalog(1.0), now);
        assert_eq!(res.skip_reason(), Some(SkipReason::UnknownRuleType));
        assert!(SkipReason::UnknownRuleType.is_malformed_rule());
    }

    #[test]
    fn evaluation_is_idempotent() {
        let now = Utc::now();
        let world = catalog(450.0).with_cart_item("9", 1);
        let rules = [
            rule(NewRule::price_drop("7", 500.0), now),
            rule(NewRule::auto_restock("3", 2), now),
            rule(NewRule::cart_reminder("9", 1.0), now - Duration::hours(2)),
        ];
        for r in &rules {
            assert_eq!(evaluate(r, &world, now), evaluate(r, &world, now));
        }
    }
}
