use cartpilot_rules::{evaluate, is_snoozed, MatchEvent, RuleStore, SkipReason, World};
use chrono::{DateTime, Utc};
use tracing::{debug, warn};

/// Outcome of one evaluation pass.
#[derive(Debug, Clone, Default)]
pub struct PassReport {
    /// Matches in rule-list order.
    pub events: Vec<MatchEvent>,
    /// Active rules taken into the pass (≤ the cap).
    pub considered: usize,
    /// Considered rules skipped by the snooze gate.
    pub snoozed: usize,
    /// Considered rules skipped because their snooze window is unusable.
    pub malformed: usize,
    /// Rules the condition evaluator actually ran on.
    pub evaluated: usize,
    /// Active rules left out because of the cap; eligible again next pass.
    pub over_cap: usize,
}

/// Collect the rules that currently fire. Never mutates rule state.
pub fn run(store: &RuleStore, world: &World, now: DateTime<Utc>, max_rules: usize) -> Vec<MatchEvent> {
    run_pass(store, world, now, max_rules).events
}

/// Like [`run`], with counters for logging and tests.
pub fn run_pass(store: &RuleStore, world: &World, now: DateTime<Utc>, max_rules: usize) -> PassReport {
    let mut report = PassReport::default();

    for (i, rule) in store.active().enumerate() {
        if i >= max_rules {
            report.over_cap += 1;
            continue;
        }
        report.considered += 1;

        if !rule.has_valid_snooze() {
            report.malformed += 1;
            warn!(rule_id = %rule.id, snooze_hours = rule.snooze_hours, "rule has an unusable snooze window");
            continue;
        }

        // Snoozed rules are skipped before evaluation, whatever their condition.
        if is_snoozed(store.last_triggered(&rule.id), rule.snooze_hours, now) {
            report.snoozed += 1;
            continue;
        }

        report.evaluated += 1;
        let result = evaluate(rule, world, now);
        match result.skip_reason() {
            Some(reason) if reason.is_malformed_rule() => {
                warn!(rule_id = %rule.id, %reason, "rule cannot be evaluated");
            }
            Some(SkipReason::ProductNotFound) => {
                debug!(rule_id = %rule.id, product_id = %rule.product_id, "watched product not in catalog");
            }
            _ => {}
        }

        if let Some(event) = MatchEvent::from_result(rule, result, now) {
            report.events.push(event);
        }
    }

    if report.over_cap > 0 {
        warn!(
            cap = max_rules,
            skipped = report.over_cap,
            "rule cap reached; remaining rules deferred to a later pass"
        );
    }
    report
}
