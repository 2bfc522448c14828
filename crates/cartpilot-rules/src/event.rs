use cartpilot_core::RuleId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::evaluate::{MatchDetail, MatchResult};
use crate::types::{ActionMode, Rule, RuleType};
use crate::world::Product;

/// A rule whose condition currently holds, awaiting confirmation or dispatch.
///
/// Ephemeral: produced by each evaluation pass and never persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchEvent {
    pub rule_id: RuleId,
    pub rule_type: RuleType,
    pub action_mode: ActionMode,
    pub product: Product,
    pub detail: MatchDetail,
    pub message: String,
    pub evaluated_at: DateTime<Utc>,
}

impl MatchEvent {
    /// Build an event from a matching result. `None` for non-matches.
    pub fn from_result(rule: &Rule, result: MatchResult, at: DateTime<Utc>) -> Option<Self> {
        if !result.matched {
            return None;
        }
        Some(Self {
            rule_id: rule.id.clone(),
            rule_type: rule.rule_type,
            action_mode: rule.action_mode,
            product: result.product?,
            detail: result.detail,
            message: result.message,
            evaluated_at: at,
        })
    }
}
