use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use cartpilot_core::RuleId;
use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use crate::db::RuleRepository;
use crate::error::{Result, RuleError};
use crate::types::{NewRule, Rule, RulePatch};

/// Rules keyed by id, in creation order, plus the trigger ledger.
///
/// A plain value: every update consumes the store and returns the next one,
/// so callers that need to keep the old state on failure clone first.
#[derive(Debug, Clone, Default)]
pub struct RuleStore {
    rules: HashMap<RuleId, Rule>,
    order: Vec<RuleId>,
    /// Last successful trigger (or dismissal) per rule.
    ledger: HashMap<RuleId, DateTime<Utc>>,
}

impl RuleStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn get(&self, id: &RuleId) -> Option<&Rule> {
        self.rules.get(id)
    }

    pub fn last_triggered(&self, id: &RuleId) -> Option<DateTime<Utc>> {
        self.ledger.get(id).copied()
    }

    /// All rules in creation order.
    pub fn iter(&self) -> impl Iterator<Item = &Rule> {
        self.order.iter().filter_map(|id| self.rules.get(id))
    }

    pub fn active(&self) -> impl Iterator<Item = &Rule> {
        self.iter().filter(|r| r.active)
    }

    /// Insert a rule, or replace it in place if the id already exists.
    pub fn with_rule(mut self, rule: Rule) -> Self {
        if !self.rules.contains_key(&rule.id) {
            self.order.push(rule.id.clone());
        }
        self.rules.insert(rule.id.clone(), rule);
        self
    }

    pub fn updated(mut self, id: &RuleId, patch: &RulePatch) -> Result<Self> {
        let rule = self.rules.get_mut(id).ok_or_else(|| not_found(id))?;
        let mut next = rule.clone();
        patch.apply(&mut next);
        next.validate()?;
        *rule = next;
        Ok(self)
    }

    /// Remove a rule together with its ledger entry.
    pub fn without(mut self, id: &RuleId) -> Result<Self> {
        self.rules.remove(id).ok_or_else(|| not_found(id))?;
        self.order.retain(|r| r != id);
        self.ledger.remove(id);
        Ok(self)
    }

    pub fn toggled(mut self, id: &RuleId) -> Result<Self> {
        let rule = self.rules.get_mut(id).ok_or_else(|| not_found(id))?;
        rule.active = !rule.active;
        Ok(self)
    }

    pub fn triggered(mut self, id: &RuleId, at: DateTime<Utc>) -> Result<Self> {
        if !self.rules.contains_key(id) {
            return Err(not_found(id));
        }
        self.ledger.insert(id.clone(), at);
        Ok(self)
    }
}

fn not_found(id: &RuleId) -> RuleError {
    RuleError::NotFound { id: id.clone() }
}

/// Shared handle passed to the runner, the dispatcher and the host.
pub type SharedRules = Arc<RuleRegistry>;

/// Owns the live [`RuleStore`] and mirrors changes to durable storage.
///
/// User-driven changes (create/update/remove/toggle) are written to the
/// repository first and only swapped into memory once that succeeds.
/// Bookkeeping after a dispatch is applied in memory first and mirrored
/// best-effort, since the side effect has already happened.
pub struct RuleRegistry {
    store: RwLock<RuleStore>,
    repo: Option<Arc<dyn RuleRepository>>,
    default_snooze_hours: f64,
}

impl RuleRegistry {
    pub fn new(default_snooze_hours: f64) -> Self {
        Self {
            store: RwLock::new(RuleStore::new()),
            repo: None,
            default_snooze_hours,
        }
    }

    pub fn with_repository(mut self, repo: Arc<dyn RuleRepository>) -> Self {
        self.repo = Some(repo);
        self
    }

    /// Replace the in-memory store with everything the repository holds.
    pub fn load_from_repository(&self) -> Result<usize> {
        let Some(ref repo) = self.repo else {
            return Ok(0);
        };
        let mut store = RuleStore::new();
        for stored in repo.load_all()? {
            let id = stored.rule.id.clone();
            store = store.with_rule(stored.rule);
            if let Some(at) = stored.last_triggered {
                store = store.triggered(&id, at)?;
            }
        }
        let n = store.len();
        *self.store.write().expect("rule store poisoned") = store;
        info!(count = n, "rules loaded from repository");
        Ok(n)
    }

    /// Point-in-time copy for an evaluation pass.
    pub fn snapshot(&self) -> RuleStore {
        self.store.read().expect("rule store poisoned").clone()
    }

    pub fn get(&self, id: &RuleId) -> Option<Rule> {
        self.store.read().expect("rule store poisoned").get(id).cloned()
    }

    pub fn last_triggered(&self, id: &RuleId) -> Option<DateTime<Utc>> {
        self.store.read().expect("rule store poisoned").last_triggered(id)
    }

    pub fn create(&self, new: NewRule) -> Result<Rule> {
        let rule = new.into_rule(RuleId::new(), self.default_snooze_hours, Utc::now());
        rule.validate()?;

        let mut store = self.store.write().expect("rule store poisoned");
        if let Some(ref repo) = self.repo {
            repo.upsert(&rule, None)?;
        }
        *store = store.clone().with_rule(rule.clone());
        info!(rule_id = %rule.id, rule_type = %rule.rule_type, mode = %rule.action_mode, "rule created");
        Ok(rule)
    }

    pub fn update(&self, id: &RuleId, patch: &RulePatch) -> Result<Rule> {
        let mut store = self.store.write().expect("rule store poisoned");
        let next = store.clone().updated(id, patch)?;
        let rule = next.get(id).cloned().ok_or_else(|| not_found(id))?;
        if let Some(ref repo) = self.repo {
            repo.upsert(&rule, next.last_triggered(id))?;
        }
        *store = next;
        debug!(rule_id = %id, "rule updated");
        Ok(rule)
    }

    pub fn remove(&self, id: &RuleId) -> Result<()> {
        let mut store = self.store.write().expect("rule store poisoned");
        let next = store.clone().without(id)?;
        if let Some(ref repo) = self.repo {
            repo.delete(id)?;
        }
        *store = next;
        info!(rule_id = %id, "rule removed");
        Ok(())
    }

    pub fn toggle(&self, id: &RuleId) -> Result<Rule> {
        let mut store = self.store.write().expect("rule store poisoned");
        let next = store.clone().toggled(id)?;
        let rule = next.get(id).cloned().ok_or_else(|| not_found(id))?;
        if let Some(ref repo) = self.repo {
            repo.upsert(&rule, next.last_triggered(id))?;
        }
        *store = next;
        debug!(rule_id = %id, active = rule.active, "rule toggled");
        Ok(rule)
    }

    /// Record a trigger (or dismissal) so the snooze gate re-arms.
    pub fn mark_triggered(&self, id: &RuleId, at: DateTime<Utc>) -> Result<()> {
        let mut store = self.store.write().expect("rule store poisoned");
        let next = store.clone().triggered(id, at)?;
        let rule = next.get(id).cloned();
        *store = next;
        drop(store);

        if let (Some(repo), Some(rule)) = (self.repo.as_ref(), rule) {
            if let Err(e) = repo.upsert(&rule, Some(at)) {
                warn!(rule_id = %id, error = %e, "failed to persist trigger timestamp");
            }
        }
        Ok(())
    }

    /// Delete a one-shot rule after its action ran. Missing rules are a no-op.
    pub fn retire(&self, id: &RuleId) {
        let mut store = self.store.write().expect("rule store poisoned");
        match store.clone().without(id) {
            Ok(next) => *store = next,
            Err(_) => return,
        }
        drop(store);
        info!(rule_id = %id, "one-shot rule retired");

        if let Some(ref repo) = self.repo {
            if let Err(e) = repo.delete(id) {
                warn!(rule_id = %id, error = %e, "failed to delete retired rule from repository");
            }
        }
    }
}
