//! `cartpilot-rules` — automation rules, the state they watch, and the pure
//! functions that decide whether a rule currently fires.
//!
//! # Overview
//!
//! A [`Rule`] pairs a condition on one catalog item with an action mode.
//! [`evaluate::evaluate`] checks the condition against a [`World`] snapshot
//! (catalog + cart) and [`snooze::is_snoozed`] suppresses rules that fired
//! recently. Rules and their last-trigger timestamps live in a
//! [`store::RuleStore`] value, shared through a [`store::RuleRegistry`] that
//! mirrors writes to a [`db::RuleRepository`].
//!
//! # Rule types
//!
//! | Type           | Fires when                                             |
//! |----------------|--------------------------------------------------------|
//! | `PriceDrop`    | current price ≤ `threshold`                            |
//! | `AutoRestock`  | quantity in cart < `restock_qty`                       |
//! | `CartReminder` | item still in cart and `timeout_hours` have elapsed    |

pub mod db;
pub mod error;
pub mod evaluate;
pub mod event;
pub mod snooze;
pub mod store;
pub mod types;
pub mod world;

pub use db::{RuleRepository, SqliteRuleRepository, StoredRule};
pub use error::{Result, RuleError};
pub use evaluate::{evaluate, MatchDetail, MatchResult, SkipReason};
pub use event::MatchEvent;
pub use snooze::is_snoozed;
pub use store::{RuleRegistry, RuleStore, SharedRules};
pub use types::{ActionMode, NewRule, Rule, RulePatch, RuleType};
pub use world::{Product, StockUpdate, World};
