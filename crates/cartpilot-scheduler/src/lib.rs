//! `cartpilot-scheduler` — decides which rules fire and when to look.
//!
//! # Overview
//!
//! [`engine::run`] is a single side-effect-free pass: it walks the active
//! rules in order (at most `max_rules_per_pass`), drops snoozed ones, runs
//! the condition evaluator on the rest and returns the matches.
//!
//! [`runner::RuleRunner`] drives passes on a Tokio task:
//!
//! | Trigger        | Behaviour                                                  |
//! |----------------|------------------------------------------------------------|
//! | start          | one pass immediately                                       |
//! | interval       | one pass every `poll_interval_secs`                        |
//! | state change   | single-slot debounce; a burst of changes yields one pass   |
//!
//! Neither ever mutates rules; matches go out on a channel for confirmation
//! and dispatch elsewhere.

pub mod engine;
pub mod runner;

pub use engine::{run, run_pass, PassReport};
pub use runner::{RuleRunner, RunnerHandle, WorldSource};
