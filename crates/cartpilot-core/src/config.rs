use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use tracing::debug;

pub const DEFAULT_POLL_INTERVAL_SECS: u64 = 300; // periodic re-evaluation every 5 minutes
pub const DEFAULT_DEBOUNCE_MS: u64 = 500; // coalesce bursts of catalog/cart mutations
pub const DEFAULT_MAX_RULES_PER_PASS: usize = 100; // hard cap on rules evaluated per pass
pub const DEFAULT_SNOOZE_HOURS: f64 = 24.0;
pub const DEFAULT_ORDER_TIMEOUT_MS: u64 = 10_000;

/// Top-level config (cartpilot.toml + CARTPILOT_* env overrides).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CartpilotConfig {
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub orders: OrdersConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
}

/// Evaluation cadence and limits for the rule runner.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,
    /// Rules beyond this count are skipped for the pass and stay eligible for the next one.
    #[serde(default = "default_max_rules_per_pass")]
    pub max_rules_per_pass: usize,
    /// Applied to new rules that don't specify their own snooze window.
    #[serde(default = "default_snooze_hours")]
    pub default_snooze_hours: f64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: DEFAULT_POLL_INTERVAL_SECS,
            debounce_ms: DEFAULT_DEBOUNCE_MS,
            max_rules_per_pass: DEFAULT_MAX_RULES_PER_PASS,
            default_snooze_hours: DEFAULT_SNOOZE_HOURS,
        }
    }
}

/// Storefront order endpoint used by the AutoOrder action.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrdersConfig {
    #[serde(default = "default_orders_base_url")]
    pub base_url: String,
    #[serde(default = "default_orders_path")]
    pub path: String,
    #[serde(default = "default_order_timeout_ms")]
    pub timeout_ms: u64,
}

impl Default for OrdersConfig {
    fn default() -> Self {
        Self {
            base_url: default_orders_base_url(),
            path: default_orders_path(),
            timeout_ms: DEFAULT_ORDER_TIMEOUT_MS,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

fn default_poll_interval_secs() -> u64 {
    DEFAULT_POLL_INTERVAL_SECS
}
fn default_debounce_ms() -> u64 {
    DEFAULT_DEBOUNCE_MS
}
fn default_max_rules_per_pass() -> usize {
    DEFAULT_MAX_RULES_PER_PASS
}
fn default_snooze_hours() -> f64 {
    DEFAULT_SNOOZE_HOURS
}
fn default_orders_base_url() -> String {
    "http://127.0.0.1:3000".to_string()
}
fn default_orders_path() -> String {
    "/api/orders".to_string()
}
fn default_order_timeout_ms() -> u64 {
    DEFAULT_ORDER_TIMEOUT_MS
}
fn default_db_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{}/.cartpilot/cartpilot.db", home)
}

impl CartpilotConfig {
    /// Load config from a TOML file with CARTPILOT_* env var overrides.
    ///
    /// Checks in order:
    ///   1. Explicit path argument
    ///   2. ~/.cartpilot/cartpilot.toml
    ///
    /// A missing file is not an error; every field has a default.
    pub fn load(config_path: Option<&str>) -> crate::error::Result<Self> {
        let path = config_path
            .map(String::from)
            .unwrap_or_else(default_config_path);
        debug!(%path, "loading config");

        Figment::new()
            .merge(Toml::file(&path))
            .merge(Env::prefixed("CARTPILOT_").split("_"))
            .extract()
            .map_err(|e| crate::error::CartpilotError::Config(e.to_string()))
    }
}

fn default_config_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{}/.cartpilot/cartpilot.toml", home)
}
