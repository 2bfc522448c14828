use std::sync::{Arc, Mutex};

use cartpilot_core::{AddressId, ProductId, RuleId};
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, Connection};
use tracing::{debug, warn};

use crate::error::Result;
use crate::types::{ActionMode, Rule, RuleType};

/// A rule as persisted, together with its trigger ledger entry.
#[derive(Debug, Clone)]
pub struct StoredRule {
    pub rule: Rule,
    pub last_triggered: Option<DateTime<Utc>>,
}

/// Durable mirror of the rule store.
///
/// Implementations must make `upsert` and `delete` idempotent so callers can
/// retry them freely.
pub trait RuleRepository: Send + Sync {
    fn upsert(&self, rule: &Rule, last_triggered: Option<DateTime<Utc>>) -> Result<()>;
    fn delete(&self, id: &RuleId) -> Result<()>;
    /// Every stored rule in creation order.
    fn load_all(&self) -> Result<Vec<StoredRule>>;
}

/// Initialise the rule schema in `conn`. Safe to call on every start.
pub fn init_db(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS automation_rules (
            id              TEXT    NOT NULL PRIMARY KEY,
            rule_type       TEXT    NOT NULL,
            product_id      TEXT    NOT NULL,
            threshold       REAL,
            restock_qty     INTEGER,
            timeout_hours   REAL,
            active          INTEGER NOT NULL DEFAULT 1,
            keep_active     INTEGER NOT NULL DEFAULT 0,
            snooze_hours    REAL    NOT NULL,
            action_mode     TEXT    NOT NULL DEFAULT 'notify',
            address_id      TEXT,
            user_consent    INTEGER NOT NULL DEFAULT 0,
            created_at      TEXT    NOT NULL,
            last_triggered  TEXT,               -- ISO-8601 or NULL
            updated_at      TEXT    NOT NULL
        ) STRICT;

        CREATE INDEX IF NOT EXISTS idx_automation_rules_created ON automation_rules (created_at);
        ",
    )?;
    Ok(())
}

/// SQLite-backed [`RuleRepository`].
pub struct SqliteRuleRepository {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteRuleRepository {
    pub fn new(conn: Connection) -> Result<Self> {
        init_db(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::new(Connection::open_in_memory()?)
    }
}

impl RuleRepository for SqliteRuleRepository {
    fn upsert(&self, rule: &Rule, last_triggered: Option<DateTime<Utc>>) -> Result<()> {
        let conn = self.conn.lock().expect("rule db poisoned");
        conn.execute(
            "INSERT INTO automation_rules
             (id, rule_type, product_id, threshold, restock_qty, timeout_hours,
              active, keep_active, snooze_hours, action_mode, address_id,
              user_consent, created_at, last_triggered, updated_at)
             VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12,?13,?14,?15)
             ON CONFLICT(id) DO UPDATE SET
               rule_type=excluded.rule_type, product_id=excluded.product_id,
               threshold=excluded.threshold, restock_qty=excluded.restock_qty,
               timeout_hours=excluded.timeout_hours, active=excluded.active,
               keep_active=excluded.keep_active, snooze_hours=excluded.snooze_hours,
               action_mode=excluded.action_mode, address_id=excluded.address_id,
               user_consent=excluded.user_consent, last_triggered=excluded.last_triggered,
               updated_at=excluded.updated_at",
            params![
                rule.id.as_str(),
                rule.rule_type.to_string(),
                rule.product_id.as_str(),
                rule.threshold,
                rule.restock_qty,
                rule.timeout_hours,
                rule.active,
                rule.keep_active,
                rule.snooze_hours,
                rule.action_mode.to_string(),
                rule.address_id.as_ref().map(|a| a.as_str()),
                rule.user_consent,
                timestamp(rule.created_at),
                last_triggered.map(timestamp),
                timestamp(Utc::now()),
            ],
        )?;
        debug!(rule_id = %rule.id, "rule persisted");
        Ok(())
    }

    fn delete(&self, id: &RuleId) -> Result<()> {
        let conn = self.conn.lock().expect("rule db poisoned");
        conn.execute("DELETE FROM automation_rules WHERE id = ?1", [id.as_str()])?;
        Ok(())
    }

    fn load_all(&self) -> Result<Vec<StoredRule>> {
        let conn = self.conn.lock().expect("rule db poisoned");
        let mut stmt = conn.prepare(
            "SELECT id, rule_type, product_id, threshold, restock_qty, timeout_hours,
                    active, keep_active, snooze_hours, action_mode, address_id,
                    user_consent, created_at, last_triggered
             FROM automation_rules ORDER BY created_at, id",
        )?;

        let rows = stmt
            .query_map([], |row| {
                Ok(Row {
                    id: row.get(0)?,
                    rule_type: row.get(1)?,
                    product_id: row.get(2)?,
                    threshold: row.get(3)?,
                    restock_qty: row.get(4)?,
                    timeout_hours: row.get(5)?,
                    active: row.get(6)?,
                    keep_active: row.get(7)?,
                    snooze_hours: row.get(8)?,
                    action_mode: row.get(9)?,
                    address_id: row.get(10)?,
                    user_consent: row.get(11)?,
                    created_at: row.get(12)?,
                    last_triggered: row.get(13)?,
                })
            })?
            .filter_map(|r| match r {
                Ok(row) => row.into_stored(),
                Err(e) => {
                    warn!(error = %e, "skipping unreadable rule row");
                    None
                }
            })
            .collect();
        Ok(rows)
    }
}

struct Row {
    id: String,
    rule_type: String,
    product_id: String,
    threshold: Option<f64>,
    restock_qty: Option<u32>,
    timeout_hours: Option<f64>,
    active: bool,
    keep_active: bool,
    snooze_hours: f64,
    action_mode: String,
    address_id: Option<String>,
    user_consent: bool,
    created_at: String,
    last_triggered: Option<String>,
}

impl Row {
    fn into_stored(self) -> Option<StoredRule> {
        let Some(created_at) = parse_timestamp(&self.created_at) else {
            warn!(rule_id = %self.id, "skipping rule with bad created_at");
            return None;
        };
        // Unknown types load so the evaluator can report them; they never match.
        let rule_type = self
            .rule_type
            .parse::<RuleType>()
            .unwrap_or(RuleType::Unknown);
        let action_mode = self.action_mode.parse::<ActionMode>().unwrap_or_else(|e| {
            warn!(rule_id = %self.id, "{e}; falling back to notify");
            ActionMode::Notify
        });

        Some(StoredRule {
            rule: Rule {
                id: RuleId(self.id),
                rule_type,
                product_id: ProductId(self.product_id),
                threshold: self.threshold,
                restock_qty: self.restock_qty,
                timeout_hours: self.timeout_hours,
                active: self.active,
                keep_active: self.keep_active,
                snooze_hours: self.snooze_hours,
                action_mode,
                address_id: self.address_id.map(AddressId),
                user_consent: self.user_consent,
                created_at,
            },
            last_triggered: self.last_triggered.as_deref().and_then(parse_timestamp),
        })
    }
}

// Fixed-width UTC form so lexical order in SQL equals time order.
fn timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_timestamp(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}
