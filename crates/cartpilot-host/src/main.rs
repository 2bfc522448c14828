use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use anyhow::{bail, Context};
use cartpilot_core::{CartpilotConfig, RuleId};
use cartpilot_dispatch::{ActionDispatcher, HttpOrderService, Session};
use cartpilot_rules::snooze::snoozed_until;
use cartpilot_rules::{
    evaluate, is_snoozed, MatchEvent, NewRule, RuleRegistry, SharedRules, SqliteRuleRepository,
};
use cartpilot_scheduler::{RuleRunner, RunnerHandle, WorldSource};
use chrono::Utc;
use clap::{Parser, Subcommand};
use tokio::sync::{mpsc, watch};
use tracing::{info, warn};

mod world_file;

use world_file::FileWorld;

/// How often `watch` checks the world file for edits.
const WORLD_POLL: Duration = Duration::from_secs(1);

#[derive(Debug, Parser)]
#[command(name = "cartpilot", version, about = "Price, stock and cart automation rules")]
struct Cli {
    /// Config file. Falls back to $CARTPILOT_CONFIG, then ~/.cartpilot/cartpilot.toml.
    #[arg(long, global = true)]
    config: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run one evaluation pass and print the match events as JSON.
    Check {
        #[arg(long)]
        world: PathBuf,
    },
    /// Keep evaluating on the poll interval and whenever the world file changes.
    Watch {
        #[arg(long)]
        world: PathBuf,
    },
    /// Carry out a rule's action if it currently matches.
    Confirm {
        #[arg(long)]
        world: PathBuf,
        #[arg(long)]
        rule: String,
        /// Signed-in user; required for auto-order rules.
        #[arg(long)]
        user: Option<String>,
    },
    /// Decline a match: snooze the rule without acting.
    Dismiss {
        #[arg(long)]
        rule: String,
    },
    #[command(subcommand)]
    Rules(RulesCommand),
}

#[derive(Debug, Subcommand)]
enum RulesCommand {
    /// Print stored rules with their last trigger time.
    List,
    /// Create a rule from a JSON file (`-` for stdin).
    Add {
        #[arg(long)]
        file: PathBuf,
    },
    Remove {
        id: String,
    },
    /// Pause or resume a rule.
    Toggle {
        id: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Logs go to stderr; stdout carries JSON output only.
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "cartpilot=info".into()),
        )
        .init();

    let cli = Cli::parse();

    // explicit --config > CARTPILOT_CONFIG > ~/.cartpilot/cartpilot.toml
    let config_path = cli.config.clone().or_else(|| std::env::var("CARTPILOT_CONFIG").ok());
    let config = CartpilotConfig::load(config_path.as_deref()).unwrap_or_else(|e| {
        warn!("Config load failed ({}), using defaults", e);
        CartpilotConfig::default()
    });

    let rules = open_rules(&config)?;

    match cli.command {
        Command::Check { world } => check(&config, &rules, &world),
        Command::Watch { world } => watch_world(&config, rules, &world).await,
        Command::Confirm { world, rule, user } => {
            confirm(&config, rules, &world, &RuleId::from(rule), user).await
        }
        Command::Dismiss { rule } => {
            let dispatcher = build_dispatcher(&config, rules, None)?;
            let rule_id = RuleId::from(rule);
            let at = dispatcher
                .dismiss(&rule_id)
                .map_err(|e| anyhow::anyhow!("{} ({})", e, e.code()))?;
            print_json(&serde_json::json!({ "ruleId": rule_id, "dismissedAt": at }))
        }
        Command::Rules(cmd) => rules_command(&rules, cmd),
    }
}

fn open_rules(config: &CartpilotConfig) -> anyhow::Result<SharedRules> {
    let db_path = &config.database.path;
    ensure_parent_dir(db_path);
    info!(path = %db_path, "opening SQLite database");

    let conn = rusqlite::Connection::open(db_path)?;
    conn.execute_batch("PRAGMA journal_mode=WAL;")?;
    let repo = Arc::new(SqliteRuleRepository::new(conn)?);

    let registry = RuleRegistry::new(config.engine.default_snooze_hours).with_repository(repo);
    registry.load_from_repository()?;
    Ok(Arc::new(registry))
}

/// Dispatcher wired to the order endpoint. Without a world file the cart and
/// catalog sinks are unavailable, which only `dismiss` can get away with.
fn build_dispatcher(
    config: &CartpilotConfig,
    rules: SharedRules,
    world: Option<Arc<FileWorld>>,
) -> anyhow::Result<ActionDispatcher> {
    let orders = Arc::new(HttpOrderService::new(&config.orders)?);
    let timeout = Duration::from_millis(config.orders.timeout_ms);
    let dispatcher = match world {
        Some(w) => ActionDispatcher::new(rules, w.clone(), w, orders, timeout),
        None => {
            let sink = Arc::new(detached::Detached);
            ActionDispatcher::new(rules, sink.clone(), sink, orders, timeout)
        }
    };
    Ok(dispatcher)
}

fn check(config: &CartpilotConfig, rules: &SharedRules, world: &Path) -> anyhow::Result<()> {
    let world = FileWorld::open(world)?;
    let events = cartpilot_scheduler::run(
        &rules.snapshot(),
        &world.snapshot(),
        Utc::now(),
        config.engine.max_rules_per_pass,
    );
    info!(matched = events.len(), "check complete");
    print_json(&events)
}

async fn watch_world(config: &CartpilotConfig, rules: SharedRules, path: &Path) -> anyhow::Result<()> {
    let world = Arc::new(FileWorld::open(path)?);
    let (events_tx, mut events_rx) = mpsc::channel::<Vec<MatchEvent>>(64);
    let (runner, handle) = RuleRunner::new(rules, world.clone(), events_tx, &config.engine);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let runner_task = tokio::spawn(runner.run(shutdown_rx.clone()));
    let watcher_task = tokio::spawn(watch_file(world, handle, shutdown_rx));
    let presenter_task = tokio::spawn(async move {
        while let Some(batch) = events_rx.recv().await {
            for event in batch {
                present(&event);
            }
        }
    });

    info!(world = %path.display(), "watching; press Ctrl-C to stop");
    tokio::signal::ctrl_c().await.context("installing Ctrl-C handler")?;
    let _ = shutdown_tx.send(true);

    // The runner owns the only event sender, so the presenter ends with it.
    runner_task.await?;
    watcher_task.await?;
    presenter_task.await?;
    Ok(())
}

/// Notify the runner whenever the world file's mtime moves.
async fn watch_file(world: Arc<FileWorld>, handle: RunnerHandle, mut shutdown: watch::Receiver<bool>) {
    let mut last: Option<SystemTime> = world.modified();
    let mut tick = tokio::time::interval(WORLD_POLL);
    loop {
        tokio::select! {
            _ = tick.tick() => {
                let now = world.modified();
                if now != last {
                    tracing::debug!(path = %world.path().display(), "world file changed");
                    last = now;
                    handle.notify_changed();
                }
            }
            res = shutdown.changed() => {
                if res.is_err() || *shutdown.borrow() {
                    break;
                }
            }
        }
    }
}

fn present(event: &MatchEvent) {
    info!(
        rule_id = %event.rule_id,
        rule_type = %event.rule_type,
        mode = %event.action_mode,
        product_id = %event.product.id,
        "{}",
        event.message
    );
}

async fn confirm(
    config: &CartpilotConfig,
    rules: SharedRules,
    path: &Path,
    rule_id: &RuleId,
    user: Option<String>,
) -> anyhow::Result<()> {
    let world = Arc::new(FileWorld::open(path)?);
    let Some(rule) = rules.get(rule_id) else {
        bail!("rule {rule_id} not found");
    };

    let now = Utc::now();
    if !rule.active {
        bail!("rule {rule_id} is paused");
    }
    let last = rules.last_triggered(rule_id);
    if is_snoozed(last, rule.snooze_hours, now) {
        bail!("rule {rule_id} is snoozed");
    }
    let result = evaluate(&rule, &world.snapshot(), now);
    let Some(event) = MatchEvent::from_result(&rule, result, now) else {
        bail!("rule {rule_id} does not currently match");
    };

    let session = match user {
        Some(u) => Session::signed_in(u),
        None => Session::anonymous(),
    };
    let dispatcher = build_dispatcher(config, rules, Some(world))?;
    match dispatcher.dispatch(&event, &session).await {
        Ok(outcome) => print_json(&outcome),
        Err(e) => bail!("{} ({})", e, e.code()),
    }
}

fn rules_command(rules: &SharedRules, cmd: RulesCommand) -> anyhow::Result<()> {
    match cmd {
        RulesCommand::List => {
            let store = rules.snapshot();
            let now = Utc::now();
            let mut out = Vec::with_capacity(store.len());
            for rule in store.iter() {
                let last = store.last_triggered(&rule.id);
                let mut v = serde_json::to_value(rule)?;
                v["lastTriggered"] = serde_json::json!(last);
                v["snoozedUntil"] = serde_json::json!(snoozed_until(last, rule.snooze_hours, now));
                out.push(v);
            }
            print_json(&out)
        }
        RulesCommand::Add { file } => {
            let raw = if file.as_os_str() == "-" {
                std::io::read_to_string(std::io::stdin())?
            } else {
                std::fs::read_to_string(&file).with_context(|| format!("reading {}", file.display()))?
            };
            let new: NewRule = serde_json::from_str(&raw).context("parsing rule JSON")?;
            let rule = rules.create(new).map_err(|e| anyhow::anyhow!("{} ({})", e, e.code()))?;
            print_json(&rule)
        }
        RulesCommand::Remove { id } => {
            rules.remove(&RuleId::from(id.as_str()))?;
            Ok(())
        }
        RulesCommand::Toggle { id } => {
            let rule = rules.toggle(&RuleId::from(id.as_str()))?;
            print_json(&rule)
        }
    }
}

fn print_json<T: serde::Serialize + ?Sized>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn ensure_parent_dir(path: &str) {
    if let Some(parent) = std::path::Path::new(path).parent() {
        let _ = std::fs::create_dir_all(parent);
    }
}

mod detached {
    use cartpilot_core::ProductId;
    use cartpilot_dispatch::{CartSink, CatalogSink, SinkError};
    use cartpilot_rules::StockUpdate;

    /// Sinks for commands that run without a world file.
    pub struct Detached;

    impl CartSink for Detached {
        fn add_to_cart(&self, _: &ProductId, _: u32) -> Result<(), SinkError> {
            Err(SinkError("no world file attached".into()))
        }
    }

    impl CatalogSink for Detached {
        fn apply_stock_updates(&self, _: &[StockUpdate]) {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn parses_confirm_with_user() {
        let cli = Cli::try_parse_from([
            "cartpilot", "confirm", "--world", "w.json", "--rule", "r1", "--user", "u1",
        ])
        .unwrap();
        match cli.command {
            Command::Confirm { world, rule, user } => {
                assert_eq!(world, PathBuf::from("w.json"));
                assert_eq!(rule, "r1");
                assert_eq!(user.as_deref(), Some("u1"));
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn config_flag_is_global() {
        let cli = Cli::try_parse_from(["cartpilot", "rules", "list", "--config", "c.toml"]).unwrap();
        assert_eq!(cli.config.as_deref(), Some("c.toml"));
        assert!(matches!(cli.command, Command::Rules(RulesCommand::List)));
    }

    #[test]
    fn check_requires_world() {
        assert!(Cli::try_parse_from(["cartpilot", "check"]).is_err());
    }
}
