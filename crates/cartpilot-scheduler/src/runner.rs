use std::sync::Arc;
use std::time::Duration;

use cartpilot_core::config::EngineConfig;
use cartpilot_rules::{MatchEvent, SharedRules, World};
use chrono::Utc;
use tokio::sync::{mpsc, watch};
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::engine::run_pass;

/// Supplies the current catalog and cart, synchronously, from host state.
pub trait WorldSource: Send + Sync {
    fn snapshot(&self) -> World;
}

impl<F> WorldSource for F
where
    F: Fn() -> World + Send + Sync,
{
    fn snapshot(&self) -> World {
        self()
    }
}

/// Cloneable handle the host uses to report catalog or cart mutations.
#[derive(Clone)]
pub struct RunnerHandle {
    changes: mpsc::Sender<()>,
}

impl RunnerHandle {
    /// Schedule a debounced re-evaluation. Never blocks.
    pub fn notify_changed(&self) {
        // A full channel already holds a pending change; dropping this one loses nothing.
        let _ = self.changes.try_send(());
    }
}

/// Background evaluation loop for one engine instance.
///
/// Owns its interval and debounce timer; both are dropped when [`RuleRunner::run`]
/// returns, so nothing outlives shutdown.
pub struct RuleRunner {
    rules: SharedRules,
    world: Arc<dyn WorldSource>,
    events_tx: mpsc::Sender<Vec<MatchEvent>>,
    changes_rx: mpsc::Receiver<()>,
    poll_interval: Duration,
    debounce: Duration,
    max_rules: usize,
}

impl RuleRunner {
    /// Build a runner and the handle that feeds it state-change notifications.
    ///
    /// Each non-empty pass is sent on `events_tx` with `try_send`, so a slow
    /// consumer never stalls evaluation.
    pub fn new(
        rules: SharedRules,
        world: Arc<dyn WorldSource>,
        events_tx: mpsc::Sender<Vec<MatchEvent>>,
        config: &EngineConfig,
    ) -> (Self, RunnerHandle) {
        let (changes_tx, changes_rx) = mpsc::channel(16);
        let runner = Self {
            rules,
            world,
            events_tx,
            changes_rx,
            poll_interval: Duration::from_secs(config.poll_interval_secs.max(1)),
            debounce: Duration::from_millis(config.debounce_ms),
            max_rules: config.max_rules_per_pass,
        };
        (runner, RunnerHandle { changes: changes_tx })
    }

    /// Run a single pass now and return its matches without sending them.
    pub fn run_once(&self) -> Vec<MatchEvent> {
        let store = self.rules.snapshot();
        let world = self.world.snapshot();
        run_pass(&store, &world, Utc::now(), self.max_rules).events
    }

    /// Main loop. Runs until `shutdown` broadcasts `true` or its sender is dropped.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        info!(
            poll_secs = self.poll_interval.as_secs(),
            debounce_ms = self.debounce.as_millis() as u64,
            "rule runner started"
        );
        self.pass("start");

        let mut interval = tokio::time::interval_at(Instant::now() + self.poll_interval, self.poll_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        // Single-slot debounce: every change pushes the deadline back.
        let debounce = tokio::time::sleep(self.debounce);
        tokio::pin!(debounce);
        let mut pending = false;

        loop {
            tokio::select! {
                _ = interval.tick() => self.pass("interval"),
                Some(()) = self.changes_rx.recv() => {
                    debounce.as_mut().reset(Instant::now() + self.debounce);
                    pending = true;
                }
                () = &mut debounce, if pending => {
                    pending = false;
                    self.pass("state_change");
                }
                res = shutdown.changed() => {
                    if res.is_err() || *shutdown.borrow() {
                        info!("rule runner shutting down");
                        break;
                    }
                }
            }
        }
    }

    fn pass(&self, trigger: &'static str) {
        let store = self.rules.snapshot();
        let world = self.world.snapshot();
        let report = run_pass(&store, &world, Utc::now(), self.max_rules);
        debug!(
            trigger,
            considered = report.considered,
            snoozed = report.snoozed,
            malformed = report.malformed,
            matched = report.events.len(),
            "evaluation pass complete"
        );

        if report.events.is_empty() {
            return;
        }
        if self.events_tx.try_send(report.events).is_err() {
            warn!(trigger, "event channel full or closed; batch dropped until next pass");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use cartpilot_rules::{NewRule, Product, RuleRegistry};

    fn config() -> EngineConfig {
        EngineConfig {
            poll_interval_secs: 300,
            debounce_ms: 500,
            ..EngineConfig::default()
        }
    }

    fn counting_world(calls: Arc<AtomicUsize>) -> Arc<dyn WorldSource> {
        Arc::new(move || {
            calls.fetch_add(1, Ordering::SeqCst);
            World::new().with_product(Product::new("7", "Espresso machine", 450.0, 3))
        })
    }

    fn rules_with_match() -> SharedRules {
        let reg = RuleRegistry::new(24.0);
        reg.create(NewRule::price_drop("7", 500.0)).unwrap();
        Arc::new(reg)
    }

    #[tokio::test(start_paused = true)]
    async fn initial_pass_emits_matches() {
        let calls = Arc::new(AtomicUsize::new(0));
        let (tx, mut rx) = mpsc::channel(4);
        let (runner, _handle) = RuleRunner::new(rules_with_match(), counting_world(calls), tx, &config());
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let task = tokio::spawn(runner.run(shutdown_rx));

        let batch = rx.recv().await.unwrap();
        assert_eq!(batch.len(), 1);
        assert_eq!(batch[0].product.name, "Espresso machine");

        shutdown_tx.send(true).unwrap();
        task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn burst_of_changes_coalesces_into_one_pass() {
        let calls = Arc::new(AtomicUsize::new(0));
        let (tx, _rx) = mpsc::channel(16);
        let (runner, handle) =
            RuleRunner::new(rules_with_match(), counting_world(calls.clone()), tx, &config());
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let task = tokio::spawn(runner.run(shutdown_rx));

        tokio::task::yield_now().await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        for _ in 0..5 {
            handle.notify_changed();
        }
        tokio::time::sleep(Duration::from_millis(200)).await;
        // a late change re-arms the timer instead of queueing a second pass
        handle.notify_changed();
        tokio::time::sleep(Duration::from_millis(400)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 2);

        shutdown_tx.send(true).unwrap();
        task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn interval_triggers_periodic_passes() {
        let calls = Arc::new(AtomicUsize::new(0));
        let (tx, _rx) = mpsc::channel(16);
        let (runner, _handle) =
            RuleRunner::new(rules_with_match(), counting_world(calls.clone()), tx, &config());
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let task = tokio::spawn(runner.run(shutdown_rx));

        tokio::time::sleep(Duration::from_secs(299)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        tokio::time::sleep(Duration::from_secs(300)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 3);

        shutdown_tx.send(true).unwrap();
        task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn dropped_shutdown_sender_stops_runner() {
        let calls = Arc::new(AtomicUsize::new(0));
        let (tx, _rx) = mpsc::channel(16);
        let (runner, _handle) = RuleRunner::new(rules_with_match(), counting_world(calls), tx, &config());
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let task = tokio::spawn(runner.run(shutdown_rx));
        drop(shutdown_tx);
        task.await.unwrap();
    }

    #[test]
    fn run_once_does_not_touch_rules() {
        let calls = Arc::new(AtomicUsize::new(0));
        let rules = rules_with_match();
        let (tx, _rx) = mpsc::channel(1);
        let (runner, _handle) = RuleRunner::new(rules.clone(), counting_world(calls), tx, &config());
        assert_eq!(runner.run_once().len(), 1);
        assert_eq!(runner.run_once().len(), 1);
        let id = rules.snapshot().iter().next().unwrap().id.clone();
        assert!(rules.last_triggered(&id).is_none());
    }
}
