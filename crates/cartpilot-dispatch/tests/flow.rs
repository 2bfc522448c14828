// Evaluate -> dispatch -> re-evaluate against host-like fakes.
// Checks the rule lifecycle that hosts rely on: one-shot deletion, snooze re-arm
// and stock merges after an order.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use cartpilot_core::ProductId;
use cartpilot_dispatch::{
    ActionDispatcher, ActionTaken, CartSink, CatalogSink, DispatchError, OrderError, OrderReceipt,
    OrderRequest, OrderService, Session, SinkError,
};
use cartpilot_rules::{
    ActionMode, NewRule, Product, RuleRegistry, SharedRules, StockUpdate, World,
};
use chrono::Utc;

/// Cart and catalog backed by one shared world, like a storefront's client state.
#[derive(Clone, Default)]
struct Shop {
    world: Arc<Mutex<World>>,
}

impl Shop {
    fn new(world: World) -> Self {
        Self {
            world: Arc::new(Mutex::new(world)),
        }
    }

    fn snapshot(&self) -> World {
        self.world.lock().unwrap().clone()
    }
}

impl CartSink for Shop {
    fn add_to_cart(&self, product_id: &ProductId, quantity: u32) -> Result<(), SinkError> {
        let mut world = self.world.lock().unwrap();
        *world.cart.entry(product_id.clone()).or_insert(0) += quantity;
        Ok(())
    }
}

impl CatalogSink for Shop {
    fn apply_stock_updates(&self, updates: &[StockUpdate]) {
        self.world.lock().unwrap().apply_stock_updates(updates);
    }
}

/// Decrements stock by the ordered quantity, or refuses when there isn't enough.
struct Warehouse {
    shop: Shop,
    calls: Mutex<u32>,
}

#[async_trait]
impl OrderService for Warehouse {
    async fn place_order(&self, req: &OrderRequest) -> Result<OrderReceipt, OrderError> {
        *self.calls.lock().unwrap() += 1;
        let item = &req.items[0];
        let stock = self
            .shop
            .snapshot()
            .product(&item.product_id)
            .map(|p| p.stock)
            .unwrap_or(0);
        if stock < item.quantity {
            return Err(OrderError::InsufficientStock {
                product_id: Some(item.product_id.clone()),
                message: format!("only {stock} left"),
            });
        }
        Ok(OrderReceipt {
            order_id: Some(format!("order-{}", req.agent_rule_id)),
            updated_products: vec![StockUpdate {
                product_id: item.product_id.clone(),
                stock: stock - item.quantity,
            }],
        })
    }
}

struct Setup {
    rules: SharedRules,
    shop: Shop,
    warehouse: Arc<Warehouse>,
    dispatcher: ActionDispatcher,
}

fn setup(world: World) -> Setup {
    let rules: SharedRules = Arc::new(RuleRegistry::new(24.0));
    let shop = Shop::new(world);
    let warehouse = Arc::new(Warehouse {
        shop: shop.clone(),
        calls: Mutex::new(0),
    });
    let dispatcher = ActionDispatcher::new(
        rules.clone(),
        Arc::new(shop.clone()),
        Arc::new(shop.clone()),
        warehouse.clone(),
        Duration::from_secs(10),
    );
    Setup {
        rules,
        shop,
        warehouse,
        dispatcher,
    }
}

fn catalog() -> World {
    World::new()
        .with_product(Product::new("beans", "House blend 1kg", 18.0, 5))
        .with_product(Product::new("grinder", "Burr grinder", 120.0, 2))
}

fn pass(s: &Setup, hours_ahead: i64) -> Vec<cartpilot_rules::MatchEvent> {
    let now = Utc::now() + chrono::Duration::hours(hours_ahead);
    cartpilot_scheduler::run(&s.rules.snapshot(), &s.shop.snapshot(), now, 100)
}

#[tokio::test]
async fn one_shot_restock_fills_cart_and_disappears() {
    let s = setup(catalog());
    let rule = s
        .rules
        .create(NewRule::auto_restock("beans", 2).with(|r| r.action_mode = ActionMode::AddToCart))
        .unwrap();

    let events = pass(&s, 0);
    assert_eq!(events.len(), 1);
    let out = s.dispatcher.dispatch(&events[0], &Session::anonymous()).await.unwrap();
    assert_eq!(out.action, ActionTaken::AddedToCart { quantity: 2 });
    assert!(out.retired);

    assert_eq!(s.shop.snapshot().cart_qty(&"beans".into()), 2);
    assert!(s.rules.get(&rule.id).is_none());
    assert!(pass(&s, 0).is_empty());
}

#[tokio::test]
async fn kept_rule_rearms_after_snooze_window() {
    let s = setup(catalog());
    s.rules
        .create(NewRule::price_drop("grinder", 150.0).with(|r| {
            r.keep_active = true;
            r.snooze_hours = Some(12.0);
        }))
        .unwrap();

    let events = pass(&s, 0);
    assert_eq!(events.len(), 1);
    s.dispatcher.dispatch(&events[0], &Session::anonymous()).await.unwrap();

    assert!(pass(&s, 0).is_empty());
    assert!(pass(&s, 11).is_empty());
    assert_eq!(pass(&s, 13).len(), 1);
}

#[tokio::test]
async fn dismissed_one_shot_survives_but_stays_quiet() {
    let s = setup(catalog());
    let rule = s.rules.create(NewRule::price_drop("beans", 20.0)).unwrap();

    let events = pass(&s, 0);
    assert_eq!(events.len(), 1);
    s.dispatcher.dismiss(&events[0].rule_id).unwrap();

    assert!(s.rules.get(&rule.id).is_some());
    assert!(pass(&s, 1).is_empty());
    assert_eq!(pass(&s, 25).len(), 1);
}

#[tokio::test]
async fn auto_order_merges_stock_into_catalog() {
    let s = setup(catalog());
    let rule = s
        .rules
        .create(NewRule::price_drop("grinder", 150.0).with(|r| {
            r.action_mode = ActionMode::AutoOrder;
            r.address_id = Some("home".into());
            r.user_consent = true;
        }))
        .unwrap();

    let events = pass(&s, 0);
    let out = s
        .dispatcher
        .dispatch(&events[0], &Session::signed_in("user-1"))
        .await
        .unwrap();

    match out.action {
        ActionTaken::Ordered { order_id, quantity, .. } => {
            assert_eq!(order_id, Some(format!("order-{}", rule.id)));
            assert_eq!(quantity, 1);
        }
        other => panic!("unexpected action: {other:?}"),
    }
    assert_eq!(s.shop.snapshot().product(&"grinder".into()).unwrap().stock, 1);
    assert!(s.rules.get(&rule.id).is_none());
}

#[tokio::test]
async fn auto_order_gates_are_checked_before_ordering() {
    let s = setup(catalog());
    s.rules
        .create(NewRule::price_drop("grinder", 150.0).with(|r| {
            r.action_mode = ActionMode::AutoOrder;
            r.address_id = Some("home".into());
            r.user_consent = true;
        }))
        .unwrap();
    let events = pass(&s, 0);

    let err = s.dispatcher.dispatch(&events[0], &Session::anonymous()).await.unwrap_err();
    assert!(matches!(err, DispatchError::NotAuthenticated));
    assert_eq!(*s.warehouse.calls.lock().unwrap(), 0);

    // Consent revoked after the pass: the dispatcher reads the current rule.
    let patch = cartpilot_rules::RulePatch {
        action_mode: Some(ActionMode::AddToCart),
        user_consent: Some(false),
        ..Default::default()
    };
    s.rules.update(&events[0].rule_id, &patch).unwrap();
    let out = s
        .dispatcher
        .dispatch(&events[0], &Session::signed_in("user-1"))
        .await
        .unwrap();
    assert_eq!(out.action, ActionTaken::AddedToCart { quantity: 1 });
    assert_eq!(*s.warehouse.calls.lock().unwrap(), 0);
}

#[tokio::test]
async fn out_of_stock_order_keeps_rule_for_retry() {
    let s = setup(catalog());
    let rule = s
        .rules
        .create(NewRule::price_drop("grinder", 150.0).with(|r| {
            r.action_mode = ActionMode::AutoOrder;
            r.restock_qty = Some(5);
            r.address_id = Some("home".into());
            r.user_consent = true;
        }))
        .unwrap();

    let events = pass(&s, 0);
    let err = s
        .dispatcher
        .dispatch(&events[0], &Session::signed_in("user-1"))
        .await
        .unwrap_err();
    assert_eq!(err.code(), "INSUFFICIENT_STOCK");
    assert!(s.rules.get(&rule.id).is_some());
    assert!(s.rules.last_triggered(&rule.id).is_none());
    assert_eq!(pass(&s, 0).len(), 1);
}

#[tokio::test]
async fn rule_paused_after_pass_does_not_touch_cart() {
    let s = setup(catalog());
    let rule = s
        .rules
        .create(NewRule::auto_restock("beans", 3).with(|r| r.action_mode = ActionMode::AddToCart))
        .unwrap();

    let events = pass(&s, 0);
    assert_eq!(events.len(), 1);
    s.rules.toggle(&rule.id).unwrap();

    let err = s.dispatcher.dispatch(&events[0], &Session::anonymous()).await.unwrap_err();
    assert!(matches!(err, DispatchError::RulePaused { .. }));
    assert_eq!(s.shop.snapshot().cart_qty(&"beans".into()), 0);
    assert!(s.rules.get(&rule.id).is_some());
    assert!(pass(&s, 0).is_empty());

    // resumed, the same rule fires and dispatches normally
    s.rules.toggle(&rule.id).unwrap();
    let events = pass(&s, 0);
    let out = s.dispatcher.dispatch(&events[0], &Session::anonymous()).await.unwrap();
    assert_eq!(out.action, ActionTaken::AddedToCart { quantity: 3 });
}
