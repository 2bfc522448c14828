//! `cartpilot-dispatch` — carries out a confirmed match event.
//!
//! [`ActionDispatcher::dispatch`] branches on the rule's action mode:
//!
//! | Mode        | Side effect                                              |
//! |-------------|----------------------------------------------------------|
//! | `Notify`    | none; the event itself is the notification               |
//! | `AddToCart` | adds the rule's quantity to the cart through [`CartSink`] |
//! | `AutoOrder` | places an order through [`OrderService`] after checking sign-in, consent and address |
//!
//! On success the rule is stamped as triggered (re-arming its snooze window)
//! or, for one-shot rules, deleted. Any failure leaves the rule untouched.

pub mod dispatcher;
pub mod error;
pub mod order;
pub mod sinks;

pub use dispatcher::{ActionDispatcher, ActionTaken, DispatchOutcome};
pub use error::{DispatchError, OrderError, Result, SinkError};
pub use order::{HttpOrderService, OrderItem, OrderReceipt, OrderRequest, OrderService};
pub use sinks::{CartSink, CatalogSink, Session};
