//! Order lifecycle: buy/sell state machines and the pending-order sweep.

pub mod engine;
pub mod reconcile;

pub use engine::{open_position, BuyOutcome, OrderLifecycle, SellOutcome, SELL_CANCEL_ITERATION};
pub use reconcile::{PendingOrderSweep, SweepReport};
