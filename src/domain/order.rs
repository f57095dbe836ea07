use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Order side (buy or sell)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OrderSide {
    Buy,
    Sell,
}

impl OrderSide {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderSide::Buy => "BUY",
            OrderSide::Sell => "SELL",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_uppercase().as_str() {
            "BUY" => Some(OrderSide::Buy),
            "SELL" => Some(OrderSide::Sell),
            _ => None,
        }
    }
}

impl std::fmt::Display for OrderSide {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Order status as reported by the exchange
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    New,
    PartiallyFilled,
    Filled,
    Canceled,
}

impl OrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::New => "NEW",
            OrderStatus::PartiallyFilled => "PARTIALLY_FILLED",
            OrderStatus::Filled => "FILLED",
            OrderStatus::Canceled => "CANCELED",
        }
    }

    /// Map an exchange status string.
    ///
    /// Statuses outside the four tracked ones collapse onto the nearest one:
    /// rejected/expired orders never traded further, a pending cancel is still live.
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_uppercase().as_str() {
            "NEW" | "PENDING_NEW" | "PENDING_CANCEL" => Some(OrderStatus::New),
            "PARTIALLY_FILLED" => Some(OrderStatus::PartiallyFilled),
            "FILLED" => Some(OrderStatus::Filled),
            "CANCELED" | "CANCELLED" | "REJECTED" | "EXPIRED" | "EXPIRED_IN_MATCH" => {
                Some(OrderStatus::Canceled)
            }
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, OrderStatus::Filled | OrderStatus::Canceled)
    }

    pub fn is_pending(&self) -> bool {
        !self.is_terminal()
    }

    /// Position on the way to a terminal status.
    fn rank(&self) -> u8 {
        match self {
            OrderStatus::New => 0,
            OrderStatus::PartiallyFilled => 1,
            OrderStatus::Filled | OrderStatus::Canceled => 2,
        }
    }
}

impl std::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Exchange order as last observed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    /// Exchange-assigned identifier
    pub order_id: i64,
    /// Client-assigned correlation token
    pub client_order_id: String,
    pub symbol: String,
    pub side: OrderSide,
    /// Submitted base quantity
    pub quantity: Decimal,
    /// Cumulative quote amount filled
    pub cumulative_quote_qty: Decimal,
    /// Cumulative base quantity filled
    pub executed_qty: Decimal,
    pub status: OrderStatus,
    /// Transaction time in epoch milliseconds
    pub transact_time: i64,
}

impl Order {
    /// Average fill price; zero while nothing is executed.
    pub fn effective_price(&self) -> Decimal {
        if self.executed_qty.is_zero() {
            return Decimal::ZERO;
        }
        self.cumulative_quote_qty
            .checked_div(self.executed_qty)
            .unwrap_or(Decimal::ZERO)
    }

    /// Fold a fresher exchange view into this order.
    ///
    /// Terminal orders are immutable, status never moves backwards and the
    /// executed quantity never decreases. Returns whether anything changed.
    pub fn absorb(&mut self, fresh: &Order) -> bool {
        if self.status.is_terminal() || fresh.order_id != self.order_id {
            return false;
        }
        if fresh.status.rank() < self.status.rank() {
            return false;
        }
        let executed = fresh.executed_qty.max(self.executed_qty);
        let quote = fresh.cumulative_quote_qty.max(self.cumulative_quote_qty);
        let changed = fresh.status != self.status
            || executed != self.executed_qty
            || quote != self.cumulative_quote_qty;

        self.status = fresh.status;
        self.executed_qty = executed;
        self.cumulative_quote_qty = quote;
        if fresh.transact_time > self.transact_time {
            self.transact_time = fresh.transact_time;
        }
        changed
    }
}

/// Order row as persisted, with identity and traceability columns
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderRecord {
    pub order: Order,
    pub thread_id: String,
    pub cycle_id: String,
    /// Price recorded for the order (average fill, or market price when unfilled)
    pub price: Decimal,
    /// For sells: the buy order whose position is being closed
    pub source_order_id: Option<i64>,
    pub created_at: DateTime<Utc>,
}

/// Open buy not yet matched by a sell
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThreadTransaction {
    pub thread_id: String,
    pub cycle_id: String,
    /// Identifier of the originating buy order
    pub order_id: i64,
    pub cumulative_quote_qty: Decimal,
    pub price: Decimal,
    pub executed_qty: Decimal,
    pub created_at: DateTime<Utc>,
}

impl ThreadTransaction {
    /// Price at which selling covers `profit_min` plus commission on both legs.
    pub fn target_price(&self, profit_min: Decimal, commission: Decimal) -> Decimal {
        self.price * (Decimal::ONE + profit_min + commission * Decimal::TWO)
    }
}
