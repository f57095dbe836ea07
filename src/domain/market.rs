use chrono::{DateTime, TimeZone, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::{OrderSide, OrderStatus};

/// One candle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Kline {
    /// Open time in epoch milliseconds
    pub open_time: i64,
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
    pub volume: Decimal,
    /// Whether the candle is closed
    pub is_final: bool,
}

impl Kline {
    pub fn opened_at(&self) -> Option<DateTime<Utc>> {
        Utc.timestamp_millis_opt(self.open_time).single()
    }
}

/// Best bid/ask update
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BookTicker {
    pub bid_price: Decimal,
    pub bid_qty: Decimal,
    pub ask_price: Decimal,
    pub ask_qty: Decimal,
}

impl BookTicker {
    pub fn mid(&self) -> Decimal {
        (self.bid_price + self.ask_price) / Decimal::TWO
    }
}

/// Rolling price statistics
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PriceStats {
    pub high_price: Decimal,
    pub low_price: Decimal,
    pub last_price: Decimal,
}

/// Balance of one asset
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Balance {
    pub asset: String,
    pub free: Decimal,
    pub locked: Decimal,
}

/// Event pushed on the user data stream
#[derive(Debug, Clone, PartialEq)]
pub enum UserDataEvent {
    /// Account balances changed
    AccountUpdate { balances: Vec<Balance> },
    /// An order changed on the exchange
    ExecutionReport {
        order_id: i64,
        side: OrderSide,
        status: OrderStatus,
        executed_qty: Decimal,
        cumulative_quote_qty: Decimal,
    },
    /// Anything else; ignored by consumers
    Other(String),
}
