use async_trait::async_trait;
use futures::stream::BoxStream;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

#[cfg(test)]
use mockall::automock;

use crate::domain::{BookTicker, Kline, LotSize, Order, PriceStats, UserDataEvent};
use crate::error::{ExchangeError, PumpError, Result};

pub type ExchangeResult<T> = std::result::Result<T, ExchangeError>;

/// Push stream from the exchange. Ends when the connection drops.
pub type EventStream<T> = BoxStream<'static, ExchangeResult<T>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExchangeKind {
    Binance,
}

impl Default for ExchangeKind {
    fn default() -> Self {
        Self::Binance
    }
}

impl ExchangeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Binance => "binance",
        }
    }
}

impl std::fmt::Display for ExchangeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for ExchangeKind {
    type Err = &'static str;

    fn from_str(raw: &str) -> std::result::Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "binance" | "binance_spot" | "binance-spot" => Ok(Self::Binance),
            _ => Err("invalid exchange; expected binance"),
        }
    }
}

pub fn parse_exchange_kind(raw: &str) -> Result<ExchangeKind> {
    ExchangeKind::from_str(raw).map_err(|e| PumpError::Validation(e.to_string()))
}

/// Logical operations the core needs from an exchange.
///
/// Quantities handed to `submit_buy` / `submit_sell` must already be corrected
/// to the symbol's step size. Every call distinguishes transport failures from
/// semantic exchange errors through [`ExchangeError`].
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ExchangeAdapter: Send + Sync {
    fn kind(&self) -> ExchangeKind;

    async fn get_order(&self, symbol: &str, order_id: i64) -> ExchangeResult<Order>;

    /// Market buy of `quantity` base units.
    async fn submit_buy(&self, symbol: &str, quantity: Decimal) -> ExchangeResult<Order>;

    /// Market sell of `quantity` base units.
    async fn submit_sell(&self, symbol: &str, quantity: Decimal) -> ExchangeResult<Order>;

    async fn cancel_order(&self, symbol: &str, order_id: i64) -> ExchangeResult<Order>;

    /// Lot-size rule of the symbol.
    async fn get_exchange_info(&self, symbol: &str) -> ExchangeResult<LotSize>;

    /// Free balance of `asset`.
    async fn get_available_funds(&self, asset: &str) -> ExchangeResult<Decimal>;

    /// Rolling 24h statistics.
    async fn get_recent_price_stats(&self, symbol: &str) -> ExchangeResult<PriceStats>;

    async fn get_historical_candles(
        &self,
        symbol: &str,
        interval: &str,
        limit: u32,
    ) -> ExchangeResult<Vec<Kline>>;

    async fn open_kline_stream(
        &self,
        symbol: &str,
        interval: &str,
    ) -> ExchangeResult<EventStream<Kline>>;

    async fn open_book_ticker_stream(&self, symbol: &str) -> ExchangeResult<EventStream<BookTicker>>;

    async fn open_user_data_stream(
        &self,
        listen_key: &str,
    ) -> ExchangeResult<EventStream<UserDataEvent>>;

    async fn get_listen_key(&self) -> ExchangeResult<String>;

    async fn keep_alive_listen_key(&self, listen_key: &str) -> ExchangeResult<()>;

    /// Re-align the local clock offset with the exchange. Returns the offset in ms.
    async fn sync_server_time(&self) -> ExchangeResult<i64>;
}
