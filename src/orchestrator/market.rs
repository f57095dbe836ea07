//! Latest market view fed by the kline and book-ticker streams.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::collections::VecDeque;
use tokio::sync::RwLock;

use crate::domain::{BookTicker, Kline, PriceStats};

/// Read-only copy handed to strategies
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MarketSnapshot {
    pub last_price: Decimal,
    pub bid: Decimal,
    pub ask: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    /// Closes of finished candles, oldest first
    pub closes: Vec<Decimal>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl MarketSnapshot {
    /// Price to buy at: best ask, else last trade.
    pub fn buy_price(&self) -> Decimal {
        if self.ask > Decimal::ZERO {
            self.ask
        } else {
            self.last_price
        }
    }

    /// Price to sell at: best bid, else last trade.
    pub fn sell_price(&self) -> Decimal {
        if self.bid > Decimal::ZERO {
            self.bid
        } else {
            self.last_price
        }
    }
}

#[derive(Debug, Default)]
struct MarketInner {
    last_price: Decimal,
    bid: Decimal,
    ask: Decimal,
    high: Decimal,
    low: Decimal,
    closes: VecDeque<Decimal>,
    /// Open time of the last finished candle, to ignore replays
    last_close_time: Option<i64>,
    updated_at: Option<DateTime<Utc>>,
}

pub struct MarketState {
    history_limit: usize,
    inner: RwLock<MarketInner>,
}

impl MarketState {
    pub fn new(history_limit: usize) -> Self {
        Self {
            history_limit: history_limit.max(1),
            inner: RwLock::new(MarketInner::default()),
        }
    }

    /// High price is only set once stats have been loaded.
    pub async fn is_bootstrapped(&self) -> bool {
        self.inner.read().await.high > Decimal::ZERO
    }

    /// Seed from historical candles and rolling stats.
    pub async fn bootstrap(&self, candles: &[Kline], stats: &PriceStats) {
        let mut inner = self.inner.write().await;
        inner.closes.clear();
        inner.last_close_time = None;
        for candle in candles {
            Self::push_close(&mut inner, self.history_limit, candle);
        }
        inner.high = stats.high_price;
        inner.low = stats.low_price;
        inner.last_price = stats.last_price;
        inner.updated_at = Some(Utc::now());
    }

    pub async fn apply_kline(&self, kline: &Kline) {
        let mut inner = self.inner.write().await;
        inner.last_price = kline.close;
        if kline.high > inner.high {
            inner.high = kline.high;
        }
        if inner.low.is_zero() || kline.low < inner.low {
            inner.low = kline.low;
        }
        if kline.is_final {
            Self::push_close(&mut inner, self.history_limit, kline);
        }
        inner.updated_at = Some(Utc::now());
    }

    pub async fn apply_book_ticker(&self, ticker: &BookTicker) {
        let mut inner = self.inner.write().await;
        inner.bid = ticker.bid_price;
        inner.ask = ticker.ask_price;
        if inner.last_price.is_zero() {
            inner.last_price = ticker.mid();
        }
        inner.updated_at = Some(Utc::now());
    }

    pub async fn snapshot(&self) -> MarketSnapshot {
        let inner = self.inner.read().await;
        MarketSnapshot {
            last_price: inner.last_price,
            bid: inner.bid,
            ask: inner.ask,
            high: inner.high,
            low: inner.low,
            closes: inner.closes.iter().copied().collect(),
            updated_at: inner.updated_at,
        }
    }

    fn push_close(inner: &mut MarketInner, limit: usize, kline: &Kline) {
        if inner
            .last_close_time
            .is_some_and(|seen| kline.open_time <= seen)
        {
            return;
        }
        inner.closes.push_back(kline.close);
        while inner.closes.len() > limit {
            inner.closes.pop_front();
        }
        inner.last_close_time = Some(kline.open_time);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn candle(open_time: i64, close: Decimal, is_final: bool) -> Kline {
        Kline {
            open_time,
            open: close,
            high: close + dec!(10),
            low: close - dec!(10),
            close,
            volume: dec!(1),
            is_final,
        }
    }

    #[tokio::test]
    async fn history_is_bounded_and_ignores_replays() {
        let market = MarketState::new(3);
        let candles: Vec<_> = (0..5)
            .map(|i| candle(i, Decimal::from(100 + i), true))
            .collect();
        market
            .bootstrap(
                &candles,
                &PriceStats {
                    high_price: dec!(120),
                    low_price: dec!(90),
                    last_price: dec!(104),
                },
            )
            .await;
        assert!(market.is_bootstrapped().await);

        // replay of an already seen candle and an open candle
        market.apply_kline(&candle(4, dec!(104), true)).await;
        market.apply_kline(&candle(5, dec!(105), false)).await;

        let snap = market.snapshot().await;
        assert_eq!(snap.closes, vec![dec!(102), dec!(103), dec!(104)]);
        assert_eq!(snap.last_price, dec!(105));

        market.apply_kline(&candle(5, dec!(106), true)).await;
        let snap = market.snapshot().await;
        assert_eq!(snap.closes, vec![dec!(103), dec!(104), dec!(106)]);
    }

    #[tokio::test]
    async fn prices_prefer_the_book() {
        let market = MarketState::new(10);
        assert_eq!(market.snapshot().await.buy_price(), Decimal::ZERO);

        market
            .apply_book_ticker(&BookTicker {
                bid_price: dec!(99),
                bid_qty: dec!(1),
                ask_price: dec!(101),
                ask_qty: dec!(1),
            })
            .await;
        let snap = market.snapshot().await;
        assert_eq!(snap.buy_price(), dec!(101));
        assert_eq!(snap.sell_price(), dec!(99));
        assert_eq!(snap.last_price, dec!(100));
    }
}
