//! Trading decision seam
//!
//! Streams ask the strategy for at most one decision per market tick and
//! hand the result to the order lifecycle.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use rust_decimal::Decimal;
use tracing::debug;

use super::market::MarketSnapshot;
use crate::config::TradingConfig;
use crate::domain::{SessionState, ThreadTransaction};

/// What to do on this tick
#[derive(Debug, Clone, PartialEq)]
pub enum Decision {
    Hold,
    Buy {
        price: Decimal,
        forced: bool,
    },
    Sell {
        position: ThreadTransaction,
        price: Decimal,
        forced: bool,
    },
}

/// Everything a strategy may look at
#[derive(Debug, Clone)]
pub struct StrategyInput<'a> {
    pub market: &'a MarketSnapshot,
    pub session: &'a SessionState,
    pub positions: &'a [ThreadTransaction],
    pub trading: &'a TradingConfig,
    pub force_buy: bool,
    pub force_sell: bool,
    pub now: DateTime<Utc>,
}

pub trait Strategy: Send + Sync {
    fn name(&self) -> &str;

    fn decide(&self, input: &StrategyInput<'_>) -> Decision;
}

/// Executes operator commands and sells positions that reached their profit target.
///
/// No discretionary buys: a buy only happens on a forced command.
#[derive(Debug, Default, Clone)]
pub struct ProfitTargetStrategy;

impl ProfitTargetStrategy {
    fn waited(since: Option<DateTime<Utc>>, secs: u64, now: DateTime<Utc>) -> bool {
        match since {
            Some(at) => now - at >= ChronoDuration::seconds(secs as i64),
            None => true,
        }
    }

    /// Cheapest position first: the one closest to its target.
    fn cheapest(positions: &[ThreadTransaction]) -> Option<&ThreadTransaction> {
        positions.iter().min_by(|a, b| a.price.cmp(&b.price))
    }
}

impl Strategy for ProfitTargetStrategy {
    fn name(&self) -> &str {
        "profit-target"
    }

    fn decide(&self, input: &StrategyInput<'_>) -> Decision {
        let trading = input.trading;
        let bid = input.market.sell_price();
        let ask = input.market.buy_price();

        if input.force_sell && bid > Decimal::ZERO {
            if let Some(position) = Self::cheapest(input.positions) {
                return Decision::Sell {
                    position: position.clone(),
                    price: bid,
                    forced: true,
                };
            }
        }

        if input.force_buy && ask > Decimal::ZERO {
            let spendable = input.session.funds - trading.symbol_fiat_stash;
            if spendable < trading.buy_quantity_fiat {
                debug!(%spendable, "Forced buy waiting for funds");
            } else if !Self::waited(input.session.last_buy_at, trading.buy_wait_secs, input.now) {
                debug!("Forced buy waiting for buy_wait");
            } else {
                return Decision::Buy {
                    price: ask,
                    forced: true,
                };
            }
        }

        if bid.is_zero()
            || !Self::waited(
                input.session.last_sell_canceled_at,
                trading.sell_wait_after_cancel_secs,
                input.now,
            )
        {
            return Decision::Hold;
        }

        input
            .positions
            .iter()
            .filter(|p| bid >= p.target_price(trading.profit_min, trading.exchange_commission))
            .min_by(|a, b| a.price.cmp(&b.price))
            .map(|position| Decision::Sell {
                position: position.clone(),
                price: bid,
                forced: false,
            })
            .unwrap_or(Decision::Hold)
    }
}
