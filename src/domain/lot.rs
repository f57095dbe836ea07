use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};

/// Exchange lot-size rule for a symbol
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LotSize {
    pub min_qty: Decimal,
    pub max_qty: Decimal,
    /// Quantity granularity; every order quantity is a multiple of it
    pub step_size: Decimal,
}

impl LotSize {
    /// Round `raw` to the nearest multiple of the step (ties to even).
    ///
    /// A non-positive step leaves the quantity untouched.
    pub fn correct(&self, raw: Decimal) -> Decimal {
        if self.step_size <= Decimal::ZERO {
            return raw;
        }
        let steps = (raw / self.step_size)
            .round_dp_with_strategy(0, RoundingStrategy::MidpointNearestEven);
        (steps * self.step_size).normalize()
    }

    /// Quantity to buy with `fiat_amount` at `price`.
    pub fn buy_quantity(&self, fiat_amount: Decimal, price: Decimal) -> Decimal {
        if price <= Decimal::ZERO {
            return Decimal::ZERO;
        }
        self.correct(fiat_amount / price)
    }

    /// Quantity to sell when closing a buy that executed `executed_qty`.
    pub fn sell_quantity(&self, executed_qty: Decimal) -> Decimal {
        self.correct(executed_qty)
    }

    pub fn is_tradable(&self, quantity: Decimal) -> bool {
        quantity > Decimal::ZERO
            && quantity >= self.min_qty
            && (self.max_qty.is_zero() || quantity <= self.max_qty)
    }
}

impl Default for LotSize {
    fn default() -> Self {
        Self {
            min_qty: Decimal::ZERO,
            max_qty: Decimal::ZERO,
            step_size: Decimal::ZERO,
        }
    }
}
