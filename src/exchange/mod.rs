pub mod binance;
pub mod factory;
mod traits;

pub use binance::BinanceClient;
pub use factory::{build_exchange_adapter, build_exchange_adapter_for};
pub use traits::{
    parse_exchange_kind, EventStream, ExchangeAdapter, ExchangeKind, ExchangeResult,
};

#[cfg(test)]
pub use traits::MockExchangeAdapter;
