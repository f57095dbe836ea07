use std::sync::Arc;

use crate::config::AppConfig;
use crate::error::{PumpError, Result};

use super::{parse_exchange_kind, BinanceClient, ExchangeAdapter, ExchangeKind};

/// Create the runtime exchange adapter from `AppConfig`.
pub fn build_exchange_adapter(app_config: &AppConfig) -> Result<Arc<dyn ExchangeAdapter>> {
    let exchange = parse_exchange_kind(&app_config.exchange.name)?;
    build_exchange_adapter_for(exchange, app_config)
}

/// Create the exchange adapter for an explicit exchange kind.
///
/// Credentials are only required outside dry-run; a dry run still reads market
/// data, which is public.
pub fn build_exchange_adapter_for(
    exchange: ExchangeKind,
    app_config: &AppConfig,
) -> Result<Arc<dyn ExchangeAdapter>> {
    match exchange {
        ExchangeKind::Binance => {
            let creds_missing = app_config.exchange.api_key.is_empty()
                || app_config.exchange.secret_key.is_empty();
            if creds_missing && !app_config.trading.dry_run {
                return Err(PumpError::Validation(
                    "exchange.api_key and exchange.secret_key are required (PUMP_EXCHANGE__API_KEY / PUMP_EXCHANGE__SECRET_KEY)"
                        .to_string(),
                ));
            }
            Ok(Arc::new(BinanceClient::new(&app_config.exchange)?))
        }
    }
}
