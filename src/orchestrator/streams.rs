//! Long-lived stream consumers
//!
//! Each consumer runs until its connection ends or the shared stop flag is
//! raised. A consumer that ends on its own raises the flag, so the other
//! consumers wind down and the main loop can restart all of them together.

use futures::StreamExt;
use rust_decimal::Decimal;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use super::context::TradingContext;
use super::strategy::{Decision, StrategyInput};
use crate::domain::{BookTicker, ThreadTransaction, UserDataEvent};
use crate::error::{PumpError, Result};
use crate::exchange::EventStream;
use crate::lifecycle::{BuyOutcome, SellOutcome};

/// Stop flag shared by the streaming tasks of one main-loop iteration
#[derive(Debug, Clone)]
pub struct StreamStop {
    tx: Arc<watch::Sender<bool>>,
}

impl Default for StreamStop {
    fn default() -> Self {
        Self::new()
    }
}

impl StreamStop {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    pub fn raise(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_raised(&self) -> bool {
        *self.tx.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.tx.subscribe()
    }
}

/// Pull the next item, or `None` when the stream ended or stop was raised.
async fn next_or_stop<T>(
    stream: &mut EventStream<T>,
    stop: &mut watch::Receiver<bool>,
) -> Option<crate::exchange::ExchangeResult<T>> {
    loop {
        if *stop.borrow_and_update() {
            return None;
        }
        tokio::select! {
            item = stream.next() => return item,
            changed = stop.changed() => {
                if changed.is_err() {
                    return None;
                }
            }
        }
    }
}

pub async fn run_kline_consumer(ctx: Arc<TradingContext>, stop: StreamStop) {
    let interval = ctx.config.read().await.exchange.kline_interval.clone();
    let symbol = ctx.session.symbol().to_string();
    let mut rx = stop.subscribe();

    match ctx.exchange.open_kline_stream(&symbol, &interval).await {
        Ok(mut stream) => {
            info!(%symbol, %interval, "Kline stream connected");
            while let Some(item) = next_or_stop(&mut stream, &mut rx).await {
                match item {
                    Ok(kline) => ctx.market.apply_kline(&kline).await,
                    Err(e) => debug!("Kline stream item skipped: {}", e),
                }
            }
        }
        Err(e) => warn!(%symbol, "Kline stream failed to open: {}", e),
    }

    info!(%symbol, "Kline stream ended");
    stop.raise();
}

pub async fn run_user_data_consumer(ctx: Arc<TradingContext>, stop: StreamStop) {
    let fiat = ctx.session.symbol_fiat().to_string();
    let mut rx = stop.subscribe();

    let stream = match ctx.exchange.get_listen_key().await {
        Ok(key) => {
            ctx.session.set_listen_key(Some(key.clone())).await;
            ctx.exchange.open_user_data_stream(&key).await
        }
        Err(e) => Err(e),
    };

    match stream {
        Ok(mut stream) => {
            info!("User data stream connected");
            while let Some(item) = next_or_stop(&mut stream, &mut rx).await {
                match item {
                    Ok(UserDataEvent::AccountUpdate { balances }) => {
                        if let Some(balance) = balances.iter().find(|b| b.asset == fiat) {
                            debug!(funds = %balance.free, "Funds updated");
                            ctx.session.set_funds(balance.free).await;
                        }
                    }
                    Ok(UserDataEvent::ExecutionReport {
                        order_id, status, ..
                    }) => {
                        debug!(order_id, %status, "Execution report");
                    }
                    Ok(UserDataEvent::Other(kind)) => debug!(%kind, "User data event ignored"),
                    Err(e) => debug!("User data item skipped: {}", e),
                }
            }
        }
        Err(e) => warn!("User data stream failed to open: {}", e),
    }

    info!("User data stream ended");
    stop.raise();
}

pub async fn run_book_ticker_consumer(ctx: Arc<TradingContext>, stop: StreamStop) {
    let symbol = ctx.session.symbol().to_string();
    let mut rx = stop.subscribe();

    match ctx.exchange.open_book_ticker_stream(&symbol).await {
        Ok(mut stream) => {
            info!(%symbol, "Book ticker stream connected");
            while let Some(item) = next_or_stop(&mut stream, &mut rx).await {
                let ticker = match item {
                    Ok(ticker) => ticker,
                    Err(e) => {
                        debug!("Book ticker item skipped: {}", e);
                        continue;
                    }
                };
                if let Err(e) = on_book_ticker(&ctx, &ticker).await {
                    if ctx.escalate(&e) {
                        break;
                    }
                    debug!("Tick not acted on: {}", e);
                }
            }
        }
        Err(e) => warn!(%symbol, "Book ticker stream failed to open: {}", e),
    }

    info!(%symbol, "Book ticker stream ended");
    stop.raise();
}

/// Update the market view and act on the strategy's decision.
pub async fn on_book_ticker(ctx: &TradingContext, ticker: &BookTicker) -> Result<()> {
    ctx.market.apply_book_ticker(ticker).await;
    if ctx.shutdown.is_shutdown_requested() || ctx.session.busy().is_busy() {
        return Ok(());
    }

    let config = ctx.config().await;
    let market = ctx.market.snapshot().await;
    let session = ctx.session.snapshot().await;
    let positions = ctx.lifecycle.sellable_positions().await?;

    let decision = ctx.strategy.decide(&StrategyInput {
        market: &market,
        session: &session,
        positions: &positions,
        trading: &config.trading,
        force_buy: ctx.session.force_buy_pending(),
        force_sell: ctx.session.force_sell_pending(),
        now: chrono::Utc::now(),
    });

    match decision {
        Decision::Hold => Ok(()),
        Decision::Buy { price, forced } => execute_buy(ctx, price, forced).await,
        Decision::Sell {
            position,
            price,
            forced,
        } => execute_sell(ctx, &position, price, forced).await,
    }
}

/// A forced command rejected by the busy flag stays pending for the next tick.
async fn execute_buy(ctx: &TradingContext, price: Decimal, forced: bool) -> Result<()> {
    if forced {
        ctx.session.take_force_buy();
    }
    match ctx.lifecycle.buy(price).await {
        Ok(BuyOutcome::Settled(_)) => {
            refresh_thread_count(ctx).await;
            Ok(())
        }
        Ok(outcome) => {
            debug!(?outcome, "Buy finished");
            Ok(())
        }
        Err(PumpError::Busy) | Err(PumpError::ShuttingDown) => {
            if forced {
                ctx.session.request_force_buy();
            }
            Ok(())
        }
        Err(e) => Err(e),
    }
}

async fn execute_sell(
    ctx: &TradingContext,
    position: &ThreadTransaction,
    price: Decimal,
    forced: bool,
) -> Result<()> {
    if forced {
        ctx.session.take_force_sell();
    }
    match ctx.lifecycle.sell(position, price).await {
        Ok(SellOutcome::Sold(_)) => {
            refresh_thread_count(ctx).await;
            Ok(())
        }
        Ok(outcome) => {
            debug!(?outcome, "Sell finished");
            Ok(())
        }
        Err(PumpError::Busy) | Err(PumpError::ShuttingDown) => {
            if forced {
                ctx.session.request_force_sell();
            }
            Ok(())
        }
        Err(e) => Err(e),
    }
}

async fn refresh_thread_count(ctx: &TradingContext) {
    match ctx.store.count_open_threads(ctx.session.thread_id()).await {
        Ok(threads) => {
            let sells = ctx.session.snapshot().await.sell_count;
            ctx.session.set_counts(threads, sells).await;
        }
        Err(e) => warn!("Failed to refresh thread count: {}", e),
    }
}
