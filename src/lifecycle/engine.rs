use chrono::{Duration as ChronoDuration, Utc};
use rust_decimal::Decimal;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, info, instrument, warn};

use crate::adapters::NotificationSink;
use crate::config::{AppConfig, SharedConfig};
use crate::domain::{
    Order, OrderRecord, OrderSide, OrderStatus, Session, ThreadTransaction, TradeEvent,
};
use crate::error::{PumpError, RaceCondition, Result};
use crate::exchange::ExchangeAdapter;
use crate::persistence::PersistenceStore;

/// Non-terminal sell polls before the cancel request goes out.
pub const SELL_CANCEL_ITERATION: u32 = 9;

/// How a buy ended
#[derive(Debug, Clone, PartialEq)]
pub enum BuyOutcome {
    /// Dry-run mode: the exchange was not contacted
    DryRun,
    /// Corrected quantity was zero or outside the lot bounds
    Skipped,
    /// Submission failed without an order
    Indeterminate,
    /// Filled (fully or partially); the open position was recorded
    Settled(ThreadTransaction),
    Canceled(Order),
    /// Polling stopped on an exchange error; the order stays pending in the store
    Unresolved(Order),
}

/// How a sell ended
#[derive(Debug, Clone, PartialEq)]
pub enum SellOutcome {
    DryRun,
    /// Quantity not tradable, or a pending sell already works this position
    Skipped,
    Indeterminate,
    /// Filled; the originating position was closed
    Sold(Order),
    /// Canceled; the originating position stays open
    Canceled(Order),
    /// Reconciliation gave up for this cycle; the order stays pending in the store
    Abandoned(Order),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SellResolution {
    Sold,
    Canceled,
    Abandoned,
}

/// Drives buy and sell orders to a terminal outcome.
///
/// Every operation holds the session's busy flag for its whole duration, so
/// teardown cannot start while an order is in flight. Store writes made during
/// a transition fail with [`PumpError::Fatal`].
pub struct OrderLifecycle {
    exchange: Arc<dyn ExchangeAdapter>,
    store: Arc<dyn PersistenceStore>,
    notifier: Arc<dyn NotificationSink>,
    session: Arc<Session>,
    config: SharedConfig,
}

impl OrderLifecycle {
    pub fn new(
        exchange: Arc<dyn ExchangeAdapter>,
        store: Arc<dyn PersistenceStore>,
        notifier: Arc<dyn NotificationSink>,
        session: Arc<Session>,
        config: SharedConfig,
    ) -> Self {
        Self {
            exchange,
            store,
            notifier,
            session,
            config,
        }
    }

    pub fn session(&self) -> &Arc<Session> {
        &self.session
    }

    async fn emit(&self, event: TradeEvent) {
        info!(thread_id = %self.session.thread_id(), event = event.name(), "{}", event.summary());
        self.notifier.notify(&event).await;
    }

    async fn record_for(
        &self,
        order: &Order,
        price: Decimal,
        source_order_id: Option<i64>,
    ) -> OrderRecord {
        OrderRecord {
            order: order.clone(),
            thread_id: self.session.thread_id().to_string(),
            cycle_id: self.session.cycle_id().await,
            price,
            source_order_id,
            created_at: Utc::now(),
        }
    }

    /// Buy `buy_quantity_fiat` worth of the session symbol at `market_price`.
    #[instrument(skip(self), fields(thread_id = %self.session.thread_id()))]
    pub async fn buy(&self, market_price: Decimal) -> Result<BuyOutcome> {
        let _busy = self.session.busy().acquire()?;
        let config = self.config.read().await.clone();
        let symbol = self.session.symbol();

        if config.trading.dry_run {
            info!(price = %market_price, "Dry run: buy not submitted");
            return Ok(BuyOutcome::DryRun);
        }

        let lot = self.session.lot_size().await;
        let quantity = lot.buy_quantity(config.trading.buy_quantity_fiat, market_price);
        if !lot.is_tradable(quantity) {
            warn!(%quantity, price = %market_price, "Buy quantity not tradable after correction");
            return Ok(BuyOutcome::Skipped);
        }

        let mut order = match self.exchange.submit_buy(symbol, quantity).await {
            Ok(order) if order.order_id > 0 => order,
            Ok(order) => {
                warn!(?order, "Buy submission returned no usable order");
                return Ok(BuyOutcome::Indeterminate);
            }
            Err(e) => {
                warn!(%quantity, "Buy submission failed: {}", e);
                return Ok(BuyOutcome::Indeterminate);
            }
        };
        debug!(order_id = order.order_id, status = %order.status, "Buy submitted");

        let price = price_or(&order, market_price);
        let mut record = self.record_for(&order, price, None).await;
        self.store
            .save_order(&record)
            .await
            .map_err(|e| PumpError::fatal("save buy order", e))?;

        self.session.record_buy(Utc::now()).await;

        if order.status == OrderStatus::New {
            let poll = Duration::from_millis(config.timers.buy_poll_ms);
            loop {
                sleep(poll).await;
                match self.exchange.get_order(symbol, order.order_id).await {
                    Ok(fresh) => {
                        order.absorb(&fresh);
                        if order.status != OrderStatus::New {
                            break;
                        }
                    }
                    Err(e) if e.is_transport() => {
                        debug!(order_id = order.order_id, "Buy poll transport error, retrying: {}", e);
                    }
                    Err(e) => {
                        warn!(order_id = order.order_id, "Buy poll aborted: {}", e);
                        return Ok(BuyOutcome::Unresolved(order));
                    }
                }
            }

            record.order = order.clone();
            record.price = price_or(&order, market_price);
            self.store
                .update_order(&record)
                .await
                .map_err(|e| PumpError::fatal("update buy order", e))?;
        }

        match order.status {
            OrderStatus::Filled | OrderStatus::PartiallyFilled => {
                let tx = self.settle_buy(&order, record.cycle_id.clone()).await?;
                Ok(BuyOutcome::Settled(tx))
            }
            OrderStatus::Canceled => {
                self.emit(TradeEvent::Canceled {
                    thread_id: self.session.thread_id().to_string(),
                    order_id: order.order_id,
                    source_order_id: None,
                })
                .await;
                Ok(BuyOutcome::Canceled(order))
            }
            OrderStatus::New => Ok(BuyOutcome::Unresolved(order)),
        }
    }

    async fn settle_buy(&self, order: &Order, cycle_id: String) -> Result<ThreadTransaction> {
        let tx = open_position(self.session.thread_id(), cycle_id, order);
        self.store
            .save_thread_transaction(&tx)
            .await
            .map_err(|e| PumpError::fatal("save thread transaction", e))?;

        self.emit(TradeEvent::Buy {
            thread_id: tx.thread_id.clone(),
            order_id: order.order_id,
            price: tx.price,
            quantity: order.executed_qty,
        })
        .await;
        Ok(tx)
    }

    /// Close the open position `position` with a market sell.
    #[instrument(skip(self, position), fields(thread_id = %self.session.thread_id(), source_order_id = position.order_id))]
    pub async fn sell(&self, position: &ThreadTransaction, market_price: Decimal) -> Result<SellOutcome> {
        let _busy = self.session.busy().acquire()?;
        let config = self.config.read().await.clone();
        let symbol = self.session.symbol();

        if config.trading.dry_run {
            info!(price = %market_price, "Dry run: sell not submitted");
            return Ok(SellOutcome::DryRun);
        }

        if self.has_live_sell(position.order_id).await? {
            warn!("Position already has a pending sell, not selling it again");
            return Ok(SellOutcome::Skipped);
        }

        let lot = self.session.lot_size().await;
        let quantity = lot.sell_quantity(position.executed_qty);
        if !lot.is_tradable(quantity) {
            warn!(%quantity, "Sell quantity not tradable after correction");
            return Ok(SellOutcome::Skipped);
        }

        let mut order = match self.exchange.submit_sell(symbol, quantity).await {
            Ok(order) if order.order_id > 0 => order,
            Ok(order) => {
                warn!(?order, "Sell submission returned no usable order");
                return Ok(SellOutcome::Indeterminate);
            }
            Err(e) => {
                warn!(%quantity, "Sell submission failed: {}", e);
                return Ok(SellOutcome::Indeterminate);
            }
        };
        debug!(order_id = order.order_id, status = %order.status, "Sell submitted");

        let mut record = self
            .record_for(&order, price_or(&order, market_price), Some(position.order_id))
            .await;
        self.store
            .save_order(&record)
            .await
            .map_err(|e| PumpError::fatal("save sell order", e))?;

        let resolution = match order.status {
            OrderStatus::Filled => SellResolution::Sold,
            OrderStatus::Canceled => SellResolution::Canceled,
            OrderStatus::New | OrderStatus::PartiallyFilled => {
                sleep(Duration::from_millis(config.timers.sell_settle_delay_ms)).await;
                self.reconcile_sell(&mut order, &config).await?
            }
        };

        if resolution == SellResolution::Abandoned {
            warn!(
                order_id = order.order_id,
                status = %order.status,
                "Sell reconciliation abandoned, left for the pending-order sweep"
            );
            return Ok(SellOutcome::Abandoned(order));
        }

        record.order = order.clone();
        record.price = price_or(&order, market_price);
        self.store
            .update_order(&record)
            .await
            .map_err(|e| PumpError::fatal("update sell order", e))?;

        match resolution {
            SellResolution::Sold => {
                self.store
                    .delete_thread_transaction_by_order_id(position.order_id)
                    .await
                    .map_err(|e| PumpError::fatal("delete thread transaction", e))?;

                self.emit(TradeEvent::Sell {
                    thread_id: self.session.thread_id().to_string(),
                    order_id: order.order_id,
                    source_order_id: position.order_id,
                    price: record.price,
                    quantity: order.executed_qty,
                })
                .await;
                self.refresh_sell_count(&config).await;
                Ok(SellOutcome::Sold(order))
            }
            _ => {
                self.emit(TradeEvent::Canceled {
                    thread_id: self.session.thread_id().to_string(),
                    order_id: order.order_id,
                    source_order_id: Some(position.order_id),
                })
                .await;
                Ok(SellOutcome::Canceled(order))
            }
        }
    }

    /// Open positions of this identity that no pending sell is working on.
    pub async fn sellable_positions(&self) -> Result<Vec<ThreadTransaction>> {
        let thread_id = self.session.thread_id();
        let selling = self.pending_sell_sources().await?;
        let positions = self.store.list_open_transactions_by_thread(thread_id).await?;
        Ok(positions
            .into_iter()
            .filter(|p| !selling.contains(&p.order_id))
            .collect())
    }

    async fn pending_sell_sources(&self) -> Result<Vec<i64>> {
        Ok(self
            .store
            .list_pending_orders(self.session.thread_id())
            .await?
            .into_iter()
            .filter(|r| r.order.side == OrderSide::Sell)
            .filter_map(|r| r.source_order_id)
            .collect())
    }

    async fn has_live_sell(&self, source_order_id: i64) -> Result<bool> {
        Ok(self.pending_sell_sources().await?.contains(&source_order_id))
    }

    /// Poll a pending sell; cancel it once the wait budget is spent.
    async fn reconcile_sell(&self, order: &mut Order, config: &AppConfig) -> Result<SellResolution> {
        let symbol = self.session.symbol();
        let tick = config.trading.sell_cancel_tick();
        let mut iteration = 0;

        loop {
            let fresh = self
                .exchange
                .get_order(symbol, order.order_id)
                .await
                .map_err(|e| PumpError::fatal("poll sell order", e))?;
            order.absorb(&fresh);

            match order.status {
                OrderStatus::Filled => return Ok(SellResolution::Sold),
                OrderStatus::Canceled => return Ok(SellResolution::Canceled),
                OrderStatus::New | OrderStatus::PartiallyFilled => {}
            }

            iteration += 1;
            if iteration == SELL_CANCEL_ITERATION {
                return self.cancel_pending_sell(order).await;
            }

            sleep(tick).await;
        }
    }

    async fn cancel_pending_sell(&self, order: &mut Order) -> Result<SellResolution> {
        let symbol = self.session.symbol();
        info!(order_id = order.order_id, "Canceling pending sell");

        match self.exchange.cancel_order(symbol, order.order_id).await {
            Ok(response) if response.status == OrderStatus::Canceled => {
                self.session.record_sell_canceled(Utc::now()).await;
                let fresh = self
                    .exchange
                    .get_order(symbol, order.order_id)
                    .await
                    .map_err(|e| PumpError::fatal("fetch canceled sell", e))?;
                order.absorb(&fresh);
                order.absorb(&response);
                Ok(SellResolution::Canceled)
            }
            Ok(response) => {
                self.emit(TradeEvent::CancelFailed {
                    thread_id: self.session.thread_id().to_string(),
                    order_id: order.order_id,
                    reason: format!("cancel returned {}", response.status),
                })
                .await;
                Ok(SellResolution::Abandoned)
            }
            Err(e) => match e.race_condition() {
                Some(race) => {
                    let reason = match race {
                        RaceCondition::AlreadyFilled => "already filled",
                        RaceCondition::InsufficientBalance => "balance already consumed",
                    };
                    info!(order_id = order.order_id, "Cancel lost the race ({}), re-fetching", reason);
                    let fresh = self
                        .exchange
                        .get_order(symbol, order.order_id)
                        .await
                        .map_err(|e| PumpError::fatal("fetch raced sell", e))?;
                    order.absorb(&fresh);
                    Ok(match order.status {
                        OrderStatus::Filled => SellResolution::Sold,
                        OrderStatus::Canceled => SellResolution::Canceled,
                        _ => SellResolution::Abandoned,
                    })
                }
                None => {
                    warn!(order_id = order.order_id, "Cancel failed: {}", e);
                    Ok(SellResolution::Abandoned)
                }
            },
        }
    }

    async fn refresh_sell_count(&self, config: &AppConfig) {
        let since = Utc::now() - ChronoDuration::minutes(config.timers.sell_count_window_mins);
        match self
            .store
            .count_recent_orders_by_side(self.session.thread_id(), OrderSide::Sell, since)
            .await
        {
            Ok(count) => self.session.set_sell_count(count).await,
            Err(e) => warn!("Failed to refresh sell count: {}", e),
        }
    }
}

/// Average fill price, or `fallback` while nothing executed.
fn price_or(order: &Order, fallback: Decimal) -> Decimal {
    let price = order.effective_price();
    if price.is_zero() {
        fallback
    } else {
        price
    }
}

/// Open position created by a filled buy.
pub fn open_position(thread_id: &str, cycle_id: String, order: &Order) -> ThreadTransaction {
    ThreadTransaction {
        thread_id: thread_id.to_string(),
        cycle_id,
        order_id: order.order_id,
        cumulative_quote_qty: order.cumulative_quote_qty,
        price: order.effective_price(),
        executed_qty: order.executed_qty,
        created_at: Utc::now(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::NullSink;
    use crate::domain::LotSize;
    use crate::error::ExchangeError;
    use crate::exchange::MockExchangeAdapter;
    use crate::persistence::MemoryStore;
    use rust_decimal_macros::dec;
    use tokio::sync::RwLock;

    fn order(order_id: i64, side: OrderSide, status: OrderStatus) -> Order {
        let filled = status == OrderStatus::Filled;
        Order {
            order_id,
            client_order_id: format!("c-{order_id}"),
            symbol: "BTCUSDT".to_string(),
            side,
            quantity: dec!(0.01),
            cumulative_quote_qty: if filled { dec!(500) } else { Decimal::ZERO },
            executed_qty: if filled { dec!(0.01) } else { Decimal::ZERO },
            status,
            transact_time: 1,
        }
    }

    async fn engine(mock: MockExchangeAdapter, store: Arc<MemoryStore>) -> OrderLifecycle {
        let session = Arc::new(Session::new(
            "t1".to_string(),
            "BTCUSDT".to_string(),
            "USDT".to_string(),
        ));
        session
            .set_lot_size(LotSize {
                min_qty: dec!(0.00001),
                max_qty: dec!(9000),
                step_size: dec!(0.00001),
            })
            .await;
        let mut config = AppConfig::default();
        config.trading.buy_quantity_fiat = dec!(500);
        OrderLifecycle::new(
            Arc::new(mock),
            store,
            Arc::new(NullSink),
            session,
            Arc::new(RwLock::new(config)),
        )
    }

    #[tokio::test]
    async fn dry_run_never_contacts_exchange() {
        let mock = MockExchangeAdapter::new();
        let store = Arc::new(MemoryStore::new());
        let lifecycle = engine(mock, store).await;
        lifecycle.config.write().await.trading.dry_run = true;

        assert_eq!(lifecycle.buy(dec!(50000)).await.unwrap(), BuyOutcome::DryRun);
        assert!(!lifecycle.session().busy().is_busy());
    }

    #[tokio::test]
    async fn failed_submission_is_indeterminate() {
        let mut mock = MockExchangeAdapter::new();
        mock.expect_submit_buy()
            .times(1)
            .returning(|_, _| Err(ExchangeError::Transport("timeout".to_string())));
        let store = Arc::new(MemoryStore::new());
        let lifecycle = engine(mock, store.clone()).await;

        assert_eq!(
            lifecycle.buy(dec!(50000)).await.unwrap(),
            BuyOutcome::Indeterminate
        );
        assert_eq!(store.transaction_count().await, 0);
        assert!(!lifecycle.session().busy().is_busy());
    }

    #[tokio::test]
    async fn immediately_filled_buy_settles() {
        let mut mock = MockExchangeAdapter::new();
        mock.expect_submit_buy()
            .withf(|symbol, qty| symbol == "BTCUSDT" && *qty == dec!(0.01))
            .times(1)
            .returning(|_, _| Ok(order(11, OrderSide::Buy, OrderStatus::Filled)));
        let store = Arc::new(MemoryStore::new());
        let lifecycle = engine(mock, store.clone()).await;

        match lifecycle.buy(dec!(50000)).await.unwrap() {
            BuyOutcome::Settled(tx) => {
                assert_eq!(tx.order_id, 11);
                assert_eq!(tx.price, dec!(50000));
            }
            other => panic!("unexpected outcome {other:?}"),
        }
        assert!(store.find_thread_transaction(11).await.unwrap().is_some());
        assert!(lifecycle.session().snapshot().await.last_buy_at.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn buy_poll_aborts_on_api_error() {
        let mut mock = MockExchangeAdapter::new();
        mock.expect_submit_buy()
            .returning(|_, _| Ok(order(12, OrderSide::Buy, OrderStatus::New)));
        mock.expect_get_order()
            .times(1)
            .returning(|_, _| Err(ExchangeError::api(-1021, "timestamp outside window")));
        let store = Arc::new(MemoryStore::new());
        let lifecycle = engine(mock, store.clone()).await;

        let outcome = lifecycle.buy(dec!(50000)).await.unwrap();
        assert!(matches!(outcome, BuyOutcome::Unresolved(_)));
        assert_eq!(store.order(12).await.unwrap().order.status, OrderStatus::New);
        assert_eq!(store.transaction_count().await, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn sell_poll_error_is_fatal_and_releases_busy() {
        let mut mock = MockExchangeAdapter::new();
        mock.expect_submit_sell()
            .returning(|_, _| Ok(order(21, OrderSide::Sell, OrderStatus::New)));
        mock.expect_get_order()
            .returning(|_, _| Err(ExchangeError::Transport("reset".to_string())));
        let store = Arc::new(MemoryStore::new());
        let lifecycle = engine(mock, store).await;
        let position = open_position("t1", "c1".to_string(), &order(10, OrderSide::Buy, OrderStatus::Filled));

        let err = lifecycle.sell(&position, dec!(51000)).await.unwrap_err();
        assert!(err.is_fatal());
        assert!(!lifecycle.session().busy().is_busy());
    }

    #[tokio::test(start_paused = true)]
    async fn unrecognized_cancel_error_abandons_sell() {
        let mut mock = MockExchangeAdapter::new();
        mock.expect_submit_sell()
            .returning(|_, _| Ok(order(22, OrderSide::Sell, OrderStatus::New)));
        mock.expect_get_order()
            .times(SELL_CANCEL_ITERATION as usize)
            .returning(|_, _| Ok(order(22, OrderSide::Sell, OrderStatus::New)));
        mock.expect_cancel_order()
            .times(1)
            .returning(|_, _| Err(ExchangeError::api(-1003, "too many requests")));
        let store = Arc::new(MemoryStore::new());
        let lifecycle = engine(mock, store.clone()).await;
        let position = open_position("t1", "c1".to_string(), &order(10, OrderSide::Buy, OrderStatus::Filled));
        store.save_thread_transaction(&position).await.unwrap();

        let outcome = lifecycle.sell(&position, dec!(51000)).await.unwrap();
        assert!(matches!(outcome, SellOutcome::Abandoned(_)));
        // position kept, sell left pending with its source for the sweep
        assert!(store.find_thread_transaction(10).await.unwrap().is_some());
        let pending = store.list_pending_orders("t1").await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].source_order_id, Some(10));
    }
}
