//! Periodic sweep over orders this identity left pending.
//!
//! Buys whose poll aborted and sells whose cancel was abandoned stay NEW or
//! PARTIALLY_FILLED in the store. The sweep re-reads them from the exchange,
//! writes back fresher state and applies the position effect of orders that
//! reached a terminal status.

use std::sync::Arc;
use tracing::{debug, info, warn};

use super::engine::open_position;
use crate::adapters::NotificationSink;
use crate::domain::{OrderRecord, OrderSide, OrderStatus, Session, TradeEvent};
use crate::error::{PumpError, Result};
use crate::exchange::ExchangeAdapter;
use crate::persistence::PersistenceStore;

/// Sweep statistics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub checked: usize,
    pub updated: usize,
    pub resolved: usize,
    /// Sweep skipped because an order operation held the session
    pub skipped: bool,
}

pub struct PendingOrderSweep {
    exchange: Arc<dyn ExchangeAdapter>,
    store: Arc<dyn PersistenceStore>,
    notifier: Arc<dyn NotificationSink>,
    session: Arc<Session>,
}

impl PendingOrderSweep {
    pub fn new(
        exchange: Arc<dyn ExchangeAdapter>,
        store: Arc<dyn PersistenceStore>,
        notifier: Arc<dyn NotificationSink>,
        session: Arc<Session>,
    ) -> Self {
        Self {
            exchange,
            store,
            notifier,
            session,
        }
    }

    /// Run one sweep. Store write failures are fatal; exchange errors skip the order.
    pub async fn run_once(&self) -> Result<SweepReport> {
        let _busy = match self.session.busy().acquire() {
            Ok(guard) => guard,
            Err(PumpError::Busy) | Err(PumpError::ShuttingDown) => {
                debug!("Order operation in flight, pending sweep skipped");
                return Ok(SweepReport {
                    skipped: true,
                    ..SweepReport::default()
                });
            }
            Err(e) => return Err(e),
        };

        let pending = self
            .store
            .list_pending_orders(self.session.thread_id())
            .await?;
        let mut report = SweepReport {
            checked: pending.len(),
            ..SweepReport::default()
        };

        for record in pending {
            let fresh = match self
                .exchange
                .get_order(&record.order.symbol, record.order.order_id)
                .await
            {
                Ok(fresh) => fresh,
                Err(e) => {
                    warn!(order_id = record.order.order_id, "Pending order lookup failed: {}", e);
                    continue;
                }
            };

            let mut updated = record.clone();
            if !updated.order.absorb(&fresh) {
                continue;
            }
            let price = updated.order.effective_price();
            if !price.is_zero() {
                updated.price = price;
            }
            self.store
                .update_order(&updated)
                .await
                .map_err(|e| PumpError::fatal("update pending order", e))?;
            report.updated += 1;

            if updated.order.status.is_terminal() {
                self.resolve(&updated).await?;
                report.resolved += 1;
            }
        }

        if report.updated > 0 {
            info!(
                checked = report.checked,
                updated = report.updated,
                resolved = report.resolved,
                "Pending orders reconciled"
            );
        }
        Ok(report)
    }

    async fn resolve(&self, record: &OrderRecord) -> Result<()> {
        let thread_id = self.session.thread_id().to_string();
        let order = &record.order;

        match (order.side, order.status) {
            (OrderSide::Buy, OrderStatus::Filled) => {
                let known = self
                    .store
                    .find_thread_transaction(order.order_id)
                    .await
                    .map_err(|e| PumpError::fatal("find thread transaction", e))?;
                if known.is_none() {
                    let tx = open_position(&thread_id, record.cycle_id.clone(), order);
                    self.store
                        .save_thread_transaction(&tx)
                        .await
                        .map_err(|e| PumpError::fatal("save thread transaction", e))?;
                    self.emit(TradeEvent::Buy {
                        thread_id,
                        order_id: order.order_id,
                        price: tx.price,
                        quantity: order.executed_qty,
                    })
                    .await;
                }
            }
            (OrderSide::Sell, OrderStatus::Filled) => {
                let Some(source) = record.source_order_id else {
                    warn!(order_id = order.order_id, "Filled sell without source order");
                    return Ok(());
                };
                self.store
                    .delete_thread_transaction_by_order_id(source)
                    .await
                    .map_err(|e| PumpError::fatal("delete thread transaction", e))?;
                self.emit(TradeEvent::Sell {
                    thread_id,
                    order_id: order.order_id,
                    source_order_id: source,
                    price: record.price,
                    quantity: order.executed_qty,
                })
                .await;
            }
            (_, OrderStatus::Canceled) => {
                self.emit(TradeEvent::Canceled {
                    thread_id,
                    order_id: order.order_id,
                    source_order_id: record.source_order_id,
                })
                .await;
            }
            _ => {}
        }
        Ok(())
    }

    async fn emit(&self, event: TradeEvent) {
        info!(thread_id = %self.session.thread_id(), event = event.name(), "{}", event.summary());
        self.notifier.notify(&event).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::NullSink;
    use crate::domain::{Order, ThreadTransaction};
    use crate::error::ExchangeError;
    use crate::exchange::MockExchangeAdapter;
    use crate::persistence::MemoryStore;
    use chrono::Utc;
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;

    fn record(order_id: i64, side: OrderSide, source: Option<i64>) -> OrderRecord {
        OrderRecord {
            order: Order {
                order_id,
                client_order_id: format!("c-{order_id}"),
                symbol: "BTCUSDT".to_string(),
                side,
                quantity: dec!(0.01),
                cumulative_quote_qty: Decimal::ZERO,
                executed_qty: Decimal::ZERO,
                status: OrderStatus::New,
                transact_time: 1,
            },
            thread_id: "t1".to_string(),
            cycle_id: "c1".to_string(),
            price: dec!(50000),
            source_order_id: source,
            created_at: Utc::now(),
        }
    }

    fn filled(mut record: OrderRecord, quote: Decimal) -> Order {
        record.order.status = OrderStatus::Filled;
        record.order.executed_qty = dec!(0.01);
        record.order.cumulative_quote_qty = quote;
        record.order
    }

    fn sweep(mock: MockExchangeAdapter, store: Arc<MemoryStore>) -> PendingOrderSweep {
        PendingOrderSweep::new(
            Arc::new(mock),
            store,
            Arc::new(NullSink),
            Arc::new(Session::new("t1".into(), "BTCUSDT".into(), "USDT".into())),
        )
    }

    #[tokio::test]
    async fn filled_buy_opens_position_and_filled_sell_closes_one() {
        let store = Arc::new(MemoryStore::new());
        store.save_order(&record(1, OrderSide::Buy, None)).await.unwrap();
        store.save_order(&record(2, OrderSide::Sell, Some(9))).await.unwrap();
        store
            .save_thread_transaction(&ThreadTransaction {
                thread_id: "t1".to_string(),
                cycle_id: "c1".to_string(),
                order_id: 9,
                cumulative_quote_qty: dec!(490),
                price: dec!(49000),
                executed_qty: dec!(0.01),
                created_at: Utc::now(),
            })
            .await
            .unwrap();

        let buy = filled(record(1, OrderSide::Buy, None), dec!(500));
        let sell = filled(record(2, OrderSide::Sell, Some(9)), dec!(510));
        let mut mock = MockExchangeAdapter::new();
        mock.expect_get_order().returning(move |_, id| {
            Ok(if id == 1 { buy.clone() } else { sell.clone() })
        });

        let report = sweep(mock, store.clone()).run_once().await.unwrap();
        assert_eq!(report.checked, 2);
        assert_eq!(report.resolved, 2);

        let opened = store.find_thread_transaction(1).await.unwrap().unwrap();
        assert_eq!(opened.price, dec!(50000));
        assert!(store.find_thread_transaction(9).await.unwrap().is_none());
        assert!(store.list_pending_orders("t1").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn lookup_errors_leave_orders_pending() {
        let store = Arc::new(MemoryStore::new());
        store.save_order(&record(3, OrderSide::Buy, None)).await.unwrap();
        let mut mock = MockExchangeAdapter::new();
        mock.expect_get_order()
            .returning(|_, _| Err(ExchangeError::Transport("timeout".to_string())));

        let report = sweep(mock, store.clone()).run_once().await.unwrap();
        assert_eq!(report.updated, 0);
        assert_eq!(store.list_pending_orders("t1").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn skipped_while_busy() {
        let store = Arc::new(MemoryStore::new());
        let sweep = sweep(MockExchangeAdapter::new(), store);
        let _held = sweep.session.busy().acquire().unwrap();

        let report = sweep.run_once().await.unwrap();
        assert!(report.skipped);
    }
}
