//! In-process store used for dry runs without a database and by tests.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::collections::{BTreeMap, HashMap};
use tokio::sync::RwLock;

use super::store::{PersistenceStore, UnresolvedThread};
use crate::domain::{OrderRecord, OrderSide, OrderStatus, SessionRow, ThreadTransaction};
use crate::error::{PumpError, Result};

#[derive(Debug, Default)]
struct Tables {
    orders: BTreeMap<i64, OrderRecord>,
    transactions: BTreeMap<i64, ThreadTransaction>,
    sessions: HashMap<String, SessionRow>,
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn order(&self, order_id: i64) -> Option<OrderRecord> {
        self.tables.read().await.orders.get(&order_id).cloned()
    }

    pub async fn session(&self, thread_id: &str) -> Option<SessionRow> {
        self.tables.read().await.sessions.get(thread_id).cloned()
    }

    pub async fn transaction_count(&self) -> usize {
        self.tables.read().await.transactions.len()
    }
}

fn realized_profit<'a>(
    orders: &BTreeMap<i64, OrderRecord>,
    sells: impl Iterator<Item = &'a OrderRecord>,
) -> Decimal {
    sells
        .filter(|r| r.order.side == OrderSide::Sell && r.order.status == OrderStatus::Filled)
        .filter_map(|sell| {
            let buy = orders.get(&sell.source_order_id?)?;
            Some(sell.order.cumulative_quote_qty - buy.order.cumulative_quote_qty)
        })
        .sum()
}

#[async_trait]
impl PersistenceStore for MemoryStore {
    async fn save_order(&self, record: &OrderRecord) -> Result<()> {
        let mut tables = self.tables.write().await;
        if tables.orders.contains_key(&record.order.order_id) {
            return Err(PumpError::Store(format!(
                "order {} already saved",
                record.order.order_id
            )));
        }
        tables.orders.insert(record.order.order_id, record.clone());
        Ok(())
    }

    async fn update_order(&self, record: &OrderRecord) -> Result<()> {
        let mut tables = self.tables.write().await;
        match tables.orders.get_mut(&record.order.order_id) {
            Some(stored) => {
                stored.order = record.order.clone();
                stored.price = record.price;
                Ok(())
            }
            None => Err(PumpError::Store(format!(
                "order {} not found",
                record.order.order_id
            ))),
        }
    }

    async fn save_thread_transaction(&self, tx: &ThreadTransaction) -> Result<()> {
        self.tables
            .write()
            .await
            .transactions
            .insert(tx.order_id, tx.clone());
        Ok(())
    }

    async fn delete_thread_transaction_by_order_id(&self, order_id: i64) -> Result<bool> {
        Ok(self
            .tables
            .write()
            .await
            .transactions
            .remove(&order_id)
            .is_some())
    }

    async fn find_thread_transaction(&self, order_id: i64) -> Result<Option<ThreadTransaction>> {
        Ok(self.tables.read().await.transactions.get(&order_id).cloned())
    }

    async fn save_session(&self, session: &SessionRow) -> Result<()> {
        let mut tables = self.tables.write().await;
        if tables.sessions.contains_key(&session.thread_id) {
            return Err(PumpError::Store(format!(
                "session {} already exists",
                session.thread_id
            )));
        }
        tables
            .sessions
            .insert(session.thread_id.clone(), session.clone());
        Ok(())
    }

    async fn update_session(&self, session: &SessionRow) -> Result<()> {
        let mut tables = self.tables.write().await;
        match tables.sessions.get_mut(&session.thread_id) {
            Some(stored) => {
                *stored = session.clone();
                Ok(())
            }
            None => Err(PumpError::Store(format!(
                "session {} not found",
                session.thread_id
            ))),
        }
    }

    async fn delete_session(&self, thread_id: &str) -> Result<()> {
        self.tables.write().await.sessions.remove(thread_id);
        Ok(())
    }

    async fn find_distinct_unresolved_thread(&self) -> Result<Option<UnresolvedThread>> {
        let tables = self.tables.read().await;
        Ok(tables
            .transactions
            .values()
            .find(|tx| !tables.sessions.contains_key(&tx.thread_id))
            .map(|tx| UnresolvedThread {
                thread_id: tx.thread_id.clone(),
                cycle_id: tx.cycle_id.clone(),
            }))
    }

    async fn get_symbol_for_thread(&self, thread_id: &str) -> Result<Option<String>> {
        let tables = self.tables.read().await;
        Ok(tables
            .orders
            .values()
            .filter(|r| r.thread_id == thread_id)
            .max_by_key(|r| r.created_at)
            .map(|r| r.order.symbol.clone()))
    }

    async fn count_open_threads(&self, thread_id: &str) -> Result<i64> {
        let tables = self.tables.read().await;
        Ok(tables
            .transactions
            .values()
            .filter(|tx| tx.thread_id == thread_id)
            .count() as i64)
    }

    async fn count_recent_orders_by_side(
        &self,
        thread_id: &str,
        side: OrderSide,
        since: DateTime<Utc>,
    ) -> Result<i64> {
        let tables = self.tables.read().await;
        Ok(tables
            .orders
            .values()
            .filter(|r| {
                r.thread_id == thread_id
                    && r.order.side == side
                    && r.order.status == OrderStatus::Filled
                    && r.created_at >= since
            })
            .count() as i64)
    }

    async fn sum_profit(&self) -> Result<Decimal> {
        let tables = self.tables.read().await;
        Ok(realized_profit(&tables.orders, tables.orders.values()))
    }

    async fn sum_profit_by_thread(&self, thread_id: &str) -> Result<Decimal> {
        let tables = self.tables.read().await;
        Ok(realized_profit(
            &tables.orders,
            tables.orders.values().filter(|r| r.thread_id == thread_id),
        ))
    }

    async fn sum_open_thread_amount(&self, thread_id: &str) -> Result<Decimal> {
        let tables = self.tables.read().await;
        Ok(tables
            .transactions
            .values()
            .filter(|tx| tx.thread_id == thread_id)
            .map(|tx| tx.cumulative_quote_qty)
            .sum())
    }

    async fn list_open_transactions_by_thread(
        &self,
        thread_id: &str,
    ) -> Result<Vec<ThreadTransaction>> {
        let tables = self.tables.read().await;
        let mut open: Vec<_> = tables
            .transactions
            .values()
            .filter(|tx| tx.thread_id == thread_id)
            .cloned()
            .collect();
        open.sort_by_key(|tx| tx.created_at);
        Ok(open)
    }

    async fn list_pending_orders(&self, thread_id: &str) -> Result<Vec<OrderRecord>> {
        let tables = self.tables.read().await;
        Ok(tables
            .orders
            .values()
            .filter(|r| r.thread_id == thread_id && r.order.status.is_pending())
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Order;
    use rust_decimal_macros::dec;

    fn record(order_id: i64, side: OrderSide, quote: Decimal, source: Option<i64>) -> OrderRecord {
        OrderRecord {
            order: Order {
                order_id,
                client_order_id: format!("c-{order_id}"),
                symbol: "BTCUSDT".to_string(),
                side,
                quantity: dec!(0.01),
                cumulative_quote_qty: quote,
                executed_qty: dec!(0.01),
                status: OrderStatus::Filled,
                transact_time: 0,
            },
            thread_id: "t1".to_string(),
            cycle_id: "c1".to_string(),
            price: quote / dec!(0.01),
            source_order_id: source,
            created_at: Utc::now(),
        }
    }

    fn transaction(thread_id: &str, order_id: i64) -> ThreadTransaction {
        ThreadTransaction {
            thread_id: thread_id.to_string(),
            cycle_id: "c1".to_string(),
            order_id,
            cumulative_quote_qty: dec!(500),
            price: dec!(50000),
            executed_qty: dec!(0.01),
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn profit_pairs_sells_with_their_buys() {
        let store = MemoryStore::new();
        store
            .save_order(&record(1, OrderSide::Buy, dec!(500), None))
            .await
            .unwrap();
        store
            .save_order(&record(2, OrderSide::Sell, dec!(510), Some(1)))
            .await
            .unwrap();

        assert_eq!(store.sum_profit().await.unwrap(), dec!(10));
        assert_eq!(store.sum_profit_by_thread("t1").await.unwrap(), dec!(10));
        assert_eq!(store.sum_profit_by_thread("other").await.unwrap(), dec!(0));
        assert_eq!(
            store
                .count_recent_orders_by_side("t1", OrderSide::Sell, Utc::now() - chrono::Duration::hours(1))
                .await
                .unwrap(),
            1
        );
    }

    #[tokio::test]
    async fn unresolved_thread_excludes_live_sessions() {
        let store = MemoryStore::new();
        store
            .save_thread_transaction(&transaction("live", 1))
            .await
            .unwrap();
        store
            .save_session(&SessionRow {
                thread_id: "live".to_string(),
                cycle_id: "c1".to_string(),
                symbol: "BTCUSDT".to_string(),
                symbol_fiat: "USDT".to_string(),
                funds: Decimal::ZERO,
                thread_count: 1,
                sell_count: 0,
                last_buy_at: None,
                last_sell_canceled_at: None,
                master: false,
                updated_at: Utc::now(),
            })
            .await
            .unwrap();
        assert_eq!(store.find_distinct_unresolved_thread().await.unwrap(), None);

        store
            .save_thread_transaction(&transaction("orphan", 2))
            .await
            .unwrap();
        let found = store.find_distinct_unresolved_thread().await.unwrap().unwrap();
        assert_eq!(found.thread_id, "orphan");
        assert_eq!(found.cycle_id, "c1");
    }

    #[tokio::test]
    async fn session_create_then_update() {
        let store = MemoryStore::new();
        let mut row = SessionRow {
            thread_id: "t1".to_string(),
            cycle_id: "c1".to_string(),
            symbol: "BTCUSDT".to_string(),
            symbol_fiat: "USDT".to_string(),
            funds: dec!(100),
            thread_count: 0,
            sell_count: 0,
            last_buy_at: None,
            last_sell_canceled_at: None,
            master: false,
            updated_at: Utc::now(),
        };
        store.save_session(&row).await.unwrap();
        assert!(store.save_session(&row).await.is_err());

        row.funds = dec!(90);
        store.update_session(&row).await.unwrap();
        assert_eq!(store.session("t1").await.unwrap().funds, dec!(90));

        store.delete_session("t1").await.unwrap();
        assert!(store.update_session(&row).await.is_err());
    }
}
