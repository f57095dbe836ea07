use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;

use crate::domain::{OrderRecord, OrderSide, SessionRow, ThreadTransaction};
use crate::error::Result;

/// An identity that still has open positions but no live session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnresolvedThread {
    pub thread_id: String,
    /// Cycle the open positions were opened in
    pub cycle_id: String,
}

/// Durable storage shared by cooperating processes.
///
/// Writes made during an order transition are treated as fatal by the caller
/// when they fail; implementations should not retry internally.
#[async_trait]
pub trait PersistenceStore: Send + Sync {
    async fn save_order(&self, record: &OrderRecord) -> Result<()>;

    /// Overwrite the stored status, quantities and price of an existing order.
    async fn update_order(&self, record: &OrderRecord) -> Result<()>;

    async fn save_thread_transaction(&self, tx: &ThreadTransaction) -> Result<()>;

    /// Returns whether a transaction was removed.
    async fn delete_thread_transaction_by_order_id(&self, order_id: i64) -> Result<bool>;

    async fn find_thread_transaction(&self, order_id: i64) -> Result<Option<ThreadTransaction>>;

    async fn save_session(&self, session: &SessionRow) -> Result<()>;

    async fn update_session(&self, session: &SessionRow) -> Result<()>;

    async fn delete_session(&self, thread_id: &str) -> Result<()>;

    /// Any identity with open transactions and no session row.
    async fn find_distinct_unresolved_thread(&self) -> Result<Option<UnresolvedThread>>;

    /// Symbol of the most recent order placed by `thread_id`.
    async fn get_symbol_for_thread(&self, thread_id: &str) -> Result<Option<String>>;

    /// Open transactions held by `thread_id`.
    async fn count_open_threads(&self, thread_id: &str) -> Result<i64>;

    /// Filled orders of `side` placed by `thread_id` since `since`.
    async fn count_recent_orders_by_side(
        &self,
        thread_id: &str,
        side: OrderSide,
        since: DateTime<Utc>,
    ) -> Result<i64>;

    /// Realized profit over every identity.
    async fn sum_profit(&self) -> Result<Decimal>;

    async fn sum_profit_by_thread(&self, thread_id: &str) -> Result<Decimal>;

    /// Quote amount locked in open transactions of `thread_id`.
    async fn sum_open_thread_amount(&self, thread_id: &str) -> Result<Decimal>;

    async fn list_open_transactions_by_thread(
        &self,
        thread_id: &str,
    ) -> Result<Vec<ThreadTransaction>>;

    /// Orders of `thread_id` still NEW or PARTIALLY_FILLED.
    async fn list_pending_orders(&self, thread_id: &str) -> Result<Vec<OrderRecord>>;
}
