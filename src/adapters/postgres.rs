use crate::domain::{
    Order, OrderRecord, OrderSide, OrderStatus, SessionRow, ThreadTransaction,
};
use crate::error::{PumpError, Result};
use crate::persistence::{PersistenceStore, UnresolvedThread};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::Row;
use tracing::{debug, info, instrument};

/// PostgreSQL storage adapter
#[derive(Clone)]
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    /// Create a new PostgreSQL store
    pub async fn new(database_url: &str, max_connections: u32) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await?;

        info!("Connected to PostgreSQL");
        Ok(Self { pool })
    }

    /// Create a PostgreSQL store from an existing connection pool
    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Run migrations
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        info!("Database migrations completed");
        Ok(())
    }

    /// Get the connection pool
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

fn order_record_from_row(r: &PgRow) -> Result<OrderRecord> {
    let side: String = r.get("side");
    let status: String = r.get("status");
    Ok(OrderRecord {
        order: Order {
            order_id: r.get("order_id"),
            client_order_id: r.get("client_order_id"),
            symbol: r.get("symbol"),
            side: OrderSide::parse(&side)
                .ok_or_else(|| PumpError::Store(format!("unknown order side '{}'", side)))?,
            quantity: r.get("quantity"),
            cumulative_quote_qty: r.get("cumulative_quote_qty"),
            executed_qty: r.get("executed_qty"),
            status: OrderStatus::parse(&status)
                .ok_or_else(|| PumpError::Store(format!("unknown order status '{}'", status)))?,
            transact_time: r.get("transact_time"),
        },
        thread_id: r.get("thread_id"),
        cycle_id: r.get("cycle_id"),
        price: r.get("price"),
        source_order_id: r.get("source_order_id"),
        created_at: r.get("created_at"),
    })
}

fn thread_transaction_from_row(r: &PgRow) -> ThreadTransaction {
    ThreadTransaction {
        thread_id: r.get("thread_id"),
        cycle_id: r.get("cycle_id"),
        order_id: r.get("order_id"),
        cumulative_quote_qty: r.get("cumulative_quote_qty"),
        price: r.get("price"),
        executed_qty: r.get("executed_qty"),
        created_at: r.get("created_at"),
    }
}

#[async_trait]
impl PersistenceStore for PostgresStore {
    // ==================== Orders ====================

    #[instrument(skip(self, record), fields(order_id = record.order.order_id))]
    async fn save_order(&self, record: &OrderRecord) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO orders (
                order_id, client_order_id, thread_id, cycle_id, symbol, side, quantity,
                cumulative_quote_qty, executed_qty, price, status, transact_time,
                source_order_id, created_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
            "#,
        )
        .bind(record.order.order_id)
        .bind(&record.order.client_order_id)
        .bind(&record.thread_id)
        .bind(&record.cycle_id)
        .bind(&record.order.symbol)
        .bind(record.order.side.as_str())
        .bind(record.order.quantity)
        .bind(record.order.cumulative_quote_qty)
        .bind(record.order.executed_qty)
        .bind(record.price)
        .bind(record.order.status.as_str())
        .bind(record.order.transact_time)
        .bind(record.source_order_id)
        .bind(record.created_at)
        .execute(&self.pool)
        .await?;

        debug!("Saved order {}", record.order.order_id);
        Ok(())
    }

    #[instrument(skip(self, record), fields(order_id = record.order.order_id))]
    async fn update_order(&self, record: &OrderRecord) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE orders SET
                cumulative_quote_qty = $2,
                executed_qty = $3,
                price = $4,
                status = $5,
                transact_time = $6,
                updated_at = NOW()
            WHERE order_id = $1
            "#,
        )
        .bind(record.order.order_id)
        .bind(record.order.cumulative_quote_qty)
        .bind(record.order.executed_qty)
        .bind(record.price)
        .bind(record.order.status.as_str())
        .bind(record.order.transact_time)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(PumpError::Store(format!(
                "order {} not found",
                record.order.order_id
            )));
        }
        Ok(())
    }

    async fn list_pending_orders(&self, thread_id: &str) -> Result<Vec<OrderRecord>> {
        let rows = sqlx::query(
            r#"
            SELECT order_id, client_order_id, thread_id, cycle_id, symbol, side, quantity,
                   cumulative_quote_qty, executed_qty, price, status, transact_time,
                   source_order_id, created_at
            FROM orders
            WHERE thread_id = $1 AND status IN ('NEW', 'PARTIALLY_FILLED')
            ORDER BY created_at
            "#,
        )
        .bind(thread_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(order_record_from_row).collect()
    }

    async fn get_symbol_for_thread(&self, thread_id: &str) -> Result<Option<String>> {
        let row = sqlx::query(
            r#"
            SELECT symbol FROM orders
            WHERE thread_id = $1
            ORDER BY created_at DESC
            LIMIT 1
            "#,
        )
        .bind(thread_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|r| r.get("symbol")))
    }

    async fn count_recent_orders_by_side(
        &self,
        thread_id: &str,
        side: OrderSide,
        since: DateTime<Utc>,
    ) -> Result<i64> {
        let row = sqlx::query(
            r#"
            SELECT COUNT(*) AS count FROM orders
            WHERE thread_id = $1 AND side = $2 AND status = 'FILLED' AND created_at >= $3
            "#,
        )
        .bind(thread_id)
        .bind(side.as_str())
        .bind(since)
        .fetch_one(&self.pool)
        .await?;

        Ok(row.get("count"))
    }

    async fn sum_profit(&self) -> Result<Decimal> {
        let row = sqlx::query(
            r#"
            SELECT COALESCE(SUM(s.cumulative_quote_qty - b.cumulative_quote_qty), 0) AS profit
            FROM orders s
            JOIN orders b ON b.order_id = s.source_order_id
            WHERE s.side = 'SELL' AND s.status = 'FILLED'
            "#,
        )
        .fetch_one(&self.pool)
        .await?;

        Ok(row.get("profit"))
    }

    async fn sum_profit_by_thread(&self, thread_id: &str) -> Result<Decimal> {
        let row = sqlx::query(
            r#"
            SELECT COALESCE(SUM(s.cumulative_quote_qty - b.cumulative_quote_qty), 0) AS profit
            FROM orders s
            JOIN orders b ON b.order_id = s.source_order_id
            WHERE s.side = 'SELL' AND s.status = 'FILLED' AND s.thread_id = $1
            "#,
        )
        .bind(thread_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(row.get("profit"))
    }

    // ==================== Thread transactions ====================

    #[instrument(skip(self, tx), fields(order_id = tx.order_id))]
    async fn save_thread_transaction(&self, tx: &ThreadTransaction) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO thread_transactions (
                order_id, thread_id, cycle_id, cumulative_quote_qty, price, executed_qty, created_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (order_id) DO UPDATE SET
                cumulative_quote_qty = EXCLUDED.cumulative_quote_qty,
                price = EXCLUDED.price,
                executed_qty = EXCLUDED.executed_qty
            "#,
        )
        .bind(tx.order_id)
        .bind(&tx.thread_id)
        .bind(&tx.cycle_id)
        .bind(tx.cumulative_quote_qty)
        .bind(tx.price)
        .bind(tx.executed_qty)
        .bind(tx.created_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn delete_thread_transaction_by_order_id(&self, order_id: i64) -> Result<bool> {
        let result = sqlx::query("DELETE FROM thread_transactions WHERE order_id = $1")
            .bind(order_id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn find_thread_transaction(&self, order_id: i64) -> Result<Option<ThreadTransaction>> {
        let row = sqlx::query(
            r#"
            SELECT order_id, thread_id, cycle_id, cumulative_quote_qty, price, executed_qty, created_at
            FROM thread_transactions WHERE order_id = $1
            "#,
        )
        .bind(order_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.as_ref().map(thread_transaction_from_row))
    }

    async fn find_distinct_unresolved_thread(&self) -> Result<Option<UnresolvedThread>> {
        let row = sqlx::query(
            r#"
            SELECT t.thread_id, t.cycle_id, MIN(t.created_at) AS opened_at
            FROM thread_transactions t
            LEFT JOIN sessions s ON s.thread_id = t.thread_id
            WHERE s.thread_id IS NULL
            GROUP BY t.thread_id, t.cycle_id
            ORDER BY opened_at
            LIMIT 1
            "#,
        )
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|r| UnresolvedThread {
            thread_id: r.get("thread_id"),
            cycle_id: r.get("cycle_id"),
        }))
    }

    async fn count_open_threads(&self, thread_id: &str) -> Result<i64> {
        let row = sqlx::query(
            "SELECT COUNT(*) AS count FROM thread_transactions WHERE thread_id = $1",
        )
        .bind(thread_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(row.get("count"))
    }

    async fn sum_open_thread_amount(&self, thread_id: &str) -> Result<Decimal> {
        let row = sqlx::query(
            r#"
            SELECT COALESCE(SUM(cumulative_quote_qty), 0) AS amount
            FROM thread_transactions WHERE thread_id = $1
            "#,
        )
        .bind(thread_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(row.get("amount"))
    }

    async fn list_open_transactions_by_thread(
        &self,
        thread_id: &str,
    ) -> Result<Vec<ThreadTransaction>> {
        let rows = sqlx::query(
            r#"
            SELECT order_id, thread_id, cycle_id, cumulative_quote_qty, price, executed_qty, created_at
            FROM thread_transactions
            WHERE thread_id = $1
            ORDER BY created_at
            "#,
        )
        .bind(thread_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.iter().map(thread_transaction_from_row).collect())
    }

    // ==================== Sessions ====================

    #[instrument(skip(self, session), fields(thread_id = %session.thread_id))]
    async fn save_session(&self, session: &SessionRow) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO sessions (
                thread_id, cycle_id, symbol, symbol_fiat, funds, thread_count, sell_count,
                last_buy_at, last_sell_canceled_at, master, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            "#,
        )
        .bind(&session.thread_id)
        .bind(&session.cycle_id)
        .bind(&session.symbol)
        .bind(&session.symbol_fiat)
        .bind(session.funds)
        .bind(session.thread_count)
        .bind(session.sell_count)
        .bind(session.last_buy_at)
        .bind(session.last_sell_canceled_at)
        .bind(session.master)
        .bind(session.updated_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    #[instrument(skip(self, session), fields(thread_id = %session.thread_id))]
    async fn update_session(&self, session: &SessionRow) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE sessions SET
                cycle_id = $2,
                symbol = $3,
                symbol_fiat = $4,
                funds = $5,
                thread_count = $6,
                sell_count = $7,
                last_buy_at = $8,
                last_sell_canceled_at = $9,
                master = $10,
                updated_at = $11
            WHERE thread_id = $1
            "#,
        )
        .bind(&session.thread_id)
        .bind(&session.cycle_id)
        .bind(&session.symbol)
        .bind(&session.symbol_fiat)
        .bind(session.funds)
        .bind(session.thread_count)
        .bind(session.sell_count)
        .bind(session.last_buy_at)
        .bind(session.last_sell_canceled_at)
        .bind(session.master)
        .bind(session.updated_at)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(PumpError::Store(format!(
                "session {} not found",
                session.thread_id
            )));
        }
        Ok(())
    }

    async fn delete_session(&self, thread_id: &str) -> Result<()> {
        sqlx::query("DELETE FROM sessions WHERE thread_id = $1")
            .bind(thread_id)
            .execute(&self.pool)
            .await?;

        info!(thread_id, "Session row deleted");
        Ok(())
    }
}
