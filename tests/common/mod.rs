#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::StreamExt;
use pumpbot::adapters::NotificationSink;
use pumpbot::domain::{
    BookTicker, Kline, LotSize, Order, OrderRecord, OrderSide, OrderStatus, PriceStats,
    SessionRow, ThreadTransaction, TradeEvent, UserDataEvent,
};
use pumpbot::error::{ExchangeError, PumpError, Result};
use pumpbot::exchange::{EventStream, ExchangeAdapter, ExchangeKind, ExchangeResult};
use pumpbot::persistence::{MemoryStore, PersistenceStore, UnresolvedThread};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub const SYMBOL: &str = "BTCUSDT";

pub fn order(order_id: i64, side: OrderSide, status: OrderStatus) -> Order {
    Order {
        order_id,
        client_order_id: format!("client-{order_id}"),
        symbol: SYMBOL.to_string(),
        side,
        quantity: dec!(0.01),
        cumulative_quote_qty: Decimal::ZERO,
        executed_qty: Decimal::ZERO,
        status,
        transact_time: 1_700_000_000_000,
    }
}

pub fn filled(order_id: i64, side: OrderSide, executed: Decimal, quote: Decimal) -> Order {
    Order {
        executed_qty: executed,
        cumulative_quote_qty: quote,
        ..order(order_id, side, OrderStatus::Filled)
    }
}

pub fn lot() -> LotSize {
    LotSize {
        min_qty: dec!(0.0001),
        max_qty: dec!(1000),
        step_size: dec!(0.0001),
    }
}

pub fn position(thread_id: &str, order_id: i64) -> ThreadTransaction {
    ThreadTransaction {
        thread_id: thread_id.to_string(),
        cycle_id: "cycle-1".to_string(),
        order_id,
        cumulative_quote_qty: dec!(490),
        price: dec!(49000),
        executed_qty: dec!(0.01),
        created_at: Utc::now(),
    }
}

#[derive(Default)]
struct Script {
    submits: VecDeque<ExchangeResult<Order>>,
    /// Latest exchange-side view per order
    current: HashMap<i64, Order>,
    /// Successive poll answers per order; the current view is used once drained
    polls: HashMap<i64, VecDeque<ExchangeResult<Order>>>,
    /// Cancel answer plus the exchange-side state it leaves behind
    cancels: VecDeque<(ExchangeResult<Order>, Option<Order>)>,
    calls: Vec<String>,
}

/// Exchange double driven by queued answers
#[derive(Default)]
pub struct ScriptedExchange {
    script: Mutex<Script>,
    /// Book ticker pushed every second while streams run
    pub ticker: Option<BookTicker>,
}

impl ScriptedExchange {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_ticker(bid: Decimal, ask: Decimal) -> Self {
        Self {
            ticker: Some(BookTicker {
                bid_price: bid,
                bid_qty: dec!(1),
                ask_price: ask,
                ask_qty: dec!(1),
            }),
            ..Self::default()
        }
    }

    pub fn push_submit(&self, result: ExchangeResult<Order>) {
        let mut script = self.script.lock().unwrap();
        if let Ok(order) = &result {
            script.current.insert(order.order_id, order.clone());
        }
        script.submits.push_back(result);
    }

    pub fn push_poll(&self, order_id: i64, result: ExchangeResult<Order>) {
        self.script
            .lock()
            .unwrap()
            .polls
            .entry(order_id)
            .or_default()
            .push_back(result);
    }

    pub fn push_cancel(&self, result: ExchangeResult<Order>, leaves: Option<Order>) {
        self.script.lock().unwrap().cancels.push_back((result, leaves));
    }

    pub fn calls(&self) -> Vec<String> {
        self.script.lock().unwrap().calls.clone()
    }

    pub fn count_calls(&self, prefix: &str) -> usize {
        self.calls().iter().filter(|c| c.starts_with(prefix)).count()
    }

    fn record(&self, call: String) {
        self.script.lock().unwrap().calls.push(call);
    }

    fn submit(&self, call: &str) -> ExchangeResult<Order> {
        let mut script = self.script.lock().unwrap();
        script.calls.push(call.to_string());
        script
            .submits
            .pop_front()
            .unwrap_or_else(|| Err(ExchangeError::Transport("no scripted submit".to_string())))
    }
}

#[async_trait]
impl ExchangeAdapter for ScriptedExchange {
    fn kind(&self) -> ExchangeKind {
        ExchangeKind::Binance
    }

    async fn get_order(&self, _symbol: &str, order_id: i64) -> ExchangeResult<Order> {
        let mut script = self.script.lock().unwrap();
        script.calls.push(format!("get_order:{order_id}"));
        if let Some(next) = script.polls.get_mut(&order_id).and_then(|q| q.pop_front()) {
            if let Ok(order) = &next {
                script.current.insert(order_id, order.clone());
            }
            return next;
        }
        script
            .current
            .get(&order_id)
            .cloned()
            .ok_or_else(|| ExchangeError::api(-2013, "Order does not exist."))
    }

    async fn submit_buy(&self, _symbol: &str, quantity: Decimal) -> ExchangeResult<Order> {
        self.submit(&format!("submit_buy:{quantity}"))
    }

    async fn submit_sell(&self, _symbol: &str, quantity: Decimal) -> ExchangeResult<Order> {
        self.submit(&format!("submit_sell:{quantity}"))
    }

    async fn cancel_order(&self, _symbol: &str, order_id: i64) -> ExchangeResult<Order> {
        let mut script = self.script.lock().unwrap();
        script.calls.push(format!("cancel_order:{order_id}"));
        let (result, leaves) = script
            .cancels
            .pop_front()
            .unwrap_or_else(|| (Err(ExchangeError::api(-2011, "Unknown order sent.")), None));
        if let Some(order) = leaves {
            script.current.insert(order_id, order);
        }
        result
    }

    async fn get_exchange_info(&self, _symbol: &str) -> ExchangeResult<LotSize> {
        self.record("get_exchange_info".to_string());
        Ok(lot())
    }

    async fn get_available_funds(&self, _asset: &str) -> ExchangeResult<Decimal> {
        Ok(dec!(1000))
    }

    async fn get_recent_price_stats(&self, _symbol: &str) -> ExchangeResult<PriceStats> {
        Ok(PriceStats {
            high_price: dec!(51000),
            low_price: dec!(48000),
            last_price: dec!(50000),
        })
    }

    async fn get_historical_candles(
        &self,
        _symbol: &str,
        _interval: &str,
        limit: u32,
    ) -> ExchangeResult<Vec<Kline>> {
        Ok((0..limit.min(3) as i64)
            .map(|i| Kline {
                open_time: i * 60_000,
                open: dec!(50000),
                high: dec!(50100),
                low: dec!(49900),
                close: dec!(50000),
                volume: dec!(1),
                is_final: true,
            })
            .collect())
    }

    async fn open_kline_stream(
        &self,
        _symbol: &str,
        _interval: &str,
    ) -> ExchangeResult<EventStream<Kline>> {
        Ok(futures::stream::pending().boxed())
    }

    async fn open_book_ticker_stream(&self, _symbol: &str) -> ExchangeResult<EventStream<BookTicker>> {
        match self.ticker {
            Some(ticker) => Ok(futures::stream::unfold(ticker, |ticker| async move {
                tokio::time::sleep(Duration::from_secs(1)).await;
                Some((Ok(ticker), ticker))
            })
            .boxed()),
            None => Ok(futures::stream::pending().boxed()),
        }
    }

    async fn open_user_data_stream(
        &self,
        _listen_key: &str,
    ) -> ExchangeResult<EventStream<UserDataEvent>> {
        Ok(futures::stream::pending().boxed())
    }

    async fn get_listen_key(&self) -> ExchangeResult<String> {
        Ok("listen-key".to_string())
    }

    async fn keep_alive_listen_key(&self, _listen_key: &str) -> ExchangeResult<()> {
        Ok(())
    }

    async fn sync_server_time(&self) -> ExchangeResult<i64> {
        Ok(0)
    }
}

/// Notification sink that keeps every event
#[derive(Default)]
pub struct RecordingSink {
    events: Mutex<Vec<TradeEvent>>,
}

impl RecordingSink {
    pub fn events(&self) -> Vec<TradeEvent> {
        self.events.lock().unwrap().clone()
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.events().iter().map(|e| e.name()).collect()
    }
}

#[async_trait]
impl NotificationSink for RecordingSink {
    async fn notify(&self, event: &TradeEvent) {
        self.events.lock().unwrap().push(event.clone());
    }
}

/// `MemoryStore` wrapper with switchable write failures
#[derive(Default)]
pub struct InstrumentedStore {
    pub inner: MemoryStore,
    pub fail_save_order: AtomicBool,
    pub fail_update_order: AtomicBool,
    saved_sessions: Mutex<Vec<SessionRow>>,
}

impl InstrumentedStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn saved_sessions(&self) -> Vec<SessionRow> {
        self.saved_sessions.lock().unwrap().clone()
    }

    fn injected(what: &str) -> PumpError {
        PumpError::Store(format!("injected {what} failure"))
    }
}

#[async_trait]
impl PersistenceStore for InstrumentedStore {
    async fn save_order(&self, record: &OrderRecord) -> Result<()> {
        if self.fail_save_order.load(Ordering::SeqCst) {
            return Err(Self::injected("save_order"));
        }
        self.inner.save_order(record).await
    }

    async fn update_order(&self, record: &OrderRecord) -> Result<()> {
        if self.fail_update_order.load(Ordering::SeqCst) {
            return Err(Self::injected("update_order"));
        }
        self.inner.update_order(record).await
    }

    async fn save_thread_transaction(&self, tx: &ThreadTransaction) -> Result<()> {
        self.inner.save_thread_transaction(tx).await
    }

    async fn delete_thread_transaction_by_order_id(&self, order_id: i64) -> Result<bool> {
        self.inner.delete_thread_transaction_by_order_id(order_id).await
    }

    async fn find_thread_transaction(&self, order_id: i64) -> Result<Option<ThreadTransaction>> {
        self.inner.find_thread_transaction(order_id).await
    }

    async fn save_session(&self, session: &SessionRow) -> Result<()> {
        self.saved_sessions.lock().unwrap().push(session.clone());
        self.inner.save_session(session).await
    }

    async fn update_session(&self, session: &SessionRow) -> Result<()> {
        self.inner.update_session(session).await
    }

    async fn delete_session(&self, thread_id: &str) -> Result<()> {
        self.inner.delete_session(thread_id).await
    }

    async fn find_distinct_unresolved_thread(&self) -> Result<Option<UnresolvedThread>> {
        self.inner.find_distinct_unresolved_thread().await
    }

    async fn get_symbol_for_thread(&self, thread_id: &str) -> Result<Option<String>> {
        self.inner.get_symbol_for_thread(thread_id).await
    }

    async fn count_open_threads(&self, thread_id: &str) -> Result<i64> {
        self.inner.count_open_threads(thread_id).await
    }

    async fn count_recent_orders_by_side(
        &self,
        thread_id: &str,
        side: OrderSide,
        since: DateTime<Utc>,
    ) -> Result<i64> {
        self.inner
            .count_recent_orders_by_side(thread_id, side, since)
            .await
    }

    async fn sum_profit(&self) -> Result<Decimal> {
        self.inner.sum_profit().await
    }

    async fn sum_profit_by_thread(&self, thread_id: &str) -> Result<Decimal> {
        self.inner.sum_profit_by_thread(thread_id).await
    }

    async fn sum_open_thread_amount(&self, thread_id: &str) -> Result<Decimal> {
        self.inner.sum_open_thread_amount(thread_id).await
    }

    async fn list_open_transactions_by_thread(
        &self,
        thread_id: &str,
    ) -> Result<Vec<ThreadTransaction>> {
        self.inner.list_open_transactions_by_thread(thread_id).await
    }

    async fn list_pending_orders(&self, thread_id: &str) -> Result<Vec<OrderRecord>> {
        self.inner.list_pending_orders(thread_id).await
    }
}

pub fn shared<T>(value: T) -> Arc<T> {
    Arc::new(value)
}
