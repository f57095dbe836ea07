//! Per-identity session context.
//!
//! One `Session` exists per process and is shared by reference with every
//! component. Mutation is split by owner:
//! - lifecycle engine: the busy flag (through its guard), last buy time,
//!   last canceled-sell time
//! - orchestrator: cycle id, counters, funds, lot size, listen key
//! - node election: the master flag
//! - command listener: the forced buy/sell flags

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::RwLock;
use uuid::Uuid;

use super::LotSize;
use crate::coordination::BusyFlag;

/// Mint a fresh random identifier (identity or cycle).
pub fn new_identity() -> String {
    Uuid::new_v4().simple().to_string()
}

/// Mutable session fields guarded together
#[derive(Debug, Clone, Default)]
pub struct SessionState {
    pub cycle_id: String,
    pub funds: Decimal,
    pub thread_count: i64,
    pub sell_count: i64,
    pub last_buy_at: Option<DateTime<Utc>>,
    pub last_sell_canceled_at: Option<DateTime<Utc>>,
    pub listen_key: Option<String>,
    pub lot_size: LotSize,
}

#[derive(Debug)]
pub struct Session {
    thread_id: String,
    symbol: String,
    symbol_fiat: String,
    busy: BusyFlag,
    master: AtomicBool,
    force_buy: AtomicBool,
    force_sell: AtomicBool,
    state: RwLock<SessionState>,
}

impl Session {
    pub fn new(thread_id: String, symbol: String, symbol_fiat: String) -> Self {
        Self {
            thread_id,
            symbol,
            symbol_fiat,
            busy: BusyFlag::new(),
            master: AtomicBool::new(false),
            force_buy: AtomicBool::new(false),
            force_sell: AtomicBool::new(false),
            state: RwLock::new(SessionState {
                cycle_id: new_identity(),
                ..SessionState::default()
            }),
        }
    }

    pub fn thread_id(&self) -> &str {
        &self.thread_id
    }

    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    pub fn symbol_fiat(&self) -> &str {
        &self.symbol_fiat
    }

    pub fn busy(&self) -> &BusyFlag {
        &self.busy
    }

    /// Master role from the heartbeat election; gates the heartbeat lease and
    /// forwarding of trade events to the shared channel.
    pub fn is_master(&self) -> bool {
        self.master.load(Ordering::SeqCst)
    }

    pub fn set_master(&self, master: bool) {
        self.master.store(master, Ordering::SeqCst);
    }

    pub fn request_force_buy(&self) {
        self.force_buy.store(true, Ordering::SeqCst);
    }

    pub fn request_force_sell(&self) {
        self.force_sell.store(true, Ordering::SeqCst);
    }

    /// Consume the forced-buy flag.
    pub fn take_force_buy(&self) -> bool {
        self.force_buy.swap(false, Ordering::SeqCst)
    }

    /// Consume the forced-sell flag.
    pub fn take_force_sell(&self) -> bool {
        self.force_sell.swap(false, Ordering::SeqCst)
    }

    pub fn force_buy_pending(&self) -> bool {
        self.force_buy.load(Ordering::SeqCst)
    }

    pub fn force_sell_pending(&self) -> bool {
        self.force_sell.load(Ordering::SeqCst)
    }

    pub async fn snapshot(&self) -> SessionState {
        self.state.read().await.clone()
    }

    pub async fn cycle_id(&self) -> String {
        self.state.read().await.cycle_id.clone()
    }

    pub async fn set_cycle_id(&self, cycle_id: String) {
        self.state.write().await.cycle_id = cycle_id;
    }

    pub async fn lot_size(&self) -> LotSize {
        self.state.read().await.lot_size
    }

    pub async fn set_lot_size(&self, lot_size: LotSize) {
        self.state.write().await.lot_size = lot_size;
    }

    pub async fn set_funds(&self, funds: Decimal) {
        self.state.write().await.funds = funds;
    }

    pub async fn set_counts(&self, thread_count: i64, sell_count: i64) {
        let mut state = self.state.write().await;
        state.thread_count = thread_count;
        state.sell_count = sell_count;
    }

    pub async fn set_sell_count(&self, sell_count: i64) {
        self.state.write().await.sell_count = sell_count;
    }

    pub async fn listen_key(&self) -> Option<String> {
        self.state.read().await.listen_key.clone()
    }

    pub async fn set_listen_key(&self, key: Option<String>) {
        self.state.write().await.listen_key = key;
    }

    pub async fn record_buy(&self, at: DateTime<Utc>) {
        self.state.write().await.last_buy_at = Some(at);
    }

    pub async fn record_sell_canceled(&self, at: DateTime<Utc>) {
        self.state.write().await.last_sell_canceled_at = Some(at);
    }

    /// Row persisted for this identity.
    pub async fn to_row(&self) -> SessionRow {
        let state = self.state.read().await;
        SessionRow {
            thread_id: self.thread_id.clone(),
            cycle_id: state.cycle_id.clone(),
            symbol: self.symbol.clone(),
            symbol_fiat: self.symbol_fiat.clone(),
            funds: state.funds,
            thread_count: state.thread_count,
            sell_count: state.sell_count,
            last_buy_at: state.last_buy_at,
            last_sell_canceled_at: state.last_sell_canceled_at,
            master: self.is_master(),
            updated_at: Utc::now(),
        }
    }
}

/// Persisted session row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionRow {
    pub thread_id: String,
    pub cycle_id: String,
    pub symbol: String,
    pub symbol_fiat: String,
    pub funds: Decimal,
    pub thread_count: i64,
    pub sell_count: i64,
    pub last_buy_at: Option<DateTime<Utc>>,
    pub last_sell_canceled_at: Option<DateTime<Utc>>,
    pub master: bool,
    pub updated_at: DateTime<Utc>,
}
