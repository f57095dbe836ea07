use std::sync::Arc;

use super::market::MarketState;
use super::strategy::Strategy;
use crate::adapters::{MasterOnlySink, NotificationSink};
use crate::config::{AppConfig, ConfigLoader, SharedConfig};
use crate::coordination::{GracefulShutdown, NodeCoordinator, ShutdownReason};
use crate::domain::Session;
use crate::error::PumpError;
use crate::exchange::ExchangeAdapter;
use crate::lifecycle::{OrderLifecycle, PendingOrderSweep};
use crate::persistence::PersistenceStore;

/// Shared handles for every task of one identity
pub struct TradingContext {
    pub session: Arc<Session>,
    pub config: SharedConfig,
    pub loader: ConfigLoader,
    pub exchange: Arc<dyn ExchangeAdapter>,
    pub store: Arc<dyn PersistenceStore>,
    pub notifier: Arc<dyn NotificationSink>,
    pub lifecycle: OrderLifecycle,
    pub sweep: PendingOrderSweep,
    pub market: MarketState,
    pub strategy: Arc<dyn Strategy>,
    pub node: NodeCoordinator,
    pub shutdown: Arc<GracefulShutdown>,
}

impl TradingContext {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        session: Arc<Session>,
        config: SharedConfig,
        loader: ConfigLoader,
        exchange: Arc<dyn ExchangeAdapter>,
        store: Arc<dyn PersistenceStore>,
        notifier: Arc<dyn NotificationSink>,
        strategy: Arc<dyn Strategy>,
        node: NodeCoordinator,
        shutdown: Arc<GracefulShutdown>,
        history_limit: usize,
    ) -> Self {
        let trade_events: Arc<dyn NotificationSink> =
            MasterOnlySink::new(notifier.clone(), session.clone());
        let lifecycle = OrderLifecycle::new(
            exchange.clone(),
            store.clone(),
            trade_events.clone(),
            session.clone(),
            config.clone(),
        );
        let sweep = PendingOrderSweep::new(
            exchange.clone(),
            store.clone(),
            trade_events,
            session.clone(),
        );
        Self {
            session,
            config,
            loader,
            exchange,
            store,
            notifier,
            lifecycle,
            sweep,
            market: MarketState::new(history_limit),
            strategy,
            node,
            shutdown,
        }
    }

    pub async fn config(&self) -> AppConfig {
        self.config.read().await.clone()
    }

    /// Route a fatal error to shutdown. Returns true when it was fatal.
    pub fn escalate(&self, error: &PumpError) -> bool {
        if error.is_fatal() {
            self.shutdown
                .request_shutdown(ShutdownReason::Fatal(error.to_string()));
            true
        } else {
            false
        }
    }
}
