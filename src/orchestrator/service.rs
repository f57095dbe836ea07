//! Process wiring: identity, lock, context, main loop and teardown.

use futures::future::join_all;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{info, warn};

use super::commands::CommandReceiver;
use super::context::TradingContext;
use super::runner::MainLoop;
use super::strategy::Strategy;
use super::timers::spawn_timers;
use crate::adapters::NotificationSink;
use crate::config::{AppConfig, ConfigLoader};
use crate::coordination::{
    resolve_identity, GracefulShutdown, IdentityLock, NodeCoordinator, ShutdownReason, Teardown,
    TeardownReport,
};
use crate::domain::Session;
use crate::error::{PumpError, Result};
use crate::exchange::ExchangeAdapter;
use crate::persistence::PersistenceStore;

/// External collaborators of one service run
pub struct ServiceDeps {
    pub exchange: Arc<dyn ExchangeAdapter>,
    pub store: Arc<dyn PersistenceStore>,
    pub notifier: Arc<dyn NotificationSink>,
    pub strategy: Arc<dyn Strategy>,
}

/// How a service run ended
#[derive(Debug)]
pub struct ServiceExit {
    pub thread_id: String,
    pub reason: ShutdownReason,
    pub teardown: TeardownReport,
}

impl ServiceExit {
    pub fn is_fatal(&self) -> bool {
        matches!(self.reason, ShutdownReason::Fatal(_))
    }
}

fn validated(config: AppConfig) -> Result<AppConfig> {
    config
        .validate()
        .map_err(|errors| PumpError::Validation(errors.join("; ")))?;
    Ok(config)
}

/// Run one trading identity until shutdown.
///
/// Errors returned here happen before the identity lock is taken (or while
/// taking it); once the lock is held every exit goes through teardown.
pub async fn run_service(
    loader: ConfigLoader,
    deps: ServiceDeps,
    commands: CommandReceiver,
) -> Result<ServiceExit> {
    let base = validated(loader.load(None)?)?;
    let identity =
        resolve_identity(deps.store.as_ref(), &base.trading.symbol, base.trading.new_session)
            .await?;

    let config = if identity.is_resumed() {
        validated(loader.load(Some(&identity.thread_id))?)?
    } else {
        base
    };

    let lock = IdentityLock::acquire(&config.node.lock_dir, &identity.thread_id)?;
    if let Err(e) = loader.ensure_thread_file(&identity.thread_id, &config) {
        warn!(thread_id = %identity.thread_id, "Failed to write identity config: {}", e);
    }

    let session = Arc::new(Session::new(
        identity.thread_id.clone(),
        identity.symbol.clone(),
        config.trading.symbol_fiat.clone(),
    ));
    let node = NodeCoordinator::from_config(&config.node, config.exchange.testnet);
    let shutdown = Arc::new(GracefulShutdown::new());
    let drain_poll = Duration::from_millis(config.timers.teardown_poll_ms);
    let history_limit = config.exchange.history_limit as usize;

    let ctx = Arc::new(TradingContext::new(
        session.clone(),
        Arc::new(RwLock::new(config)),
        loader,
        deps.exchange,
        deps.store.clone(),
        deps.notifier.clone(),
        deps.strategy,
        node.clone(),
        shutdown,
        history_limit,
    ));

    info!(
        thread_id = %session.thread_id(),
        symbol = %session.symbol(),
        exchange = %ctx.exchange.kind(),
        resumed = identity.is_resumed(),
        "Session started"
    );
    prime_session(&ctx).await;

    let timers = spawn_timers(ctx.clone()).await;
    let reason = MainLoop::new(ctx.clone(), commands, identity.resumed_cycle_id)
        .run()
        .await;
    join_all(timers).await;

    let teardown = Teardown::new(
        session.clone(),
        deps.store,
        deps.notifier,
        node,
        lock,
        drain_poll,
    )
    .run(&reason)
    .await;

    Ok(ServiceExit {
        thread_id: session.thread_id().to_string(),
        reason,
        teardown,
    })
}

/// One-off exchange reads before the first iteration. Failures only warn.
async fn prime_session(ctx: &TradingContext) {
    let session = &ctx.session;

    if let Err(e) = ctx.exchange.sync_server_time().await {
        warn!("Server time sync failed: {}", e);
    }
    match ctx.exchange.get_available_funds(session.symbol_fiat()).await {
        Ok(funds) => session.set_funds(funds).await,
        Err(e) => warn!(asset = %session.symbol_fiat(), "Funds unavailable: {}", e),
    }
    match ctx.exchange.get_exchange_info(session.symbol()).await {
        Ok(lot) => session.set_lot_size(lot).await,
        Err(e) => warn!(symbol = %session.symbol(), "Lot size unavailable: {}", e),
    }
    if let Err(e) = ctx.node.check(session) {
        warn!("Initial role check failed: {}", e);
    }
}
