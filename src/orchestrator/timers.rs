//! Recurring background timers
//!
//! Each timer runs on its own task and never blocks the others or the main
//! loop. All of them stop when shutdown is requested.

use chrono::{Duration as ChronoDuration, Utc};
use rand::Rng;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, sleep, Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use super::context::TradingContext;
use crate::coordination::ShutdownToken;
use crate::domain::OrderSide;

/// Run `task` every `period`, first run one period from now.
pub fn spawn_periodic<F, Fut>(
    name: &'static str,
    period: Duration,
    mut shutdown: ShutdownToken,
    mut task: F,
) -> JoinHandle<()>
where
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    tokio::spawn(async move {
        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        debug!(timer = name, period_secs = period.as_secs(), "Timer started");
        loop {
            tokio::select! {
                _ = ticker.tick() => task().await,
                _ = shutdown.wait_for_shutdown() => break,
            }
        }
        debug!(timer = name, "Timer stopped");
    })
}

/// Base delay plus a uniform random extra in `[0, jitter]`.
pub fn jittered(base: Duration, jitter: Duration) -> Duration {
    if jitter.is_zero() {
        return base;
    }
    let extra = rand::thread_rng().gen_range(0..=jitter.as_millis() as u64);
    base + Duration::from_millis(extra)
}

/// Refresh the recent sell count from the store.
pub async fn refresh_sell_count(ctx: &TradingContext) {
    let window = ctx.config.read().await.timers.sell_count_window_mins;
    let since = Utc::now() - ChronoDuration::minutes(window);
    match ctx
        .store
        .count_recent_orders_by_side(ctx.session.thread_id(), OrderSide::Sell, since)
        .await
    {
        Ok(count) => ctx.session.set_sell_count(count).await,
        Err(e) => warn!(thread_id = %ctx.session.thread_id(), "Failed to refresh sell count: {}", e),
    }
}

/// Spawn every recurring timer of the orchestrator.
pub async fn spawn_timers(ctx: Arc<TradingContext>) -> Vec<JoinHandle<()>> {
    let timers = ctx.config.read().await.timers.clone();
    let secs = Duration::from_secs;
    let mut handles = Vec::with_capacity(6);

    let c = ctx.clone();
    handles.push(spawn_periodic(
        "server_time",
        secs(timers.server_time_secs),
        ctx.shutdown.token(),
        move || {
            let c = c.clone();
            async move {
                if let Err(e) = c.exchange.sync_server_time().await {
                    warn!("Server time sync failed: {}", e);
                }
            }
        },
    ));

    let c = ctx.clone();
    handles.push(spawn_periodic(
        "config_refresh",
        secs(timers.config_refresh_secs),
        ctx.shutdown.token(),
        move || {
            let c = c.clone();
            async move {
                if let Err(e) = c.loader.refresh(c.session.thread_id(), &c.config).await {
                    warn!("Configuration refresh failed: {}", e);
                }
            }
        },
    ));

    let c = ctx.clone();
    handles.push(spawn_periodic(
        "role_check",
        secs(timers.role_check_secs),
        ctx.shutdown.token(),
        move || {
            let c = c.clone();
            async move {
                if let Err(e) = c.node.check(&c.session) {
                    warn!("Node role check failed: {}", e);
                }
            }
        },
    ));

    let c = ctx.clone();
    handles.push(spawn_periodic(
        "listen_key_keepalive",
        secs(timers.listen_key_keepalive_secs),
        ctx.shutdown.token(),
        move || {
            let c = c.clone();
            async move {
                if let Some(key) = c.session.listen_key().await {
                    if let Err(e) = c.exchange.keep_alive_listen_key(&key).await {
                        warn!("Listen key keepalive failed: {}", e);
                    }
                }
            }
        },
    ));

    let c = ctx.clone();
    handles.push(spawn_periodic(
        "sell_count",
        secs(timers.sell_count_refresh_secs),
        ctx.shutdown.token(),
        move || {
            let c = c.clone();
            async move { refresh_sell_count(&c).await }
        },
    ));

    handles.push(spawn_pending_sweep(
        ctx.clone(),
        secs(timers.pending_reconcile_secs),
        secs(timers.pending_reconcile_jitter_secs),
    ));

    info!(count = handles.len(), "Timers started");
    handles
}

/// Pending-order sweep with a fresh random delay every cycle.
fn spawn_pending_sweep(ctx: Arc<TradingContext>, base: Duration, jitter: Duration) -> JoinHandle<()> {
    let mut shutdown = ctx.shutdown.token();
    tokio::spawn(async move {
        loop {
            let delay = jittered(base, jitter);
            tokio::select! {
                _ = sleep(delay) => {}
                _ = shutdown.wait_for_shutdown() => break,
            }
            if let Err(e) = ctx.sweep.run_once().await {
                error!(thread_id = %ctx.session.thread_id(), "Pending order sweep failed: {}", e);
                if ctx.escalate(&e) {
                    break;
                }
            }
        }
    })
}
