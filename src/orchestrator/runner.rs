//! Main loop
//!
//! One iteration: wait for the trading window, refresh counters, make sure
//! the session row exists, bootstrap market history once, then run the four
//! streaming tasks until all of them have returned. Repeats until shutdown.

use chrono::Local;
use futures::future::join_all;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

use super::commands::{run_command_listener, CommandReceiver};
use super::context::TradingContext;
use super::streams::{
    run_book_ticker_consumer, run_kline_consumer, run_user_data_consumer, StreamStop,
};
use super::timers::refresh_sell_count;
use crate::coordination::{ShutdownReason, ShutdownToken};
use crate::domain::new_identity;
use crate::error::{PumpError, Result};

pub struct MainLoop {
    ctx: Arc<TradingContext>,
    commands: CommandReceiver,
    /// Cycle of the positions being resumed; consumed by the first iteration
    resumed_cycle_id: Option<String>,
    iterations: u64,
}

impl MainLoop {
    pub fn new(
        ctx: Arc<TradingContext>,
        commands: CommandReceiver,
        resumed_cycle_id: Option<String>,
    ) -> Self {
        Self {
            ctx,
            commands,
            resumed_cycle_id,
            iterations: 0,
        }
    }

    /// Run until shutdown is requested and return its reason.
    pub async fn run(mut self) -> ShutdownReason {
        let mut token = self.ctx.shutdown.token();

        loop {
            if let Some(reason) = self.ctx.shutdown.reason() {
                info!(iterations = self.iterations, "Main loop stopped");
                return reason;
            }

            if !self.wait_for_window(&mut token).await {
                continue;
            }

            if let Err(e) = self.prepare_iteration().await {
                error!(thread_id = %self.ctx.session.thread_id(), "Iteration setup failed: {}", e);
                if !self.ctx.escalate(&e) {
                    self.ctx
                        .shutdown
                        .request_shutdown(ShutdownReason::Fatal(e.to_string()));
                }
                continue;
            }

            if !self.ctx.market.is_bootstrapped().await {
                self.bootstrap_market().await;
            }

            self.run_streams(&mut token).await;
            self.iterations += 1;

            if self.ctx.shutdown.is_shutdown_requested() {
                continue;
            }

            // streams dropped: reload configuration and reconnect
            if let Err(e) = self
                .ctx
                .loader
                .refresh(self.ctx.session.thread_id(), &self.ctx.config)
                .await
            {
                warn!("Configuration reload failed: {}", e);
            }
            let pause = Duration::from_millis(self.ctx.config.read().await.timers.restart_pause_ms);
            tokio::select! {
                _ = sleep(pause) => {}
                _ = token.wait_for_shutdown() => {}
            }
        }
    }

    /// Sleep while outside the trading window. False when shutdown interrupted the wait.
    async fn wait_for_window(&self, token: &mut ShutdownToken) -> bool {
        loop {
            let config = self.ctx.config().await;
            if config.schedule.is_open_at(Local::now().time()) {
                return true;
            }
            info!(
                start = %config.schedule.time_start,
                stop = %config.schedule.time_stop,
                "Outside trading window, sleeping"
            );
            tokio::select! {
                _ = sleep(Duration::from_secs(config.timers.window_poll_secs)) => {}
                _ = token.wait_for_shutdown() => return false,
            }
        }
    }

    /// Refresh counters and keep the session row and cycle id current.
    async fn prepare_iteration(&mut self) -> Result<()> {
        let session = &self.ctx.session;
        let thread_id = session.thread_id().to_string();

        let threads = match self.ctx.store.count_open_threads(&thread_id).await {
            Ok(threads) => threads,
            Err(e) => {
                warn!(thread_id = %thread_id, "Failed to count open threads: {}", e);
                session.snapshot().await.thread_count
            }
        };
        refresh_sell_count(&self.ctx).await;
        let sells = session.snapshot().await.sell_count;
        session.set_counts(threads, sells).await;

        if threads == 0 {
            let cycle_id = new_identity();
            debug!(thread_id = %thread_id, %cycle_id, "Starting new cycle");
            session.set_cycle_id(cycle_id).await;
            self.resumed_cycle_id = None;
            self.ensure_session_row().await?;
        } else if let Some(cycle_id) = self.resumed_cycle_id.take() {
            info!(thread_id = %thread_id, %cycle_id, open_threads = threads, "Resuming cycle");
            session.set_cycle_id(cycle_id).await;
            self.ensure_session_row().await?;
        }
        Ok(())
    }

    /// Create the session row, or update it when it already exists.
    async fn ensure_session_row(&self) -> Result<()> {
        let row = self.ctx.session.to_row().await;
        if let Err(save) = self.ctx.store.save_session(&row).await {
            debug!("Session insert failed ({}), updating instead", save);
            self.ctx
                .store
                .update_session(&row)
                .await
                .map_err(|e| PumpError::fatal("persist session", e))?;
        }
        Ok(())
    }

    async fn bootstrap_market(&self) {
        let config = self.ctx.config().await;
        let symbol = self.ctx.session.symbol();

        let candles = match self
            .ctx
            .exchange
            .get_historical_candles(
                symbol,
                &config.exchange.kline_interval,
                config.exchange.history_limit,
            )
            .await
        {
            Ok(candles) => candles,
            Err(e) => {
                warn!(%symbol, "Historical candles unavailable: {}", e);
                return;
            }
        };
        match self.ctx.exchange.get_recent_price_stats(symbol).await {
            Ok(stats) => {
                self.ctx.market.bootstrap(&candles, &stats).await;
                info!(%symbol, candles = candles.len(), "Market history loaded");
            }
            Err(e) => warn!(%symbol, "Price stats unavailable: {}", e),
        }
    }

    /// Start the four streaming tasks and wait until every one has returned.
    async fn run_streams(&self, token: &mut ShutdownToken) {
        let stop = StreamStop::new();
        let handles = vec![
            tokio::spawn(run_command_listener(
                self.commands.clone(),
                self.ctx.session.clone(),
                self.ctx.shutdown.clone(),
                stop.subscribe(),
            )),
            tokio::spawn(run_kline_consumer(self.ctx.clone(), stop.clone())),
            tokio::spawn(run_user_data_consumer(self.ctx.clone(), stop.clone())),
            tokio::spawn(run_book_ticker_consumer(self.ctx.clone(), stop.clone())),
        ];

        let barrier = join_all(handles);
        tokio::pin!(barrier);

        let results = tokio::select! {
            results = &mut barrier => results,
            _ = token.wait_for_shutdown() => {
                stop.raise();
                (&mut barrier).await
            }
        };

        for result in results {
            if let Err(e) = result {
                error!("Streaming task failed: {}", e);
            }
        }
        debug!(stopped = stop.is_raised(), "Streaming tasks joined");
    }
}
