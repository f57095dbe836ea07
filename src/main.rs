mod main_runtime;

use anyhow::Context;
use clap::Parser;
use pumpbot::adapters::WebhookNotifier;
use pumpbot::cli::{self, Cli, Commands};
use pumpbot::config::ConfigLoader;
use pumpbot::exchange::build_exchange_adapter;
use pumpbot::orchestrator::{
    command_channel, run_service, spawn_signal_forwarder, ProfitTargetStrategy, ServiceDeps,
};
use std::sync::Arc;
use tracing::{error, info};

use main_runtime::{build_store, init_logging, init_logging_simple};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            new_session,
            dry_run,
        } => {
            let mut loader = ConfigLoader::new(&cli.config_dir);
            if new_session {
                loader = loader.with_override("trading.new_session", true);
            }
            if dry_run {
                loader = loader.with_override("trading.dry_run", true);
            }
            let config = loader.load(None).context("loading configuration")?;
            init_logging(&config.logging);

            let deps = ServiceDeps {
                exchange: build_exchange_adapter(&config)?,
                store: build_store(&config).await?,
                notifier: WebhookNotifier::from_config(config.notifications.webhook_url.as_deref()),
                strategy: Arc::new(ProfitTargetStrategy),
            };

            let (tx, commands) = command_channel(16);
            let signals = spawn_signal_forwarder(tx)?;

            let exit = run_service(loader, deps, commands).await;
            signals.abort();

            match exit {
                Ok(exit) if exit.is_fatal() => {
                    error!(thread_id = %exit.thread_id, reason = %exit.reason, "Stopped on fatal error");
                    std::process::exit(1);
                }
                Ok(exit) => {
                    info!(thread_id = %exit.thread_id, "Stopped");
                }
                Err(e) => {
                    error!("Startup failed: {}", e);
                    return Err(e.into());
                }
            }
        }
        Commands::Status { thread } => {
            init_logging_simple();
            let config = ConfigLoader::new(&cli.config_dir)
                .load(None)
                .context("loading configuration")?;
            if config.database.url.is_none() {
                anyhow::bail!("status needs database.url to be configured");
            }
            let store = build_store(&config).await?;
            cli::show_status(store.as_ref(), thread).await?;
        }
    }

    Ok(())
}
