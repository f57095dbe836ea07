use clap::{Parser, Subcommand};
use std::path::PathBuf;

use crate::error::Result;
use crate::persistence::PersistenceStore;

#[derive(Parser)]
#[command(name = "pumpbot")]
#[command(version = "0.1.0")]
#[command(about = "Spot order-execution bot with resumable sessions", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Directory holding default.toml and per-identity config files
    #[arg(short, long, default_value = "config", env = "PUMP_CONFIG_DIR", global = true)]
    pub config_dir: PathBuf,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the trading loop until stopped
    Run {
        /// Ignore unresolved identities and start a fresh one
        #[arg(long)]
        new_session: bool,
        /// Do not submit orders
        #[arg(short, long)]
        dry_run: bool,
    },
    /// Show realized profit and open positions
    Status {
        /// Identity to report on; defaults to the unresolved one, if any
        #[arg(short, long)]
        thread: Option<String>,
    },
}

/// Print profit and open-position aggregates.
pub async fn show_status(store: &dyn PersistenceStore, thread: Option<String>) -> Result<()> {
    let total = store.sum_profit().await?;
    println!("Realized profit (all identities): {}", total);

    let thread_id = match thread {
        Some(id) => Some(id),
        None => store
            .find_distinct_unresolved_thread()
            .await?
            .map(|t| t.thread_id),
    };
    let Some(thread_id) = thread_id else {
        println!("No unresolved identity");
        return Ok(());
    };

    let profit = store.sum_profit_by_thread(&thread_id).await?;
    let open = store.count_open_threads(&thread_id).await?;
    let amount = store.sum_open_thread_amount(&thread_id).await?;
    println!("Identity {}", thread_id);
    println!("  realized profit: {}", profit);
    println!("  open positions:  {} ({} committed)", open, amount);

    for tx in store.list_open_transactions_by_thread(&thread_id).await? {
        println!(
            "  - order {} qty {} @ {} (cycle {})",
            tx.order_id, tx.executed_qty, tx.price, tx.cycle_id
        );
    }
    Ok(())
}
