mod common;

use chrono::Utc;
use common::*;
use pumpbot::config::ConfigLoader;
use pumpbot::coordination::{ShutdownReason, TeardownStep};
use pumpbot::domain::{OrderRecord, OrderSide, OrderStatus, TradeEvent};
use pumpbot::orchestrator::{
    command_channel, run_service, Command, ProfitTargetStrategy, ServiceDeps,
};
use pumpbot::persistence::PersistenceStore;
use pumpbot::PumpError;
use rust_decimal_macros::dec;
use std::path::Path;
use std::sync::atomic::Ordering;
use std::sync::Arc;

fn write_config(dir: &Path) -> ConfigLoader {
    let lock_dir = dir.join("locks");
    std::fs::create_dir_all(&lock_dir).unwrap();
    std::fs::write(
        dir.join("default.toml"),
        format!(
            r#"
[trading]
symbol = "BTCUSDT"
symbol_fiat = "USDT"
buy_quantity_fiat = "500"

[node]
lock_dir = "{}"
"#,
            lock_dir.display()
        ),
    )
    .unwrap();
    ConfigLoader::new(dir)
}

fn deps(
    exchange: Arc<ScriptedExchange>,
    store: Arc<InstrumentedStore>,
    sink: Arc<RecordingSink>,
) -> ServiceDeps {
    ServiceDeps {
        exchange,
        store,
        notifier: sink,
        strategy: Arc::new(ProfitTargetStrategy),
    }
}

const FULL_TEARDOWN: [TeardownStep; 5] = [
    TeardownStep::Drained,
    TeardownStep::MasterReleased,
    TeardownStep::IdentityReleased,
    TeardownStep::SessionDeleted,
    TeardownStep::Announced,
];

/// A store write failing right after a buy submission tears the session down.
#[tokio::test(start_paused = true)]
async fn store_failure_after_buy_runs_full_teardown() {
    let dir = tempfile::tempdir().unwrap();
    let loader = write_config(dir.path());

    let exchange = Arc::new(ScriptedExchange::with_ticker(dec!(49990), dec!(50000)));
    exchange.push_submit(Ok(order(1, OrderSide::Buy, OrderStatus::New)));
    let store = Arc::new(InstrumentedStore::new());
    store.fail_save_order.store(true, Ordering::SeqCst);
    let sink = Arc::new(RecordingSink::default());

    let (tx, commands) = command_channel(8);
    tx.send(Command::ForceBuy).await.unwrap();

    let exit = run_service(
        loader,
        deps(exchange.clone(), store.clone(), sink.clone()),
        commands,
    )
    .await
    .unwrap();

    assert!(exit.is_fatal(), "unexpected exit reason {}", exit.reason);
    assert!(exit.reason.to_string().contains("save buy order"));
    assert_eq!(exit.teardown.completed, FULL_TEARDOWN.to_vec());
    assert!(exit.teardown.is_clean());

    assert_eq!(exchange.count_calls("submit_buy:0.01"), 1);
    assert!(store.inner.order(1).await.is_none());
    assert!(store.inner.session(&exit.thread_id).await.is_none());
    assert_eq!(store.saved_sessions().len(), 1);

    let locks = dir.path().join("locks");
    assert!(!locks.join(format!("{}.lock", exit.thread_id)).exists());
    assert!(!locks.join("master.lock").exists());

    match sink.events().last() {
        Some(TradeEvent::Shutdown { thread_id, reason }) => {
            assert_eq!(thread_id, &exit.thread_id);
            assert!(reason.contains("fatal"));
        }
        other => panic!("expected shutdown event, got {other:?}"),
    }
}

#[tokio::test(start_paused = true)]
async fn stop_command_shuts_down_cleanly() {
    let dir = tempfile::tempdir().unwrap();
    let loader = write_config(dir.path());
    let exchange = Arc::new(ScriptedExchange::new());
    let store = Arc::new(InstrumentedStore::new());
    let sink = Arc::new(RecordingSink::default());

    let (tx, commands) = command_channel(8);
    tx.send(Command::Stop("operator".to_string())).await.unwrap();

    let exit = run_service(loader, deps(exchange, store.clone(), sink.clone()), commands)
        .await
        .unwrap();

    assert_eq!(exit.reason, ShutdownReason::Requested("operator".to_string()));
    assert_eq!(exit.teardown.completed, FULL_TEARDOWN.to_vec());
    assert!(store.inner.session(&exit.thread_id).await.is_none());
    assert!(dir.path().join(format!("{}.toml", exit.thread_id)).exists());
    assert_eq!(sink.names(), vec!["SHUTDOWN"]);
}

async fn seed_unresolved(store: &InstrumentedStore) {
    store
        .inner
        .save_order(&OrderRecord {
            order: filled(42, OrderSide::Buy, dec!(0.1), dec!(300)),
            thread_id: "old".to_string(),
            cycle_id: "cycle-old".to_string(),
            price: dec!(3000),
            source_order_id: None,
            created_at: Utc::now(),
        })
        .await
        .unwrap();
    let mut tx = position("old", 42);
    tx.cycle_id = "cycle-old".to_string();
    store.inner.save_thread_transaction(&tx).await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn resumes_unresolved_identity_with_its_cycle() {
    let dir = tempfile::tempdir().unwrap();
    let loader = write_config(dir.path());
    let store = Arc::new(InstrumentedStore::new());
    seed_unresolved(&store).await;

    let (tx, commands) = command_channel(8);
    tx.send(Command::Stop("operator".to_string())).await.unwrap();

    let exit = run_service(
        loader,
        deps(
            Arc::new(ScriptedExchange::new()),
            store.clone(),
            Arc::new(RecordingSink::default()),
        ),
        commands,
    )
    .await
    .unwrap();

    assert_eq!(exit.thread_id, "old");
    let saved = store.saved_sessions();
    assert_eq!(saved.len(), 1);
    assert_eq!(saved[0].cycle_id, "cycle-old");
    assert_eq!(saved[0].symbol, SYMBOL);
    // the position is still open for the next run
    assert_eq!(store.count_open_threads("old").await.unwrap(), 1);
}

#[tokio::test(start_paused = true)]
async fn identity_owned_by_another_process_aborts_startup() {
    let dir = tempfile::tempdir().unwrap();
    let loader = write_config(dir.path());
    let store = Arc::new(InstrumentedStore::new());
    seed_unresolved(&store).await;
    std::fs::write(dir.path().join("locks").join("old.lock"), "1").unwrap();

    let (_tx, commands) = command_channel(8);
    let result = run_service(
        loader,
        deps(
            Arc::new(ScriptedExchange::new()),
            store.clone(),
            Arc::new(RecordingSink::default()),
        ),
        commands,
    )
    .await;

    match result {
        Err(PumpError::LockContention(id)) => assert_eq!(id, "old"),
        other => panic!("expected lock contention, got {other:?}"),
    }
    assert!(store.saved_sessions().is_empty());
    assert!(dir.path().join("locks").join("old.lock").exists());
}
