use pumpbot::adapters::PostgresStore;
use pumpbot::config::{AppConfig, LoggingConfig};
use pumpbot::error::Result;
use pumpbot::persistence::{MemoryStore, PersistenceStore};
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

pub fn init_logging(logging: &LoggingConfig) {
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!("{},pumpbot=debug,sqlx=warn", logging.level))
    });

    // `tracing_appender::rolling::daily` aborts if it cannot create the first
    // file, so writability is checked up front.
    let file_layer = logging.dir.as_deref().and_then(|log_dir| {
        if let Err(e) = std::fs::create_dir_all(log_dir) {
            eprintln!(
                "Warning: Could not create log directory {} ({}), file logging disabled",
                log_dir, e
            );
            return None;
        }
        let test_path = std::path::Path::new(log_dir).join(".pumpbot_write_test");
        match std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&test_path)
        {
            Ok(_) => {
                let _ = std::fs::remove_file(&test_path);
                let file_appender = tracing_appender::rolling::daily(log_dir, "pumpbot.log");
                let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
                // lives for the whole process
                Box::leak(Box::new(guard));
                eprintln!("Logging to: {}/pumpbot.log", log_dir);
                Some(
                    tracing_subscriber::fmt::layer()
                        .with_writer(non_blocking)
                        .with_ansi(false)
                        .with_target(true),
                )
            }
            Err(e) => {
                eprintln!(
                    "Warning: Could not write to log directory {} ({}), file logging disabled",
                    log_dir, e
                );
                None
            }
        }
    });

    let (json_layer, text_layer) = if logging.json {
        (Some(tracing_subscriber::fmt::layer().json().with_target(true)), None)
    } else {
        (
            None,
            Some(
                tracing_subscriber::fmt::layer()
                    .with_target(true)
                    .with_thread_ids(false)
                    .with_file(false)
                    .with_line_number(false),
            ),
        )
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(json_layer)
        .with(text_layer)
        .with(file_layer)
        .init();
}

pub fn init_logging_simple() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::WARN)
        .try_init();
}

/// PostgreSQL when a database URL is configured, otherwise the in-memory store.
pub async fn build_store(config: &AppConfig) -> Result<Arc<dyn PersistenceStore>> {
    match config.database.url.as_deref().filter(|url| !url.is_empty()) {
        Some(url) => {
            let store = PostgresStore::new(url, config.database.max_connections).await?;
            store.migrate().await?;
            Ok(Arc::new(store))
        }
        None => {
            if config.trading.dry_run {
                info!("No database configured, using in-memory store");
            } else {
                warn!("No database configured: positions will not survive a restart");
            }
            Ok(Arc::new(MemoryStore::new()))
        }
    }
}
