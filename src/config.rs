use chrono::NaiveTime;
use config::{Config, ConfigError, Environment, File};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::error::Result;

/// Configuration shared between the orchestrator timers and the lifecycle engine.
///
/// Readers clone a snapshot; a refresh may land while an order operation is
/// running, in which case that operation finishes on the older snapshot.
pub type SharedConfig = Arc<RwLock<AppConfig>>;

/// Main configuration structure
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct AppConfig {
    pub exchange: ExchangeConfig,
    pub trading: TradingConfig,
    pub schedule: ScheduleConfig,
    pub timers: TimerConfig,
    pub node: NodeConfig,
    pub database: DatabaseConfig,
    pub notifications: NotificationConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ExchangeConfig {
    /// Adapter name (only "binance" is built in)
    pub name: String,
    /// REST API endpoint
    pub rest_url: String,
    /// WebSocket base endpoint
    pub ws_url: String,
    /// Sandbox mode: also disables master election
    pub testnet: bool,
    #[serde(skip_serializing)]
    pub api_key: String,
    #[serde(skip_serializing)]
    pub secret_key: String,
    pub recv_window_ms: u64,
    /// Kline interval for the candle stream and history bootstrap
    pub kline_interval: String,
    /// Number of historical candles loaded on the first iteration
    pub history_limit: u32,
}

impl Default for ExchangeConfig {
    fn default() -> Self {
        Self {
            name: "binance".to_string(),
            rest_url: "https://api.binance.com".to_string(),
            ws_url: "wss://stream.binance.com:9443/ws".to_string(),
            testnet: false,
            api_key: String::new(),
            secret_key: String::new(),
            recv_window_ms: 5000,
            kline_interval: "1m".to_string(),
            history_limit: 500,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TradingConfig {
    /// Trading pair (e.g. "BTCUSDT")
    pub symbol: String,
    /// Quote currency of the pair (e.g. "USDT")
    pub symbol_fiat: String,
    /// Fiat amount spent per buy
    pub buy_quantity_fiat: Decimal,
    /// Fiat kept aside and never spent
    pub symbol_fiat_stash: Decimal,
    /// Minimum profit ratio before a profit-target sell (0.01 = 1%)
    pub profit_min: Decimal,
    /// Exchange commission per side (0.00075 = 0.075%)
    pub exchange_commission: Decimal,
    /// Total wait before a pending sell is canceled, split in 10 ticks
    pub sell_wait_before_cancel_secs: u64,
    /// Minimum wait after a canceled sell before selling again
    pub sell_wait_after_cancel_secs: u64,
    /// Minimum wait between buys
    pub buy_wait_secs: u64,
    /// Run the full loop without contacting the exchange for orders
    pub dry_run: bool,
    /// Ignore unresolved identities in the store and mint a new one
    pub new_session: bool,
}

impl Default for TradingConfig {
    fn default() -> Self {
        Self {
            symbol: "BTCUSDT".to_string(),
            symbol_fiat: "USDT".to_string(),
            buy_quantity_fiat: dec!(100),
            symbol_fiat_stash: Decimal::ZERO,
            profit_min: dec!(0.01),
            exchange_commission: dec!(0.00075),
            sell_wait_before_cancel_secs: 60,
            sell_wait_after_cancel_secs: 300,
            buy_wait_secs: 60,
            dry_run: false,
            new_session: false,
        }
    }
}

impl TradingConfig {
    /// One of the ten ticks slept between sell reconciliation polls.
    pub fn sell_cancel_tick(&self) -> Duration {
        Duration::from_secs(self.sell_wait_before_cancel_secs / 10)
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ScheduleConfig {
    /// Only trade inside [time_start, time_stop]
    pub time_enforce: bool,
    /// Local time, "HH:MM"
    pub time_start: String,
    /// Local time, "HH:MM"
    pub time_stop: String,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            time_enforce: false,
            time_start: "00:00".to_string(),
            time_stop: "23:59".to_string(),
        }
    }
}

impl ScheduleConfig {
    fn parse(value: &str) -> std::result::Result<NaiveTime, String> {
        NaiveTime::parse_from_str(value.trim(), "%H:%M")
            .map_err(|e| format!("invalid time '{value}': {e}"))
    }

    /// Whether `now` falls inside the trading window. Always true when not enforced.
    pub fn is_open_at(&self, now: NaiveTime) -> bool {
        if !self.time_enforce {
            return true;
        }
        match (Self::parse(&self.time_start), Self::parse(&self.time_stop)) {
            (Ok(start), Ok(stop)) => now >= start && now <= stop,
            // validate() rejects this; an unparsable window never blocks trading
            _ => true,
        }
    }
}

/// Orchestration intervals. Defaults are the production cadence.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TimerConfig {
    pub server_time_secs: u64,
    pub config_refresh_secs: u64,
    pub pending_reconcile_secs: u64,
    /// Upper bound of the random delay added to every reconcile cycle
    pub pending_reconcile_jitter_secs: u64,
    pub role_check_secs: u64,
    pub listen_key_keepalive_secs: u64,
    pub sell_count_refresh_secs: u64,
    /// Look-back window of the recent sell count
    pub sell_count_window_mins: i64,
    pub buy_poll_ms: u64,
    pub sell_settle_delay_ms: u64,
    pub restart_pause_ms: u64,
    pub window_poll_secs: u64,
    pub teardown_poll_ms: u64,
}

impl Default for TimerConfig {
    fn default() -> Self {
        Self {
            server_time_secs: 300,
            config_refresh_secs: 10,
            pending_reconcile_secs: 180,
            pending_reconcile_jitter_secs: 180,
            role_check_secs: 60,
            listen_key_keepalive_secs: 60,
            sell_count_refresh_secs: 180,
            sell_count_window_mins: 60,
            buy_poll_ms: 3000,
            sell_settle_delay_ms: 2000,
            restart_pause_ms: 3000,
            window_poll_secs: 300,
            teardown_poll_ms: 200,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct NodeConfig {
    /// Directory holding `<thread_id>.lock` and the heartbeat file
    pub lock_dir: PathBuf,
    pub heartbeat_file: String,
    /// Age after which a master heartbeat is considered abandoned
    pub stale_after_secs: u64,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            lock_dir: PathBuf::from("."),
            heartbeat_file: "master.lock".to_string(),
            stale_after_secs: 100,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// PostgreSQL connection URL; the in-memory store is used when absent
    #[serde(skip_serializing)]
    pub url: Option<String>,
    pub max_connections: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: None,
            max_connections: 5,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct NotificationConfig {
    /// Webhook receiving trade events
    #[serde(skip_serializing)]
    pub webhook_url: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,
    /// Enable JSON formatted logs
    pub json: bool,
    /// Directory for the daily rotating log file
    pub dir: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
            dir: None,
        }
    }
}

impl AppConfig {
    /// Validate configuration values
    pub fn validate(&self) -> std::result::Result<(), Vec<String>> {
        let mut errors = Vec::new();

        if self.trading.symbol.trim().is_empty() {
            errors.push("trading.symbol must be set".to_string());
        }
        if self.trading.symbol_fiat.trim().is_empty() {
            errors.push("trading.symbol_fiat must be set".to_string());
        } else if !self.trading.symbol.ends_with(&self.trading.symbol_fiat) {
            errors.push(format!(
                "trading.symbol {} is not quoted in {}",
                self.trading.symbol, self.trading.symbol_fiat
            ));
        }
        if self.trading.buy_quantity_fiat <= Decimal::ZERO {
            errors.push("trading.buy_quantity_fiat must be positive".to_string());
        }
        if self.trading.profit_min < Decimal::ZERO {
            errors.push("trading.profit_min must not be negative".to_string());
        }
        if self.schedule.time_enforce {
            for value in [&self.schedule.time_start, &self.schedule.time_stop] {
                if let Err(e) = ScheduleConfig::parse(value) {
                    errors.push(format!("schedule: {e}"));
                }
            }
        }
        if self.node.stale_after_secs <= self.timers.role_check_secs {
            errors.push(
                "node.stale_after_secs must exceed timers.role_check_secs".to_string(),
            );
        }
        if self.timers.buy_poll_ms == 0 {
            errors.push("timers.buy_poll_ms must be positive".to_string());
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

/// Loads layered configuration and keeps per-identity copies on disk.
#[derive(Debug, Clone)]
pub struct ConfigLoader {
    dir: PathBuf,
    /// Command-line flags applied on top of every source, reloads included
    overrides: Vec<(&'static str, bool)>,
}

impl ConfigLoader {
    pub fn new<P: AsRef<Path>>(config_dir: P) -> Self {
        Self {
            dir: config_dir.as_ref().to_path_buf(),
            overrides: Vec::new(),
        }
    }

    pub fn with_override(mut self, key: &'static str, value: bool) -> Self {
        self.overrides.push((key, value));
        self
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn thread_file(&self, thread_id: &str) -> PathBuf {
        self.dir.join(format!("{thread_id}.toml"))
    }

    /// Load configuration from files and environment.
    ///
    /// When `thread_id` is given, `<dir>/<thread_id>.toml` is layered on top of
    /// the shared files so a resumed identity trades with its own settings.
    pub fn load(&self, thread_id: Option<&str>) -> std::result::Result<AppConfig, ConfigError> {
        let env_file =
            std::env::var("PUMP_ENV").unwrap_or_else(|_| "development".to_string());

        let mut builder = Config::builder()
            .add_source(File::from(self.dir.join("default.toml")).required(false))
            .add_source(File::from(self.dir.join(format!("{env_file}.toml"))).required(false));

        if let Some(id) = thread_id {
            builder = builder.add_source(File::from(self.thread_file(id)).required(false));
        }

        // Environment overrides (PUMP_TRADING__SYMBOL, etc.)
        builder = builder.add_source(
            Environment::with_prefix("PUMP")
                .separator("__")
                .try_parsing(true),
        );
        for (key, value) in &self.overrides {
            builder = builder.set_override(*key, *value)?;
        }

        builder.build()?.try_deserialize()
    }

    /// Write `config` as the identity's own file unless one already exists.
    pub fn ensure_thread_file(&self, thread_id: &str, config: &AppConfig) -> Result<bool> {
        let path = self.thread_file(thread_id);
        if path.exists() {
            debug!(thread_id, path = %path.display(), "Identity config already present");
            return Ok(false);
        }
        std::fs::create_dir_all(&self.dir)?;
        std::fs::write(&path, toml::to_string_pretty(config)?)?;
        info!(thread_id, path = %path.display(), "Wrote identity config");
        Ok(true)
    }

    /// Reload the identity's configuration into the shared handle.
    pub async fn refresh(&self, thread_id: &str, shared: &SharedConfig) -> Result<()> {
        let fresh = self.load(Some(thread_id))?;
        *shared.write().await = fresh;
        Ok(())
    }
}
