use thiserror::Error;

/// Main error type for the bot
#[derive(Error, Debug)]
pub enum PumpError {
    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Configuration serialization error: {0}")]
    ConfigWrite(#[from] toml::ser::Error),

    // Database errors
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    // Exchange errors
    #[error("Exchange error: {0}")]
    Exchange(#[from] ExchangeError),

    // Serialization errors
    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    // Persistence errors raised by non-SQL stores
    #[error("Store error: {0}")]
    Store(String),

    // Session and coordination errors
    #[error("Identity {0} is already locked by another process")]
    LockContention(String),

    #[error("Lifecycle operation already in progress")]
    Busy,

    #[error("Shutting down, no new order operations accepted")]
    ShuttingDown,

    /// Unrecoverable condition; the caller must run the ordered teardown.
    #[error("Fatal: {0}")]
    Fatal(String),

    // Validation errors
    #[error("Validation failed: {0}")]
    Validation(String),

    // IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl PumpError {
    /// Wrap any error as fatal, keeping its message.
    pub fn fatal(context: &str, err: impl std::fmt::Display) -> Self {
        PumpError::Fatal(format!("{context}: {err}"))
    }

    pub fn is_fatal(&self) -> bool {
        matches!(self, PumpError::Fatal(_))
    }
}

/// Result type alias for PumpError
pub type Result<T> = std::result::Result<T, PumpError>;

/// Exchange race conditions reported as cancel-time error codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RaceCondition {
    /// The order was filled in full before the cancel reached the matching engine.
    AlreadyFilled,
    /// The balance backing the order was already consumed.
    InsufficientBalance,
}

/// Exchange code: unknown order sent (order already filled or gone).
pub const CODE_UNKNOWN_ORDER: i64 = -2011;
/// Exchange code: account has insufficient balance for requested action.
pub const CODE_INSUFFICIENT_BALANCE: i64 = -2010;

/// Errors returned by an exchange adapter
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ExchangeError {
    /// Network failure, timeout or server-side 5xx. Safe to retry.
    #[error("Transport error: {0}")]
    Transport(String),

    /// Semantic error returned by the exchange, with its stable code.
    #[error("Exchange API error {code}: {message}")]
    Api { code: i64, message: String },

    #[error("Decode error: {0}")]
    Decode(String),
}

impl ExchangeError {
    pub fn api(code: i64, message: impl Into<String>) -> Self {
        ExchangeError::Api {
            code,
            message: message.into(),
        }
    }

    pub fn is_transport(&self) -> bool {
        matches!(self, ExchangeError::Transport(_))
    }

    pub fn code(&self) -> Option<i64> {
        match self {
            ExchangeError::Api { code, .. } => Some(*code),
            _ => None,
        }
    }

    /// Classify the documented cancel-time race codes.
    pub fn race_condition(&self) -> Option<RaceCondition> {
        match self.code() {
            Some(CODE_UNKNOWN_ORDER) => Some(RaceCondition::AlreadyFilled),
            Some(CODE_INSUFFICIENT_BALANCE) => Some(RaceCondition::InsufficientBalance),
            _ => None,
        }
    }
}

impl From<reqwest::Error> for ExchangeError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            ExchangeError::Decode(err.to_string())
        } else {
            ExchangeError::Transport(err.to_string())
        }
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for ExchangeError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        ExchangeError::Transport(err.to_string())
    }
}
