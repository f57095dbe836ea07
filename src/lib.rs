pub mod adapters;
pub mod cli;
pub mod config;
pub mod coordination;
pub mod domain;
pub mod error;
pub mod exchange;
pub mod lifecycle;
pub mod orchestrator;
pub mod persistence;

pub use config::{AppConfig, ConfigLoader, SharedConfig};
pub use coordination::{
    BusyFlag, GracefulShutdown, IdentityLock, NodeCoordinator, NodeRole, ShutdownReason,
    Teardown, TeardownReport,
};
pub use error::{ExchangeError, PumpError, Result};
pub use lifecycle::{BuyOutcome, OrderLifecycle, PendingOrderSweep, SellOutcome};
pub use orchestrator::{run_service, ServiceDeps, ServiceExit};
pub use persistence::{MemoryStore, PersistenceStore};
