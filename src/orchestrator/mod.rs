//! Concurrency orchestrator
//!
//! Runs the recurring timers, the main loop and its four streaming tasks
//! for one trading identity.

pub mod commands;
pub mod context;
pub mod market;
pub mod runner;
pub mod service;
pub mod streams;
pub mod strategy;
pub mod timers;

pub use commands::{command_channel, spawn_signal_forwarder, Command, CommandReceiver};
pub use context::TradingContext;
pub use market::{MarketSnapshot, MarketState};
pub use runner::MainLoop;
pub use service::{run_service, ServiceDeps, ServiceExit};
pub use streams::StreamStop;
pub use strategy::{Decision, ProfitTargetStrategy, Strategy, StrategyInput};
pub use timers::{jittered, spawn_periodic};
