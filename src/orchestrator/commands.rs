//! Operator commands
//!
//! OS signals are forwarded into an mpsc channel; the listener task applies
//! them to the session (forced buy / sell flags) or requests shutdown.

use std::sync::Arc;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::coordination::{GracefulShutdown, ShutdownReason};
use crate::domain::Session;
use crate::error::Result;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    ForceBuy,
    ForceSell,
    /// Stop the process; carries the source for the shutdown log
    Stop(String),
}

/// Receiver shared across main-loop iterations; one listener holds it at a time.
pub type CommandReceiver = Arc<Mutex<mpsc::Receiver<Command>>>;

pub fn command_channel(capacity: usize) -> (mpsc::Sender<Command>, CommandReceiver) {
    let (tx, rx) = mpsc::channel(capacity);
    (tx, Arc::new(Mutex::new(rx)))
}

/// SIGUSR1 forces a buy, SIGUSR2 a sell; SIGINT and SIGTERM stop.
#[cfg(unix)]
pub fn spawn_signal_forwarder(tx: mpsc::Sender<Command>) -> Result<JoinHandle<()>> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut interrupt = signal(SignalKind::interrupt())?;
    let mut terminate = signal(SignalKind::terminate())?;
    let mut user1 = signal(SignalKind::user_defined1())?;
    let mut user2 = signal(SignalKind::user_defined2())?;

    Ok(tokio::spawn(async move {
        loop {
            let command = tokio::select! {
                _ = interrupt.recv() => Command::Stop("SIGINT".to_string()),
                _ = terminate.recv() => Command::Stop("SIGTERM".to_string()),
                _ = user1.recv() => Command::ForceBuy,
                _ = user2.recv() => Command::ForceSell,
            };
            let stop = matches!(command, Command::Stop(_));
            if tx.send(command).await.is_err() || stop {
                break;
            }
        }
    }))
}

#[cfg(not(unix))]
pub fn spawn_signal_forwarder(tx: mpsc::Sender<Command>) -> Result<JoinHandle<()>> {
    Ok(tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            let _ = tx.send(Command::Stop("Ctrl-C".to_string())).await;
        }
    }))
}

/// Apply one command. Returns false once a stop was requested.
pub fn apply_command(command: Command, session: &Session, shutdown: &GracefulShutdown) -> bool {
    match command {
        Command::ForceBuy => {
            info!(thread_id = %session.thread_id(), "Forced buy requested");
            session.request_force_buy();
            true
        }
        Command::ForceSell => {
            info!(thread_id = %session.thread_id(), "Forced sell requested");
            session.request_force_sell();
            true
        }
        Command::Stop(source) => {
            shutdown.request_shutdown(ShutdownReason::Requested(source));
            false
        }
    }
}

/// Listener task: runs until the stream-stop flag is raised or a stop command arrives.
pub async fn run_command_listener(
    commands: CommandReceiver,
    session: Arc<Session>,
    shutdown: Arc<GracefulShutdown>,
    mut stop: watch::Receiver<bool>,
) {
    let mut rx = commands.lock().await;
    let mut open = true;

    loop {
        if *stop.borrow_and_update() {
            return;
        }
        tokio::select! {
            command = rx.recv(), if open => match command {
                Some(command) => {
                    if !apply_command(command, &session, &shutdown) {
                        return;
                    }
                }
                None => {
                    warn!("Command channel closed");
                    open = false;
                }
            },
            changed = stop.changed() => {
                if changed.is_err() {
                    return;
                }
            }
        }
    }
}
