//! Shutdown signal
//!
//! Fatal errors and operator stops never exit the process directly. They
//! request shutdown here; the main loop observes the request, stops its
//! tasks and runs the ordered teardown.

use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::watch;
use tracing::{info, warn};

/// Why the process is shutting down
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShutdownReason {
    /// Operator stop (SIGINT / SIGTERM or a stop command)
    Requested(String),
    /// Unrecoverable error inside the core
    Fatal(String),
}

impl std::fmt::Display for ShutdownReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ShutdownReason::Requested(source) => write!(f, "requested ({})", source),
            ShutdownReason::Fatal(message) => write!(f, "fatal: {}", message),
        }
    }
}

/// Shutdown coordinator shared by every task
pub struct GracefulShutdown {
    shutdown_requested: AtomicBool,
    reason_tx: watch::Sender<Option<ShutdownReason>>,
}

impl Default for GracefulShutdown {
    fn default() -> Self {
        Self::new()
    }
}

impl GracefulShutdown {
    pub fn new() -> Self {
        let (reason_tx, _) = watch::channel(None);
        Self {
            shutdown_requested: AtomicBool::new(false),
            reason_tx,
        }
    }

    /// Check if shutdown has been requested
    pub fn is_shutdown_requested(&self) -> bool {
        self.shutdown_requested.load(Ordering::SeqCst)
    }

    /// Request shutdown. The first reason wins.
    pub fn request_shutdown(&self, reason: ShutdownReason) {
        if self.shutdown_requested.swap(true, Ordering::SeqCst) {
            warn!("Shutdown already requested, ignoring: {}", reason);
            return;
        }

        info!("Shutdown requested: {}", reason);
        self.reason_tx.send_replace(Some(reason));
    }

    pub fn reason(&self) -> Option<ShutdownReason> {
        self.reason_tx.borrow().clone()
    }

    /// Create a token that can be used to wait for shutdown
    pub fn token(&self) -> ShutdownToken {
        ShutdownToken {
            reason_rx: self.reason_tx.subscribe(),
        }
    }
}

/// Token for waiting on shutdown in async tasks
#[derive(Clone)]
pub struct ShutdownToken {
    reason_rx: watch::Receiver<Option<ShutdownReason>>,
}

impl ShutdownToken {
    pub fn is_shutdown_requested(&self) -> bool {
        self.reason_rx.borrow().is_some()
    }

    /// Wait for the shutdown request and return its reason.
    pub async fn wait_for_shutdown(&mut self) -> ShutdownReason {
        loop {
            if let Some(reason) = self.reason_rx.borrow_and_update().clone() {
                return reason;
            }
            if self.reason_rx.changed().await.is_err() {
                return ShutdownReason::Fatal("shutdown coordinator dropped".to_string());
            }
        }
    }
}
