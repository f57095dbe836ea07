//! Ordered teardown
//!
//! Runs once, after every task has been told to stop:
//! 1. wait until no order operation is in flight
//! 2. release the master heartbeat if held
//! 3. release the identity lock
//! 4. delete the session row
//! 5. announce the shutdown
//!
//! Failures in one step are logged and do not skip the remaining steps.

use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};

use super::identity::IdentityLock;
use super::node::NodeCoordinator;
use super::shutdown::ShutdownReason;
use crate::adapters::NotificationSink;
use crate::domain::{Session, TradeEvent};
use crate::persistence::PersistenceStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TeardownStep {
    Drained,
    MasterReleased,
    IdentityReleased,
    SessionDeleted,
    Announced,
}

#[derive(Debug, Default, Clone)]
pub struct TeardownReport {
    /// Steps that completed, in order
    pub completed: Vec<TeardownStep>,
    pub failures: Vec<String>,
}

impl TeardownReport {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

pub struct Teardown {
    session: Arc<Session>,
    store: Arc<dyn PersistenceStore>,
    notifier: Arc<dyn NotificationSink>,
    node: NodeCoordinator,
    identity: IdentityLock,
    drain_poll: Duration,
}

impl Teardown {
    pub fn new(
        session: Arc<Session>,
        store: Arc<dyn PersistenceStore>,
        notifier: Arc<dyn NotificationSink>,
        node: NodeCoordinator,
        identity: IdentityLock,
        drain_poll: Duration,
    ) -> Self {
        Self {
            session,
            store,
            notifier,
            node,
            identity,
            drain_poll,
        }
    }

    pub async fn run(self, reason: &ShutdownReason) -> TeardownReport {
        let thread_id = self.session.thread_id().to_string();
        let mut report = TeardownReport::default();
        info!(thread_id = %thread_id, %reason, "Teardown started");

        self.session.busy().drain(self.drain_poll).await;
        report.completed.push(TeardownStep::Drained);

        match self.node.release(&self.session) {
            Ok(true) => report.completed.push(TeardownStep::MasterReleased),
            Ok(false) => {}
            Err(e) => {
                error!(thread_id = %thread_id, "Failed to release master heartbeat: {}", e);
                report.failures.push(format!("master heartbeat: {e}"));
            }
        }

        match self.identity.release() {
            Ok(()) => report.completed.push(TeardownStep::IdentityReleased),
            Err(e) => {
                error!(thread_id = %thread_id, "Failed to release identity lock: {}", e);
                report.failures.push(format!("identity lock: {e}"));
            }
        }

        match self.store.delete_session(&thread_id).await {
            Ok(()) => report.completed.push(TeardownStep::SessionDeleted),
            Err(e) => {
                error!(thread_id = %thread_id, "Failed to delete session: {}", e);
                report.failures.push(format!("session row: {e}"));
            }
        }

        info!(thread_id = %thread_id, %reason, "Clean Shutdown");
        self.notifier
            .notify(&TradeEvent::Shutdown {
                thread_id,
                reason: reason.to_string(),
            })
            .await;
        report.completed.push(TeardownStep::Announced);
        report
    }
}
