//! Exclusivity between order operations and teardown.
//!
//! The flag is held by the lifecycle engine for the whole of a buy or sell.
//! Teardown first marks the flag as draining, which rejects any new
//! acquisition, then waits for the current holder to release it.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::Notify;
use tracing::debug;

use crate::error::{PumpError, Result};

#[derive(Debug, Default)]
pub struct BusyFlag {
    busy: AtomicBool,
    draining: AtomicBool,
    released: Notify,
}

impl BusyFlag {
    pub fn new() -> Self {
        Self::default()
    }

    /// Enter busy mode. Released when the guard drops, on every exit path.
    pub fn acquire(&self) -> Result<BusyGuard<'_>> {
        if self.draining.load(Ordering::SeqCst) {
            return Err(PumpError::ShuttingDown);
        }
        if self
            .busy
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(PumpError::Busy);
        }
        // drain() may have started between the two checks
        if self.draining.load(Ordering::SeqCst) {
            self.release();
            return Err(PumpError::ShuttingDown);
        }
        Ok(BusyGuard { flag: self })
    }

    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::SeqCst)
    }

    pub fn is_draining(&self) -> bool {
        self.draining.load(Ordering::SeqCst)
    }

    /// Reject new acquisitions and wait until the current holder releases.
    pub async fn drain(&self, poll: Duration) {
        self.draining.store(true, Ordering::SeqCst);
        loop {
            let released = self.released.notified();
            if !self.is_busy() {
                return;
            }
            debug!("Waiting for in-flight order operation to finish");
            tokio::select! {
                _ = released => {}
                _ = tokio::time::sleep(poll) => {}
            }
        }
    }

    fn release(&self) {
        self.busy.store(false, Ordering::SeqCst);
        self.released.notify_waiters();
    }
}

/// Holding this keeps the session busy
#[derive(Debug)]
pub struct BusyGuard<'a> {
    flag: &'a BusyFlag,
}

impl Drop for BusyGuard<'_> {
    fn drop(&mut self) {
        self.flag.release();
    }
}
