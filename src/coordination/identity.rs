//! Trading identity resolution and the per-identity process lock.

use std::fs::OpenOptions;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::domain::new_identity;
use crate::error::{PumpError, Result};
use crate::persistence::PersistenceStore;

/// Identity this process trades under
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedIdentity {
    pub thread_id: String,
    pub symbol: String,
    /// Cycle id of the unresolved positions being resumed
    pub resumed_cycle_id: Option<String>,
}

impl ResolvedIdentity {
    pub fn is_resumed(&self) -> bool {
        self.resumed_cycle_id.is_some()
    }
}

/// Resume an identity left with open positions, or mint a new one.
pub async fn resolve_identity(
    store: &dyn PersistenceStore,
    configured_symbol: &str,
    new_session: bool,
) -> Result<ResolvedIdentity> {
    if !new_session {
        if let Some(unresolved) = store.find_distinct_unresolved_thread().await? {
            let symbol = store
                .get_symbol_for_thread(&unresolved.thread_id)
                .await?
                .unwrap_or_else(|| configured_symbol.to_string());
            info!(
                thread_id = %unresolved.thread_id,
                %symbol,
                "Resuming unresolved identity"
            );
            return Ok(ResolvedIdentity {
                thread_id: unresolved.thread_id,
                symbol,
                resumed_cycle_id: Some(unresolved.cycle_id),
            });
        }
    }

    let thread_id = new_identity();
    info!(thread_id = %thread_id, symbol = configured_symbol, "Starting new identity");
    Ok(ResolvedIdentity {
        thread_id,
        symbol: configured_symbol.to_string(),
        resumed_cycle_id: None,
    })
}

/// `{thread_id}.lock`, held for the life of the process.
#[derive(Debug)]
pub struct IdentityLock {
    thread_id: String,
    path: PathBuf,
}

impl IdentityLock {
    /// Create the lock file atomically; fails if another process owns the identity.
    pub fn acquire(dir: &Path, thread_id: &str) -> Result<Self> {
        std::fs::create_dir_all(dir)?;
        let path = dir.join(format!("{thread_id}.lock"));
        let mut file = match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                return Err(PumpError::LockContention(thread_id.to_string()));
            }
            Err(e) => return Err(e.into()),
        };
        writeln!(file, "{}", std::process::id())?;

        info!(thread_id, path = %path.display(), "Identity lock acquired");
        Ok(Self {
            thread_id: thread_id.to_string(),
            path,
        })
    }

    pub fn thread_id(&self) -> &str {
        &self.thread_id
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Remove the lock file. A missing file counts as released.
    pub fn release(&self) -> Result<()> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => {
                info!(thread_id = %self.thread_id, "Identity lock released");
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::NotFound => {
                warn!(thread_id = %self.thread_id, "Identity lock already gone");
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }
}
