//! Master election through a shared heartbeat file.
//!
//! The master refreshes the file's modification time on every role check.
//! A slave claims mastership when the file is missing, or when it has not
//! been refreshed within the stale window. Claiming is an exclusive create,
//! so two racing slaves cannot both win. The file holds the owner's
//! identity; a master that finds another identity in it steps down.

use std::fs::{File, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use tracing::{debug, info, warn};

use crate::config::NodeConfig;
use crate::domain::Session;
use crate::error::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeRole {
    Master,
    Slave,
}

#[derive(Debug, Clone)]
pub struct NodeCoordinator {
    heartbeat: PathBuf,
    stale_after: Duration,
    /// Testnet nodes never take the master role
    forced_slave: bool,
}

impl NodeCoordinator {
    pub fn new(heartbeat: PathBuf, stale_after: Duration, forced_slave: bool) -> Self {
        Self {
            heartbeat,
            stale_after,
            forced_slave,
        }
    }

    pub fn from_config(node: &NodeConfig, testnet: bool) -> Self {
        Self::new(
            node.lock_dir.join(&node.heartbeat_file),
            Duration::from_secs(node.stale_after_secs),
            testnet,
        )
    }

    pub fn heartbeat_path(&self) -> &Path {
        &self.heartbeat
    }

    /// Evaluate the role once and store it on the session.
    pub fn check(&self, session: &Session) -> Result<NodeRole> {
        let was_master = session.is_master();
        let owner = session.thread_id();
        let role = if self.forced_slave {
            NodeRole::Slave
        } else if was_master {
            self.refresh(owner)?
        } else {
            self.contend(owner)?
        };

        let is_master = role == NodeRole::Master;
        session.set_master(is_master);
        if is_master != was_master {
            info!(
                thread_id = %session.thread_id(),
                role = ?role,
                "Node role changed"
            );
        }
        Ok(role)
    }

    /// Remove the heartbeat file if this session holds it.
    pub fn release(&self, session: &Session) -> Result<bool> {
        if !session.is_master() {
            return Ok(false);
        }
        session.set_master(false);
        match self.owner()? {
            Some(owner) if owner == session.thread_id() => {}
            other => {
                warn!(thread_id = %session.thread_id(), owner = ?other, "Heartbeat not ours, leaving it");
                return Ok(false);
            }
        }
        match std::fs::remove_file(&self.heartbeat) {
            Ok(()) => {
                info!(thread_id = %session.thread_id(), "Master heartbeat released");
                Ok(true)
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    fn refresh(&self, owner: &str) -> Result<NodeRole> {
        match self.owner()? {
            None => {
                warn!("Master heartbeat disappeared, reclaiming");
                return self.claim(owner);
            }
            Some(current) if current != owner => {
                warn!(%current, "Master heartbeat taken over by another node, stepping down");
                return Ok(NodeRole::Slave);
            }
            Some(_) => {}
        }
        match OpenOptions::new().write(true).open(&self.heartbeat) {
            Ok(file) => {
                file.set_modified(SystemTime::now())?;
                debug!("Master heartbeat refreshed");
                Ok(NodeRole::Master)
            }
            Err(e) if e.kind() == ErrorKind::NotFound => self.claim(owner),
            Err(e) => Err(e.into()),
        }
    }

    fn contend(&self, owner: &str) -> Result<NodeRole> {
        match self.heartbeat_age()? {
            None => self.claim(owner),
            Some(age) if age > self.stale_after => {
                // re-read right before removal; the master may have refreshed meanwhile
                match self.heartbeat_age()? {
                    Some(age) if age > self.stale_after => {
                        warn!(age_secs = age.as_secs(), "Master heartbeat stale, taking over");
                        match std::fs::remove_file(&self.heartbeat) {
                            Ok(()) => {}
                            Err(e) if e.kind() == ErrorKind::NotFound => {}
                            Err(e) => return Err(e.into()),
                        }
                        self.claim(owner)
                    }
                    None => self.claim(owner),
                    Some(_) => Ok(NodeRole::Slave),
                }
            }
            Some(_) => Ok(NodeRole::Slave),
        }
    }

    fn claim(&self, owner: &str) -> Result<NodeRole> {
        let mut file = match OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&self.heartbeat)
        {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::AlreadyExists => return Ok(NodeRole::Slave),
            Err(e) => return Err(e.into()),
        };
        file.write_all(owner.as_bytes())?;
        file.sync_all()?;

        // a late stale takeover may have replaced the file meanwhile
        match self.owner()? {
            Some(current) if current == owner => Ok(NodeRole::Master),
            _ => Ok(NodeRole::Slave),
        }
    }

    /// Identity written in the heartbeat file, `None` when there is no file.
    fn owner(&self) -> Result<Option<String>> {
        match std::fs::read_to_string(&self.heartbeat) {
            Ok(content) => Ok(Some(content.trim().to_string())),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn heartbeat_age(&self) -> Result<Option<Duration>> {
        let modified = match File::open(&self.heartbeat).and_then(|f| f.metadata()) {
            Ok(meta) => meta.modified()?,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        Ok(Some(
            SystemTime::now()
                .duration_since(modified)
                .unwrap_or_default(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session(id: &str) -> Session {
        Session::new(id.to_string(), "BTCUSDT".to_string(), "USDT".to_string())
    }

    fn coordinator(dir: &Path) -> NodeCoordinator {
        NodeCoordinator::new(dir.join("master.lock"), Duration::from_secs(100), false)
    }

    fn age_file(path: &Path, by: Duration) {
        let file = OpenOptions::new().write(true).open(path).unwrap();
        file.set_modified(SystemTime::now() - by).unwrap();
    }

    #[test]
    fn first_node_becomes_master_second_stays_slave() {
        let dir = tempfile::tempdir().unwrap();
        let node = coordinator(dir.path());
        let a = session("a");
        let b = session("b");

        assert_eq!(node.check(&a).unwrap(), NodeRole::Master);
        assert_eq!(node.check(&b).unwrap(), NodeRole::Slave);
        assert!(a.is_master());
        assert!(!b.is_master());

        // master keeps the role on subsequent checks
        assert_eq!(node.check(&a).unwrap(), NodeRole::Master);
    }

    #[test]
    fn stale_heartbeat_is_taken_over() {
        let dir = tempfile::tempdir().unwrap();
        let node = coordinator(dir.path());
        let a = session("a");
        let b = session("b");
        node.check(&a).unwrap();

        age_file(node.heartbeat_path(), Duration::from_secs(99));
        assert_eq!(node.check(&b).unwrap(), NodeRole::Slave);

        age_file(node.heartbeat_path(), Duration::from_secs(101));
        assert_eq!(node.check(&b).unwrap(), NodeRole::Master);
        assert!(node.heartbeat_age().unwrap().unwrap() < Duration::from_secs(5));
    }

    #[test]
    fn master_refresh_resets_age() {
        let dir = tempfile::tempdir().unwrap();
        let node = coordinator(dir.path());
        let a = session("a");
        node.check(&a).unwrap();

        age_file(node.heartbeat_path(), Duration::from_secs(90));
        node.check(&a).unwrap();
        assert!(node.heartbeat_age().unwrap().unwrap() < Duration::from_secs(5));
    }

    #[test]
    fn testnet_node_never_becomes_master() {
        let dir = tempfile::tempdir().unwrap();
        let node = NodeCoordinator::new(
            dir.path().join("master.lock"),
            Duration::from_secs(100),
            true,
        );
        let a = session("a");
        assert_eq!(node.check(&a).unwrap(), NodeRole::Slave);
        assert!(!node.heartbeat_path().exists());
    }

    #[test]
    fn release_removes_heartbeat_only_for_master() {
        let dir = tempfile::tempdir().unwrap();
        let node = coordinator(dir.path());
        let a = session("a");
        let b = session("b");
        node.check(&a).unwrap();
        node.check(&b).unwrap();

        assert!(!node.release(&b).unwrap());
        assert!(node.heartbeat_path().exists());
        assert!(node.release(&a).unwrap());
        assert!(!node.heartbeat_path().exists());
        assert!(!a.is_master());
    }

    #[test]
    fn late_stale_takeover_leaves_a_single_master() {
        let dir = tempfile::tempdir().unwrap();
        let node = coordinator(dir.path());
        let crashed = session("crashed");
        let a = session("a");
        let b = session("b");
        node.check(&crashed).unwrap();
        age_file(node.heartbeat_path(), Duration::from_secs(101));

        // b has seen the stale file; a takes over first
        assert_eq!(node.check(&a).unwrap(), NodeRole::Master);
        std::fs::remove_file(node.heartbeat_path()).unwrap();
        assert_eq!(node.claim(b.thread_id()).unwrap(), NodeRole::Master);
        b.set_master(true);

        assert_eq!(node.check(&a).unwrap(), NodeRole::Slave);
        assert!(!a.is_master());
        assert_eq!(node.check(&b).unwrap(), NodeRole::Master);

        // the demoted node does not remove the new master's heartbeat
        assert!(!node.release(&a).unwrap());
        assert!(node.heartbeat_path().exists());
        assert!(node.release(&b).unwrap());
    }

    #[test]
    fn heartbeat_records_its_owner() {
        let dir = tempfile::tempdir().unwrap();
        let node = coordinator(dir.path());
        let a = session("a");
        node.check(&a).unwrap();
        assert_eq!(node.owner().unwrap().as_deref(), Some("a"));
    }
}
