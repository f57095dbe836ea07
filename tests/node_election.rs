use pumpbot::coordination::{NodeCoordinator, NodeRole};
use pumpbot::domain::Session;
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::Duration;

fn session(name: &str) -> Session {
    Session::new(name.to_string(), "BTCUSDT".to_string(), "USDT".to_string())
}

/// Nodes starting together on a shared directory elect exactly one master.
#[test]
fn concurrent_nodes_elect_a_single_master() {
    let dir = tempfile::tempdir().unwrap();
    let heartbeat = dir.path().join("master.lock");
    let nodes = 8;
    let barrier = Arc::new(Barrier::new(nodes));

    let handles: Vec<_> = (0..nodes)
        .map(|i| {
            let barrier = barrier.clone();
            let coordinator =
                NodeCoordinator::new(heartbeat.clone(), Duration::from_secs(60), false);
            thread::spawn(move || {
                let session = session(&format!("node-{i}"));
                barrier.wait();
                coordinator.check(&session).unwrap()
            })
        })
        .collect();

    let roles: Vec<NodeRole> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    let masters = roles.iter().filter(|r| **r == NodeRole::Master).count();
    assert_eq!(masters, 1, "roles: {roles:?}");
    assert!(heartbeat.exists());
}

#[test]
fn master_hands_over_after_release() {
    let dir = tempfile::tempdir().unwrap();
    let heartbeat = dir.path().join("master.lock");
    let coordinator = NodeCoordinator::new(heartbeat.clone(), Duration::from_secs(60), false);

    let first = session("first");
    let second = session("second");
    assert_eq!(coordinator.check(&first).unwrap(), NodeRole::Master);
    assert_eq!(coordinator.check(&second).unwrap(), NodeRole::Slave);

    assert!(coordinator.release(&first).unwrap());
    assert!(!heartbeat.exists());
    assert_eq!(coordinator.check(&second).unwrap(), NodeRole::Master);
    assert!(second.is_master());
}
