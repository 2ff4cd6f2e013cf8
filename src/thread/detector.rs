//! # Summary
//!
//! Failure detection. A peer silent for longer than the failure timeout is
//! evicted from the table and its link closed; losing the coordinator this
//! way starts an election after the settle delay.

use tokio::time::{self, Instant};

use crate::node::Node;

pub async fn run(node: Node) {
    let mut interval = time::interval_at(Instant::now() + node.timing.grace, node.timing.heartbeat);
    loop {
        tokio::select! {
            _ = node.cancelled() => break,
            _ = interval.tick() => sweep(&node),
        }
    }
}

fn sweep(node: &Node) {
    let evicted = node.peers
        .write()
        .evict_stale(Instant::now(), node.timing.failure);

    for info in evicted {
        let id = info.identity.id;
        warn!("node {} timed out", id);
        node.shared.write().disconnect_peer(id);
        node.forget_peer(id);
    }
}

/// Elects a coordinator if none was heard of by the bootstrap delay.
pub async fn bootstrap(node: Node) {
    tokio::select! {
        _ = node.cancelled() => return,
        _ = time::sleep(node.timing.bootstrap) => (),
    }
    if node.coordinator().is_none() {
        info!("no coordinator after {:?}, starting election", node.timing.bootstrap);
        node.trigger_election();
    }
}
