use tokio::time::{self, Instant};

use crate::message::Discovery;
use crate::node::Node;

/// Broadcasts this node's identity and role every heartbeat interval,
/// starting half an interval after launch.
pub async fn run(node: Node) {
    let period = node.timing.heartbeat;
    let mut interval = time::interval_at(Instant::now() + period / 2, period);
    loop {
        tokio::select! {
            _ = node.cancelled() => break,
            _ = interval.tick() => (),
        }
        let heartbeat = Discovery::Heartbeat {
            id: node.id(),
            client_port: node.identity.client_port,
            server_port: node.identity.server_port,
            coordinator: node.is_coordinator(),
            clock: node.clock.increment(),
        };
        node.beacon.send(&heartbeat);
    }
}
