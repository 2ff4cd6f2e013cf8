use tokio::time::Instant;

use crate::beacon;
use crate::message::Discovery;
use crate::node::Node;
use crate::registry::{NodeIdentity, Observed};
use crate::thread;

pub async fn run(node: Node, mut beacon: beacon::Receiver) {
    loop {
        let (message, source) = tokio::select! {
            _ = node.cancelled() => break,
            received = beacon.recv() => match received {
            | Some(received) => received,
            | None => break,
            },
        };

        if message.sender() == node.id() {
            continue
        }
        trace!("received {} from {}", message, source);
        node.clock.observe(message.clock());

        match message {
        | Discovery::Heartbeat { id, client_port, server_port, coordinator, .. } => {
            let identity = NodeIdentity { id, address: source, client_port, server_port };
            let observed = node.peers.write().observe(identity, Instant::now());

            if observed == Observed::New {
                info!("discovered node {} at {}", id, identity.server_addr());
                tokio::spawn(thread::peer::connect(node.clone(), identity));
                if coordinator && node.coordinator().is_none() {
                    node.adopt_coordinator(id);
                    node.request_state();
                }
            }

            if coordinator && node.coordinator() != Some(id) {
                node.adopt_coordinator(id);
            }
        }
        | Discovery::Announce { id, .. } => node.adopt_coordinator(id),
        | Discovery::StateRequest { id, .. } => {
            if node.is_coordinator() {
                node.send_state(id);
            }
        }
        }
    }
}

impl Node {
    /// Asks the coordinator for its game state and scoreboard.
    pub(crate) fn request_state(&self) {
        let clock = self.clock.increment();
        self.beacon.send(&Discovery::StateRequest { id: self.id(), clock });
    }
}
