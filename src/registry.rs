//! # Summary
//!
//! Table of known peers, fed by heartbeats and pruned by the failure detector.

use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

use hashbrown::HashMap as Map;
use tokio::time::Instant;

use crate::message::NodeId;

/// Where a node can be reached.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct NodeIdentity {
    pub id: NodeId,
    pub address: IpAddr,
    pub client_port: u16,
    pub server_port: u16,
}

impl NodeIdentity {
    pub fn server_addr(&self) -> SocketAddr {
        SocketAddr::new(self.address, self.server_port)
    }

    pub fn client_addr(&self) -> SocketAddr {
        SocketAddr::new(self.address, self.client_port)
    }
}

#[derive(Copy, Clone, Debug)]
pub struct PeerInfo {
    pub identity: NodeIdentity,
    pub last_seen: Instant,
}

/// Outcome of recording a heartbeat.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Observed {
    New,
    Known,
}

#[derive(Debug, Default)]
pub struct PeerRegistry {
    peers: Map<NodeId, PeerInfo>,
}

impl PeerRegistry {
    pub fn new() -> Self {
        PeerRegistry::default()
    }

    /// Creates an entry for an unseen id or refreshes `last_seen` of a known one.
    pub fn observe(&mut self, identity: NodeIdentity, now: Instant) -> Observed {
        match self.peers.get_mut(&identity.id) {
        | Some(info) => {
            info.last_seen = now;
            Observed::Known
        }
        | None => {
            self.peers.insert(identity.id, PeerInfo { identity, last_seen: now });
            Observed::New
        }
        }
    }

    /// Removes and returns every peer silent for longer than `timeout`.
    pub fn evict_stale(&mut self, now: Instant, timeout: Duration) -> Vec<PeerInfo> {
        let stale = self.peers
            .values()
            .filter(|info| now.saturating_duration_since(info.last_seen) > timeout)
            .map(|info| info.identity.id)
            .collect::<Vec<_>>();
        stale.into_iter()
            .filter_map(|id| self.peers.remove(&id))
            .collect()
    }

    pub fn remove(&mut self, id: NodeId) -> Option<PeerInfo> {
        self.peers.remove(&id)
    }

    /// Known peer ids in ascending order.
    pub fn ids(&self) -> Vec<NodeId> {
        let mut ids = self.peers.keys().copied().collect::<Vec<_>>();
        ids.sort_unstable();
        ids
    }

    /// Known peer ids greater than `id`.
    pub fn higher(&self, id: NodeId) -> Vec<NodeId> {
        self.ids()
            .into_iter()
            .filter(|peer| *peer > id)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    fn identity(id: NodeId) -> NodeIdentity {
        NodeIdentity {
            id,
            address: IpAddr::V4(Ipv4Addr::LOCALHOST),
            client_port: 5000 + id as u16,
            server_port: 6000 + id as u16,
        }
    }

    #[test]
    fn first_heartbeat_creates_entry() {
        let mut registry = PeerRegistry::new();
        let now = Instant::now();
        assert_eq!(registry.observe(identity(2), now), Observed::New);
        assert_eq!(registry.observe(identity(2), now), Observed::Known);
        assert_eq!(registry.ids(), vec![2]);
        assert_eq!(identity(2).server_addr().port(), 6002);
    }

    #[test]
    fn higher_ids_are_sorted() {
        let mut registry = PeerRegistry::new();
        let now = Instant::now();
        for id in &[5, 1, 3, 4] {
            registry.observe(identity(*id), now);
        }
        assert_eq!(registry.ids(), vec![1, 3, 4, 5]);
        assert_eq!(registry.higher(3), vec![4, 5]);
        assert!(registry.higher(5).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn silent_peers_are_evicted() {
        let mut registry = PeerRegistry::new();
        registry.observe(identity(1), Instant::now());
        registry.observe(identity(2), Instant::now());

        tokio::time::advance(Duration::from_secs(4)).await;
        registry.observe(identity(2), Instant::now());

        tokio::time::advance(Duration::from_secs(3)).await;
        let evicted = registry.evict_stale(Instant::now(), Duration::from_secs(6));
        assert_eq!(evicted.len(), 1);
        assert_eq!(evicted[0].identity.id, 1);
        assert_eq!(registry.ids(), vec![2]);
    }
}
