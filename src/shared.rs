//! # Summary
//!
//! This module implements a central hub for intra-server message
//! forwarding. We wrap the central `State` type with Arc<RwLock<T>>
//! to share the connections between concurrently running tasks.
//!
//! Peer links are keyed by node id; player connections by a per-process
//! session id, with a bijection from player name to the session that
//! currently speaks for it.

use std::sync::Arc;

use bimap::BiMap;
use hashbrown::HashMap as Map;
use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::internal::Tx;
use crate::message::{self, NodeId};

/// Locally unique player connection id.
pub type SessionId = u64;

/// Locally unique id of one outbound peer connection.
pub type LinkId = u64;

/// Thread-safe wrapper around `State` forwarding hub.
#[derive(Clone)]
pub struct Shared(Arc<RwLock<State>>);

impl Shared {
    pub fn new(id: NodeId) -> Self {
        Shared(Arc::new(RwLock::new(State::new(id))))
    }

    /// Acquires a read lock on the underlying state.
    pub fn read(&self) -> RwLockReadGuard<State> {
        self.0.read()
    }

    /// Acquires a write lock on the underlying state.
    pub fn write(&self) -> RwLockWriteGuard<State> {
        self.0.write()
    }
}

/// Collection of intra-server transmitting channels.
pub struct State {
    id: NodeId,
    peer_txs: Map<NodeId, (LinkId, Tx<message::Peer>)>,
    client_txs: Map<SessionId, Tx<message::Event>>,
    players: BiMap<String, SessionId>,
}

impl State {
    fn new(id: NodeId) -> Self {
        State {
            id,
            peer_txs: Map::default(),
            client_txs: Map::default(),
            players: BiMap::new(),
        }
    }

    /// Registers the outbound link to the provided peer with this hub.
    pub fn connect_peer(&mut self, id: NodeId, link: LinkId, tx: Tx<message::Peer>) {
        self.peer_txs.insert(id, (link, tx));
    }

    /// Disconnects the provided peer from this hub.
    pub fn disconnect_peer(&mut self, id: NodeId) -> bool {
        self.peer_txs.remove(&id).is_some()
    }

    /// Disconnects the provided peer only if `link` is still its registered connection.
    pub fn disconnect_peer_if(&mut self, id: NodeId, link: LinkId) -> bool {
        match self.peer_txs.get(&id) {
        | Some((current, _)) if *current == link => {
            self.peer_txs.remove(&id);
            true
        }
        | _ => false,
        }
    }

    /// Ids of peers with a live outbound link, ascending.
    pub fn links(&self) -> Vec<NodeId> {
        let mut ids = self.peer_txs.keys().copied().collect::<Vec<_>>();
        ids.sort_unstable();
        ids
    }

    /// Forwards a message to an external peer server.
    pub fn send(&self, id: NodeId, message: message::Peer) -> bool {
        if id == self.id {
            return false
        }
        match self.peer_txs.get(&id) {
        | Some((_, tx)) => tx.try_send(message),
        | None => false,
        }
    }

    /// Forwards a message to the provided list of peer servers.
    pub fn narrowcast<'a, T>(&self, ids: T, message: message::Peer)
        where T: IntoIterator<Item = &'a NodeId>
    {
        for id in ids {
            self.send(*id, message.clone());
        }
    }

    /// Forwards a message to all connected peer servers.
    pub fn broadcast(&self, message: message::Peer) {
        for (_, tx) in self.peer_txs.values() {
            tx.try_send(message.clone());
        }
    }

    /// Registers the provided player connection with this hub.
    pub fn connect_client(&mut self, session: SessionId, tx: Tx<message::Event>) {
        self.client_txs.insert(session, tx);
    }

    /// Binds `name` to `session`. Returns the session previously bound to
    /// `name`, whose channel is dropped so its connection closes.
    pub fn join(&mut self, session: SessionId, name: String) -> Option<SessionId> {
        let evicted = self.players
            .get_by_left(&name)
            .copied()
            .filter(|previous| *previous != session);
        if let Some(previous) = evicted {
            self.client_txs.remove(&previous);
        }
        self.players.insert(name, session);
        evicted
    }

    /// Disconnects the provided player connection from this hub.
    /// Returns the name it was bound to, if any.
    pub fn disconnect_client(&mut self, session: SessionId) -> Option<String> {
        self.client_txs.remove(&session);
        self.players
            .remove_by_right(&session)
            .map(|(name, _)| name)
    }

    pub fn player(&self, session: SessionId) -> Option<&String> {
        self.players.get_by_right(&session)
    }

    /// Names of every joined player, ascending.
    pub fn players(&self) -> Vec<String> {
        let mut names = self.players
            .left_values()
            .cloned()
            .collect::<Vec<_>>();
        names.sort();
        names
    }

    /// Forwards a message to one player connection.
    pub fn send_client(&self, session: SessionId, message: message::Event) -> bool {
        match self.client_txs.get(&session) {
        | Some(tx) => tx.try_send(message),
        | None => false,
        }
    }

    /// Forwards a message to every joined player.
    pub fn broadcast_clients(&self, message: message::Event) {
        for session in self.players.right_values() {
            if let Some(tx) = self.client_txs.get(session) {
                tx.try_send(message.clone());
            }
        }
    }

    /// Drops every channel, closing all connections.
    pub fn clear(&mut self) {
        self.peer_txs.clear();
        self.client_txs.clear();
        self.players.clear();
    }
}
