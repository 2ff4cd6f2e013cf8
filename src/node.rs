//! # Summary
//!
//! Handle to a running server node. Every task of the node holds a clone;
//! the protocol roles (`election`, `mutex`, `replica`, `game`) each add their
//! own `impl Node` block on top of the shared state defined here.

use std::fmt;
use std::ops::Deref;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::RwLock;
use tokio_util::sync::CancellationToken;

use crate::beacon;
use crate::clock::Clock;
use crate::config::Timing;
use crate::election::Election;
use crate::game::{Game, Question};
use crate::message::NodeId;
use crate::mutex::Exclusion;
use crate::registry::{NodeIdentity, PeerRegistry};
use crate::replica::{GameState, Replica};
use crate::shared::Shared;

#[derive(Clone)]
pub struct Node(Arc<Inner>);

pub struct Inner {
    pub(crate) identity: NodeIdentity,
    pub(crate) timing: Timing,
    pub(crate) clock: Clock,
    pub(crate) shared: Shared,
    pub(crate) peers: RwLock<PeerRegistry>,
    pub(crate) election: Election,
    pub(crate) exclusion: Exclusion,
    pub(crate) replica: Replica,
    pub(crate) game: Game,
    pub(crate) beacon: beacon::Sender,
    tokens: AtomicU64,
    cancel: CancellationToken,
}

impl Deref for Node {
    type Target = Inner;
    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl Node {
    pub(crate) fn new(
        identity: NodeIdentity,
        timing: Timing,
        beacon: beacon::Sender,
        questions: Vec<Question>,
    ) -> Self {
        Node(Arc::new(Inner {
            identity,
            timing,
            clock: Clock::new(),
            shared: Shared::new(identity.id),
            peers: RwLock::new(PeerRegistry::new()),
            election: Election::new(),
            exclusion: Exclusion::new(identity.id),
            replica: Replica::default(),
            game: Game::new(questions),
            beacon,
            tokens: AtomicU64::new(0),
            cancel: CancellationToken::new(),
        }))
    }

    pub fn id(&self) -> NodeId {
        self.identity.id
    }

    pub fn identity(&self) -> NodeIdentity {
        self.identity
    }

    pub fn timing(&self) -> Timing {
        self.timing
    }

    /// Fresh id for a player session or peer link.
    pub(crate) fn next_token(&self) -> u64 {
        self.tokens.fetch_add(1, Ordering::Relaxed)
    }

    /// Resolves once the node shuts down.
    pub async fn cancelled(&self) {
        self.cancel.cancelled().await
    }

    pub fn is_shut_down(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Stops every task and closes every connection. Peers notice through
    /// closed links and missing heartbeats.
    pub fn shutdown(&self) {
        info!("node {} shutting down", self.id());
        self.cancel.cancel();
        self.election.cancel();
        self.game.cancel();
        self.shared.write().clear();
        self.exclusion.wake();
    }

    /// A new outbound link to `id` is up.
    pub(crate) fn on_peer_connected(&self, id: NodeId) {
        if self.is_coordinator() {
            self.send_state(id);
        }
    }

    /// The outbound link `link` to `id` failed. Ignored if the link was
    /// already replaced or torn down by eviction.
    pub(crate) fn on_peer_lost(&self, id: NodeId, link: u64) {
        if !self.shared.write().disconnect_peer_if(id, link) {
            return
        }
        warn!("lost connection to node {}", id);
        self.forget_peer(id);
    }

    /// Drops `id` from the peer table. Its next heartbeat rediscovers it;
    /// losing the coordinator this way starts an election.
    pub(crate) fn forget_peer(&self, id: NodeId) {
        self.peers.write().remove(id);
        self.exclusion.wake();
        if self.clear_coordinator(id) {
            warn!("coordinator {} is gone", id);
            self.schedule_election();
        }
    }

    /// Snapshot of this node's view of the cluster.
    pub fn status(&self) -> Status {
        let peers = self.peers.read().ids();
        let (links, players) = {
            let shared = self.shared.read();
            (shared.links(), shared.players())
        };
        Status {
            id: self.id(),
            coordinator: self.coordinator(),
            clock: self.clock.now(),
            peers,
            links,
            players,
            game: self.replica.state(),
            scoreboard: self.replica.scores.sorted(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Status {
    pub id: NodeId,
    pub coordinator: Option<NodeId>,
    pub clock: u64,
    /// Peers known from heartbeats
    pub peers: Vec<NodeId>,
    /// Peers with a live outbound connection
    pub links: Vec<NodeId>,
    /// Players connected to this node
    pub players: Vec<String>,
    pub game: GameState,
    pub scoreboard: Vec<(String, u64)>,
}

impl fmt::Display for Status {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        let role = match self.coordinator {
        | Some(id) if id == self.id => "coordinator".to_string(),
        | Some(id) => format!("follower of {}", id),
        | None => "no coordinator".to_string(),
        };
        writeln!(fmt, "node {} ({}), clock {}", self.id, role, self.clock)?;
        writeln!(fmt, "peers {:?}, linked {:?}", self.peers, self.links)?;
        writeln!(fmt, "players {:?}", self.players)?;
        if self.game.active {
            writeln!(fmt, "round running, question {}", self.game.question + 1)?;
        } else {
            writeln!(fmt, "no round running")?;
        }
        write!(fmt, "scoreboard:")?;
        for (name, score) in &self.scoreboard {
            write!(fmt, " {}={}", name, score)?;
        }
        Ok(())
    }
}
