//! # Summary
//!
//! Server-to-server connections.
//!
//! Each ordered pair of nodes shares one connection, opened by the sender
//! after discovery and announced with `HELLO`. A node writes only on the
//! connections it opened (registered with the shared hub) and reads on the
//! ones it accepted; records arriving on either kind are dispatched the same
//! way.

use tokio::net::{TcpListener, TcpStream};

use crate::error::Error;
use crate::internal;
use crate::message::{NodeId, Peer};
use crate::mutex::MutexRequest;
use crate::node::Node;
use crate::registry::NodeIdentity;
use crate::replica::GameState;
use crate::shared::LinkId;
use crate::socket;

pub async fn listen(node: Node, listener: TcpListener) {
    loop {
        let stream = tokio::select! {
            _ = node.cancelled() => break,
            accepted = listener.accept() => match accepted {
            | Ok((stream, _)) => stream,
            | Err(error) => {
                warn!("failed to accept peer: {}", error);
                continue
            }
            },
        };
        let connecting = Connecting::new(node.clone(), stream);
        tokio::spawn(async move {
            if let Some(inbound) = connecting.handshake().await {
                inbound.run().await;
            }
        });
    }
}

/// Accepted connection whose sender has not yet said `HELLO`.
struct Connecting {
    node: Node,
    peer_rx: socket::Rx<Peer>,
    peer_tx: socket::Tx<Peer>,
}

impl Connecting {
    fn new(node: Node, stream: TcpStream) -> Self {
        let (peer_rx, peer_tx) = socket::split(stream);
        Connecting { node, peer_rx, peer_tx }
    }

    /// Waits for `HELLO`. Anything else, or silence past the failure
    /// timeout, drops the connection.
    async fn handshake(mut self) -> Option<Inbound> {
        let hello = tokio::time::timeout(self.node.timing.failure, self.peer_rx.recv());
        let peer_id = match hello.await {
        | Ok(Some(Ok(Peer::Hello { id, .. }))) => id,
        | Ok(Some(Ok(other))) => {
            warn!("expected HELLO, received {}", other);
            return None
        }
        | Ok(Some(Err(error))) => {
            warn!("failed peer handshake: {}", error);
            return None
        }
        | Ok(None) => return None,
        | Err(_) => {
            warn!("peer handshake timed out");
            return None
        }
        };
        debug!("accepted connection from node {}", peer_id);
        Some(Inbound {
            node: self.node,
            peer_id,
            peer_rx: self.peer_rx,
            _peer_tx: self.peer_tx,
        })
    }
}

/// Read side of a connection opened by `peer_id`.
struct Inbound {
    node: Node,
    peer_id: NodeId,
    peer_rx: socket::Rx<Peer>,
    /// Held so the remote end does not read EOF
    _peer_tx: socket::Tx<Peer>,
}

impl Inbound {
    async fn run(mut self) {
        loop {
            let received = tokio::select! {
                _ = self.node.cancelled() => break,
                received = self.peer_rx.recv() => received,
            };
            match received {
            | Some(Ok(message)) => respond_incoming(&self.node, self.peer_id, message),
            | Some(Err(Error::Parse(error))) => warn!("dropping record from node {}: {}", self.peer_id, error),
            | Some(Err(error)) => {
                debug!("connection from node {} failed: {}", self.peer_id, error);
                break
            }
            | None => break,
            }
        }
        debug!("connection from node {} closed", self.peer_id);
    }
}

/// Opens the outbound connection to a newly discovered peer.
pub async fn connect(node: Node, identity: NodeIdentity) {
    let peer_id = identity.id;
    let stream = match TcpStream::connect(identity.server_addr()).await {
    | Ok(stream) => stream,
    | Err(error) => {
        warn!("failed to connect to node {} at {}: {}", peer_id, identity.server_addr(), error);
        node.forget_peer(peer_id);
        return
    }
    };

    let (peer_rx, mut peer_tx) = socket::split(stream);
    let hello = Peer::Hello {
        id: node.id(),
        client_port: node.identity.client_port,
        server_port: node.identity.server_port,
    };
    if let Err(error) = peer_tx.send(&hello).await {
        warn!("failed to greet node {}: {}", peer_id, error);
        node.forget_peer(peer_id);
        return
    }

    let link = node.next_token();
    let (rx, tx) = internal::new();
    node.shared.write().connect_peer(peer_id, link, tx);
    info!("connected to node {}", peer_id);
    node.on_peer_connected(peer_id);

    let peer = Outbound { node, peer_id, link, rx, peer_rx, peer_tx };
    peer.run().await;
}

/// Write side of a connection this node opened to `peer_id`.
struct Outbound {
    node: Node,
    peer_id: NodeId,
    link: LinkId,
    rx: internal::Rx<Peer>,
    peer_rx: socket::Rx<Peer>,
    peer_tx: socket::Tx<Peer>,
}

impl Outbound {
    async fn run(mut self) {
        loop {
            tokio::select! {
                _ = self.node.cancelled() => break,

                // Forward outgoing messages
                outgoing = self.rx.recv() => match outgoing {
                | Some(message) => {
                    trace!("sending {} to node {}", message, self.peer_id);
                    if let Err(error) = self.peer_tx.send(&message).await {
                        warn!("failed to send to node {}: {}", self.peer_id, error);
                        break
                    }
                }
                | None => {
                    debug!("link to node {} dropped", self.peer_id);
                    break
                }
                },

                // Peers never write here, but a closed read means the peer is gone
                incoming = self.peer_rx.recv() => match incoming {
                | Some(Ok(message)) => respond_incoming(&self.node, self.peer_id, message),
                | Some(Err(Error::Parse(error))) => warn!("dropping record from node {}: {}", self.peer_id, error),
                | Some(Err(error)) => {
                    warn!("connection to node {} failed: {}", self.peer_id, error);
                    break
                }
                | None => {
                    info!("node {} closed its connection", self.peer_id);
                    break
                }
                },
            }
        }
    }
}

impl Drop for Outbound {
    fn drop(&mut self) {
        info!("disconnected from node {}", self.peer_id);
        self.node.on_peer_lost(self.peer_id, self.link);
    }
}

/// Dispatches one record from `from` to the role that handles it.
fn respond_incoming(node: &Node, from: NodeId, message: Peer) {
    trace!("received {} from node {}", message, from);
    if let Some(clock) = message.clock() {
        node.clock.observe(clock);
    }
    match message {
    | Peer::Hello { .. } => debug!("repeated HELLO from node {}", from),
    | Peer::Election { id, .. } => node.on_election(id),
    | Peer::Ack { id, .. } => node.on_ack(id),
    | Peer::Coordinator { id, .. } => node.adopt_coordinator(id),
    | Peer::CsRequest { id, timestamp } => node.on_cs_request(MutexRequest { timestamp, sender: id }),
    | Peer::CsReply { id, .. } => node.exclusion.on_reply(id),
    | Peer::Replicate { action, .. } => node.on_replicate(action),
    | Peer::StateSync { active, question, .. } => node.on_state_sync(GameState { active, question }),
    | Peer::ScoreSync { name, score } => node.on_score_sync(name, score),
    }
}
