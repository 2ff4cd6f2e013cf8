//! # Summary
//!
//! This module defines external connections to players.
//! Responsible for forwarding messages to and from connected players.

use tokio::net::{TcpListener, TcpStream};

use crate::error::Error;
use crate::internal;
use crate::message::{Event, Request};
use crate::node::Node;
use crate::shared::SessionId;
use crate::socket;

pub async fn listen(node: Node, listener: TcpListener) {
    loop {
        let stream = tokio::select! {
            _ = node.cancelled() => break,
            accepted = listener.accept() => match accepted {
            | Ok((stream, addr)) => {
                debug!("player connected from {}", addr);
                stream
            }
            | Err(error) => {
                warn!("failed to accept player: {}", error);
                continue
            }
            },
        };
        let connecting = Connecting::new(node.clone(), stream);
        tokio::spawn(async move {
            if let Some(client) = connecting.joined().await {
                client.run().await;
            }
        });
    }
}

/// Represents a player that has not yet sent `JOIN`, so we don't know its name.
struct Connecting {
    node: Node,

    /// External player receiving channel
    client_rx: socket::Rx<Request>,

    /// External player transmitting channel
    client_tx: socket::Tx<Event>,
}

impl Connecting {
    fn new(node: Node, stream: TcpStream) -> Self {
        let (client_rx, client_tx) = socket::split(stream);
        Connecting { node, client_rx, client_tx }
    }

    /// Waits for the first valid `JOIN`, then registers the player with the hub.
    async fn joined(mut self) -> Option<Client> {
        let name = loop {
            let received = tokio::select! {
                _ = self.node.cancelled() => return None,
                received = self.client_rx.recv() => received?,
            };
            match received {
            | Ok(Request::Join(name)) => break name,
            | Ok(Request::Answer(_)) => debug!("ignoring answer before join"),
            | Err(Error::Parse(error)) => warn!("dropping player record: {}", error),
            | Err(error) => {
                debug!("player connection failed: {}", error);
                return None
            }
            }
        };

        let session = self.node.next_token();
        let (rx, tx) = internal::new();
        self.node.shared.write().connect_client(session, tx);
        let client = Client {
            node: self.node,
            session,
            rx,
            client_rx: self.client_rx,
            client_tx: self.client_tx,
        };
        client.node.join(session, name);
        Some(client)
    }
}

/// Represents a joined player registered with the shared hub.
struct Client {
    node: Node,

    session: SessionId,

    /// Intra-server receiving channel
    rx: internal::Rx<Event>,

    /// External player receiving channel
    client_rx: socket::Rx<Request>,

    /// External player transmitting channel
    client_tx: socket::Tx<Event>,
}

impl Client {
    async fn run(mut self) {
        loop {
            tokio::select! {
                _ = self.node.cancelled() => break,

                // Forward outgoing events
                outgoing = self.rx.recv() => match outgoing {
                | Some(event) => {
                    trace!("sending {} to session {}", event, self.session);
                    if let Err(error) = self.client_tx.send(&event).await {
                        debug!("failed to send to session {}: {}", self.session, error);
                        break
                    }
                }
                | None => {
                    debug!("session {} replaced", self.session);
                    break
                }
                },

                // Forward incoming requests
                incoming = self.client_rx.recv() => match incoming {
                | Some(Ok(request)) => {
                    trace!("received {} from session {}", request, self.session);
                    match request {
                    | Request::Join(name) => self.node.join(self.session, name),
                    | Request::Answer(index) => self.node.record_answer(self.session, index),
                    }
                }
                | Some(Err(Error::Parse(error))) => warn!("dropping player record: {}", error),
                | Some(Err(error)) => {
                    debug!("session {} failed: {}", self.session, error);
                    break
                }
                | None => break,
                },
            }
        }
    }
}

impl Drop for Client {
    fn drop(&mut self) {
        if let Some(name) = self.node.shared.write().disconnect_client(self.session) {
            info!("{} disconnected", name);
        }
    }
}
