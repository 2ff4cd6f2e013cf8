//! # Summary
//!
//! Player side of the client channel.
//!
//! `Session` is one connection to one server. `track` follows heartbeats on
//! the discovery channel to learn which server is coordinator, and `follow`
//! keeps a player joined to whichever server that is, reconnecting and
//! rejoining under the same name when it changes or the connection drops.

use std::net::SocketAddr;
use std::time::Duration;

use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};

use crate::beacon;
use crate::error::{Error, Parse};
use crate::message::{self, Discovery, Event, NodeId, Request};
use crate::socket;

/// Pause before the single retry of a failed first connect.
pub const RETRY_DELAY: Duration = Duration::from_secs(3);

/// Pause after a dropped connection before reconnecting.
pub const RECONNECT_DELAY: Duration = Duration::from_secs(1);

pub struct Session {
    rx: socket::Rx<Event>,
    tx: socket::Tx<Request>,
}

pub async fn connect(addr: SocketAddr) -> Result<Session, Error> {
    let stream = TcpStream::connect(addr).await?;
    let (rx, tx) = socket::split(stream);
    debug!("connected to {}", addr);
    Ok(Session { rx, tx })
}

/// Connects to `addr`, retrying once after `delay` on failure.
pub async fn connect_with_retry(addr: SocketAddr, delay: Duration) -> Result<Session, Error> {
    match connect(addr).await {
    | Ok(session) => Ok(session),
    | Err(error) => {
        warn!("failed to connect to {}: {}, retrying in {:?}", addr, error, delay);
        tokio::time::sleep(delay).await;
        connect(addr).await
    }
    }
}

impl Session {
    pub async fn join(&mut self, name: &str) -> Result<(), Error> {
        if !message::valid_name(name) {
            return Err(Error::Parse(Parse::Field { field: "name", value: name.to_owned() }))
        }
        self.tx.send(&Request::Join(name.to_owned())).await
    }

    pub async fn answer(&mut self, index: usize) -> Result<(), Error> {
        self.tx.send(&Request::Answer(index)).await
    }

    /// Next event from the server, skipping malformed records.
    /// Returns `None` once the server closes the connection.
    pub async fn next_event(&mut self) -> Option<Result<Event, Error>> {
        loop {
            match self.rx.recv().await? {
            | Err(Error::Parse(error)) => warn!("dropping malformed event: {}", error),
            | other => return Some(other),
            }
        }
    }
}

/// Where the coordinator takes players.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Coordinator {
    pub id: NodeId,
    pub addr: SocketAddr,
}

/// Follows heartbeats and publishes every coordinator sighting, including
/// repeats, so receivers can treat each one as a discovery signal.
pub fn track(mut beacon: beacon::Receiver) -> watch::Receiver<Option<Coordinator>> {
    let (tx, rx) = watch::channel(None);
    tokio::spawn(async move {
        while let Some((message, source)) = beacon.recv().await {
            if let Discovery::Heartbeat { id, client_port, coordinator: true, .. } = message {
                let sighting = Coordinator { id, addr: SocketAddr::new(source, client_port) };
                if tx.send(Some(sighting)).is_err() {
                    break
                }
            }
        }
    });
    rx
}

/// Handle to a player kept joined to the current coordinator.
pub struct Follower {
    events: mpsc::UnboundedReceiver<Event>,
    answers: mpsc::UnboundedSender<usize>,
}

impl Follower {
    pub async fn next_event(&mut self) -> Option<Event> {
        self.events.recv().await
    }

    pub fn answer(&self, index: usize) {
        // The follow task lives as long as the event receiver
        self.answers.send(index).ok();
    }
}

/// Keeps `name` joined to whichever node `coordinators` reports.
pub fn follow(name: String, mut coordinators: watch::Receiver<Option<Coordinator>>) -> Follower {
    let (event_tx, events) = mpsc::unbounded_channel();
    let (answers, mut answer_rx) = mpsc::unbounded_channel();

    tokio::spawn(async move {
        loop {
            let target = match wait_for_coordinator(&mut coordinators).await {
            | Some(target) => target,
            | None => return,
            };

            info!("following coordinator {} at {}", target.id, target.addr);
            let mut session = match connect(target.addr).await {
            | Ok(session) => session,
            | Err(error) => {
                warn!("failed to reach coordinator {}: {}", target.id, error);
                if !next_sighting(&mut coordinators).await {
                    return
                }
                continue
            }
            };
            if let Err(error) = session.join(&name).await {
                warn!("failed to join: {}", error);
                if !next_sighting(&mut coordinators).await {
                    return
                }
                continue
            }

            let mut moved = false;
            loop {
                tokio::select! {
                    event = session.next_event() => match event {
                    | Some(Ok(event)) => {
                        if event_tx.send(event).is_err() {
                            return
                        }
                    }
                    | Some(Err(error)) => {
                        warn!("connection to coordinator {} failed: {}", target.id, error);
                        break
                    }
                    | None => {
                        warn!("coordinator {} closed the connection", target.id);
                        break
                    }
                    },
                    answer = answer_rx.recv() => match answer {
                    | Some(index) => {
                        if let Err(error) = session.answer(index).await {
                            warn!("failed to send answer: {}", error);
                            break
                        }
                    }
                    | None => return,
                    },
                    changed = coordinators.changed() => {
                        if changed.is_err() {
                            return
                        }
                        let current = *coordinators.borrow_and_update();
                        if current.map_or(false, |current| current != target) {
                            info!("coordinator moved, reconnecting");
                            moved = true;
                            break
                        }
                    }
                }
            }

            if moved {
                tokio::time::sleep(RECONNECT_DELAY).await;
            } else if !next_sighting(&mut coordinators).await {
                return
            }
        }
    });

    Follower { events, answers }
}

/// Waits for the next coordinator sighting, or returns the known one.
async fn wait_for_coordinator(
    coordinators: &mut watch::Receiver<Option<Coordinator>>,
) -> Option<Coordinator> {
    loop {
        if let Some(current) = *coordinators.borrow_and_update() {
            return Some(current)
        }
        coordinators.changed().await.ok()?;
    }
}

/// Pauses after a failed session, then waits for the next coordinator
/// heartbeat. Returns `false` once tracking stopped.
async fn next_sighting(coordinators: &mut watch::Receiver<Option<Coordinator>>) -> bool {
    tokio::time::sleep(RECONNECT_DELAY).await;
    coordinators.changed().await.is_ok()
}
