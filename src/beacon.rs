//! # Summary
//!
//! The discovery channel: an unreliable broadcast medium carrying
//! `Discovery` datagrams to every node (and every player following the
//! cluster).
//!
//! Three media share one interface:
//!
//! - `Multicast`: the UDP multicast group every node and player joins. The
//!   group port is shared, so any number of processes on a host can listen.
//! - `Unicast`: each node binds its own UDP port and fans datagrams out to a
//!   fixed target list, for networks without multicast routing.
//! - `Local`: an in-process broadcast bus for tests.

use std::io;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;

use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::UdpSocket;
use tokio::sync::broadcast;

use crate::message::Discovery;

pub const MULTICAST_GROUP: Ipv4Addr = Ipv4Addr::new(230, 0, 0, 1);
pub const MULTICAST_PORT: u16 = 4446;

const DATAGRAM: usize = 1024;
const BUS_CAPACITY: usize = 1024;

#[derive(Clone, Debug)]
pub enum Beacon {
    Multicast {
        group: Ipv4Addr,
        port: u16,
    },
    Unicast {
        bind: SocketAddr,
        targets: Vec<SocketAddr>,
    },
    Local(Bus),
}

impl Default for Beacon {
    fn default() -> Self {
        Beacon::Multicast { group: MULTICAST_GROUP, port: MULTICAST_PORT }
    }
}

/// In-process stand-in for a broadcast network. All clones share one medium.
#[derive(Clone, Debug)]
pub struct Bus(broadcast::Sender<String>);

impl Bus {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(BUS_CAPACITY);
        Bus(tx)
    }
}

impl Default for Bus {
    fn default() -> Self {
        Bus::new()
    }
}

impl Beacon {
    /// Joins the medium, returning its sending and receiving ends.
    pub async fn open(&self) -> io::Result<(Sender, Receiver)> {
        match self {
        | Beacon::Multicast { group, port } => {
            let socket = Arc::new(multicast(*group, *port)?);
            let targets = vec![SocketAddr::from((*group, *port))];
            Ok(Beacon::udp(socket, targets))
        }
        | Beacon::Unicast { bind, targets } => {
            let socket = Arc::new(UdpSocket::bind(bind).await?);
            Ok(Beacon::udp(socket, targets.clone()))
        }
        | Beacon::Local(Bus(tx)) => {
            Ok((Sender::Local(tx.clone()), Receiver::Local(tx.subscribe())))
        }
        }
    }

    fn udp(socket: Arc<UdpSocket>, targets: Vec<SocketAddr>) -> (Sender, Receiver) {
        let sender = Sender::Udp { socket: socket.clone(), targets: Arc::new(targets) };
        let receiver = Receiver::Udp { socket, buffer: vec![0; DATAGRAM] };
        (sender, receiver)
    }
}

/// Binds the group port shared with every other listener on the host.
fn multicast(group: Ipv4Addr, port: u16) -> io::Result<UdpSocket> {
    let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))?;
    socket.set_reuse_address(true)?;
    #[cfg(all(unix, not(any(target_os = "solaris", target_os = "illumos"))))]
    socket.set_reuse_port(true)?;
    socket.set_nonblocking(true)?;
    socket.bind(&SocketAddr::from((Ipv4Addr::UNSPECIFIED, port)).into())?;
    socket.join_multicast_v4(&group, &Ipv4Addr::UNSPECIFIED)?;
    socket.set_multicast_loop_v4(true)?;
    UdpSocket::from_std(socket.into())
}

/// Sending end of the discovery channel. Delivery is best effort.
#[derive(Clone, Debug)]
pub enum Sender {
    Udp {
        socket: Arc<UdpSocket>,
        targets: Arc<Vec<SocketAddr>>,
    },
    Local(broadcast::Sender<String>),
}

impl Sender {
    pub fn send(&self, message: &Discovery) {
        trace!("beacon {}", message);
        let line = message.to_string();
        match self {
        | Sender::Udp { socket, targets } => {
            for target in targets.iter() {
                if let Err(error) = socket.try_send_to(line.as_bytes(), *target) {
                    debug!("dropped datagram to {}: {}", target, error);
                }
            }
        }
        | Sender::Local(tx) => {
            // No subscribers is not an error on a broadcast medium
            tx.send(line).ok();
        }
        }
    }
}

/// Receiving end of the discovery channel.
#[derive(Debug)]
pub enum Receiver {
    Udp {
        socket: Arc<UdpSocket>,
        buffer: Vec<u8>,
    },
    Local(broadcast::Receiver<String>),
}

impl Receiver {
    /// Waits for the next well-formed datagram and its source address.
    /// Returns `None` only when the medium is gone.
    pub async fn recv(&mut self) -> Option<(Discovery, IpAddr)> {
        loop {
            let (line, source) = match self {
            | Receiver::Udp { socket, buffer } => {
                match socket.recv_from(buffer).await {
                | Ok((len, source)) => (String::from_utf8_lossy(&buffer[..len]).into_owned(), source.ip()),
                | Err(error) => {
                    warn!("beacon receive failed: {}", error);
                    continue
                }
                }
            }
            | Receiver::Local(rx) => {
                match rx.recv().await {
                | Ok(line) => (line, IpAddr::V4(Ipv4Addr::LOCALHOST)),
                | Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!("beacon lagged, skipped {} datagrams", skipped);
                    continue
                }
                | Err(broadcast::error::RecvError::Closed) => return None,
                }
            }
            };

            match line.trim().parse::<Discovery>() {
            | Ok(message) => return Some((message, source)),
            | Err(error) => warn!("dropping datagram from {}: {}", source, error),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn local_bus_reaches_every_subscriber() {
        let bus = Beacon::Local(Bus::new());
        let (tx, mut a) = bus.open().await.unwrap();
        let (_, mut b) = bus.open().await.unwrap();

        let announce = Discovery::Announce { id: 4, clock: 12 };
        tx.send(&announce);
        assert_eq!(a.recv().await, Some((announce.clone(), IpAddr::V4(Ipv4Addr::LOCALHOST))));
        assert_eq!(b.recv().await.map(|(message, _)| message), Some(announce));
    }

    #[tokio::test]
    async fn multicast_group_port_is_shared() {
        let first = Beacon::default().open().await;
        let second = Beacon::default().open().await;
        assert!(first.is_ok());
        assert!(second.is_ok());
    }

    #[tokio::test]
    async fn unicast_skips_malformed_datagrams() {
        let bind: SocketAddr = "127.0.0.1:0".parse().unwrap();
        let listener = Beacon::Unicast { bind, targets: Vec::new() };
        let (_, mut rx) = listener.open().await.unwrap();
        let address = match &rx {
        | Receiver::Udp { socket, .. } => socket.local_addr().unwrap(),
        | Receiver::Local(_) => unreachable!(),
        };

        let raw = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        raw.send_to(b"garbage", address).await.unwrap();

        let speaker = Beacon::Unicast { bind, targets: vec![address] };
        let (tx, _) = speaker.open().await.unwrap();
        let request = Discovery::StateRequest { id: 1, clock: 3 };
        tx.send(&request);

        let (message, source) = rx.recv().await.unwrap();
        assert_eq!(message, request);
        assert!(source.is_loopback());
    }
}
