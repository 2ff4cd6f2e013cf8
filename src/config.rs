use std::net::{IpAddr, Ipv4Addr};
use std::str::FromStr;
use std::time::Duration;

use tap::TapFallible;
use tokio::net::TcpListener;

use crate::beacon::Beacon;
use crate::error::Error;
use crate::game::Question;
use crate::message::NodeId;
use crate::node::Node;
use crate::registry::NodeIdentity;
use crate::thread;

/// Every interval a node schedules.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Timing {
    /// Period between heartbeats; the first one goes out after half a period
    pub heartbeat: Duration,

    /// Silence after which a peer is evicted
    pub failure: Duration,

    /// Delay before the first failure sweep
    pub grace: Duration,

    /// Pause between losing the coordinator and starting an election
    pub settle: Duration,

    /// Delay after start before electing, if no coordinator was heard of
    pub bootstrap: Duration,

    /// Wait for acknowledgments from higher nodes
    pub election: Duration,

    /// Wait for critical section replies
    pub mutex: Duration,

    /// Time players get to answer a question
    pub question: Duration,

    /// Pause between a scoreboard and the next question
    pub intermission: Duration,
}

impl Default for Timing {
    fn default() -> Self {
        Timing {
            heartbeat: Duration::from_secs(2),
            failure: Duration::from_secs(6),
            grace: Duration::from_secs(6),
            settle: Duration::from_secs(1),
            bootstrap: Duration::from_secs(5),
            election: Duration::from_secs(3),
            mutex: Duration::from_secs(5),
            question: Duration::from_secs(15),
            intermission: Duration::from_secs(3),
        }
    }
}

impl Timing {
    /// Divides every interval by `divisor`, keeping their proportions.
    pub fn scaled(self, divisor: u32) -> Self {
        let divisor = divisor.max(1);
        Timing {
            heartbeat: self.heartbeat / divisor,
            failure: self.failure / divisor,
            grace: self.grace / divisor,
            settle: self.settle / divisor,
            bootstrap: self.bootstrap / divisor,
            election: self.election / divisor,
            mutex: self.mutex / divisor,
            question: self.question / divisor,
            intermission: self.intermission / divisor,
        }
    }
}

#[derive(Clone, Debug)]
pub struct Config {
    /// Unique server ID
    id: NodeId,

    /// Address both listeners bind to
    host: IpAddr,

    /// Port for incoming player connections
    client_port: u16,

    /// Port for incoming peer connections
    server_port: u16,

    /// Discovery medium
    beacon: Beacon,

    timing: Timing,
}

impl Config {
    pub fn new(id: NodeId, client_port: u16, server_port: u16) -> Self {
        Config {
            id,
            host: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            client_port,
            server_port,
            beacon: Beacon::default(),
            timing: Timing::default(),
        }
    }

    pub fn with_timing(mut self, timing: Timing) -> Self {
        self.timing = timing;
        self
    }

    pub fn with_beacon(mut self, beacon: Beacon) -> Self {
        self.beacon = beacon;
        self
    }

    pub fn with_host(mut self, host: IpAddr) -> Self {
        self.host = host;
        self
    }

    pub fn id(&self) -> NodeId {
        self.id
    }

    /// Binds both listeners, joins the discovery medium and spawns every
    /// task of the node. Port 0 binds an ephemeral port; the node advertises
    /// whichever port it actually got.
    pub async fn run(self, questions: Vec<Question>) -> Result<Node, Error> {
        let peer_listener = TcpListener::bind((self.host, self.server_port))
            .await
            .tap_err(|error| error!("failed to bind peer port {}: {}", self.server_port, error))?;
        let client_listener = TcpListener::bind((self.host, self.client_port))
            .await
            .tap_err(|error| error!("failed to bind player port {}: {}", self.client_port, error))?;
        let (beacon_tx, beacon_rx) = self.beacon
            .open()
            .await
            .tap_err(|error| error!("failed to join discovery channel {:?}: {}", self.beacon, error))?;

        let address = if self.host.is_unspecified() {
            IpAddr::V4(Ipv4Addr::LOCALHOST)
        } else {
            self.host
        };

        let identity = NodeIdentity {
            id: self.id,
            address,
            client_port: client_listener.local_addr()?.port(),
            server_port: peer_listener.local_addr()?.port(),
        };

        let node = Node::new(identity, self.timing, beacon_tx, questions);
        info!(
            "node {} serving players on {} and peers on {}",
            self.id,
            identity.client_port,
            identity.server_port,
        );

        tokio::spawn(thread::peer::listen(node.clone(), peer_listener));
        tokio::spawn(thread::client::listen(node.clone(), client_listener));
        tokio::spawn(thread::discovery::run(node.clone(), beacon_rx));
        tokio::spawn(thread::heartbeat::run(node.clone()));
        tokio::spawn(thread::detector::run(node.clone()));
        tokio::spawn(thread::detector::bootstrap(node.clone()));
        Ok(node)
    }
}

impl FromStr for Config {
    type Err = Error;
    /// Parses a `serverId,clientPort,serverPort` triple.
    fn from_str(triple: &str) -> Result<Self, Self::Err> {
        let invalid = || Error::Config(triple.to_owned());
        let fields = triple
            .split(',')
            .map(str::trim)
            .collect::<Vec<_>>();
        match fields.as_slice() {
        | [id, client, server] => Ok(Config::new(
            id.parse().map_err(|_| invalid())?,
            client.parse().map_err(|_| invalid())?,
            server.parse().map_err(|_| invalid())?,
        )),
        | _ => Err(invalid()),
        }
    }
}
