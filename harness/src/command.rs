use serde_derive::{Serialize, Deserialize};

#[derive(Serialize, Deserialize)]
pub struct Execution {
    /// Unicast discovery ports, one per server
    pub beacons: Vec<u16>,

    pub commands: Vec<Command>,
}

#[derive(Serialize, Deserialize)]
#[serde(tag = "type")]
#[derive(Clone, Debug)]
pub enum Command {
    /// Start a server with the given parameters
    Start {
        id: usize,
        client_port: u16,
        server_port: u16,
        beacon_port: u16,
    },

    /// Kill the specified server
    Crash {
        id: usize,
    },

    /// Type `start` into the specified server's console
    Begin {
        id: usize,
    },

    /// Connect a player to the server listening on `port` and join
    Join {
        name: String,
        port: u16,
    },

    /// Answer the current question, or pick an option at random
    Answer {
        name: String,
        #[serde(default)]
        index: Option<usize>,
    },

    /// Disconnect the specified player
    Leave {
        name: String,
    },

    /// Sleep the test harness for `ms` milliseconds
    Sleep {
        ms: u64,
    },
}
