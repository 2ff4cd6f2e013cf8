//! # Summary
//!
//! Wire records for the three channels a node speaks on.
//!
//! Every record is a single line of `|`-separated fields whose first field
//! names the record type. `Display` renders a record without its trailing
//! newline (the line codec adds it) and `FromStr` parses one line back.
//!
//! - `Discovery`: datagrams on the beacon channel.
//! - `Peer`: records on a server-to-server connection.
//! - `Request` / `Event`: records on a player connection, inbound and outbound.

use std::fmt;
use std::str::FromStr;

use crate::error::Parse;

/// Unique, totally ordered server identifier. Higher ids win elections.
pub type NodeId = usize;

/// Number of options on every question.
pub const OPTIONS: usize = 4;

/// Player names travel inside `|`-separated records and `name:score` pairs.
pub fn valid_name(name: &str) -> bool {
    !name.is_empty() && !name.contains(|c: char| c == '|' || c == ':' || c == '\n' || c == '\r')
}

fn split(line: &str) -> Result<(&str, Vec<&str>), Parse> {
    let line = line.trim_end_matches(|c: char| c == '\r' || c == '\n');
    if line.is_empty() {
        return Err(Parse::Empty)
    }
    let mut fields = line.split('|');
    let kind = fields.next().unwrap_or_default();
    Ok((kind, fields.collect()))
}

fn arity(kind: &'static str, fields: &[&str], expected: usize) -> Result<(), Parse> {
    if fields.len() == expected {
        Ok(())
    } else {
        Err(Parse::Arity { kind, expected, found: fields.len() })
    }
}

fn field<T: FromStr>(field: &'static str, value: &str) -> Result<T, Parse> {
    value.parse().map_err(|_| Parse::Field { field, value: value.to_owned() })
}

fn name(value: &str) -> Result<String, Parse> {
    if valid_name(value) {
        Ok(value.to_owned())
    } else {
        Err(Parse::Field { field: "name", value: value.to_owned() })
    }
}

fn entry(value: &str) -> Result<(String, u64), Parse> {
    let (player, score) = value
        .rsplit_once(':')
        .ok_or_else(|| Parse::Field { field: "name:score", value: value.to_owned() })?;
    Ok((name(player)?, field("score", score)?))
}

/// Datagrams on the discovery channel.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Discovery {
    Heartbeat {
        id: NodeId,
        client_port: u16,
        server_port: u16,
        coordinator: bool,
        clock: u64,
    },
    Announce {
        id: NodeId,
        clock: u64,
    },
    StateRequest {
        id: NodeId,
        clock: u64,
    },
}

impl Discovery {
    pub fn sender(&self) -> NodeId {
        match self {
        | Discovery::Heartbeat { id, .. }
        | Discovery::Announce { id, .. }
        | Discovery::StateRequest { id, .. } => *id,
        }
    }

    pub fn clock(&self) -> u64 {
        match self {
        | Discovery::Heartbeat { clock, .. }
        | Discovery::Announce { clock, .. }
        | Discovery::StateRequest { clock, .. } => *clock,
        }
    }
}

impl fmt::Display for Discovery {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        match self {
        | Discovery::Heartbeat { id, client_port, server_port, coordinator, clock } => {
            write!(fmt, "HEARTBEAT|{}|{}|{}|{}|{}", id, client_port, server_port, coordinator, clock)
        }
        | Discovery::Announce { id, clock } => write!(fmt, "COORDINATOR_ANNOUNCE|{}|{}", id, clock),
        | Discovery::StateRequest { id, clock } => write!(fmt, "STATE_REQUEST|{}|{}", id, clock),
        }
    }
}

impl FromStr for Discovery {
    type Err = Parse;
    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let (kind, fields) = split(line)?;
        match kind {
        | "HEARTBEAT" => {
            arity("HEARTBEAT", &fields, 5)?;
            Ok(Discovery::Heartbeat {
                id: field("id", fields[0])?,
                client_port: field("client port", fields[1])?,
                server_port: field("server port", fields[2])?,
                coordinator: field("coordinator flag", fields[3])?,
                clock: field("clock", fields[4])?,
            })
        }
        | "COORDINATOR_ANNOUNCE" => {
            arity("COORDINATOR_ANNOUNCE", &fields, 2)?;
            Ok(Discovery::Announce { id: field("id", fields[0])?, clock: field("clock", fields[1])? })
        }
        | "STATE_REQUEST" => {
            arity("STATE_REQUEST", &fields, 2)?;
            Ok(Discovery::StateRequest { id: field("id", fields[0])?, clock: field("clock", fields[1])? })
        }
        | other => Err(Parse::Unknown(other.to_owned())),
        }
    }
}

/// State-changing events a coordinator propagates to every peer.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Action {
    GameStart(usize),
    Question(usize),
    ScoreUpdate { name: String, score: u64 },
    GameEnd,
    PlayerJoin(String),
}

impl Action {
    fn kind(&self) -> &'static str {
        match self {
        | Action::GameStart(_) => "GAME_START",
        | Action::Question(_) => "QUESTION",
        | Action::ScoreUpdate { .. } => "SCORE_UPDATE",
        | Action::GameEnd => "GAME_END",
        | Action::PlayerJoin(_) => "PLAYER_JOIN",
        }
    }

    fn parse(kind: &str, data: &str) -> Result<Self, Parse> {
        match kind {
        | "GAME_START" => Ok(Action::GameStart(field("question index", data)?)),
        | "QUESTION" => Ok(Action::Question(field("question index", data)?)),
        | "SCORE_UPDATE" => {
            let (name, score) = entry(data)?;
            Ok(Action::ScoreUpdate { name, score })
        }
        | "GAME_END" => Ok(Action::GameEnd),
        | "PLAYER_JOIN" => Ok(Action::PlayerJoin(name(data)?)),
        | other => Err(Parse::Unknown(other.to_owned())),
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        write!(fmt, "{}|", self.kind())?;
        match self {
        | Action::GameStart(index)
        | Action::Question(index) => write!(fmt, "{}", index),
        | Action::ScoreUpdate { name, score } => write!(fmt, "{}:{}", name, score),
        | Action::GameEnd => Ok(()),
        | Action::PlayerJoin(name) => write!(fmt, "{}", name),
        }
    }
}

/// Records on a server-to-server connection.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Peer {
    Hello {
        id: NodeId,
        client_port: u16,
        server_port: u16,
    },
    Election {
        id: NodeId,
        clock: u64,
    },
    /// Answer to `Election` from a higher id. Travels as `OK`.
    Ack {
        id: NodeId,
        clock: u64,
    },
    Coordinator {
        id: NodeId,
        clock: u64,
    },
    CsRequest {
        id: NodeId,
        timestamp: u64,
    },
    CsReply {
        id: NodeId,
        clock: u64,
    },
    Replicate {
        action: Action,
        clock: u64,
    },
    StateSync {
        active: bool,
        question: usize,
        clock: u64,
    },
    ScoreSync {
        name: String,
        score: u64,
    },
}

impl Peer {
    /// Logical timestamp carried by this record, if any.
    pub fn clock(&self) -> Option<u64> {
        match self {
        | Peer::Hello { .. }
        | Peer::ScoreSync { .. } => None,
        | Peer::Election { clock, .. }
        | Peer::Ack { clock, .. }
        | Peer::Coordinator { clock, .. }
        | Peer::CsReply { clock, .. }
        | Peer::Replicate { clock, .. }
        | Peer::StateSync { clock, .. } => Some(*clock),
        | Peer::CsRequest { timestamp, .. } => Some(*timestamp),
        }
    }
}

impl fmt::Display for Peer {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        match self {
        | Peer::Hello { id, client_port, server_port } => write!(fmt, "HELLO|{}|{}|{}", id, client_port, server_port),
        | Peer::Election { id, clock } => write!(fmt, "ELECTION|{}|{}", id, clock),
        | Peer::Ack { id, clock } => write!(fmt, "OK|{}|{}", id, clock),
        | Peer::Coordinator { id, clock } => write!(fmt, "COORDINATOR|{}|{}", id, clock),
        | Peer::CsRequest { id, timestamp } => write!(fmt, "CS_REQUEST|{}|{}", id, timestamp),
        | Peer::CsReply { id, clock } => write!(fmt, "CS_REPLY|{}|{}", id, clock),
        | Peer::Replicate { action, clock } => write!(fmt, "REPLICATE|{}|{}", action, clock),
        | Peer::StateSync { active, question, clock } => write!(fmt, "STATE_SYNC|{}|{}|{}", active, question, clock),
        | Peer::ScoreSync { name, score } => write!(fmt, "SCORE_SYNC|{}|{}", name, score),
        }
    }
}

impl FromStr for Peer {
    type Err = Parse;
    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let (kind, fields) = split(line)?;
        match kind {
        | "HELLO" => {
            arity("HELLO", &fields, 3)?;
            Ok(Peer::Hello {
                id: field("id", fields[0])?,
                client_port: field("client port", fields[1])?,
                server_port: field("server port", fields[2])?,
            })
        }
        | "ELECTION" => {
            arity("ELECTION", &fields, 2)?;
            Ok(Peer::Election { id: field("id", fields[0])?, clock: field("clock", fields[1])? })
        }
        | "OK" => {
            arity("OK", &fields, 2)?;
            Ok(Peer::Ack { id: field("id", fields[0])?, clock: field("clock", fields[1])? })
        }
        | "COORDINATOR" => {
            arity("COORDINATOR", &fields, 2)?;
            Ok(Peer::Coordinator { id: field("id", fields[0])?, clock: field("clock", fields[1])? })
        }
        | "CS_REQUEST" => {
            arity("CS_REQUEST", &fields, 2)?;
            Ok(Peer::CsRequest { id: field("id", fields[0])?, timestamp: field("timestamp", fields[1])? })
        }
        | "CS_REPLY" => {
            arity("CS_REPLY", &fields, 2)?;
            Ok(Peer::CsReply { id: field("id", fields[0])?, clock: field("clock", fields[1])? })
        }
        | "REPLICATE" => {
            arity("REPLICATE", &fields, 3)?;
            Ok(Peer::Replicate {
                action: Action::parse(fields[0], fields[1])?,
                clock: field("clock", fields[2])?,
            })
        }
        | "STATE_SYNC" => {
            arity("STATE_SYNC", &fields, 3)?;
            Ok(Peer::StateSync {
                active: field("active flag", fields[0])?,
                question: field("question index", fields[1])?,
                clock: field("clock", fields[2])?,
            })
        }
        | "SCORE_SYNC" => {
            arity("SCORE_SYNC", &fields, 2)?;
            Ok(Peer::ScoreSync { name: name(fields[0])?, score: field("score", fields[1])? })
        }
        | other => Err(Parse::Unknown(other.to_owned())),
        }
    }
}

/// Records a player sends to its server.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Request {
    Join(String),
    Answer(usize),
}

impl fmt::Display for Request {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        match self {
        | Request::Join(name) => write!(fmt, "JOIN|{}", name),
        | Request::Answer(index) => write!(fmt, "ANSWER|{}", index),
        }
    }
}

impl FromStr for Request {
    type Err = Parse;
    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let (kind, fields) = split(line)?;
        match kind {
        | "JOIN" => {
            arity("JOIN", &fields, 1)?;
            Ok(Request::Join(name(fields[0])?))
        }
        | "ANSWER" => {
            arity("ANSWER", &fields, 1)?;
            Ok(Request::Answer(field("option index", fields[0])?))
        }
        | other => Err(Parse::Unknown(other.to_owned())),
        }
    }
}

/// Records a server pushes to its players.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Event {
    Joined {
        name: String,
        server: NodeId,
    },
    Question {
        text: String,
        options: [String; OPTIONS],
    },
    /// Entries sorted by score, highest first.
    Scoreboard(Vec<(String, u64)>),
    GameEnd,
}

impl fmt::Display for Event {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        match self {
        | Event::Joined { name, server } => write!(fmt, "JOINED|{}|{}", name, server),
        | Event::Question { text, options } => {
            write!(fmt, "QUESTION|{}", text)?;
            for option in options {
                write!(fmt, "|{}", option)?;
            }
            Ok(())
        }
        | Event::Scoreboard(entries) => {
            write!(fmt, "SCOREBOARD")?;
            for (name, score) in entries {
                write!(fmt, "|{}:{}", name, score)?;
            }
            Ok(())
        }
        | Event::GameEnd => write!(fmt, "GAME_END"),
        }
    }
}

impl FromStr for Event {
    type Err = Parse;
    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let (kind, fields) = split(line)?;
        match kind {
        | "JOINED" => {
            arity("JOINED", &fields, 2)?;
            Ok(Event::Joined { name: name(fields[0])?, server: field("server id", fields[1])? })
        }
        | "QUESTION" => {
            arity("QUESTION", &fields, OPTIONS + 1)?;
            Ok(Event::Question {
                text: fields[0].to_owned(),
                options: [
                    fields[1].to_owned(),
                    fields[2].to_owned(),
                    fields[3].to_owned(),
                    fields[4].to_owned(),
                ],
            })
        }
        | "SCOREBOARD" => {
            fields.iter()
                .filter(|value| !value.is_empty())
                .map(|value| entry(value))
                .collect::<Result<Vec<_>, _>>()
                .map(Event::Scoreboard)
        }
        | "GAME_END" => Ok(Event::GameEnd),
        | other => Err(Parse::Unknown(other.to_owned())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn heartbeat_wire_format() {
        let heartbeat = Discovery::Heartbeat {
            id: 3,
            client_port: 5003,
            server_port: 6003,
            coordinator: true,
            clock: 42,
        };
        assert_eq!(heartbeat.to_string(), "HEARTBEAT|3|5003|6003|true|42");
        assert_eq!("HEARTBEAT|3|5003|6003|true|42".parse::<Discovery>(), Ok(heartbeat));
    }

    #[test]
    fn ack_travels_as_ok() {
        assert_eq!(Peer::Ack { id: 2, clock: 9 }.to_string(), "OK|2|9");
        assert_eq!("OK|2|9".parse::<Peer>(), Ok(Peer::Ack { id: 2, clock: 9 }));
    }

    #[test]
    fn replicate_payloads() {
        let update = "REPLICATE|SCORE_UPDATE|alice:100|7".parse::<Peer>().unwrap();
        assert_eq!(update, Peer::Replicate {
            action: Action::ScoreUpdate { name: "alice".into(), score: 100 },
            clock: 7,
        });

        let end = Peer::Replicate { action: Action::GameEnd, clock: 8 };
        assert_eq!(end.to_string(), "REPLICATE|GAME_END||8");
        assert_eq!(end.to_string().parse::<Peer>(), Ok(end));

        assert_eq!(
            "REPLICATE|PLAYER_JOIN|bob|1".parse::<Peer>(),
            Ok(Peer::Replicate { action: Action::PlayerJoin("bob".into()), clock: 1 }),
        );
    }

    #[test]
    fn malformed_records_are_rejected() {
        assert_eq!("".parse::<Peer>(), Err(Parse::Empty));
        assert_eq!("PING|1".parse::<Peer>(), Err(Parse::Unknown("PING".into())));
        assert_eq!(
            "ELECTION|1".parse::<Peer>(),
            Err(Parse::Arity { kind: "ELECTION", expected: 2, found: 1 }),
        );
        assert_eq!(
            "CS_REQUEST|one|5".parse::<Peer>(),
            Err(Parse::Field { field: "id", value: "one".into() }),
        );
        assert!("REPLICATE|SCORE_UPDATE|alice|3".parse::<Peer>().is_err());
        assert!("REPLICATE|REWIND|1|3".parse::<Peer>().is_err());
    }

    #[test]
    fn join_rejects_bad_names() {
        assert_eq!("JOIN|alice".parse::<Request>(), Ok(Request::Join("alice".into())));
        assert!("JOIN|".parse::<Request>().is_err());
        assert!("JOIN|al:ice".parse::<Request>().is_err());
        assert!("JOIN|a|b".parse::<Request>().is_err());
        assert!("ANSWER|x".parse::<Request>().is_err());
        assert_eq!("ANSWER|2\r".parse::<Request>(), Ok(Request::Answer(2)));
    }

    #[test]
    fn scoreboard_lists_entries_in_order() {
        let board = Event::Scoreboard(vec![("alice".into(), 200), ("bob".into(), 100)]);
        assert_eq!(board.to_string(), "SCOREBOARD|alice:200|bob:100");
        assert_eq!("SCOREBOARD".parse::<Event>(), Ok(Event::Scoreboard(Vec::new())));
        assert_eq!(board.to_string().parse::<Event>(), Ok(board));
    }

    #[test]
    fn question_has_four_options() {
        let line = "QUESTION|Largest ocean?|Atlantic|Pacific|Indian|Arctic";
        match line.parse::<Event>().unwrap() {
        | Event::Question { text, options } => {
            assert_eq!(text, "Largest ocean?");
            assert_eq!(options[1], "Pacific");
        }
        | other => panic!("unexpected {:?}", other),
        }
        assert!("QUESTION|Largest ocean?|Atlantic|Pacific".parse::<Event>().is_err());
    }
}
