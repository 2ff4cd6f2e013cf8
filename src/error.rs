//! # Summary
//!
//! Error types shared by every part of the server and the player library.
//! Decoding failures of single wire records are kept apart in `Parse` so that
//! connection loops can drop the record and keep reading.

use thiserror::Error;

use crate::message::NodeId;

/// Failure to decode one pipe-delimited wire record.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum Parse {
    #[error("empty record")]
    Empty,

    #[error("unknown record type `{0}`")]
    Unknown(String),

    #[error("`{kind}` expects {expected} fields, found {found}")]
    Arity {
        kind: &'static str,
        expected: usize,
        found: usize,
    },

    #[error("invalid {field} `{value}`")]
    Field {
        field: &'static str,
        value: String,
    },
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("I/O failure: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed record: {0}")]
    Parse(#[from] Parse),

    #[error("framing failure: {0}")]
    Frame(#[from] tokio_util::codec::LinesCodecError),

    #[error("node {0} is not the coordinator")]
    NotCoordinator(NodeId),

    #[error("a round is already running")]
    RoundActive,

    #[error("question bank is empty")]
    NoQuestions,

    #[error("invalid configuration `{0}`, expected serverId,clientPort,serverPort")]
    Config(String),
}
