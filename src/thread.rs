//! # Summary
//!
//! Long-running tasks of a node.
//!
//! `client` and `peer` each own one TCP connection and forward records
//! between the socket and the shared hub. The rest are periodic jobs on the
//! discovery channel and the peer table.

/// Player communication.
pub(crate) mod client;

/// Failure sweeps and the startup election.
pub(crate) mod detector;

/// Heartbeat and announcement receipt.
pub(crate) mod discovery;

/// Heartbeat broadcast.
pub(crate) mod heartbeat;

/// Peer server communication.
pub(crate) mod peer;
