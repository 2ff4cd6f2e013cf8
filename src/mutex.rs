//! # Summary
//!
//! Ricart-Agrawala mutual exclusion across the cluster.
//!
//! A requester timestamps its request with the Lamport clock, sends it to
//! every known peer and enters once all of them replied. A node that is
//! itself requesting defers requests ordered after its own by
//! `(timestamp, id)` and answers them when it leaves; everything else is
//! answered at once.
//!
//! The wait is bounded. When the deadline passes the requester enters
//! anyway, so exclusion is best effort under message loss or slow peers.

use hashbrown::HashSet;
use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio::time::Instant;

use crate::message::{NodeId, Peer};
use crate::node::Node;

/// A deferred request, ordered by `(timestamp, sender)`.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct MutexRequest {
    pub timestamp: u64,
    pub sender: NodeId,
}

/// How to answer an incoming request.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Verdict {
    Reply,
    Defer,
}

#[derive(Debug, Default)]
struct Ledger {
    /// Timestamp of the outstanding local request
    request: Option<u64>,
    replies: HashSet<NodeId>,
    deferred: Vec<MutexRequest>,
}

pub struct Exclusion {
    id: NodeId,
    /// Serializes local requests
    entry: tokio::sync::Mutex<()>,
    ledger: Mutex<Ledger>,
    notify: Notify,
}

impl Exclusion {
    pub fn new(id: NodeId) -> Self {
        Exclusion {
            id,
            entry: tokio::sync::Mutex::new(()),
            ledger: Mutex::new(Ledger::default()),
            notify: Notify::new(),
        }
    }

    fn begin(&self, timestamp: u64) {
        let mut ledger = self.ledger.lock();
        ledger.request = Some(timestamp);
        ledger.replies.clear();
    }

    pub fn on_request(&self, incoming: MutexRequest) -> Verdict {
        let mut ledger = self.ledger.lock();
        match ledger.request {
        | Some(timestamp) if MutexRequest { timestamp, sender: self.id } < incoming => {
            ledger.deferred.push(incoming);
            Verdict::Defer
        }
        | _ => Verdict::Reply,
        }
    }

    pub fn on_reply(&self, sender: NodeId) {
        let mut ledger = self.ledger.lock();
        if ledger.request.is_some() {
            ledger.replies.insert(sender);
        }
        drop(ledger);
        self.notify.notify_one();
    }

    /// Re-evaluates a pending wait, e.g. after a peer left the table.
    pub fn wake(&self) {
        self.notify.notify_one();
    }

    fn granted(&self, known: &[NodeId]) -> bool {
        let ledger = self.ledger.lock();
        known.iter().all(|id| ledger.replies.contains(id))
    }

    /// Leaves the critical section, returning deferred requests in order.
    fn end(&self) -> Vec<MutexRequest> {
        let mut ledger = self.ledger.lock();
        ledger.request = None;
        ledger.replies.clear();
        let mut deferred = std::mem::take(&mut ledger.deferred);
        deferred.sort();
        deferred
    }
}

/// Leaves the critical section when dropped, including when the requesting
/// task is aborted mid-section.
struct Release<'a>(&'a Node);

impl Drop for Release<'_> {
    fn drop(&mut self) {
        let node = self.0;
        for request in node.exclusion.end() {
            let clock = node.clock.increment();
            trace!("releasing deferred request {:?}", request);
            node.shared
                .read()
                .send(request.sender, Peer::CsReply { id: node.id(), clock });
        }
    }
}

impl Node {
    /// Runs `action` inside the cluster-wide critical section.
    pub async fn request_critical_section<F, T>(&self, action: F) -> T
    where F: FnOnce() -> T,
    {
        let _entry = self.exclusion.entry.lock().await;
        let timestamp = self.clock.increment();
        self.exclusion.begin(timestamp);
        let _release = Release(self);

        let known = self.peers.read().ids();
        debug!("requesting critical section at {} from {:?}", timestamp, known);
        self.shared
            .read()
            .narrowcast(&known, Peer::CsRequest { id: self.id(), timestamp });

        let deadline = Instant::now() + self.timing.mutex;
        loop {
            let known = self.peers.read().ids();
            if self.exclusion.granted(&known) {
                debug!("critical section granted at {}", timestamp);
                break
            }
            let notified = self.exclusion.notify.notified();
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                warn!("critical section replies timed out, entering anyway");
                break
            }
        }

        action()
    }

    pub(crate) fn on_cs_request(&self, request: MutexRequest) {
        match self.exclusion.on_request(request) {
        | Verdict::Defer => debug!("deferring critical section request {:?}", request),
        | Verdict::Reply => {
            let clock = self.clock.increment();
            self.shared
                .read()
                .send(request.sender, Peer::CsReply { id: self.id(), clock });
        }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(timestamp: u64, sender: NodeId) -> MutexRequest {
        MutexRequest { timestamp, sender }
    }

    #[test]
    fn idle_node_replies_immediately() {
        let exclusion = Exclusion::new(1);
        assert_eq!(exclusion.on_request(request(3, 2)), Verdict::Reply);
        assert!(exclusion.end().is_empty());
    }

    #[test]
    fn equal_timestamps_favour_lower_id() {
        let one = Exclusion::new(1);
        let two = Exclusion::new(2);
        one.begin(7);
        two.begin(7);

        // Each receives the other's request
        assert_eq!(one.on_request(request(7, 2)), Verdict::Defer);
        assert_eq!(two.on_request(request(7, 1)), Verdict::Reply);

        // Node 1 holds the only reply it needs; node 2 does not
        one.on_reply(2);
        assert!(one.granted(&[2]));
        assert!(!two.granted(&[1]));

        // Node 1 leaves and releases node 2
        assert_eq!(one.end(), vec![request(7, 2)]);
        two.on_reply(1);
        assert!(two.granted(&[1]));
    }

    #[test]
    fn earlier_requests_are_answered_while_requesting() {
        let exclusion = Exclusion::new(3);
        exclusion.begin(10);
        assert_eq!(exclusion.on_request(request(4, 5)), Verdict::Reply);
        assert_eq!(exclusion.on_request(request(12, 1)), Verdict::Defer);
        assert_eq!(exclusion.on_request(request(11, 2)), Verdict::Defer);
        assert_eq!(exclusion.end(), vec![request(11, 2), request(12, 1)]);
        assert!(exclusion.ledger.lock().request.is_none());
    }

    #[test]
    fn replies_outside_a_request_are_ignored() {
        let exclusion = Exclusion::new(1);
        exclusion.on_reply(2);
        exclusion.begin(1);
        assert!(!exclusion.granted(&[2]));
        assert!(exclusion.granted(&[]));
    }
}
