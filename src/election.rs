//! # Summary
//!
//! Bully election. The highest reachable id ends up coordinator.
//!
//! A node starts an election by sending `ELECTION` to every known higher id
//! and waiting for `OK`. Silence means no higher node is alive, so it takes
//! over; an `OK` means a higher node took the election from it, and the node
//! waits for that node's announcement. Announcements are adopted as they
//! arrive, with no term or epoch: the last one heard wins.

use parking_lot::Mutex;

use crate::message::{Discovery, NodeId, Peer};
use crate::node::Node;
use crate::timer::Timer;

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct ElectionState {
    /// Single-flight guard for `trigger_election`
    pub in_progress: bool,
    pub coordinator: Option<NodeId>,
    /// `OK`s received since the current election started
    pub acks: usize,
}

#[derive(Debug)]
pub struct Election {
    state: Mutex<ElectionState>,
    timer: Timer,
}

impl Election {
    pub fn new() -> Self {
        Election {
            state: Mutex::new(ElectionState::default()),
            timer: Timer::new("election"),
        }
    }

    pub fn cancel(&self) {
        self.timer.cancel();
    }
}

impl Node {
    pub fn coordinator(&self) -> Option<NodeId> {
        self.election.state.lock().coordinator
    }

    pub fn is_coordinator(&self) -> bool {
        self.coordinator() == Some(self.id())
    }

    /// Starts an election unless one is already running.
    pub fn trigger_election(&self) {
        {
            let mut state = self.election.state.lock();
            if state.in_progress {
                debug!("election already in progress");
                return
            }
            state.in_progress = true;
            state.acks = 0;
        }

        let clock = self.clock.increment();
        let higher = self.peers.read().higher(self.id());
        info!("starting election at clock {}, higher nodes {:?}", clock, higher);

        if higher.is_empty() {
            self.become_coordinator();
            return
        }

        self.shared
            .read()
            .narrowcast(&higher, Peer::Election { id: self.id(), clock });

        let node = self.clone();
        self.election.timer.arm(self.timing.election, async move {
            node.conclude_election();
        });
    }

    /// Election timeout expired.
    fn conclude_election(&self) {
        let state = {
            let mut state = self.election.state.lock();
            state.in_progress = false;
            *state
        };

        match state.coordinator {
        | Some(id) if id == self.id() => debug!("election settled, already coordinator"),
        | Some(id) => debug!("election settled on coordinator {}", id),
        | None if state.acks == 0 => {
            info!("no higher node answered");
            self.become_coordinator();
        }
        | None => {
            warn!("{} higher nodes answered but none took over, restarting election", state.acks);
            let node = self.clone();
            tokio::spawn(async move {
                node.trigger_election();
            });
        }
        }
    }

    /// Starts an election after the settle delay, unless the node shuts down first.
    pub(crate) fn schedule_election(&self) {
        let node = self.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = node.cancelled() => (),
                _ = tokio::time::sleep(node.timing.settle) => node.trigger_election(),
            }
        });
    }

    pub(crate) fn on_election(&self, candidate: NodeId) {
        if candidate >= self.id() {
            return
        }
        debug!("election from lower node {}", candidate);
        let clock = self.clock.increment();
        self.shared
            .read()
            .send(candidate, Peer::Ack { id: self.id(), clock });
        self.trigger_election();
    }

    pub(crate) fn on_ack(&self, from: NodeId) {
        debug!("node {} answered our election", from);
        self.election.state.lock().acks += 1;
    }

    /// Takes over as coordinator and announces it on both channels.
    pub(crate) fn become_coordinator(&self) {
        let resumed = {
            let mut state = self.election.state.lock();
            let already = state.coordinator == Some(self.id());
            state.in_progress = false;
            state.coordinator = Some(self.id());
            !already
        };

        if resumed {
            info!("node {} is now coordinator", self.id());
        }

        let clock = self.clock.increment();
        self.beacon.send(&Discovery::Announce { id: self.id(), clock });

        let clock = self.clock.increment();
        self.shared
            .read()
            .broadcast(Peer::Coordinator { id: self.id(), clock });

        if resumed {
            self.resume_as_coordinator();
        }
    }

    /// Accepts another node's coordinator claim.
    pub(crate) fn adopt_coordinator(&self, id: NodeId) {
        if id == self.id() {
            return
        }
        let previous = {
            let mut state = self.election.state.lock();
            state.coordinator.replace(id)
        };
        if previous == Some(id) {
            return
        }
        info!("node {} is coordinator", id);
        if previous == Some(self.id()) {
            warn!("stepping down in favour of node {}", id);
            self.step_down();
        }
    }

    /// Forgets the coordinator if it is `id`.
    pub(crate) fn clear_coordinator(&self, id: NodeId) -> bool {
        let mut state = self.election.state.lock();
        if state.coordinator == Some(id) {
            state.coordinator = None;
            true
        } else {
            false
        }
    }
}
