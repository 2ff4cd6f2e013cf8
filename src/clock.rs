//! # Summary
//!
//! Lamport logical clock. A single counter is shared by every component of a
//! node: it is incremented before any timestamped message leaves and merged
//! with the timestamp of every message that arrives.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Shared handle to one node's logical clock. All clones tick the same counter.
#[derive(Clone, Debug, Default)]
pub struct Clock(Arc<AtomicU64>);

impl Clock {
    pub fn new() -> Self {
        Clock::default()
    }

    /// Current value without ticking.
    pub fn now(&self) -> u64 {
        self.0.load(Ordering::SeqCst)
    }

    /// Ticks once for a local send event and returns the new value.
    pub fn increment(&self) -> u64 {
        self.0.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Merges a received timestamp: `local = max(local, received) + 1`.
    pub fn observe(&self, received: u64) -> u64 {
        let previous = self.0
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |local| {
                Some(local.max(received) + 1)
            })
            .unwrap_or_else(|local| local);
        previous.max(received) + 1
    }
}
