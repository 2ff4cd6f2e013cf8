//! # Summary
//!
//! Replicated game state: the round progress and the scoreboard.
//!
//! The coordinator pushes every state change to all known peers as a
//! fire-and-forget `REPLICATE` record; peers apply records in arrival order
//! and the last write wins. A peer that finds an existing coordinator asks
//! for a full copy (`STATE_SYNC` followed by one `SCORE_SYNC` per player).

use hashbrown::HashMap as Map;
use parking_lot::Mutex;

use crate::message::{Action, NodeId, Peer};
use crate::node::Node;

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct GameState {
    pub active: bool,
    /// Index of the current question
    pub question: usize,
}

/// Player name to score. Rows are created on first join and never removed.
#[derive(Debug, Default)]
pub struct Scoreboard(Mutex<Map<String, u64>>);

impl Scoreboard {
    pub fn get(&self, name: &str) -> Option<u64> {
        self.0.lock().get(name).copied()
    }

    /// Creates a zero row for `name`. Returns `false` if it already existed.
    pub fn insert_absent(&self, name: &str) -> bool {
        let mut scores = self.0.lock();
        if scores.contains_key(name) {
            false
        } else {
            scores.insert(name.to_owned(), 0);
            true
        }
    }

    /// Adds `points` to `name` and returns the new score.
    pub fn add(&self, name: &str, points: u64) -> u64 {
        let mut scores = self.0.lock();
        let score = scores.entry(name.to_owned()).or_insert(0);
        *score += points;
        *score
    }

    pub fn set(&self, name: &str, score: u64) {
        self.0.lock().insert(name.to_owned(), score);
    }

    /// Entries by score descending, ties by name.
    pub fn sorted(&self) -> Vec<(String, u64)> {
        let mut entries = self.0
            .lock()
            .iter()
            .map(|(name, score)| (name.clone(), *score))
            .collect::<Vec<_>>();
        entries.sort_by(|(a_name, a_score), (b_name, b_score)| {
            b_score.cmp(a_score).then_with(|| a_name.cmp(b_name))
        });
        entries
    }
}

#[derive(Debug, Default)]
pub struct Replica {
    state: Mutex<GameState>,
    pub scores: Scoreboard,
}

impl Replica {
    pub fn state(&self) -> GameState {
        *self.state.lock()
    }

    pub fn set_state(&self, state: GameState) {
        *self.state.lock() = state;
    }

    /// Runs `f` on the game state under its lock.
    pub fn update<T>(&self, f: impl FnOnce(&mut GameState) -> T) -> T {
        f(&mut self.state.lock())
    }

    /// Applies a replicated action. Reapplying an action is harmless.
    pub fn apply(&self, action: &Action) {
        match action {
        | Action::GameStart(question) => {
            self.set_state(GameState { active: true, question: *question });
        }
        | Action::Question(question) => self.update(|state| state.question = *question),
        | Action::ScoreUpdate { name, score } => self.scores.set(name, *score),
        | Action::GameEnd => self.update(|state| state.active = false),
        | Action::PlayerJoin(name) => {
            self.scores.insert_absent(name);
        }
        }
    }
}

impl Node {
    /// Sends `action` to every known peer. No acknowledgment, no retry.
    pub(crate) fn replicate(&self, action: Action) {
        let clock = self.clock.increment();
        let peers = self.peers.read().ids();
        debug!("replicating {} to {:?}", action, peers);
        self.shared
            .read()
            .narrowcast(&peers, Peer::Replicate { action, clock });
    }

    pub(crate) fn on_replicate(&self, action: Action) {
        debug!("applying replicated {}", action);
        self.replica.apply(&action);
    }

    /// Pushes the full game state and scoreboard to `id`.
    pub(crate) fn send_state(&self, id: NodeId) {
        let state = self.replica.state();
        let scores = self.replica.scores.sorted();
        let clock = self.clock.increment();
        info!("sending state to node {}", id);
        let shared = self.shared.read();
        shared.send(id, Peer::StateSync { active: state.active, question: state.question, clock });
        for (name, score) in scores {
            shared.send(id, Peer::ScoreSync { name, score });
        }
    }

    pub(crate) fn on_state_sync(&self, state: GameState) {
        info!("state synchronized: {:?}", state);
        self.replica.set_state(state);
    }

    pub(crate) fn on_score_sync(&self, name: String, score: u64) {
        self.replica.scores.set(&name, score);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn score_update_is_idempotent() {
        let replica = Replica::default();
        let update = Action::ScoreUpdate { name: "alice".into(), score: 100 };
        replica.apply(&update);
        assert_eq!(replica.scores.get("alice"), Some(100));
        replica.apply(&update);
        assert_eq!(replica.scores.get("alice"), Some(100));
    }

    #[test]
    fn player_join_keeps_existing_score() {
        let replica = Replica::default();
        replica.apply(&Action::ScoreUpdate { name: "bob".into(), score: 300 });
        replica.apply(&Action::PlayerJoin("bob".into()));
        replica.apply(&Action::PlayerJoin("carol".into()));
        assert_eq!(replica.scores.get("bob"), Some(300));
        assert_eq!(replica.scores.get("carol"), Some(0));
    }

    #[test]
    fn round_progress_follows_actions() {
        let replica = Replica::default();
        replica.apply(&Action::GameStart(0));
        replica.apply(&Action::Question(2));
        assert_eq!(replica.state(), GameState { active: true, question: 2 });
        replica.apply(&Action::GameEnd);
        assert_eq!(replica.state(), GameState { active: false, question: 2 });
    }

    #[test]
    fn scoreboard_sorts_descending_then_by_name() {
        let scores = Scoreboard::default();
        scores.set("carol", 100);
        scores.add("alice", 200);
        scores.set("bob", 100);
        assert_eq!(scores.sorted(), vec![
            ("alice".to_string(), 200),
            ("bob".to_string(), 100),
            ("carol".to_string(), 100),
        ]);
    }
}
