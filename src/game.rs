//! # Summary
//!
//! The quiz round state machine, driven by the coordinator only.
//!
//! A round walks the question bank in order. Each question is broadcast to
//! the joined players and answered within the question timer; on expiry the
//! coordinator scores the correct answers inside the cluster critical
//! section, replicates the new scores, shows the scoreboard and after an
//! intermission moves to the next question, or ends the round after the last.
//!
//! Every transition is replicated, so a node taking over mid-round resumes
//! from the last question it heard of.

use hashbrown::HashMap as Map;
use parking_lot::Mutex;
use serde_derive::{Deserialize, Serialize};

use crate::error::Error;
use crate::message::{Action, Event, OPTIONS};
use crate::node::Node;
use crate::replica::GameState;
use crate::shared::SessionId;
use crate::timer::Timer;

/// Points for a correct answer.
pub const POINTS: u64 = 100;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Question {
    pub text: String,
    pub options: [String; OPTIONS],
    /// Index into `options`
    pub correct: usize,
}

impl Question {
    pub fn new(text: &str, options: [&str; OPTIONS], correct: usize) -> Self {
        Question {
            text: text.to_owned(),
            options: options.map(str::to_owned),
            correct,
        }
    }

    fn event(&self) -> Event {
        Event::Question {
            text: self.text.clone(),
            options: self.options.clone(),
        }
    }
}

/// Answers to the current question, first answer per player.
#[derive(Debug, Default)]
pub struct PendingAnswers(Map<String, usize>);

impl PendingAnswers {
    /// Records `name`'s answer. Returns `false` if it already answered.
    pub fn record(&mut self, name: &str, index: usize) -> bool {
        if self.0.contains_key(name) {
            return false
        }
        self.0.insert(name.to_owned(), index);
        true
    }

    pub fn clear(&mut self) {
        self.0.clear();
    }

    /// Players whose answer is `correct`, by name.
    pub fn winners(&self, correct: usize) -> Vec<String> {
        let mut names = self.0
            .iter()
            .filter(|(_, answer)| **answer == correct)
            .map(|(name, _)| name.clone())
            .collect::<Vec<_>>();
        names.sort();
        names
    }
}

pub struct Game {
    questions: Vec<Question>,
    pending: Mutex<PendingAnswers>,
    question_timer: Timer,
    intermission: Timer,
}

impl Game {
    pub fn new(questions: Vec<Question>) -> Self {
        Game {
            questions,
            pending: Mutex::new(PendingAnswers::default()),
            question_timer: Timer::new("question"),
            intermission: Timer::new("intermission"),
        }
    }

    pub fn cancel(&self) {
        self.question_timer.cancel();
        self.intermission.cancel();
    }
}

impl Node {
    pub fn questions(&self) -> &[Question] {
        &self.game.questions
    }

    /// Starts a new round from the first question.
    pub fn start_game(&self) -> Result<(), Error> {
        if !self.is_coordinator() {
            return Err(Error::NotCoordinator(self.id()))
        }
        if self.game.questions.is_empty() {
            return Err(Error::NoQuestions)
        }
        self.replica.update(|state| {
            if state.active {
                return Err(Error::RoundActive)
            }
            *state = GameState { active: true, question: 0 };
            Ok(())
        })?;

        info!("starting a round of {} questions", self.game.questions.len());
        self.game.intermission.cancel();
        self.replicate(Action::GameStart(0));
        self.pose_question(0, true);
        Ok(())
    }

    /// Broadcasts question `index` to the joined players and starts its timer.
    fn pose_question(&self, index: usize, replicate: bool) {
        let question = match self.game.questions.get(index) {
        | Some(question) => question,
        | None => return self.end_game(),
        };

        self.game.question_timer.cancel();
        self.game.pending.lock().clear();
        info!("posing question {}: {}", index + 1, question.text);
        self.shared.read().broadcast_clients(question.event());
        if replicate {
            self.replicate(Action::Question(index));
        }

        let node = self.clone();
        self.game.question_timer.arm(self.timing.question, async move {
            node.finish_question().await;
        });
    }

    /// Question timer expired: score, show the board, schedule the next step.
    async fn finish_question(&self) {
        let state = self.replica.state();
        if !self.is_coordinator() || !state.active {
            return
        }
        let correct = match self.game.questions.get(state.question) {
        | Some(question) => question.correct,
        | None => return,
        };

        let answers = std::mem::take(&mut *self.game.pending.lock());
        let connected = self.shared.read().players();
        let winners = answers
            .winners(correct)
            .into_iter()
            .filter(|name| connected.contains(name))
            .collect::<Vec<_>>();

        info!("question {} closed, correct: {:?}", state.question + 1, winners);
        if !winners.is_empty() {
            self.request_critical_section(|| {
                for name in &winners {
                    let score = self.replica.scores.add(name, POINTS);
                    self.replicate(Action::ScoreUpdate { name: name.clone(), score });
                }
            }).await;
        }

        self.broadcast_scoreboard();

        let node = self.clone();
        self.game.intermission.arm(self.timing.intermission, async move {
            node.advance();
        });
    }

    /// Intermission expired: next question or end of round.
    fn advance(&self) {
        if !self.is_coordinator() {
            return
        }
        let next = self.replica.update(|state| {
            if !state.active {
                return None
            }
            state.question += 1;
            Some(state.question)
        });
        match next {
        | Some(index) if index < self.game.questions.len() => self.pose_question(index, true),
        | Some(_) => self.end_game(),
        | None => (),
        }
    }

    pub(crate) fn end_game(&self) {
        self.game.question_timer.cancel();
        self.game.pending.lock().clear();
        self.replica.update(|state| state.active = false);
        info!("round over");
        self.shared.read().broadcast_clients(Event::GameEnd);
        self.replicate(Action::GameEnd);
    }

    /// Picks up a round left behind by the previous coordinator.
    pub(crate) fn resume_as_coordinator(&self) {
        self.game.cancel();
        let state = self.replica.state();
        if !state.active {
            return
        }
        if state.question < self.game.questions.len() {
            info!("resuming round at question {}", state.question + 1);
            self.pose_question(state.question, false);
        } else {
            self.end_game();
        }
    }

    /// Another node took over: stop driving the round.
    pub(crate) fn step_down(&self) {
        self.game.cancel();
        self.game.pending.lock().clear();
    }

    pub(crate) fn broadcast_scoreboard(&self) {
        let scores = self.replica.scores.sorted();
        self.shared.read().broadcast_clients(Event::Scoreboard(scores));
    }

    pub(crate) fn record_answer(&self, session: SessionId, index: usize) {
        if index >= OPTIONS {
            warn!("ignoring answer {} out of range", index);
            return
        }
        if !self.replica.state().active {
            debug!("ignoring answer outside a round");
            return
        }
        let name = match self.shared.read().player(session) {
        | Some(name) => name.clone(),
        | None => return,
        };
        if self.game.pending.lock().record(&name, index) {
            debug!("{} answered {}", name, index);
        } else {
            debug!("{} already answered", name);
        }
    }

    /// Binds `name` to `session` and brings the player up to date.
    pub(crate) fn join(&self, session: SessionId, name: String) {
        if let Some(previous) = self.shared.write().join(session, name.clone()) {
            info!("{} reconnected, closing session {}", name, previous);
        }

        self.shared
            .read()
            .send_client(session, Event::Joined { name: name.clone(), server: self.id() });

        if self.replica.scores.insert_absent(&name) {
            info!("{} joined", name);
            self.replicate(Action::PlayerJoin(name));
        } else {
            info!("{} rejoined with {} points", name, self.replica.scores.get(&name).unwrap_or(0));
        }

        let state = self.replica.state();
        if state.active {
            if let Some(question) = self.game.questions.get(state.question) {
                self.shared.read().send_client(session, question.event());
            }
        }

        self.broadcast_scoreboard();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{IpAddr, Ipv4Addr};
    use std::time::Duration;

    use crate::beacon::{Beacon, Bus};
    use crate::config::Timing;
    use crate::internal;
    use crate::registry::NodeIdentity;

    fn bank() -> Vec<Question> {
        vec![
            Question::new("One?", ["a", "b", "c", "d"], 0),
            Question::new("Two?", ["a", "b", "c", "d"], 1),
            Question::new("Three?", ["a", "b", "c", "d"], 2),
        ]
    }

    async fn node() -> Node {
        let (beacon, _) = Beacon::Local(Bus::new()).open().await.unwrap();
        let identity = NodeIdentity {
            id: 1,
            address: IpAddr::V4(Ipv4Addr::LOCALHOST),
            client_port: 0,
            server_port: 0,
        };
        let timing = Timing {
            question: Duration::from_secs(15),
            intermission: Duration::from_secs(3),
            ..Timing::default()
        };
        Node::new(identity, timing, beacon, bank())
    }

    #[test]
    fn first_answer_wins() {
        let mut pending = PendingAnswers::default();
        assert!(pending.record("alice", 1));
        assert!(!pending.record("alice", 0));
        assert!(pending.record("bob", 0));
        assert_eq!(pending.winners(1), vec!["alice".to_string()]);
        pending.clear();
        assert!(pending.winners(1).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn only_coordinator_starts_rounds() {
        let node = node().await;
        assert!(matches!(node.start_game(), Err(Error::NotCoordinator(1))));
        node.become_coordinator();
        assert!(node.start_game().is_ok());
        assert!(matches!(node.start_game(), Err(Error::RoundActive)));
        node.shutdown();
    }

    #[tokio::test(start_paused = true)]
    async fn new_coordinator_resumes_current_question() {
        let node = node().await;
        node.replica.set_state(GameState { active: true, question: 1 });

        let (mut rx, tx) = internal::new();
        node.shared.write().connect_client(7, tx);
        node.join(7, "alice".into());
        assert_eq!(rx.recv().await, Some(Event::Joined { name: "alice".into(), server: 1 }));
        assert_eq!(rx.recv().await, Some(bank()[1].event()));
        assert!(matches!(rx.recv().await, Some(Event::Scoreboard(_))));

        // Answer recorded before the handover is discarded
        node.record_answer(7, 1);
        node.become_coordinator();
        assert_eq!(rx.recv().await, Some(bank()[1].event()));

        tokio::time::sleep(Duration::from_secs(16)).await;
        assert_eq!(rx.recv().await, Some(Event::Scoreboard(vec![("alice".into(), 0)])));

        tokio::time::sleep(Duration::from_secs(3)).await;
        assert_eq!(rx.recv().await, Some(bank()[2].event()));
        node.shutdown();
    }

    #[tokio::test(start_paused = true)]
    async fn correct_answer_scores_once() {
        let node = node().await;
        node.become_coordinator();

        let (mut alice, tx) = internal::new();
        node.shared.write().connect_client(1, tx);
        node.join(1, "alice".into());
        let (mut bob, tx) = internal::new();
        node.shared.write().connect_client(2, tx);
        node.join(2, "bob".into());

        node.start_game().unwrap();
        node.record_answer(1, 0);
        node.record_answer(1, 0);
        node.record_answer(2, 3);

        tokio::time::sleep(Duration::from_secs(16)).await;
        let board = vec![("alice".to_string(), POINTS), ("bob".to_string(), 0)];
        let mut last = None;
        while let Ok(Some(event)) = tokio::time::timeout(Duration::from_millis(1), alice.recv()).await {
            last = Some(event);
        }
        assert_eq!(last, Some(Event::Scoreboard(board.clone())));
        assert_eq!(node.replica.scores.sorted(), board);

        // Bob's connection saw the same board
        let mut seen = false;
        while let Ok(Some(event)) = tokio::time::timeout(Duration::from_millis(1), bob.recv()).await {
            seen |= event == Event::Scoreboard(board.clone());
        }
        assert!(seen);
        node.shutdown();
    }

    #[tokio::test(start_paused = true)]
    async fn round_ends_after_last_question() {
        let node = node().await;
        node.become_coordinator();
        node.start_game().unwrap();
        tokio::time::sleep(Duration::from_secs(3 * 18 + 1)).await;
        assert!(!node.replica.state().active);
        assert!(node.start_game().is_ok());
        node.shutdown();
    }
}
