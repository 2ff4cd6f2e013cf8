use std::net::{IpAddr, Ipv4Addr};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use quizcluster::beacon::{Beacon, Bus};
use quizcluster::message::Event;
use quizcluster::player::{self, Session};
use quizcluster::{Config, GameState, Node, Question, Timing};
use tokio::time::Instant;

const PATIENCE: Duration = Duration::from_secs(10);

fn fast() -> Timing {
    Timing::default().scaled(20)
}

async fn start(id: usize, bus: &Bus, timing: Timing, questions: Vec<Question>) -> Node {
    Config::new(id, 0, 0)
        .with_host(IpAddr::V4(Ipv4Addr::LOCALHOST))
        .with_beacon(Beacon::Local(bus.clone()))
        .with_timing(timing)
        .run(questions)
        .await
        .expect("node failed to start")
}

async fn eventually<F: Fn() -> bool>(what: &str, check: F) {
    let deadline = Instant::now() + PATIENCE;
    while !check() {
        assert!(Instant::now() < deadline, "timed out waiting for {}", what);
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

fn bank(count: usize) -> Vec<Question> {
    (0..count)
        .map(|index| Question::new(&format!("Q{}", index), ["a", "b", "c", "d"], 0))
        .collect()
}

fn fully_linked(nodes: &[Node]) -> bool {
    nodes.iter().all(|node| node.status().links.len() == nodes.len() - 1)
}

async fn next_matching<F: Fn(&Event) -> bool>(session: &mut Session, check: F) -> Event {
    let wait = async {
        loop {
            match session.next_event().await {
            | Some(Ok(event)) if check(&event) => return event,
            | Some(Ok(_)) => continue,
            | Some(Err(error)) => panic!("session failed: {}", error),
            | None => panic!("server closed the session"),
            }
        }
    };
    tokio::time::timeout(PATIENCE, wait)
        .await
        .expect("timed out waiting for event")
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_elections_agree_on_highest() {
    let bus = Bus::new();
    let timing = Timing { bootstrap: Duration::from_secs(60), ..fast() };
    let mut nodes = Vec::new();
    for id in 1..=3 {
        nodes.push(start(id, &bus, timing, Vec::new()).await);
    }
    eventually("links between all nodes", || fully_linked(&nodes)).await;

    for node in &nodes {
        node.trigger_election();
    }
    eventually("agreement on node 3", || {
        nodes.iter().all(|node| node.coordinator() == Some(3))
    }).await;
    assert!(nodes[2].is_coordinator());
    assert!(!nodes[0].is_coordinator());

    for node in &nodes {
        node.shutdown();
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn coordinator_crash_elects_next_highest() {
    let bus = Bus::new();
    let mut nodes = Vec::new();
    for id in 1..=3 {
        nodes.push(start(id, &bus, fast(), Vec::new()).await);
    }
    eventually("bootstrap election", || {
        nodes.iter().all(|node| node.coordinator() == Some(3))
    }).await;

    let crashed = nodes.pop().expect("three nodes");
    crashed.shutdown();
    assert!(crashed.is_shut_down());

    eventually("failover to node 2", || {
        nodes.iter().all(|node| node.coordinator() == Some(2))
    }).await;
    eventually("node 3 dropped from peer tables", || {
        nodes.iter().all(|node| !node.status().peers.contains(&3))
    }).await;

    for node in &nodes {
        node.shutdown();
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn single_node_plays_a_round() {
    let bus = Bus::new();
    let questions = vec![Question::new("2 + 2?", ["3", "5", "4", "22"], 2)];
    let node = start(1, &bus, fast(), questions).await;
    eventually("self election", || node.is_coordinator()).await;

    let addr = node.identity().client_addr();
    let mut alice = player::connect(addr).await.unwrap();
    let mut bob = player::connect(addr).await.unwrap();
    alice.join("alice").await.unwrap();
    next_matching(&mut alice, |event| matches!(event, Event::Joined { server: 1, .. })).await;
    bob.join("bob").await.unwrap();
    next_matching(&mut bob, |event| matches!(event, Event::Joined { .. })).await;
    eventually("both players joined", || node.status().players.len() == 2).await;

    node.start_game().unwrap();
    assert!(node.start_game().is_err());

    let question = next_matching(&mut alice, |event| matches!(event, Event::Question { .. })).await;
    if let Event::Question { text, options } = question {
        assert_eq!(text, "2 + 2?");
        assert_eq!(options[2], "4");
    }
    next_matching(&mut bob, |event| matches!(event, Event::Question { .. })).await;
    alice.answer(2).await.unwrap();
    alice.answer(0).await.unwrap();
    bob.answer(1).await.unwrap();

    let expected = vec![("alice".to_string(), 100), ("bob".to_string(), 0)];
    let board = next_matching(&mut bob, |event| match event {
    | Event::Scoreboard(entries) => entries.iter().any(|(_, score)| *score > 0),
    | _ => false,
    }).await;
    assert_eq!(board, Event::Scoreboard(expected.clone()));
    next_matching(&mut alice, |event| *event == Event::GameEnd).await;
    assert!(!node.status().game.active);

    // Joining again under a taken name replaces the old session and keeps the score
    let mut again = player::connect(addr).await.unwrap();
    again.join("alice").await.unwrap();
    next_matching(&mut again, |event| *event == Event::Scoreboard(expected.clone())).await;
    let closed = tokio::time::timeout(PATIENCE, async {
        while let Some(Ok(_)) = alice.next_event().await {}
    });
    closed.await.expect("old session stayed open");

    node.shutdown();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn critical_sections_never_overlap() {
    let bus = Bus::new();
    let timing = Timing { mutex: Duration::from_secs(5), ..fast() };
    let nodes = vec![
        start(1, &bus, timing, Vec::new()).await,
        start(2, &bus, timing, Vec::new()).await,
    ];
    eventually("links between both nodes", || fully_linked(&nodes)).await;

    let inside = Arc::new(AtomicBool::new(false));
    let entries = Arc::new(AtomicUsize::new(0));
    let mut tasks = Vec::new();
    for node in &nodes {
        for _ in 0..4 {
            let node = node.clone();
            let inside = inside.clone();
            let entries = entries.clone();
            tasks.push(tokio::spawn(async move {
                node.request_critical_section(|| {
                    assert!(!inside.swap(true, Ordering::SeqCst), "critical sections overlapped");
                    std::thread::sleep(Duration::from_millis(20));
                    inside.store(false, Ordering::SeqCst);
                    entries.fetch_add(1, Ordering::SeqCst);
                }).await
            }));
        }
    }
    for task in tasks {
        task.await.unwrap();
    }
    assert_eq!(entries.load(Ordering::SeqCst), 8);

    for node in &nodes {
        node.shutdown();
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn takeover_resends_replicated_question() {
    let bus = Bus::new();
    let timing = Timing { question: Duration::from_secs(2), ..fast() };
    let nodes = vec![
        start(1, &bus, timing, bank(4)).await,
        start(2, &bus, timing, bank(4)).await,
    ];
    eventually("node 2 elected", || {
        nodes.iter().all(|node| node.coordinator() == Some(2))
    }).await;
    eventually("links between both nodes", || fully_linked(&nodes)).await;

    // Followers forward nothing to their players until they take over
    let mut alice = player::connect(nodes[0].identity().client_addr()).await.unwrap();
    alice.join("alice").await.unwrap();
    next_matching(&mut alice, |event| matches!(event, Event::Joined { server: 1, .. })).await;

    nodes[1].start_game().unwrap();
    let third = GameState { active: true, question: 2 };
    eventually("question 3 replicated to node 1", || nodes[0].status().game == third).await;
    nodes[1].shutdown();

    let resent = next_matching(&mut alice, |event| matches!(event, Event::Question { .. })).await;
    assert!(matches!(resent, Event::Question { ref text, .. } if text == "Q2"));
    assert!(nodes[0].is_coordinator());
    assert_eq!(nodes[0].status().game, third);

    nodes[0].shutdown();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn late_joiner_receives_game_state() {
    let bus = Bus::new();
    let timing = Timing { question: Duration::from_secs(2), ..fast() };
    let coordinator = start(2, &bus, timing, bank(3)).await;
    eventually("self election", || coordinator.is_coordinator()).await;

    let mut alice = player::connect(coordinator.identity().client_addr()).await.unwrap();
    alice.join("alice").await.unwrap();
    coordinator.start_game().unwrap();
    next_matching(&mut alice, |event| matches!(event, Event::Question { .. })).await;
    alice.answer(0).await.unwrap();
    eventually("alice scored", || {
        coordinator.status().scoreboard == vec![("alice".to_string(), 100)]
    }).await;

    let late = start(1, &bus, Timing { bootstrap: Duration::from_secs(60), ..timing }, bank(3)).await;
    eventually("coordinator adopted", || late.coordinator() == Some(2)).await;
    eventually("state and scores synced", || {
        let (theirs, ours) = (coordinator.status(), late.status());
        ours.game.active && ours.game == theirs.game && ours.scoreboard == theirs.scoreboard
    }).await;
    assert_eq!(late.status().scoreboard, vec![("alice".to_string(), 100)]);

    late.shutdown();
    coordinator.shutdown();
}
