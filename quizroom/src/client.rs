use std::net::SocketAddr;

use quizcluster::message::{Event, OPTIONS};
use quizcluster::player::{self, Follower, Session};
use structopt::StructOpt;
use tokio::io::{AsyncBufReadExt, BufReader};

#[derive(StructOpt)]
#[structopt(name = "quizroom-client")]
struct Opt {
    /// Player name
    #[structopt(short = "n", long = "name")]
    name: String,

    /// Connect to this server directly instead of following the coordinator
    #[structopt(short = "s", long = "server")]
    server: Option<SocketAddr>,

    /// Listen for unicast heartbeats here instead of joining multicast
    #[structopt(long = "beacon-bind")]
    beacon_bind: Option<SocketAddr>,

    /// Verbosity (-v, -vv, -vvv)
    #[structopt(short = "v", parse(from_occurrences))]
    verbose: u8,
}

/// Either a fixed server or whichever node is coordinator.
enum Player {
    Direct(Session),
    Following(Follower),
}

impl Player {
    async fn next_event(&mut self) -> Option<Event> {
        match self {
        | Player::Direct(session) => match session.next_event().await? {
            | Ok(event) => Some(event),
            | Err(error) => {
                println!("[ERROR]: {}", error);
                None
            }
        },
        | Player::Following(follower) => follower.next_event().await,
        }
    }

    async fn answer(&mut self, index: usize) {
        match self {
        | Player::Direct(session) => {
            if let Err(error) = session.answer(index).await {
                println!("[ERROR]: failed to send answer: {}", error);
            }
        }
        | Player::Following(follower) => follower.answer(index),
        }
    }
}

fn display(event: &Event) {
    match event {
    | Event::Joined { name, server } => println!("[RESPONSE]: joined server {} as {}", server, name),
    | Event::Question { text, options } => {
        println!("--------------------------------------------------------------");
        println!("{}", text);
        for (index, option) in options.iter().enumerate() {
            println!("  {}. {}", index + 1, option);
        }
        println!("Answer with 1-{}", OPTIONS);
    }
    | Event::Scoreboard(entries) => {
        println!("Scoreboard:");
        for (rank, (name, score)) in entries.iter().enumerate() {
            println!("  {}. {} {}", rank + 1, name, score);
        }
    }
    | Event::GameEnd => println!("[RESPONSE]: game over"),
    }
}

async fn connect(opt: &Opt) -> Result<Player, quizcluster::Error> {
    if let Some(server) = opt.server {
        let mut session = player::connect_with_retry(server, player::RETRY_DELAY).await?;
        session.join(&opt.name).await?;
        return Ok(Player::Direct(session))
    }
    let beacon = quizroom::beacon(opt.beacon_bind, Vec::new());
    let (_, beacon_rx) = beacon.open().await?;
    println!("[RESPONSE]: looking for the coordinator");
    let coordinators = player::track(beacon_rx);
    Ok(Player::Following(player::follow(opt.name.clone(), coordinators)))
}

#[tokio::main]
async fn main() {
    let opt = Opt::from_args();
    quizroom::init_logging(opt.verbose);

    let mut player = match connect(&opt).await {
    | Ok(player) => player,
    | Err(error) => {
        eprintln!("[ERROR]: could not join: {}", error);
        std::process::exit(1)
    }
    };

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            event = player.next_event() => match event {
            | Some(event) => display(&event),
            | None => {
                println!("[RESPONSE]: disconnected");
                break
            }
            },
            line = lines.next_line() => match line {
            | Ok(Some(line)) => match line.trim().parse::<usize>() {
                | Ok(choice) if (1..=OPTIONS).contains(&choice) => player.answer(choice - 1).await,
                | _ => println!("[ERROR]: answer with a number from 1 to {}", OPTIONS),
            },
            | Ok(None) | Err(_) => break,
            },
        }
    }

    std::process::exit(0);
}
