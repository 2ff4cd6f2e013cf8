use std::collections::HashMap as Map;
use std::net::{Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;

use quizcluster::message::{Event, OPTIONS};
use quizcluster::player;
use rand::Rng;
use structopt::StructOpt;
use tokio::sync::mpsc;

mod command;
mod server;

use crate::command::{Command, Execution};
use crate::server::Server;

#[derive(StructOpt)]
#[structopt(name = "harness")]
struct Opt {
    /// Path to the quizroom-server binary
    #[structopt(short = "s", long = "server", parse(from_os_str))]
    server: PathBuf,

    /// Scenario to execute
    #[structopt(short = "f", long = "file", parse(from_os_str))]
    file: PathBuf,

    /// Verbosity forwarded to servers (-v, -vv, -vvv)
    #[structopt(short = "v", parse(from_occurrences))]
    verbose: u8,
}

/// A scripted player; dropping it closes the connection.
struct Player {
    answers: mpsc::UnboundedSender<usize>,
}

async fn join(name: String, port: u16) -> Option<Player> {
    let addr = SocketAddr::from((Ipv4Addr::LOCALHOST, port));
    let mut session = match player::connect_with_retry(addr, player::RETRY_DELAY).await {
    | Ok(session) => session,
    | Err(error) => {
        println!("Player {} could not connect to {}: {}", name, addr, error);
        return None
    }
    };
    if let Err(error) = session.join(&name).await {
        println!("Player {} could not join: {}", name, error);
        return None
    }

    let (answers, mut answer_rx) = mpsc::unbounded_channel();
    tokio::spawn(async move {
        loop {
            tokio::select! {
                event = session.next_event() => match event {
                | Some(Ok(Event::Scoreboard(entries))) => println!("Player {} sees scoreboard {:?}", name, entries),
                | Some(Ok(event)) => println!("Player {} received {}", name, event),
                | Some(Err(_)) | None => {
                    println!("Player {} was disconnected", name);
                    return
                }
                },
                answer = answer_rx.recv() => match answer {
                | Some(index) => {
                    if session.answer(index).await.is_err() {
                        return
                    }
                }
                | None => return,
                },
            }
        }
    });
    Some(Player { answers })
}

async fn run(opt: Opt) {
    // Test execution
    let execution: Execution = std::fs::File::open(&opt.file)
        .map(serde_json::from_reader)
        .expect("[INTERNAL ERROR]: could not find file")
        .expect("[INTERNAL ERROR]: could not parse test");

    // Running servers
    let mut servers: Map<usize, Server> = Map::default();

    // Joined players
    let mut players: Map<String, Player> = Map::default();

    for command in execution.commands {
        println!("Executing command {:?}", command);
        match command {
        | Command::Start { id, client_port, server_port, beacon_port } => {
            let server = Server::new(
                &opt.server,
                id,
                client_port,
                server_port,
                beacon_port,
                &execution.beacons,
                opt.verbose,
            );
            servers.insert(id, server);
        }
        | Command::Crash { id } => {
            servers.remove(&id);
        }
        | Command::Begin { id } => match servers.get_mut(&id) {
            | Some(server) => server.console("start"),
            | None => println!("No server {} to start a round on", id),
        },
        | Command::Join { name, port } => {
            if let Some(player) = join(name.clone(), port).await {
                players.insert(name, player);
            }
        }
        | Command::Answer { name, index } => {
            let index = index.unwrap_or_else(|| rand::thread_rng().gen_range(0..OPTIONS));
            match players.get(&name) {
            | Some(player) => {
                player.answers.send(index).ok();
            }
            | None => println!("No player {} to answer", name),
            }
        }
        | Command::Leave { name } => {
            players.remove(&name);
        }
        | Command::Sleep { ms } => {
            tokio::time::sleep(Duration::from_millis(ms)).await
        }
        }
    }
}

#[tokio::main]
async fn main() {
    let opt = Opt::from_args();
    quizroom::init_logging(opt.verbose);
    run(opt).await;
}
