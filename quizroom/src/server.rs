use std::net::SocketAddr;
use std::path::PathBuf;

use structopt::StructOpt;
use tokio::io::{AsyncBufReadExt, BufReader};

enum Command {
    /// Start a round (coordinator only)
    Start,

    /// Force an election
    Elect,

    /// Print this node's view of the cluster
    Status,

    /// Shut down this node
    Quit,

    Help,
}

fn usage() {
    println!(
        "{}{}{}{}{}{}{}",
        "--------------------------------------------------------------\n",
        "Possible commands:\n",
        "start  | s  -- Start a round (coordinator only)\n",
        "elect  | e  -- Force an election\n",
        "status | t  -- Show coordinator, peers, players and scores\n",
        "quit   | q  -- Shut down this server\n",
        "--------------------------------------------------------------",
    );
}

impl std::str::FromStr for Command {
    type Err = ();
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
        | "start" | "s" => Ok(Command::Start),
        | "elect" | "e" => Ok(Command::Elect),
        | "status" | "t" => Ok(Command::Status),
        | "quit" | "q" => Ok(Command::Quit),
        | "help" | "h" => Ok(Command::Help),
        | _ => Err(()),
        }
    }
}

#[derive(StructOpt)]
#[structopt(name = "quizroom-server")]
struct Opt {
    /// Server ID and ports as `serverId,clientPort,serverPort`
    config: quizcluster::Config,

    /// JSON question bank (defaults to the built-in bank)
    #[structopt(short = "q", long = "questions", parse(from_os_str))]
    questions: Option<PathBuf>,

    /// Discover peers over unicast UDP bound here instead of multicast
    #[structopt(long = "beacon-bind")]
    beacon_bind: Option<SocketAddr>,

    /// Unicast discovery destinations (repeatable)
    #[structopt(long = "beacon-target")]
    beacon_targets: Vec<SocketAddr>,

    /// Verbosity (-v, -vv, -vvv)
    #[structopt(short = "v", parse(from_occurrences))]
    verbose: u8,
}

async fn console(node: quizcluster::Node) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let line = tokio::select! {
            _ = node.cancelled() => return,
            line = lines.next_line() => line,
        };

        // Detached from a terminal: keep serving until interrupted
        let line = match line {
        | Ok(Some(line)) => line,
        | Ok(None) | Err(_) => {
            tokio::signal::ctrl_c().await.ok();
            return
        }
        };

        match line.parse::<Command>() {
        | Ok(Command::Start) => match node.start_game() {
            | Ok(()) => println!("[RESPONSE]: round started"),
            | Err(error) => println!("[ERROR]: {}", error),
        },
        | Ok(Command::Elect) => {
            node.trigger_election();
            println!("[RESPONSE]: election started");
        }
        | Ok(Command::Status) => println!("{}", node.status()),
        | Ok(Command::Quit) => return,
        | Ok(Command::Help) => usage(),
        | Err(()) if line.trim().is_empty() => (),
        | Err(()) => println!("[ERROR]: could not parse command, try `help`"),
        }
    }
}

#[tokio::main]
async fn main() {
    let opt = Opt::from_args();
    quizroom::init_logging(opt.verbose);

    let questions = match &opt.questions {
    | Some(path) => match quizroom::load_questions(path) {
        | Ok(questions) => questions,
        | Err(error) => {
            eprintln!("[ERROR]: could not load {}: {}", path.display(), error);
            std::process::exit(1)
        }
    },
    | None => quizroom::default_questions(),
    };

    let beacon = quizroom::beacon(opt.beacon_bind, opt.beacon_targets);
    let node = match opt.config.with_beacon(beacon).run(questions).await {
    | Ok(node) => node,
    | Err(error) => {
        eprintln!("[ERROR]: could not start server: {}", error);
        std::process::exit(1)
    }
    };

    let identity = node.identity();
    println!(
        "[RESPONSE]: server {} ready, players on port {}, peers on port {}",
        identity.id,
        identity.client_port,
        identity.server_port,
    );
    console(node.clone()).await;
    node.shutdown();

    // The stdin reader thread would otherwise hold the runtime open
    std::process::exit(0);
}
