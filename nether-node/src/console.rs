use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};

use crate::runtime::{random_dataset, NodeRuntime};

const HELP: &str = "commands: ping | elect [n z] | download | connections | append [records] | show | status | exit";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsoleCommand {
    Ping,
    /// `None` uses the configured defaults.
    Elect(Option<(usize, u32)>),
    Download,
    Connections,
    Append(usize),
    Show,
    Status,
    Help,
    Exit,
}

impl ConsoleCommand {
    pub fn parse(line: &str) -> Result<Self, String> {
        let mut tokens = line.split_whitespace();
        let Some(verb) = tokens.next() else {
            return Ok(Self::Help);
        };
        let args: Vec<&str> = tokens.collect();
        match (verb.to_ascii_lowercase().as_str(), args.as_slice()) {
            ("ping", []) => Ok(Self::Ping),
            ("elect", []) => Ok(Self::Elect(None)),
            ("elect", [n, z]) => {
                let n = n.parse().map_err(|_| format!("invalid leader count: {}", n))?;
                let z = z.parse().map_err(|_| format!("invalid difficulty: {}", z))?;
                Ok(Self::Elect(Some((n, z))))
            }
            ("download", []) => Ok(Self::Download),
            ("connections", []) => Ok(Self::Connections),
            ("append", []) => Ok(Self::Append(1)),
            ("append", [count]) => count
                .parse()
                .map(Self::Append)
                .map_err(|_| format!("invalid record count: {}", count)),
            ("show", []) => Ok(Self::Show),
            ("status", []) => Ok(Self::Status),
            ("help", _) => Ok(Self::Help),
            ("exit" | "quit", []) => Ok(Self::Exit),
            _ => Err(format!("unrecognised command: {}", line.trim())),
        }
    }
}

/// Reads commands from stdin until `exit` or end of input.
pub async fn run_console(runtime: &NodeRuntime) -> Result<(), Box<dyn std::error::Error>> {
    println!("{}", HELP);
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    while let Some(line) = lines.next_line().await? {
        let command = match ConsoleCommand::parse(&line) {
            Ok(command) => command,
            Err(e) => {
                println!("{}", e);
                continue;
            }
        };
        if command == ConsoleCommand::Exit {
            break;
        }
        execute(runtime, command).await;
    }

    info!("👋 Console closed");
    Ok(())
}

async fn execute(runtime: &NodeRuntime, command: ConsoleCommand) {
    match command {
        ConsoleCommand::Ping => println!("PING sent to {} peers", runtime.ping_all().await),
        ConsoleCommand::Elect(counts) => {
            let result = match counts {
                Some((n, z)) => runtime.start_election(n, z).await,
                None => runtime.start_default_election().await,
            };
            if let Err(e) = result {
                println!("election not started: {}", e);
            }
        }
        ConsoleCommand::Download => match runtime.request_blockchain().await {
            Ok(true) => println!("ledger requested"),
            Ok(false) => println!("no leader connected"),
            Err(e) => println!("request failed: {}", e),
        },
        ConsoleCommand::Connections => {
            let summary = runtime.show_connections().await;
            println!(
                "clients: {}  leaders: {}  nodes: {}",
                summary.counts.clients, summary.counts.leaders, summary.counts.nodes
            );
            for conn in summary.connections {
                println!(
                    "  #{:<4} {:<7} {} (listens on {})",
                    conn.id,
                    conn.role.to_string(),
                    conn.remote_addr,
                    conn.advertised_addr
                );
            }
        }
        ConsoleCommand::Append(count) => match runtime.append_block(random_dataset(count)).await {
            Ok(block) => println!("{}", block),
            Err(e) => {
                warn!("append failed: {}", e);
                println!("append failed: {}", e);
            }
        },
        ConsoleCommand::Show => match runtime.blocks().await {
            Ok(blocks) => {
                for block in blocks {
                    println!("{}", block);
                }
            }
            Err(e) => println!("cannot read ledger: {}", e),
        },
        ConsoleCommand::Status => {
            let status = runtime.status().await;
            println!(
                "leader: {}  phase: {}  round active: {}  winners: {:?}",
                status.is_leader, status.phase, status.round_active, status.collected_winners
            );
        }
        ConsoleCommand::Help => println!("{}", HELP),
        ConsoleCommand::Exit => {}
    }
}
