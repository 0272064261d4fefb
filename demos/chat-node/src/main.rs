//! murmur chat node
//!
//! Every line typed on stdin is gossiped to the network as a chat rumor.
//!
//! Commands:
//! - `/msg <origin> <text>`: private line along the learned route
//! - `/connect <host:port>`: add a neighbor
//! - `/quit`

use std::process::ExitCode;
use std::time::Duration;

use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;

use murmur_core::{MurmurError, MurmurResult};
use murmur_runtime::telemetry::{self, LogFormat};
use murmur_runtime::{NeighborSpec, Node, NodeConfig, NodeEvent, NodeHandle};
use murmur_transport::ports::PORTS_PER_USER;
use murmur_transport::PortRange;

#[derive(Parser, Debug)]
#[command(author, version, about = "Gossip chat over UDP")]
struct Cli {
    /// Neighbors to start with, as host:port
    neighbors: Vec<NeighborSpec>,

    /// Do not relay other peers' chat or private messages
    #[arg(long)]
    noforward: bool,

    /// Name to sign messages with (default: <hostname>-<random>)
    #[arg(long)]
    origin: Option<String>,

    /// First port to try (default: derived from the user name)
    #[arg(long)]
    port_base: Option<u16>,

    /// Wait for a status reply before giving up on a neighbor
    #[arg(long, value_parser = humantime::parse_duration, default_value = "2s")]
    retransmit: Duration,

    /// Period of the unsolicited status exchange
    #[arg(long, value_parser = humantime::parse_duration, default_value = "10s")]
    anti_entropy: Duration,

    /// Period of the route announcement
    #[arg(long, value_parser = humantime::parse_duration, default_value = "60s")]
    route_interval: Duration,

    /// Seed for the protocol's random choices
    #[arg(long)]
    seed: Option<u64>,

    /// Log output: pretty or json
    #[arg(long, default_value = "pretty")]
    log_format: LogFormat,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    if let Err(e) = telemetry::init(cli.log_format) {
        eprintln!("murmur-chat: logging unavailable: {e}");
    }

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "murmur-chat failed");
            ExitCode::from(1)
        }
    }
}

async fn run(cli: Cli) -> MurmurResult<()> {
    let mut config = NodeConfig::default()
        .with_forwarding(!cli.noforward)
        .with_retransmit_interval(cli.retransmit)
        .with_anti_entropy_interval(cli.anti_entropy)
        .with_route_rumor_interval(cli.route_interval);
    if let Some(origin) = cli.origin {
        config = config.with_origin(origin);
    }
    if let Some(seed) = cli.seed {
        config = config.with_seed(seed);
    }

    let range = match cli.port_base {
        Some(first) => PortRange::new(first, PORTS_PER_USER).ok_or(MurmurError::NoUsablePort {
            first,
            last: u16::MAX,
        })?,
        None => PortRange::for_current_user(),
    };

    let mut node = Node::bind(config, range).await?;
    for spec in cli.neighbors {
        node.add_neighbor(spec);
    }
    println!("* {} listening on {}", node.origin(), node.local_addr());

    let handle = node.handle();
    let events = node.take_events().ok_or(MurmurError::NodeClosed)?;
    let node_task = tokio::spawn(node.run());
    tokio::spawn(print_events(events));

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdin_open = true;
    loop {
        tokio::select! {
            line = lines.next_line(), if stdin_open => match line {
                Ok(Some(line)) => {
                    if let Input::Quit = handle_line(&handle, line.trim()).await? {
                        break;
                    }
                }
                Ok(None) => stdin_open = false,
                Err(e) => {
                    tracing::warn!(error = %e, "stdin unreadable, continuing without it");
                    stdin_open = false;
                }
            },
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    handle.shutdown().await?;
    node_task
        .await
        .map_err(|e| MurmurError::TransportError(e.to_string()))?
}

enum Input {
    Continue,
    Quit,
}

async fn handle_line(handle: &NodeHandle, line: &str) -> MurmurResult<Input> {
    if line.is_empty() {
        return Ok(Input::Continue);
    }

    if let Some(rest) = line.strip_prefix("/msg ") {
        match rest.trim().split_once(' ') {
            Some((dest, text)) => {
                if !handle.send_private_chat(dest, text.trim()).await? {
                    println!("* no route to {dest} yet");
                }
            }
            None => println!("* usage: /msg <origin> <text>"),
        }
    } else if let Some(addr) = line.strip_prefix("/connect ") {
        match addr.parse::<NeighborSpec>() {
            Ok(spec) => handle.add_neighbor(spec).await?,
            Err(e) => println!("* {e}"),
        }
    } else if line == "/quit" {
        return Ok(Input::Quit);
    } else {
        match handle.submit(line).await {
            Ok(_) => {}
            Err(MurmurError::DatagramTooLarge { max, .. }) => {
                println!("* line too long, messages must stay under {max} bytes")
            }
            Err(e) => return Err(e),
        }
    }
    Ok(Input::Continue)
}

async fn print_events(mut events: mpsc::Receiver<NodeEvent>) {
    while let Some(event) = events.recv().await {
        match &event {
            NodeEvent::NewMessage { .. } => {
                if let Some((origin, body)) = event.chat() {
                    println!("<{origin}> {body}");
                }
            }
            NodeEvent::PayloadDelivered { payload, .. } => {
                if let Some(text) = payload.chat_text() {
                    let from = payload.origin.as_ref().map_or("?", |o| o.as_str());
                    println!("[{from} -> you] {text}");
                }
            }
            NodeEvent::RouteAdded { origin, next_hop } => {
                println!("* {origin} reachable via {next_hop}");
            }
            NodeEvent::NeighborAdded(addr) => {
                tracing::debug!(peer = %addr, "neighbor added");
            }
        }
    }
}
