//! Roomlink command-line client
//!
//! Joins a room, prints every server message as a JSON line on stdout and
//! sends each stdin line to the room. `/topic <text>` sets the room topic,
//! `/quit` leaves.

use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use roomlink_client::{BackoffPolicy, ChannelHandler, ClientEvent, RoomClient};

/// Roomlink client
#[derive(Parser, Debug)]
#[command(name = "roomlink-client")]
#[command(about = "Join a roomlink room from the terminal", long_about = None)]
struct Args {
    /// Server WebSocket URL
    #[arg(short, long, default_value = "ws://127.0.0.1:8000/ws")]
    url: String,

    /// Room to join
    #[arg(short, long)]
    room: Option<String>,

    /// Display name
    #[arg(short, long)]
    name: Option<String>,

    /// Give up after this many consecutive reconnect attempts
    #[arg(long)]
    max_retries: Option<u32>,

    /// Longest wait between reconnect attempts, in seconds
    #[arg(long, default_value = "30")]
    max_backoff: u64,
}

/// Interpret an input line as a chat body: JSON when it parses, text otherwise
fn parse_body(line: &str) -> Value {
    serde_json::from_str(line).unwrap_or_else(|_| Value::String(line.to_string()))
}

#[tokio::main]
async fn main() -> Result<()> {
    // Logs go to stderr so stdout stays machine-readable
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("roomlink_client=info")),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let args = Args::parse();

    let (handler, mut events) = ChannelHandler::new();
    let mut builder = RoomClient::builder(&args.url).backoff(BackoffPolicy {
        max_retries: args.max_retries,
        max_delay: Duration::from_secs(args.max_backoff),
        ..BackoffPolicy::default()
    });
    if let Some(room) = &args.room {
        builder = builder.room(room);
    }
    if let Some(name) = &args.name {
        builder = builder.name(name);
    }
    let client = builder.spawn(handler)?;

    info!(room = %client.room(), name = %client.name(), "Joining");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        tokio::select! {
            event = events.recv() => match event {
                Some(ClientEvent::Message(message)) => {
                    println!("{}", serde_json::to_string(&message)?);
                }
                Some(ClientEvent::State(state)) => info!("Connection {}", state),
                Some(ClientEvent::Error(e)) => warn!("{}", e),
                None => break,
            },
            line = lines.next_line() => match line? {
                Some(line) => {
                    let line = line.trim();
                    if line.is_empty() {
                        continue;
                    }
                    if line == "/quit" {
                        break;
                    }
                    if let Some(topic) = line.strip_prefix("/topic ") {
                        client.set_topic(topic).await?;
                    } else {
                        client.send(parse_body(line)).await?;
                    }
                }
                None => break,
            },
            _ = tokio::signal::ctrl_c() => {
                info!("Received Ctrl+C, leaving room...");
                break;
            }
        }
    }

    client.close().await?;
    Ok(())
}
