//! TCP Chat Client - Entry Point
//!
//! Connects to a chat server, reads names and chat lines from stdin, and
//! prints server pushes as plain text.

use std::env;
use std::io::Write;

use tokio::io::{self, AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing::error;
use tracing_subscriber::EnvFilter;

use tcp_chat::protocol::{DEFAULT_HOST, DEFAULT_PORT, EVENT_CHANNEL_SIZE, SYSTEM_SENDER};
use tcp_chat::{ChatClient, ClientEvent, Command, Message};

const LOCAL_HELP: &str = "Commands:\n\
  /help - server help\n\
  /users or /online - list online users\n\
  /time - show server time\n\
  /pm <user> <message> - send a private message\n\
  /ping - check the connection\n\
  /exit or /quit - leave the chat\n\
\n\
Type any other text to send it to the whole chat";

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Keep logs out of the chat view unless asked for
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("tcp_chat=warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let mut args = env::args().skip(1);
    let host = args.next().unwrap_or_else(|| DEFAULT_HOST.to_string());
    let port = match args.next() {
        Some(port) => port.parse::<u16>()?,
        None => DEFAULT_PORT,
    };

    println!("Connecting to {}:{}...", host, port);
    let (event_tx, event_rx) = mpsc::channel(EVENT_CHANNEL_SIZE);
    let client = ChatClient::connect((host.as_str(), port), event_tx).await?;
    println!("Connected.");

    let renderer = tokio::spawn(render(event_rx));

    let lines = BufReader::new(io::stdin()).lines();
    if let Err(e) = client.run(lines).await {
        error!("Client error: {}", e);
    }

    let _ = renderer.await;
    println!("Goodbye!");

    // stdin may still be parked on a blocking read.
    std::process::exit(0)
}

async fn render(mut events: mpsc::Receiver<ClientEvent>) {
    let mut me = String::new();

    while let Some(event) = events.recv().await {
        match event {
            ClientEvent::UsernamePrompt => {
                print!("Enter your name: ");
                let _ = std::io::stdout().flush();
            }
            ClientEvent::AuthRejected(reason) => println!("Error: {}", reason),
            ClientEvent::Authenticated { username, welcome } => {
                me = username;
                println!("{}", welcome);
                println!();
                println!("{}", LOCAL_HELP);
            }
            ClientEvent::Received(message) => println!("{}", format_message(&message, &me)),
            ClientEvent::Usage(text) => println!("{}", text),
            ClientEvent::Disconnected => println!("Connection to server lost"),
        }
    }
}

fn format_message(message: &Message, me: &str) -> String {
    let time = message.timestamp.rsplit(' ').next().unwrap_or_default();
    match message.command {
        Command::Message if message.sender == me => format!("[{}] You: {}", time, message.data),
        Command::Message if message.sender == SYSTEM_SENDER => format!("[{}] * {}", time, message.data),
        Command::UserJoined | Command::UserLeft => format!("[{}] * {}", time, message.data),
        Command::OnlineUsers => format!("[{}] Online: {}", time, message.data),
        Command::ServerTime => format!("[{}] Server time: {}", time, message.data),
        Command::Error => format!("[{}] Error: {}", time, message.data),
        Command::Pong => format!("[{}] Pong from server", time),
        Command::Help => format!("[{}] Server help:\n{}", time, message.data),
        _ => format!("[{}] {}: {}", time, message.sender, message.data),
    }
}
