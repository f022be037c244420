//! Operator console
//!
//! Line commands read from the server's stdin: `/help`, `/clients`, `/stop`
//! and `/broadcast <text>`.

use thiserror::Error;
use tokio::io::{AsyncBufRead, Lines};
use tracing::{info, warn};

use crate::registry::Registry;
use crate::server::ServerHandle;

const CONSOLE_HELP: &str = "Server commands:\n\
  /help - show this help\n\
  /clients - list connected clients\n\
  /stop - stop the server\n\
  /broadcast <message> - send a message to everyone";

/// A parsed operator command
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OperatorCommand {
    Help,
    Clients,
    Stop,
    Broadcast(String),
}

/// Operator input errors
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConsoleError {
    #[error("Usage: /broadcast <message>")]
    BroadcastUsage,

    #[error("Unknown command: {0}")]
    Unknown(String),
}

impl OperatorCommand {
    /// Parse one console line; blank lines yield `Ok(None)`
    pub fn parse(line: &str) -> Result<Option<Self>, ConsoleError> {
        let line = line.trim();
        if line.is_empty() {
            return Ok(None);
        }

        let (command, rest) = match line.split_once(' ') {
            Some((command, rest)) => (command, rest.trim()),
            None => (line, ""),
        };

        match command.to_lowercase().as_str() {
            "/help" => Ok(Some(OperatorCommand::Help)),
            "/clients" => Ok(Some(OperatorCommand::Clients)),
            "/stop" => Ok(Some(OperatorCommand::Stop)),
            "/broadcast" if rest.is_empty() => Err(ConsoleError::BroadcastUsage),
            "/broadcast" => Ok(Some(OperatorCommand::Broadcast(rest.to_string()))),
            other => Err(ConsoleError::Unknown(other.to_string())),
        }
    }
}

/// Execute console commands until `/stop`, EOF or server stop
pub async fn run_console<I, R>(mut lines: Lines<I>, server: ServerHandle<R>)
where
    I: AsyncBufRead + Unpin,
    R: Registry,
{
    println!("{}", CONSOLE_HELP);

    while !server.is_stopped() {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(e) => {
                warn!("Console read error: {}", e);
                break;
            }
        };

        match OperatorCommand::parse(&line) {
            Ok(None) => {}
            Ok(Some(OperatorCommand::Help)) => println!("{}", CONSOLE_HELP),
            Ok(Some(OperatorCommand::Clients)) => {
                let users = server.online_users().await;
                println!("Connected clients ({}):", users.len());
                if users.is_empty() {
                    println!("  none");
                }
                for user in users {
                    println!("  {}", user);
                }
            }
            Ok(Some(OperatorCommand::Stop)) => {
                info!("Stop requested from console");
                server.stop();
            }
            Ok(Some(OperatorCommand::Broadcast(text))) => {
                let delivered = server.announce(&text).await;
                println!("Message sent to {} client(s)", delivered);
            }
            Err(e) => println!("{}", e),
        }
    }
}
