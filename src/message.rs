//! Message protocol definitions
//!
//! A single `Message` shape travels in both directions. The `command` tag is a
//! closed enum serialized as the protocol's string tags; the JSON keys are
//! PascalCase to stay byte-compatible with existing peers.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::AppError;
use crate::protocol::{CLIENT_SENDER, SERVER_SENDER, SYSTEM_SENDER};

/// Timestamp format used for `Message::timestamp` and `/time` replies
const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Help text sent for `HELP` and `/help`
pub const HELP_TEXT: &str = "Available commands:\n\
  /help - show this help\n\
  /users or /online - list online users\n\
  /time - show server time\n\
  /pm <user> <message> - send a private message\n\
  /ping - check the connection\n\
\n\
Type any other text to send it to the whole chat";

/// Command tag carried by every message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Command {
    #[serde(rename = "AUTH_REQ")]
    AuthRequest,
    #[serde(rename = "AUTH_RES")]
    AuthResponse,
    #[serde(rename = "MSG")]
    Message,
    #[serde(rename = "USER_JOIN")]
    UserJoined,
    #[serde(rename = "USER_LEFT")]
    UserLeft,
    #[serde(rename = "ONLINE")]
    OnlineUsers,
    #[serde(rename = "TIME")]
    ServerTime,
    #[serde(rename = "HELP")]
    Help,
    #[serde(rename = "ERROR")]
    Error,
    #[serde(rename = "SUCCESS")]
    Success,
    #[serde(rename = "PING")]
    Ping,
    #[serde(rename = "PONG")]
    Pong,
}

impl Command {
    /// Wire tag for this command
    pub fn as_str(self) -> &'static str {
        match self {
            Command::AuthRequest => "AUTH_REQ",
            Command::AuthResponse => "AUTH_RES",
            Command::Message => "MSG",
            Command::UserJoined => "USER_JOIN",
            Command::UserLeft => "USER_LEFT",
            Command::OnlineUsers => "ONLINE",
            Command::ServerTime => "TIME",
            Command::Help => "HELP",
            Command::Error => "ERROR",
            Command::Success => "SUCCESS",
            Command::Ping => "PING",
            Command::Pong => "PONG",
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The unit of exchange between client and server
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Message {
    /// Command tag
    pub command: Command,
    /// Payload, meaning depends on `command`
    pub data: String,
    /// Logical origin ("System", "Server", "Client" or a username)
    pub sender: String,
    /// Human-readable creation time, not used for ordering
    pub timestamp: String,
    /// Reserved
    #[serde(default)]
    pub additional_data: Option<String>,
}

impl Message {
    /// Create a message stamped with the current local time
    pub fn new(command: Command, data: impl Into<String>, sender: impl Into<String>) -> Self {
        Self {
            command,
            data: data.into(),
            sender: sender.into(),
            timestamp: now(),
            additional_data: None,
        }
    }

    /// Parse a frame payload
    pub fn from_payload(payload: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(payload)
    }

    /// Serialize into a frame payload
    pub fn to_payload(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    pub fn error(text: impl Into<String>) -> Self {
        Self::new(Command::Error, text, SYSTEM_SENDER)
    }

    pub fn success(text: impl Into<String>) -> Self {
        Self::new(Command::Success, text, SYSTEM_SENDER)
    }

    /// Chat message attributed to `sender`
    pub fn user(sender: impl Into<String>, text: impl Into<String>) -> Self {
        Self::new(Command::Message, text, sender)
    }

    pub fn user_joined(username: &str) -> Self {
        Self::new(
            Command::UserJoined,
            format!("{} joined the chat", username),
            SYSTEM_SENDER,
        )
    }

    pub fn user_left(username: &str) -> Self {
        Self::new(
            Command::UserLeft,
            format!("{} left the chat", username),
            SYSTEM_SENDER,
        )
    }

    /// Private message as delivered to the recipient
    pub fn private(from: &str, text: &str) -> Self {
        Self::new(
            Command::Message,
            format!("[Private from {}] {}", from, text),
            from,
        )
    }

    pub fn auth_request(username: impl Into<String>) -> Self {
        Self::new(Command::AuthRequest, username, CLIENT_SENDER)
    }

    /// Handshake snapshot of online users, comma-joined
    pub fn online_users(users: &[String]) -> Self {
        Self::new(Command::OnlineUsers, users.join(","), SYSTEM_SENDER)
    }

    /// Reply to `/users` and `/online`
    pub fn online_listing(users: &[String]) -> Self {
        let text = if users.is_empty() {
            "No users online".to_string()
        } else {
            users.join(", ")
        };
        Self::new(Command::OnlineUsers, text, SERVER_SENDER)
    }

    pub fn server_time() -> Self {
        Self::new(Command::ServerTime, now(), SERVER_SENDER)
    }

    pub fn help() -> Self {
        Self::new(Command::Help, HELP_TEXT, SERVER_SENDER)
    }

    pub fn pong() -> Self {
        Self::new(Command::Pong, "pong", SERVER_SENDER)
    }
}

fn now() -> String {
    chrono::Local::now().format(TIMESTAMP_FORMAT).to_string()
}

/// Convert AppError to an ERROR message for client notification
impl From<AppError> for Message {
    fn from(err: AppError) -> Self {
        let text = match &err {
            AppError::AuthRequired => "Authentication required".to_string(),
            AppError::UsernameEmpty => "Username cannot be empty".to_string(),
            AppError::UsernameTaken(_) => "A user with this name is already connected".to_string(),
            AppError::PrivateMessageUsage => "Usage: /pm <user> <message>".to_string(),
            AppError::PrivateMessageToSelf => {
                "You cannot send a private message to yourself".to_string()
            }
            AppError::UnknownCommand(cmd) => format!("Unknown command: {}", cmd),
            AppError::UnsupportedCommand(cmd) => format!("Unsupported command: {}", cmd),
            AppError::MessageTooLong(_) => "Message is too long to send".to_string(),
            // Fatal errors are not typically converted (connection closes)
            _ => "Internal error".to_string(),
        };
        Message::error(text)
    }
}
