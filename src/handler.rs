//! Connection handler
//!
//! Drives one accepted connection through
//! `Authenticating -> Active -> Disconnected` and routes every message the
//! client sends while active.

use std::sync::Arc;

use tokio::net::TcpStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::codec;
use crate::error::{AppError, CodecError};
use crate::message::{Command, Message};
use crate::registry::Registry;
use crate::session::{AuthOutcome, Session, SessionReader};

/// A chat line from an active user, classified
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChatInput {
    /// `/pm <target> <text>`
    Private { target: String, text: String },
    /// `/help`
    Help,
    /// `/users` or `/online`
    Users,
    /// `/time`
    Time,
    /// Anything that is not a slash command
    Broadcast(String),
}

impl ChatInput {
    /// Classify the data of an incoming `MSG`
    ///
    /// `/pm` keeps the remainder after the target verbatim, spaces included.
    /// Other slash commands are matched case-insensitively against the whole
    /// line.
    pub fn parse(data: &str) -> Result<Self, AppError> {
        if data.starts_with("/pm ") {
            let mut parts = data.splitn(3, ' ');
            let _command = parts.next();
            let (Some(target), Some(text)) = (parts.next(), parts.next()) else {
                return Err(AppError::PrivateMessageUsage);
            };
            return Ok(ChatInput::Private {
                target: target.to_string(),
                text: text.to_string(),
            });
        }

        if data.starts_with('/') {
            let command = data.to_lowercase();
            return match command.as_str() {
                "/help" => Ok(ChatInput::Help),
                "/users" | "/online" => Ok(ChatInput::Users),
                "/time" => Ok(ChatInput::Time),
                _ => Err(AppError::UnknownCommand(command)),
            };
        }

        Ok(ChatInput::Broadcast(data.to_string()))
    }
}

/// Handle a new TCP connection
///
/// Authenticates, registers, serves the active loop and cleans up. A
/// USER_LEFT notice goes out only if the session was actually registered.
pub async fn handle_connection<R: Registry>(
    stream: TcpStream,
    registry: R,
    shutdown: CancellationToken,
) -> Result<(), AppError> {
    let (session, mut reader) = Session::new(stream, shutdown)?;
    debug!("Session {} opened from {}", session.id(), session.peer());

    let username = match authenticate(&session, &mut reader, &registry).await {
        Ok(username) => username,
        Err(e) => {
            session.close().await;
            info!("Session {} closed during authentication: {}", session.id(), e);
            return if matches!(e, AppError::ConnectionClosed) {
                Ok(())
            } else {
                Err(e)
            };
        }
    };

    registry.broadcast(Message::user_joined(&username)).await;

    let result = serve(&session, &mut reader, &registry, &username).await;

    session.close().await;
    if registry.unregister(&username).await {
        registry.broadcast(Message::user_left(&username)).await;
    }
    info!("User '{}' disconnected", username);

    result
}

/// Repeat the handshake until a name is accepted
async fn authenticate<R: Registry>(
    session: &Arc<Session>,
    reader: &mut SessionReader,
    registry: &R,
) -> Result<String, AppError> {
    loop {
        match session.authenticate(reader, registry).await? {
            AuthOutcome::Accepted { .. } => {
                return session
                    .username()
                    .map(str::to_string)
                    .ok_or(AppError::ConnectionClosed);
            }
            AuthOutcome::Rejected(reason) => {
                debug!("Session {} may retry after: {}", session.id(), reason);
            }
        }
    }
}

/// Active-state loop: receive and route until EOF, error or shutdown
async fn serve<R: Registry>(
    session: &Session,
    reader: &mut SessionReader,
    registry: &R,
    username: &str,
) -> Result<(), AppError> {
    while let Some(message) = reader.receive().await? {
        if let Err(err) = route(session, registry, username, message).await {
            if err.is_fatal() {
                return Err(err);
            }
            debug!("Rejected action from '{}': {}", username, err);
            session.send(err.into()).await?;
        }
    }
    Ok(())
}

/// Route one message from an active user
async fn route<R: Registry>(
    session: &Session,
    registry: &R,
    username: &str,
    message: Message,
) -> Result<(), AppError> {
    match message.command {
        Command::Message => handle_chat(session, registry, username, &message.data).await,
        Command::Ping => Ok(session.send(Message::pong()).await?),
        Command::Help => Ok(session.send(Message::help()).await?),
        Command::AuthRequest
        | Command::AuthResponse
        | Command::UserJoined
        | Command::UserLeft
        | Command::OnlineUsers
        | Command::ServerTime
        | Command::Error
        | Command::Success
        | Command::Pong => {
            warn!("Unsupported command from '{}': {}", username, message.command);
            Err(AppError::UnsupportedCommand(message.command))
        }
    }
}

async fn handle_chat<R: Registry>(
    session: &Session,
    registry: &R,
    username: &str,
    data: &str,
) -> Result<(), AppError> {
    match ChatInput::parse(data)? {
        ChatInput::Private { target, text } => {
            if target == username {
                return Err(AppError::PrivateMessageToSelf);
            }
            let private = relayable(Message::private(username, &text))?;
            if registry.send_to(&target, private).await {
                info!("{} -> {}: private message", username, target);
            } else {
                debug!("Private message from '{}' to unknown '{}' dropped", username, target);
            }
            Ok(())
        }
        ChatInput::Help => Ok(session.send(Message::help()).await?),
        ChatInput::Users => {
            let users = registry.snapshot_usernames().await;
            Ok(session.send(Message::online_listing(&users)).await?)
        }
        ChatInput::Time => Ok(session.send(Message::server_time()).await?),
        ChatInput::Broadcast(text) => {
            info!("{}: {}", username, text);
            let message = relayable(Message::user(username, text))?;
            registry.broadcast(message).await;
            Ok(())
        }
    }
}

/// Refuse a rebuilt message that no longer fits in one frame
///
/// The relayed copy carries the sender's name (and a prefix for private
/// messages), so a frame the client sent at the limit can grow past it.
fn relayable(message: Message) -> Result<Message, AppError> {
    match codec::encode(&message) {
        Ok(_) => Ok(message),
        Err(CodecError::FrameTooLarge(len)) => Err(AppError::MessageTooLong(len)),
        Err(e) => Err(e.into()),
    }
}
