//! Chat client
//!
//! Drives one client-side session: the name handshake, then two cooperating
//! loops sharing the session's cancellation token. The receive loop runs in
//! its own task and forwards server pushes; the input loop turns user lines
//! into messages. Whichever ends first cancels the token, the receive task
//! is joined, and only then is the socket closed.
//!
//! Rendering is left to the caller, which consumes [`ClientEvent`]s.

use std::sync::Arc;

use tokio::io::{AsyncBufRead, Lines};
use tokio::net::ToSocketAddrs;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::AppError;
use crate::message::{Command, Message};
use crate::session::{Session, SessionReader};

/// Events for the presentation layer
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientEvent {
    /// Ask the user for a name
    UsernamePrompt,
    /// Server refused the name; the user may try again
    AuthRejected(String),
    /// Handshake complete
    Authenticated { username: String, welcome: String },
    /// Message pushed by the server
    Received(Message),
    /// Local input problem, nothing was sent
    Usage(String),
    /// Connection to the server was lost
    Disconnected,
}

/// A line typed by the user, classified
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UserInput {
    /// `/exit` or `/quit`
    Exit,
    /// Send this message to the server
    Send(Message),
    /// Local error text for the user
    Usage(String),
}

impl UserInput {
    /// Map one input line to an action; blank lines yield `None`
    pub fn parse(line: &str, username: &str) -> Option<Self> {
        if line.trim().is_empty() {
            return None;
        }
        if !line.starts_with('/') {
            return Some(UserInput::Send(Message::user(username, line)));
        }

        let (command, rest) = match line.split_once(' ') {
            Some((command, rest)) => (command, rest.trim()),
            None => (line.trim_end(), ""),
        };

        let input = match command.to_lowercase().as_str() {
            "/exit" | "/quit" => UserInput::Exit,
            "/help" => UserInput::Send(Message::new(Command::Help, "help", username)),
            "/users" | "/online" => UserInput::Send(Message::user(username, "/users")),
            "/time" => UserInput::Send(Message::user(username, "/time")),
            "/ping" => UserInput::Send(Message::new(Command::Ping, "ping", username)),
            "/pm" if rest.is_empty() => UserInput::Usage("Usage: /pm <user> <message>".to_string()),
            "/pm" => UserInput::Send(Message::user(username, format!("/pm {}", rest))),
            other => UserInput::Usage(format!("Unknown command {}. Type /help for help", other)),
        };
        Some(input)
    }
}

/// Client side of one chat connection
pub struct ChatClient {
    session: Arc<Session>,
    reader: SessionReader,
    events: mpsc::Sender<ClientEvent>,
}

impl ChatClient {
    /// Connect to a server
    pub async fn connect<A: ToSocketAddrs>(
        addr: A,
        events: mpsc::Sender<ClientEvent>,
    ) -> std::io::Result<Self> {
        let (session, reader) = Session::connect(addr).await?;
        Ok(Self::new(session, reader, events))
    }

    pub fn new(session: Arc<Session>, reader: SessionReader, events: mpsc::Sender<ClientEvent>) -> Self {
        Self {
            session,
            reader,
            events,
        }
    }

    /// Authenticate, then chat until the user exits or the connection drops
    pub async fn run<I>(mut self, mut lines: Lines<I>) -> Result<(), AppError>
    where
        I: AsyncBufRead + Unpin,
    {
        let username = match self.authenticate(&mut lines).await {
            Ok(Some(username)) => username,
            Ok(None) => {
                self.session.close().await;
                return Ok(());
            }
            Err(e) => {
                emit(&self.events, ClientEvent::Disconnected).await;
                self.session.close().await;
                return Err(e);
            }
        };
        self.chat(&username, lines).await
    }

    /// Prompt for names until the server accepts one
    ///
    /// Returns `Ok(None)` if the input ends first. Transport failure aborts.
    pub async fn authenticate<I>(&mut self, lines: &mut Lines<I>) -> Result<Option<String>, AppError>
    where
        I: AsyncBufRead + Unpin,
    {
        loop {
            emit(&self.events, ClientEvent::UsernamePrompt).await;
            let Some(line) = lines.next_line().await? else {
                return Ok(None);
            };
            let username = line.trim();
            if username.is_empty() {
                emit(&self.events, ClientEvent::Usage("Username cannot be empty".to_string())).await;
                continue;
            }

            self.session.send(Message::auth_request(username)).await?;

            loop {
                let Some(reply) = self.reader.receive().await? else {
                    return Err(AppError::ConnectionClosed);
                };
                match reply.command {
                    Command::Success => {
                        self.session.bind_username(username);
                        emit(
                            &self.events,
                            ClientEvent::Authenticated {
                                username: username.to_string(),
                                welcome: reply.data,
                            },
                        )
                        .await;
                        return Ok(Some(username.to_string()));
                    }
                    Command::Error => {
                        emit(&self.events, ClientEvent::AuthRejected(reply.data)).await;
                        break;
                    }
                    other => debug!("Ignoring {} while authenticating", other),
                }
            }
        }
    }

    /// Run the receive task and the input loop until either ends
    pub async fn chat<I>(self, username: &str, lines: Lines<I>) -> Result<(), AppError>
    where
        I: AsyncBufRead + Unpin,
    {
        let ChatClient {
            session,
            reader,
            events,
        } = self;
        let cancel = session.shutdown_token().clone();

        let receive_task = tokio::spawn(receive_loop(reader, events.clone(), cancel.clone()));
        let result = input_loop(&session, username, lines, &events, &cancel).await;

        cancel.cancel();
        if let Err(e) = receive_task.await {
            warn!("Receive task failed: {}", e);
        }
        session.close().await;
        result
    }
}

async fn receive_loop(
    mut reader: SessionReader,
    events: mpsc::Sender<ClientEvent>,
    cancel: CancellationToken,
) {
    loop {
        match reader.receive().await {
            Ok(Some(message)) => {
                if events.send(ClientEvent::Received(message)).await.is_err() {
                    break;
                }
            }
            Ok(None) => {
                if !cancel.is_cancelled() {
                    emit(&events, ClientEvent::Disconnected).await;
                }
                break;
            }
            Err(e) => {
                warn!("Receive failed: {}", e);
                emit(&events, ClientEvent::Disconnected).await;
                break;
            }
        }
    }
    cancel.cancel();
    debug!("Receive loop ended");
}

async fn input_loop<I>(
    session: &Session,
    username: &str,
    mut lines: Lines<I>,
    events: &mpsc::Sender<ClientEvent>,
    cancel: &CancellationToken,
) -> Result<(), AppError>
where
    I: AsyncBufRead + Unpin,
{
    loop {
        let line = tokio::select! {
            _ = cancel.cancelled() => return Ok(()),
            line = lines.next_line() => line?,
        };
        let Some(line) = line else {
            return Ok(());
        };

        match UserInput::parse(&line, username) {
            None => {}
            Some(UserInput::Exit) => return Ok(()),
            Some(UserInput::Send(message)) => session.send(message).await?,
            Some(UserInput::Usage(text)) => emit(events, ClientEvent::Usage(text)).await,
        }
    }
}

async fn emit(events: &mpsc::Sender<ClientEvent>, event: ClientEvent) {
    if events.send(event).await.is_err() {
        debug!("Event receiver dropped");
    }
}
