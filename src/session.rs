//! Connection session
//!
//! One live TCP connection split into two halves:
//! - [`Session`]: shared write side plus lifecycle state. Held in an `Arc`
//!   by the connection task and, after authentication, by the registry.
//! - [`SessionReader`]: exclusive read side, owned by the task that drives
//!   the connection.
//!
//! Writes go through a mutex so frames from concurrent senders never
//! interleave. Each session carries a cancellation token; closing the
//! session wakes a reader blocked in [`SessionReader::receive`].

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};

use futures_util::{SinkExt, StreamExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpStream, ToSocketAddrs};
use tokio::sync::Mutex;
use tokio_util::codec::{FramedRead, FramedWrite};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::codec::ChatCodec;
use crate::error::{AppError, CodecError, SessionError};
use crate::message::{Command, Message};
use crate::registry::Registry;
use crate::types::SessionId;

type FrameWriter = FramedWrite<OwnedWriteHalf, ChatCodec>;

/// Write side and lifecycle state of one connection
#[derive(Debug)]
pub struct Session {
    id: SessionId,
    peer: SocketAddr,
    /// Bound once, on successful authentication
    username: OnceLock<String>,
    connected: AtomicBool,
    closed: AtomicBool,
    writer: Mutex<FrameWriter>,
    shutdown: CancellationToken,
}

/// Read side of one connection
#[derive(Debug)]
pub struct SessionReader {
    id: SessionId,
    frames: FramedRead<OwnedReadHalf, ChatCodec>,
    shutdown: CancellationToken,
}

/// Result of one authentication attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthOutcome {
    /// Name bound and registered; SUCCESS and ONLINE were sent
    Accepted { welcome: String, online: Vec<String> },
    /// Name refused; an ERROR was sent and the connection is still open
    Rejected(String),
}

impl Session {
    /// Wrap an established stream
    ///
    /// `shutdown` is cancelled when the session closes. Server sessions get a
    /// child of the server token so a server stop reaches every reader.
    pub fn new(
        stream: TcpStream,
        shutdown: CancellationToken,
    ) -> std::io::Result<(Arc<Self>, SessionReader)> {
        let peer = stream.peer_addr()?;
        let (read_half, write_half) = stream.into_split();
        let id = SessionId::new();

        let session = Arc::new(Self {
            id,
            peer,
            username: OnceLock::new(),
            connected: AtomicBool::new(true),
            closed: AtomicBool::new(false),
            writer: Mutex::new(FramedWrite::new(write_half, ChatCodec)),
            shutdown: shutdown.clone(),
        });
        let reader = SessionReader {
            id,
            frames: FramedRead::new(read_half, ChatCodec),
            shutdown,
        };
        Ok((session, reader))
    }

    /// Open a client-side session to `addr`
    pub async fn connect<A: ToSocketAddrs>(addr: A) -> std::io::Result<(Arc<Self>, SessionReader)> {
        let stream = TcpStream::connect(addr).await?;
        Self::new(stream, CancellationToken::new())
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    /// Username, once authenticated
    pub fn username(&self) -> Option<&str> {
        self.username.get().map(String::as_str)
    }

    /// Bind the username; returns false if one was already bound
    pub fn bind_username(&self, username: &str) -> bool {
        self.username.set(username.to_string()).is_ok()
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    /// Token cancelled when this session closes
    pub fn shutdown_token(&self) -> &CancellationToken {
        &self.shutdown
    }

    /// Encode and write one message, flushing before returning
    ///
    /// A transport failure marks the session disconnected.
    pub async fn send(&self, message: Message) -> Result<(), SessionError> {
        if !self.is_connected() {
            return Err(SessionError::Closed);
        }
        let mut writer = self.writer.lock().await;
        self.write_frame(&mut writer, message).await
    }

    async fn write_frame(&self, writer: &mut FrameWriter, message: Message) -> Result<(), SessionError> {
        if let Err(e) = writer.send(message).await {
            if matches!(e, CodecError::Io(_)) {
                debug!("Session {} write failed, marking disconnected: {}", self.id, e);
                self.connected.store(false, Ordering::Release);
            }
            return Err(e.into());
        }
        Ok(())
    }

    /// Close the connection; calling it again is a no-op
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.connected.store(false, Ordering::Release);
        self.shutdown.cancel();

        let mut writer = self.writer.lock().await;
        if let Err(e) = writer.close().await {
            debug!("Session {} shutdown error: {}", self.id, e);
        }
        debug!("Session {} closed", self.id);
    }

    /// Server side of the handshake
    ///
    /// Reads one message, which must be `AUTH_REQ`. An empty or taken name is
    /// rejected with an ERROR and the connection stays open for a retry. On
    /// success the name is registered, SUCCESS and an ONLINE snapshot (other
    /// users only) are sent, and the name is bound to this session.
    ///
    /// The writer lock is held from registration until both replies are
    /// written, so a concurrent broadcast cannot overtake the handshake.
    pub async fn authenticate<R: Registry>(
        self: &Arc<Self>,
        reader: &mut SessionReader,
        registry: &R,
    ) -> Result<AuthOutcome, AppError> {
        let Some(request) = reader.receive().await? else {
            return Err(AppError::ConnectionClosed);
        };

        if request.command != Command::AuthRequest {
            warn!(
                "Session {} sent {} before authenticating",
                self.id, request.command
            );
            let _ = self.send(AppError::AuthRequired.into()).await;
            return Err(AppError::AuthRequired);
        }

        let candidate = request.data.trim();
        if candidate.is_empty() {
            return self.reject(AppError::UsernameEmpty).await;
        }

        let mut writer = self.writer.lock().await;
        if !registry.try_register(candidate, Arc::clone(self)).await {
            drop(writer);
            return self.reject(AppError::UsernameTaken(candidate.to_string())).await;
        }
        self.bind_username(candidate);

        let online: Vec<String> = registry
            .snapshot_usernames()
            .await
            .into_iter()
            .filter(|name| name != candidate)
            .collect();
        let welcome = format!("Welcome, {}!", candidate);

        let replies = [Message::success(welcome.clone()), Message::online_users(&online)];
        for reply in replies {
            if let Err(e) = self.write_frame(&mut writer, reply).await {
                drop(writer);
                registry.unregister(candidate).await;
                return Err(e.into());
            }
        }

        info!("Session {} authenticated as '{}'", self.id, candidate);
        Ok(AuthOutcome::Accepted { welcome, online })
    }

    async fn reject(&self, err: AppError) -> Result<AuthOutcome, AppError> {
        info!("Session {} rejected: {}", self.id, err);
        let message = Message::from(err);
        let reason = message.data.clone();
        self.send(message).await?;
        Ok(AuthOutcome::Rejected(reason))
    }
}

impl SessionReader {
    pub fn id(&self) -> SessionId {
        self.id
    }

    /// Read the next complete message
    ///
    /// `Ok(None)` means the peer closed the connection (including mid-frame)
    /// or the session was closed locally. Framing violations are errors.
    pub async fn receive(&mut self) -> Result<Option<Message>, SessionError> {
        tokio::select! {
            _ = self.shutdown.cancelled() => Ok(None),
            frame = self.frames.next() => match frame {
                Some(Ok(message)) => Ok(Some(message)),
                Some(Err(e)) => Err(e.into()),
                None => Ok(None),
            },
        }
    }
}
