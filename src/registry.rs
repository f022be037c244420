//! Client registry actor
//!
//! The registry maps each authenticated username to its [`Session`]. State is
//! owned by a single actor task (`ClientRegistry`); everything else talks to
//! it through a cloneable [`RegistryHandle`] over an `mpsc` channel with
//! `oneshot` replies. Each command is one structural change, so register,
//! unregister and snapshots never observe a half-applied update.
//!
//! The actor never writes to sockets. Broadcast takes a snapshot from the
//! actor and performs the sends from the caller's task, so a slow peer never
//! stalls registry updates.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use futures_util::future::join_all;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info};

use crate::message::Message;
use crate::protocol::REGISTRY_CHANNEL_SIZE;
use crate::session::Session;

/// Registry operations used by the server loop and the handshake
pub trait Registry: Clone + Send + Sync + 'static {
    /// Insert `username` if absent; exactly one concurrent caller per name wins
    fn try_register(&self, username: &str, session: Arc<Session>) -> impl Future<Output = bool> + Send;

    /// Remove `username`; returns whether it was present
    fn unregister(&self, username: &str) -> impl Future<Output = bool> + Send;

    /// Send to every session registered at call time; returns successful sends
    fn broadcast(&self, message: Message) -> impl Future<Output = usize> + Send;

    /// Send to one user; returns whether the user was registered
    fn send_to(&self, username: &str, message: Message) -> impl Future<Output = bool> + Send;

    /// Registered usernames, sorted
    fn snapshot_usernames(&self) -> impl Future<Output = Vec<String>> + Send;

    /// Registered sessions, ordered by username
    fn snapshot_sessions(&self) -> impl Future<Output = Vec<Arc<Session>>> + Send;
}

/// Commands processed by the registry actor
#[derive(Debug)]
pub enum RegistryCommand {
    /// Register a session under a name if the name is free
    Register {
        username: String,
        session: Arc<Session>,
        reply: oneshot::Sender<bool>,
    },
    /// Remove a name
    Unregister {
        username: String,
        reply: oneshot::Sender<bool>,
    },
    /// Look up one session
    Lookup {
        username: String,
        reply: oneshot::Sender<Option<Arc<Session>>>,
    },
    /// Copy of all entries
    Snapshot {
        reply: oneshot::Sender<Vec<(String, Arc<Session>)>>,
    },
}

/// The registry actor
///
/// Holds shared handles only; session lifetimes belong to the connection
/// tasks, and the registry never closes a session itself.
pub struct ClientRegistry {
    /// Authenticated sessions: username -> Session
    sessions: HashMap<String, Arc<Session>>,
    /// Command receiver channel
    receiver: mpsc::Receiver<RegistryCommand>,
}

impl ClientRegistry {
    /// Create a new registry with the given command receiver
    pub fn new(receiver: mpsc::Receiver<RegistryCommand>) -> Self {
        Self {
            sessions: HashMap::new(),
            receiver,
        }
    }

    /// Run the registry event loop
    ///
    /// Processes commands until every handle is dropped.
    pub async fn run(mut self) {
        debug!("ClientRegistry started");

        while let Some(cmd) = self.receiver.recv().await {
            self.handle_command(cmd);
        }

        debug!("ClientRegistry shutting down");
    }

    fn handle_command(&mut self, cmd: RegistryCommand) {
        match cmd {
            RegistryCommand::Register {
                username,
                session,
                reply,
            } => {
                let _ = reply.send(self.handle_register(username, session));
            }
            RegistryCommand::Unregister { username, reply } => {
                let _ = reply.send(self.handle_unregister(&username));
            }
            RegistryCommand::Lookup { username, reply } => {
                let _ = reply.send(self.sessions.get(&username).cloned());
            }
            RegistryCommand::Snapshot { reply } => {
                let mut entries: Vec<_> = self
                    .sessions
                    .iter()
                    .map(|(name, session)| (name.clone(), Arc::clone(session)))
                    .collect();
                entries.sort_by(|a, b| a.0.cmp(&b.0));
                let _ = reply.send(entries);
            }
        }
    }

    fn handle_register(&mut self, username: String, session: Arc<Session>) -> bool {
        if self.sessions.contains_key(&username) {
            debug!("Username '{}' already registered", username);
            return false;
        }
        info!("User '{}' registered (session {})", username, session.id());
        self.sessions.insert(username, session);
        debug!("Total users: {}", self.sessions.len());
        true
    }

    fn handle_unregister(&mut self, username: &str) -> bool {
        let removed = self.sessions.remove(username).is_some();
        if removed {
            info!("User '{}' unregistered", username);
            debug!("Total users: {}", self.sessions.len());
        }
        removed
    }
}

/// Cloneable handle to a running [`ClientRegistry`]
#[derive(Debug, Clone)]
pub struct RegistryHandle {
    sender: mpsc::Sender<RegistryCommand>,
}

impl RegistryHandle {
    /// Wrap the sending side of a registry channel
    pub fn new(sender: mpsc::Sender<RegistryCommand>) -> Self {
        Self { sender }
    }

    /// Spawn a registry actor on the current runtime and return its handle
    pub fn spawn() -> Self {
        let (cmd_tx, cmd_rx) = mpsc::channel(REGISTRY_CHANNEL_SIZE);
        tokio::spawn(ClientRegistry::new(cmd_rx).run());
        Self::new(cmd_tx)
    }

    /// Session registered under `username`, if any
    pub async fn lookup(&self, username: &str) -> Option<Arc<Session>> {
        let username = username.to_string();
        self.request(|reply| RegistryCommand::Lookup { username, reply })
            .await
            .flatten()
    }

    async fn snapshot(&self) -> Vec<(String, Arc<Session>)> {
        self.request(|reply| RegistryCommand::Snapshot { reply })
            .await
            .unwrap_or_default()
    }

    async fn request<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<T>) -> RegistryCommand,
    ) -> Option<T> {
        let (reply, response) = oneshot::channel();
        if self.sender.send(build(reply)).await.is_err() {
            error!("Registry actor is gone");
            return None;
        }
        response.await.ok()
    }
}

impl Registry for RegistryHandle {
    async fn try_register(&self, username: &str, session: Arc<Session>) -> bool {
        let username = username.to_string();
        self.request(|reply| RegistryCommand::Register {
            username,
            session,
            reply,
        })
        .await
        .unwrap_or(false)
    }

    async fn unregister(&self, username: &str) -> bool {
        let username = username.to_string();
        self.request(|reply| RegistryCommand::Unregister { username, reply })
            .await
            .unwrap_or(false)
    }

    async fn broadcast(&self, message: Message) -> usize {
        let sessions = self.snapshot_sessions().await;
        let sends = sessions.iter().map(|session| {
            let message = message.clone();
            async move {
                match session.send(message).await {
                    Ok(()) => true,
                    Err(e) => {
                        debug!("Broadcast to session {} failed: {}", session.id(), e);
                        false
                    }
                }
            }
        });
        join_all(sends).await.into_iter().filter(|sent| *sent).count()
    }

    async fn send_to(&self, username: &str, message: Message) -> bool {
        let Some(session) = self.lookup(username).await else {
            return false;
        };
        if let Err(e) = session.send(message).await {
            debug!("Send to '{}' failed: {}", username, e);
        }
        true
    }

    async fn snapshot_usernames(&self) -> Vec<String> {
        self.snapshot().await.into_iter().map(|(name, _)| name).collect()
    }

    async fn snapshot_sessions(&self) -> Vec<Arc<Session>> {
        self.snapshot()
            .await
            .into_iter()
            .map(|(_, session)| session)
            .collect()
    }
}
