//! Chat server accept loop
//!
//! Accepts TCP connections and spawns one handler task per connection.
//! A [`ServerHandle`] can stop the server from another task: the accept loop
//! ends, then every registered session is closed.

use std::io;
use std::net::SocketAddr;

use tokio::net::{TcpListener, ToSocketAddrs};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::handler::handle_connection;
use crate::message::Message;
use crate::protocol::SERVER_SENDER;
use crate::registry::{Registry, RegistryHandle};

/// The chat server
pub struct ChatServer<R: Registry = RegistryHandle> {
    listener: TcpListener,
    registry: R,
    shutdown: CancellationToken,
}

/// Cloneable control handle for a running [`ChatServer`]
#[derive(Debug, Clone)]
pub struct ServerHandle<R: Registry = RegistryHandle> {
    registry: R,
    shutdown: CancellationToken,
}

impl ChatServer<RegistryHandle> {
    /// Bind a listener and start a fresh registry actor
    pub async fn bind<A: ToSocketAddrs>(addr: A) -> io::Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        Ok(Self::with_registry(listener, RegistryHandle::spawn()))
    }
}

impl<R: Registry> ChatServer<R> {
    /// Build a server from an existing listener and registry
    pub fn with_registry(listener: TcpListener, registry: R) -> Self {
        Self {
            listener,
            registry,
            shutdown: CancellationToken::new(),
        }
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub fn handle(&self) -> ServerHandle<R> {
        ServerHandle {
            registry: self.registry.clone(),
            shutdown: self.shutdown.clone(),
        }
    }

    /// Run the accept loop until stopped
    ///
    /// Each session gets a child of the server token, so stopping also wakes
    /// connections that have not finished authenticating.
    pub async fn run(self) {
        debug!("Accept loop started");

        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, addr)) => {
                        info!("New connection from {}", addr);
                        let registry = self.registry.clone();
                        let shutdown = self.shutdown.child_token();

                        tokio::spawn(async move {
                            if let Err(e) = handle_connection(stream, registry, shutdown).await {
                                error!("Connection handler error ({}): {}", addr, e);
                            }
                        });
                    }
                    Err(e) => {
                        error!("Failed to accept connection: {}", e);
                    }
                },
            }
        }

        info!("Stopping server");
        for session in self.registry.snapshot_sessions().await {
            debug!("Closing session {}", session.id());
            session.close().await;
        }
        info!("Server stopped");
    }
}

impl<R: Registry> ServerHandle<R> {
    /// Stop accepting connections and close every session
    pub fn stop(&self) {
        self.shutdown.cancel();
    }

    pub fn is_stopped(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    pub fn registry(&self) -> &R {
        &self.registry
    }

    /// Broadcast an operator message as a chat message from "Server"
    pub async fn announce(&self, text: &str) -> usize {
        self.registry
            .broadcast(Message::user(SERVER_SENDER, text))
            .await
    }

    pub async fn online_users(&self) -> Vec<String> {
        self.registry.snapshot_usernames().await
    }
}
