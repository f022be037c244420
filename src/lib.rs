//! Multi-client TCP Chat Library
//!
//! A chat server and client speaking length-prefixed JSON frames over raw
//! TCP, built on tokio.
//!
//! # Features
//! - 4-byte length-prefixed framing with a per-frame size limit
//! - Username handshake with uniqueness enforcement and retry
//! - Broadcast chat, private messages (`/pm`) and server commands
//!   (`/help`, `/users`, `/online`, `/time`, `PING`)
//! - Join/leave notices
//! - Operator console (`/clients`, `/broadcast`, `/stop`)
//! - Interactive client with concurrent receive and input loops
//!
//! # Architecture
//! - `ClientRegistry` is an actor owning the username -> session map;
//!   handlers reach it through the `Registry` trait on `RegistryHandle`
//! - Each connection has a `handler` task owning its `SessionReader`
//! - Sessions serialize writes behind a mutex; broadcasts snapshot the
//!   registry and write outside the actor
//!
//! # Example
//! ```ignore
//! use tcp_chat::ChatServer;
//!
//! #[tokio::main]
//! async fn main() -> std::io::Result<()> {
//!     let server = ChatServer::bind("0.0.0.0:12345").await?;
//!     let handle = server.handle();
//!     tokio::spawn(async move {
//!         tokio::signal::ctrl_c().await.ok();
//!         handle.stop();
//!     });
//!     server.run().await;
//!     Ok(())
//! }
//! ```

pub mod client;
pub mod codec;
pub mod console;
pub mod error;
pub mod handler;
pub mod message;
pub mod protocol;
pub mod registry;
pub mod server;
pub mod session;
pub mod types;

// Re-export main types for convenience
pub use client::{ChatClient, ClientEvent, UserInput};
pub use codec::{decode, encode, ChatCodec};
pub use console::{run_console, OperatorCommand};
pub use error::{AppError, CodecError, SessionError};
pub use handler::{handle_connection, ChatInput};
pub use message::{Command, Message};
pub use registry::{ClientRegistry, Registry, RegistryCommand, RegistryHandle};
pub use server::{ChatServer, ServerHandle};
pub use session::{AuthOutcome, Session, SessionReader};
pub use types::SessionId;
