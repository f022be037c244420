//! TCP Chat Server - Entry Point
//!
//! Binds the listener, starts the registry actor and the operator console,
//! and runs the accept loop until `/stop` or Ctrl-C.

use std::env;

use tokio::io::{self, AsyncBufReadExt, BufReader};
use tracing::info;
use tracing_subscriber::EnvFilter;

use tcp_chat::protocol::{DEFAULT_PORT, PROTOCOL_VERSION};
use tcp_chat::{run_console, ChatServer};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging with environment filter
    // Use RUST_LOG env var to control log level
    // e.g., RUST_LOG=debug or RUST_LOG=tcp_chat=trace
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("tcp_chat=info")),
        )
        .init();

    // Get bind address from command line or use default
    let addr = env::args()
        .nth(1)
        .unwrap_or_else(|| format!("0.0.0.0:{}", DEFAULT_PORT));

    let server = ChatServer::bind(&addr).await?;
    info!(
        "Chat server (protocol {}) listening on {}",
        PROTOCOL_VERSION,
        server.local_addr()?
    );

    let handle = server.handle();

    let console_handle = handle.clone();
    tokio::spawn(async move {
        let lines = BufReader::new(io::stdin()).lines();
        run_console(lines, console_handle).await;
    });

    let signal_handle = handle.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Ctrl-C received");
            signal_handle.stop();
        }
    });

    server.run().await;

    // The console task may still be parked on a blocking stdin read.
    std::process::exit(0)
}
