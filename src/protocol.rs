//! Protocol constants
//!
//! Network defaults and framing limits shared by the server and the client.

/// Default TCP port for both the server and the client
pub const DEFAULT_PORT: u16 = 12345;

/// Default host the client connects to
pub const DEFAULT_HOST: &str = "localhost";

/// Advisory protocol version (not negotiated)
pub const PROTOCOL_VERSION: &str = "1.0";

/// Total frame budget (header + payload)
pub const BUFFER_SIZE: usize = 4096;

/// Length prefix size in bytes
pub const HEADER_LEN: usize = 4;

/// Largest payload a frame may declare
pub const MAX_FRAME_PAYLOAD: usize = BUFFER_SIZE - HEADER_LEN;

/// Sender name used for handshake and membership notices
pub const SYSTEM_SENDER: &str = "System";

/// Sender name used for server replies (pong, time, help, operator broadcast)
pub const SERVER_SENDER: &str = "Server";

/// Sender name used by clients for the auth request
pub const CLIENT_SENDER: &str = "Client";

/// Channel buffer size for registry commands
pub const REGISTRY_CHANNEL_SIZE: usize = 256;

/// Channel buffer size for client events
pub const EVENT_CHANNEL_SIZE: usize = 64;
