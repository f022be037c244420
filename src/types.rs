//! Basic type definitions for the chat service
//!
//! Provides newtype wrappers for type safety:
//! - `SessionId`: UUID-based identifier for one TCP connection

use uuid::Uuid;

/// Unique session identifier (newtype pattern)
///
/// Wraps a UUID v4. Usernames are only bound after authentication, so the
/// id is what ties log lines of one connection together.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionId(pub Uuid);

impl SessionId {
    /// Create a new random session ID
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}
