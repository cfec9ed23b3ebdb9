//! Configuration for the chat services.

use std::time::Duration;

/// Chat session configuration.
pub struct ChatConfig;

impl ChatConfig {
    /// Buffered reply chunks between a backend and the session before the
    /// backend has to wait.
    pub const CHUNK_CHANNEL_CAPACITY: usize = 64;

    /// Pause between words streamed by the echo backend.
    pub const ECHO_CHUNK_DELAY: Duration = Duration::from_millis(20);

    // Message id prefixes
    pub const USER_MESSAGE_PREFIX: &'static str = "user";
    pub const BOT_MESSAGE_PREFIX: &'static str = "bot";
}
