//! Centralized configuration for the bridge.
//!
//! Protocol limits shared by every endpoint and transport binding.

/// Protocol-level configuration.
pub struct BridgeConfig;

impl BridgeConfig {
    /// Largest frame accepted or produced by byte-stream transports.
    pub const MAX_FRAME_SIZE: usize = 16 * 1024 * 1024; // 16MB

    /// Largest correlation id an endpoint will mint (2^53 - 1), so ids stay
    /// exactly representable for JavaScript peers.
    pub const MAX_CORRELATION_ID: u64 = (1 << 53) - 1;

    /// Upper bound on concurrently outstanding requests per endpoint.
    pub const MAX_PENDING_CALLS: usize = 4096;
}
