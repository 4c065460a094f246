//! Host limits and defaults.

/// Transport configuration for the TCP host.
pub struct HostConfig;

impl HostConfig {
    /// Largest accepted frame payload, in bytes.
    pub const MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;
    /// Concurrent client connections; further connections are refused.
    pub const MAX_CONNECTIONS: usize = 64;
    pub const DEFAULT_HOST: &'static str = "127.0.0.1";
}
