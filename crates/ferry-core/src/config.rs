//! Centralized configuration for the ferry broker.

use std::time::Duration;

/// Broker-level defaults.
pub struct BrokerConfig;

impl BrokerConfig {
    pub const DEFAULT_RETRY_LIMIT: u32 = 3;
    pub const DEFAULT_RETRY_INTERVAL: Duration = Duration::from_millis(500);
    /// Upper bound accepted by the builder for a retry limit.
    pub const MAX_RETRY_LIMIT: u32 = 100;
    /// Upper bound accepted by the builder for a retry interval.
    pub const MAX_RETRY_INTERVAL: Duration = Duration::from_secs(60);
}
