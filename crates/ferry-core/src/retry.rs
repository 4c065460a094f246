//! Bounded retry with a fixed interval.
//!
//! Used around the two fallible setup operations (resolving an invoke target
//! and establishing an upstream subscription). Never used around delivery.
//! There is no backoff growth and no jitter: every wait is `interval`.

use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

use crate::config::BrokerConfig;

/// Retry policy for handler setup calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Maximum number of attempts (including the first one).
    pub limit: u32,
    /// Wait between a failed attempt and the next one.
    pub interval: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            limit: BrokerConfig::DEFAULT_RETRY_LIMIT,
            interval: BrokerConfig::DEFAULT_RETRY_INTERVAL,
        }
    }
}

impl RetryPolicy {
    pub fn new(limit: u32, interval: Duration) -> Self {
        Self { limit, interval }
    }

    /// Set the maximum number of attempts.
    pub fn with_limit(mut self, limit: u32) -> Self {
        self.limit = limit;
        self
    }

    /// Set the interval between attempts.
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }
}

/// Run `operation` until it succeeds or `policy.limit` attempts have failed.
///
/// The last failure is returned unchanged. A limit of zero still makes one
/// attempt.
pub async fn retry<F, Fut, T, E>(policy: &RetryPolicy, mut operation: F) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    let limit = policy.limit.max(1);
    let mut attempt = 1;

    loop {
        match operation().await {
            Ok(value) => {
                if attempt > 1 {
                    debug!("Operation succeeded after {} attempts", attempt);
                }
                return Ok(value);
            }
            Err(e) if attempt >= limit => {
                warn!("All {} attempts exhausted. Last error: {}", limit, e);
                return Err(e);
            }
            Err(e) => {
                warn!(
                    "Attempt {}/{} failed: {}. Retrying in {:?}",
                    attempt, limit, e, policy.interval
                );
                tokio::time::sleep(policy.interval).await;
                attempt += 1;
            }
        }
    }
}
