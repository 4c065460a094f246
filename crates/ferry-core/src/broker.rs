//! Broker facade: ingress, discovery and lifecycle.
//!
//! A [`Broker`] owns one subscription registry and one dispatcher. The
//! embedding application feeds it raw transport text through
//! [`Broker::on_message`] together with the endpoint the text came from.

use crate::coalesce::coalesce;
use crate::config::BrokerConfig;
use crate::dispatcher::{Delivery, Dispatcher};
use crate::endpoint::ClientEndpoint;
use crate::error::{FerryError, Result};
use crate::handler::{InvokeHandler, SubscriptionHandler};
use crate::outbox::Outbox;
use crate::protocol::{decode_message, Codec, IdentityCodec, Inbound, Request, Response};
use crate::registry::SubscriptionRegistry;
use crate::retry::RetryPolicy;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Message broker between remote client contexts and the local handlers.
///
/// Cheap to clone; clones share the same registry.
#[derive(Clone)]
pub struct Broker {
    dispatcher: Dispatcher,
    outbox: Outbox,
}

impl Broker {
    pub fn builder() -> BrokerBuilder {
        BrokerBuilder::new()
    }

    /// Handle one raw inbound message from `source`.
    ///
    /// Anything that is not a client envelope is dropped without a reply.
    /// Batches are answered with one aggregated reply to `source`, even when
    /// some or all of their items are unusable; every other request is
    /// answered individually.
    pub async fn on_message(&self, text: &str, source: ClientEndpoint) {
        let inbound = match decode_message(self.outbox.codec(), text) {
            Some(inbound) => inbound,
            None => {
                debug!("Dropping non-envelope message ({} bytes)", text.len());
                return;
            }
        };

        match inbound {
            Inbound::Request(Request::Coalesce {
                requests,
                request_id,
            }) => {
                debug!("[CoalesceRequest]: {} ({} items)", request_id, requests.len());
                let responses = coalesce(&self.dispatcher, &source, requests).await;
                self.outbox.post(
                    &source,
                    &Response::Coalesce {
                        responses,
                        request_id,
                    },
                );
            }
            Inbound::Request(request) => {
                self.dispatcher
                    .dispatch(&source, request, Delivery::Immediate)
                    .await;
            }
            Inbound::Malformed {
                command,
                request_id,
                reason,
            } => {
                warn!("Malformed {} message: {}", command, reason);
                match request_id.and_then(|id| command.error_response(id, reason)) {
                    Some(response) => {
                        self.outbox.post(&source, &response);
                    }
                    None => debug!("No request id on malformed {} message, dropping it", command),
                }
            }
        }
    }

    /// Send a discovery envelope to each endpoint. Returns how many were reached.
    pub fn announce(&self, endpoints: &[ClientEndpoint]) -> usize {
        endpoints
            .iter()
            .filter(|endpoint| self.outbox.post(endpoint, &Response::Discovery))
            .count()
    }

    /// Drop every listener owned by `endpoint`. Returns the number removed.
    pub fn detach(&self, endpoint: &ClientEndpoint) -> usize {
        let removed = self.registry().detach(endpoint);
        if removed > 0 {
            debug!("Detached {} listener(s) from {:?}", removed, endpoint);
        }
        removed
    }

    /// Tear down every upstream subscription. Returns how many were torn down.
    pub fn close(&self) -> usize {
        let closed = self.registry().close();
        info!("Broker closed, {} upstream subscription(s) torn down", closed);
        closed
    }

    pub fn registry(&self) -> &SubscriptionRegistry {
        self.dispatcher.registry()
    }
}

impl std::fmt::Debug for Broker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Broker")
            .field("subscriptions", &self.registry().len())
            .finish_non_exhaustive()
    }
}

/// Builder for [`Broker`].
///
/// Both handlers are required. The codec defaults to [`IdentityCodec`] and
/// retries are disabled unless a policy is given.
#[derive(Default)]
pub struct BrokerBuilder {
    invoke_handler: Option<Arc<dyn InvokeHandler>>,
    subscription_handler: Option<Arc<dyn SubscriptionHandler>>,
    codec: Option<Arc<dyn Codec>>,
    retry: Option<RetryPolicy>,
}

impl BrokerBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Handler that resolves invoke targets.
    pub fn invoke_handler(mut self, handler: impl InvokeHandler) -> Self {
        self.invoke_handler = Some(Arc::new(handler));
        self
    }

    /// Handler that establishes upstream subscriptions.
    pub fn subscription_handler(mut self, handler: impl SubscriptionHandler) -> Self {
        self.subscription_handler = Some(Arc::new(handler));
        self
    }

    /// Use one shared value for both handler roles.
    pub fn handlers<H>(mut self, handler: Arc<H>) -> Self
    where
        H: InvokeHandler + SubscriptionHandler,
    {
        self.invoke_handler = Some(handler.clone() as Arc<dyn InvokeHandler>);
        self.subscription_handler = Some(handler as Arc<dyn SubscriptionHandler>);
        self
    }

    /// Value-level transform applied around every envelope.
    pub fn codec(mut self, codec: impl Codec) -> Self {
        self.codec = Some(Arc::new(codec));
        self
    }

    /// Retry handler setup calls with this policy.
    ///
    /// Default: no retries, a single attempt.
    pub fn retry(mut self, policy: RetryPolicy) -> Self {
        self.retry = Some(policy);
        self
    }

    pub fn build(self) -> Result<Broker> {
        let invoke_handler = self.invoke_handler.ok_or_else(|| FerryError::Config {
            message: "an invoke handler is required".to_string(),
        })?;
        let subscription_handler = self.subscription_handler.ok_or_else(|| FerryError::Config {
            message: "a subscription handler is required".to_string(),
        })?;
        if let Some(policy) = &self.retry {
            validate_retry(policy)?;
        }

        let outbox = Outbox::new(self.codec.unwrap_or_else(|| Arc::new(IdentityCodec)));
        let registry = SubscriptionRegistry::new(outbox.clone());
        let dispatcher = Dispatcher::new(
            invoke_handler,
            subscription_handler,
            registry,
            outbox.clone(),
            self.retry,
        );

        Ok(Broker { dispatcher, outbox })
    }
}

fn validate_retry(policy: &RetryPolicy) -> Result<()> {
    if policy.limit == 0 || policy.limit > BrokerConfig::MAX_RETRY_LIMIT {
        return Err(FerryError::Config {
            message: format!(
                "retry limit must be between 1 and {}, got {}",
                BrokerConfig::MAX_RETRY_LIMIT,
                policy.limit
            ),
        });
    }
    if policy.interval.is_zero() || policy.interval > BrokerConfig::MAX_RETRY_INTERVAL {
        return Err(FerryError::Config {
            message: format!(
                "retry interval must be between 1ms and {:?}, got {:?}",
                BrokerConfig::MAX_RETRY_INTERVAL,
                policy.interval
            ),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::HandlerError;
    use crate::handler::{Resolved, Teardown};
    use crate::protocol::PropertyPath;
    use crate::registry::ChangeNotifier;
    use async_trait::async_trait;
    use serde_json::json;
    use std::time::Duration;

    struct Echo;

    #[async_trait]
    impl InvokeHandler for Echo {
        async fn resolve(&self, path: &PropertyPath) -> std::result::Result<Resolved, HandlerError> {
            Ok(Resolved::Value(json!(path.to_string())))
        }
    }

    #[async_trait]
    impl SubscriptionHandler for Echo {
        async fn subscribe(
            &self,
            _path: &PropertyPath,
            _on_change: ChangeNotifier,
        ) -> std::result::Result<Teardown, HandlerError> {
            Ok(Box::new(|| {}))
        }
    }

    #[test]
    fn test_build_requires_handlers() {
        let err = Broker::builder().invoke_handler(Echo).build().unwrap_err();
        assert!(matches!(err, FerryError::Config { .. }));

        let err = Broker::builder().subscription_handler(Echo).build().unwrap_err();
        assert!(matches!(err, FerryError::Config { .. }));

        assert!(Broker::builder().handlers(Arc::new(Echo)).build().is_ok());
    }

    #[test]
    fn test_build_validates_retry() {
        let zero_limit = RetryPolicy::new(0, Duration::from_millis(10));
        let err = Broker::builder()
            .handlers(Arc::new(Echo))
            .retry(zero_limit)
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("retry limit"));

        let zero_interval = RetryPolicy::new(3, Duration::ZERO);
        assert!(Broker::builder()
            .handlers(Arc::new(Echo))
            .retry(zero_interval)
            .build()
            .is_err());

        let too_slow = RetryPolicy::default().with_interval(Duration::from_secs(600));
        assert!(Broker::builder()
            .handlers(Arc::new(Echo))
            .retry(too_slow)
            .build()
            .is_err());

        assert!(Broker::builder()
            .handlers(Arc::new(Echo))
            .retry(RetryPolicy::default())
            .build()
            .is_ok());
    }
}
