//! Per-request command handling.
//!
//! A dispatch interprets one client request against the registry and the two
//! handlers and produces at most one response. In [`Delivery::Immediate`]
//! mode the response is delivered here; in [`Delivery::Coalesced`] mode it is
//! returned so the batch can aggregate it.

use crate::endpoint::ClientEndpoint;
use crate::error::HandlerError;
use crate::handler::{InvokeHandler, Resolved, SubscriptionHandler};
use crate::outbox::Outbox;
use crate::protocol::{PropertyPath, Request, RequestId, Response, SubscriptionKey};
use crate::registry::{Listener, SubscriptionRegistry, UnsubscribeOutcome};
use crate::retry::{retry, RetryPolicy};
use serde_json::Value;
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, warn};

/// Where a dispatch result goes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// Encode and deliver the response to its target endpoint.
    Immediate,
    /// Return the response to the caller instead of delivering it.
    Coalesced,
}

/// A response together with the endpoint it is addressed to.
struct Reply {
    target: ClientEndpoint,
    response: Response,
}

/// Interprets client requests. Cheap to clone.
#[derive(Clone)]
pub struct Dispatcher {
    invoke_handler: Arc<dyn InvokeHandler>,
    subscription_handler: Arc<dyn SubscriptionHandler>,
    registry: SubscriptionRegistry,
    outbox: Outbox,
    retry: Option<RetryPolicy>,
}

impl Dispatcher {
    pub fn new(
        invoke_handler: Arc<dyn InvokeHandler>,
        subscription_handler: Arc<dyn SubscriptionHandler>,
        registry: SubscriptionRegistry,
        outbox: Outbox,
        retry: Option<RetryPolicy>,
    ) -> Self {
        Self {
            invoke_handler,
            subscription_handler,
            registry,
            outbox,
            retry,
        }
    }

    pub fn registry(&self) -> &SubscriptionRegistry {
        &self.registry
    }

    /// Handle one request from `source`.
    ///
    /// Returns the response only in coalesced mode. Batches are not handled
    /// here; a batch nested inside another batch produces nothing.
    pub async fn dispatch(
        &self,
        source: &ClientEndpoint,
        request: Request,
        delivery: Delivery,
    ) -> Option<Response> {
        let reply = self.handle(source, request).await?;
        match delivery {
            Delivery::Coalesced => Some(reply.response),
            Delivery::Immediate => {
                self.outbox.post(&reply.target, &reply.response);
                None
            }
        }
    }

    async fn handle(&self, source: &ClientEndpoint, request: Request) -> Option<Reply> {
        match request {
            Request::Invoke {
                property_path,
                args,
                request_id,
            } => Some(Reply {
                target: source.clone(),
                response: self.invoke(property_path, args, request_id).await,
            }),
            Request::Subscribe {
                property_path,
                request_id,
            } => Some(Reply {
                target: source.clone(),
                response: self.subscribe(source, property_path, request_id).await,
            }),
            Request::Unsubscribe {
                property_path,
                subscription_request_id,
                request_id,
            } => Some(self.unsubscribe(
                source,
                &property_path,
                &subscription_request_id,
                request_id,
            )),
            Request::Coalesce { request_id, .. } => {
                warn!("Ignoring nested batch {} inside a batch", request_id);
                None
            }
        }
    }

    async fn with_retry<F, Fut, T>(&self, operation: F) -> Result<T, HandlerError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, HandlerError>>,
    {
        with_policy(self.retry.as_ref(), operation).await
    }

    async fn invoke(&self, path: PropertyPath, args: Vec<Value>, request_id: RequestId) -> Response {
        let result = async {
            let target = self
                .with_retry(|| self.invoke_handler.resolve(&path))
                .await?;
            match target {
                Resolved::Value(value) => Ok(value),
                Resolved::Invocable(callable) => callable.invoke(args).await,
            }
        }
        .await;

        match result {
            Ok(value) => {
                debug!("[InvokeSuccess]: {}", request_id);
                Response::InvokeSuccess { value, request_id }
            }
            Err(e) => {
                debug!("[InvokeError]: {} {}", request_id, e);
                Response::InvokeError {
                    reason: e.message,
                    request_id,
                }
            }
        }
    }

    async fn subscribe(
        &self,
        source: &ClientEndpoint,
        path: PropertyPath,
        request_id: RequestId,
    ) -> Response {
        let key = SubscriptionKey::from_path(&path);
        let listener = Listener::new(source.clone(), request_id.clone());
        let handler = self.subscription_handler.clone();
        let policy = self.retry;

        let result = self
            .registry
            .subscribe(key, listener, move |notifier| async move {
                with_policy(policy.as_ref(), || {
                    handler.subscribe(&path, notifier.clone())
                })
                .await
            })
            .await;

        match result {
            Ok(outcome) => {
                debug!("[SubscribeSuccess]: {} (created: {})", request_id, outcome.created);
                Response::SubscribeSuccess { request_id }
            }
            Err(e) => {
                warn!("[SubscribeError]: {} {}", request_id, e);
                Response::SubscribeError {
                    reason: e.message,
                    request_id,
                }
            }
        }
    }

    fn unsubscribe(
        &self,
        source: &ClientEndpoint,
        path: &PropertyPath,
        subscription_request_id: &RequestId,
        request_id: RequestId,
    ) -> Reply {
        let key = SubscriptionKey::from_path(path);
        let reason = match self.registry.unsubscribe(&key, subscription_request_id) {
            UnsubscribeOutcome::Removed(owner) | UnsubscribeOutcome::StillActive(owner) => {
                debug!("[UnsubscribeSuccess]: {}", request_id);
                return Reply {
                    target: owner,
                    response: Response::UnsubscribeSuccess { request_id },
                };
            }
            UnsubscribeOutcome::NotFound => format!(
                "No subscription {} registered for {}",
                subscription_request_id, key
            ),
            UnsubscribeOutcome::RequestIdMismatch => format!(
                "Subscription {} on {} is owned by another request",
                subscription_request_id, key
            ),
        };

        debug!("[UnsubscribeError]: {} {}", request_id, reason);
        Reply {
            target: source.clone(),
            response: Response::UnsubscribeError { reason, request_id },
        }
    }
}

/// Run `operation` once, or through the retry executor when a policy is set.
async fn with_policy<F, Fut, T>(policy: Option<&RetryPolicy>, mut operation: F) -> Result<T, HandlerError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, HandlerError>>,
{
    match policy {
        Some(policy) => retry(policy, operation).await,
        None => operation().await,
    }
}
