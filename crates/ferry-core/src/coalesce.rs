//! Batch coalescing: many sub-requests in, one aggregated reply out.

use crate::dispatcher::{Delivery, Dispatcher};
use crate::endpoint::ClientEndpoint;
use crate::protocol::{decode_value, Command, Inbound, Request, Response};
use futures::future::join_all;
use futures::FutureExt;
use serde_json::Value;
use std::panic::AssertUnwindSafe;
use tracing::{error, warn};

/// Dispatch every sub-request concurrently in coalesced mode.
///
/// The result follows input order, not completion order. Each item is decoded
/// on its own: a malformed item that carries a request id is answered with its
/// command's error response, anything else unusable is left out. Requests
/// that produce no response are left out too. A panicking sub-dispatch is
/// isolated and also left out; its siblings still complete.
pub async fn coalesce(
    dispatcher: &Dispatcher,
    source: &ClientEndpoint,
    requests: Vec<Value>,
) -> Vec<Response> {
    let items = requests
        .into_iter()
        .enumerate()
        .map(|(index, item)| async move {
            match decode_value(item) {
                Some(Inbound::Request(request)) => {
                    dispatch_isolated(dispatcher, source, index, request).await
                }
                Some(Inbound::Malformed {
                    command,
                    request_id: Some(request_id),
                    reason,
                }) if command != Command::CoalesceRequestClient => {
                    warn!("Batch item {}: {}", index, reason);
                    command.error_response(request_id, reason)
                }
                _ => {
                    warn!("Batch item {} is not a usable client request, skipping", index);
                    None
                }
            }
        });

    join_all(items).await.into_iter().flatten().collect()
}

async fn dispatch_isolated(
    dispatcher: &Dispatcher,
    source: &ClientEndpoint,
    index: usize,
    request: Request,
) -> Option<Response> {
    let command = request.command();
    AssertUnwindSafe(dispatcher.dispatch(source, request, Delivery::Coalesced))
        .catch_unwind()
        .await
        .unwrap_or_else(|_| {
            error!("Batch item {} ({}) panicked, dropping its response", index, command);
            None
        })
}
