//! Outbound path: encode a response and hand it to an endpoint.

use crate::endpoint::ClientEndpoint;
use crate::error::Result;
use crate::protocol::{encode_response, Codec, Response};
use std::sync::Arc;
use tracing::warn;

#[derive(Clone)]
pub struct Outbox {
    codec: Arc<dyn Codec>,
}

impl Outbox {
    pub fn new(codec: Arc<dyn Codec>) -> Self {
        Self { codec }
    }

    pub fn codec(&self) -> &dyn Codec {
        self.codec.as_ref()
    }

    /// Encode and deliver, returning any encoding or delivery failure.
    pub fn send(&self, endpoint: &ClientEndpoint, response: &Response) -> Result<()> {
        let text = encode_response(self.codec.as_ref(), response)?;
        endpoint.deliver(text)
    }

    /// Encode and deliver, logging failures. Returns whether delivery succeeded.
    ///
    /// Delivery problems never fail the request that produced the response.
    pub fn post(&self, endpoint: &ClientEndpoint, response: &Response) -> bool {
        match self.send(endpoint, response) {
            Ok(()) => true,
            Err(e) => {
                warn!(
                    "Failed to deliver {} ({:?}) to {:?}: {}",
                    response.command(),
                    response.request_id().map(|id| id.as_str()),
                    endpoint,
                    e
                );
                false
            }
        }
    }
}

impl std::fmt::Debug for Outbox {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Outbox").finish_non_exhaustive()
    }
}
