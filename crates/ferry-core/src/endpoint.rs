//! Reply channels to connected remote contexts.
//!
//! An endpoint is opaque to the broker: it can only deliver serialized text
//! and be compared by identity.

use crate::error::{FerryError, Result};
use std::fmt;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Addressable reply channel for one remote context.
///
/// `deliver` must not block; implementations enqueue the text and return.
pub trait Endpoint: Send + Sync + fmt::Debug + 'static {
    fn deliver(&self, message: String) -> Result<()>;
}

/// Shared handle to an endpoint, as stored by the registry.
pub type ClientEndpoint = Arc<dyn Endpoint>;

/// Identity comparison of two endpoint handles.
pub fn same_endpoint(a: &ClientEndpoint, b: &ClientEndpoint) -> bool {
    std::ptr::addr_eq(Arc::as_ptr(a), Arc::as_ptr(b))
}

/// Endpoint backed by an unbounded tokio channel.
///
/// The receiving half is drained by whatever writes to the real transport.
#[derive(Debug, Clone)]
pub struct ChannelEndpoint {
    label: String,
    tx: mpsc::UnboundedSender<String>,
}

impl ChannelEndpoint {
    pub fn new(label: impl Into<String>, tx: mpsc::UnboundedSender<String>) -> Self {
        Self {
            label: label.into(),
            tx,
        }
    }

    /// Create an endpoint together with the receiver that observes its deliveries.
    pub fn pair(label: impl Into<String>) -> (Self, mpsc::UnboundedReceiver<String>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self::new(label, tx), rx)
    }

    pub fn label(&self) -> &str {
        &self.label
    }
}

impl Endpoint for ChannelEndpoint {
    fn deliver(&self, message: String) -> Result<()> {
        self.tx.send(message).map_err(|_| FerryError::EndpointClosed {
            endpoint: self.label.clone(),
        })
    }
}
