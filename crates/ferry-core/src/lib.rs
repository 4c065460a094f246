//! Ferry Core - RPC and property-subscription broker for message-passing contexts.
//!
//! Remote client contexts send JSON envelopes to the broker. The broker
//! invokes or reads properties through an [`InvokeHandler`], and multiplexes
//! property subscriptions so that any number of clients watching the same
//! path share one upstream subscription from the [`SubscriptionHandler`].
//!
//! The crate is transport-agnostic: an embedding application delivers raw
//! text to [`Broker::on_message`] and provides an [`Endpoint`] for replies.
//!
//! # Example
//!
//! ```rust,ignore
//! use ferry_core::{Broker, ChannelEndpoint, ClientEndpoint};
//! use std::sync::Arc;
//!
//! let broker = Broker::builder().handlers(Arc::new(MyHandlers)).build()?;
//! let (endpoint, mut replies) = ChannelEndpoint::pair("tab-1");
//! let endpoint: ClientEndpoint = Arc::new(endpoint);
//!
//! broker.announce(&[endpoint.clone()]);
//! broker
//!     .on_message(r#"{"__ferry_command":"invokeClient","__ferry_request_id":"1","propertyPath":["version"]}"#, endpoint)
//!     .await;
//! println!("{:?}", replies.recv().await);
//! ```

pub mod broker;
pub mod coalesce;
pub mod config;
pub mod dispatcher;
pub mod endpoint;
pub mod error;
pub mod handler;
pub mod outbox;
pub mod protocol;
pub mod registry;
pub mod retry;

pub use broker::{Broker, BrokerBuilder};
pub use config::BrokerConfig;
pub use dispatcher::{Delivery, Dispatcher};
pub use endpoint::{same_endpoint, ChannelEndpoint, ClientEndpoint, Endpoint};
pub use error::{FerryError, HandlerError, Result};
pub use handler::{Invocable, InvokeHandler, Resolved, SubscriptionHandler, Teardown};
pub use protocol::{
    Codec, Command, IdentityCodec, PropertyKey, PropertyPath, Request, RequestId, Response,
    SubscriptionKey,
};
pub use registry::{ChangeNotifier, Listener, SubscriptionRegistry, UnsubscribeOutcome};
pub use retry::{retry, RetryPolicy};
