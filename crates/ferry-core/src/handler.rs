//! Collaborator contracts supplied by the embedding application.
//!
//! The broker never looks inside a property path. Resolving a path to a
//! value, a callable or an upstream change source is entirely up to these
//! handlers.

use crate::error::HandlerError;
use crate::protocol::PropertyPath;
use crate::registry::ChangeNotifier;
use async_trait::async_trait;
use serde_json::Value;
use std::fmt;
use std::sync::Arc;

/// Something an invoke request can call with its arguments.
#[async_trait]
pub trait Invocable: Send + Sync {
    async fn invoke(&self, args: Vec<Value>) -> Result<Value, HandlerError>;
}

#[async_trait]
impl<F> Invocable for F
where
    F: Fn(Vec<Value>) -> Result<Value, HandlerError> + Send + Sync,
{
    async fn invoke(&self, args: Vec<Value>) -> Result<Value, HandlerError> {
        self(args)
    }
}

/// Outcome of resolving an invoke target.
///
/// Callability is decided here, once, after resolution.
#[derive(Clone)]
pub enum Resolved {
    /// Plain value, returned as-is; call arguments are ignored.
    Value(Value),
    /// Callable target, invoked with the request's arguments.
    Invocable(Arc<dyn Invocable>),
}

impl Resolved {
    pub fn callable<F>(f: F) -> Self
    where
        F: Fn(Vec<Value>) -> Result<Value, HandlerError> + Send + Sync + 'static,
    {
        Resolved::Invocable(Arc::new(f))
    }
}

impl fmt::Debug for Resolved {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Resolved::Value(value) => f.debug_tuple("Value").field(value).finish(),
            Resolved::Invocable(_) => f.write_str("Invocable"),
        }
    }
}

/// Resolves property paths for invoke requests.
#[async_trait]
pub trait InvokeHandler: Send + Sync + 'static {
    async fn resolve(&self, path: &PropertyPath) -> Result<Resolved, HandlerError>;
}

/// Upstream unsubscribe action. Called exactly once, when the last listener leaves.
pub type Teardown = Box<dyn FnOnce() + Send + 'static>;

/// Establishes upstream subscriptions.
///
/// Called at most once per subscription key at a time; the returned teardown
/// is owned by the registry.
#[async_trait]
pub trait SubscriptionHandler: Send + Sync + 'static {
    async fn subscribe(
        &self,
        path: &PropertyPath,
        on_change: ChangeNotifier,
    ) -> Result<Teardown, HandlerError>;
}
