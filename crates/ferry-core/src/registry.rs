//! Subscription registry: one upstream subscription per key, many listeners.
//!
//! # Invariants
//!
//! - At most one upstream setup runs per key. The first subscriber inserts a
//!   `Pending` slot before awaiting the setup; later subscribers for the same
//!   key join that slot and wait for the same outcome.
//! - An active entry always has at least one listener. It is removed in the
//!   same critical section that removes its last listener, and its teardown
//!   runs exactly once, outside the lock.
//! - Updates resolve the listener list by key at push time. An update for a
//!   key that is pending or gone is dropped.
//!
//! The lock is a `std::sync::Mutex` and is never held across an `.await`,
//! handler call or teardown.

use crate::endpoint::{same_endpoint, ClientEndpoint};
use crate::error::HandlerError;
use crate::handler::Teardown;
use crate::outbox::Outbox;
use crate::protocol::{RequestId, Response, SubscriptionKey};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use tokio::sync::watch;
use tracing::{debug, warn};

/// One remote listener: where to push, and the id it subscribed with.
///
/// The subscribe request id doubles as the handle used to unsubscribe.
#[derive(Debug, Clone)]
pub struct Listener {
    pub endpoint: ClientEndpoint,
    pub request_id: RequestId,
}

impl Listener {
    pub fn new(endpoint: ClientEndpoint, request_id: RequestId) -> Self {
        Self {
            endpoint,
            request_id,
        }
    }
}

/// `None` while setup runs, then the setup result (error as its reason).
type SetupState = Option<Result<(), String>>;

struct Entry {
    teardown: Teardown,
    listeners: Vec<Listener>,
}

enum Slot {
    /// Setup in flight. Listeners may join or leave while it runs.
    ///
    /// Removing a pending listener succeeds at once, so a client that
    /// unsubscribes during setup sees `unsubscribeServerSuccess` before its
    /// own `subscribeServerSuccess`.
    Pending {
        generation: u64,
        listeners: Vec<Listener>,
        ready: watch::Receiver<SetupState>,
    },
    Active(Entry),
}

impl Slot {
    fn listeners(&self) -> &[Listener] {
        match self {
            Slot::Pending { listeners, .. } => listeners,
            Slot::Active(entry) => &entry.listeners,
        }
    }

    fn listeners_mut(&mut self) -> &mut Vec<Listener> {
        match self {
            Slot::Pending { listeners, .. } => listeners,
            Slot::Active(entry) => &mut entry.listeners,
        }
    }
}

struct Shared {
    slots: Mutex<HashMap<SubscriptionKey, Slot>>,
    next_generation: AtomicU64,
    outbox: Outbox,
}

impl Shared {
    fn slots(&self) -> MutexGuard<'_, HashMap<SubscriptionKey, Slot>> {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Result of [`SubscriptionRegistry::subscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubscribeOutcome {
    /// True when this call established the upstream subscription.
    pub created: bool,
}

/// Result of [`SubscriptionRegistry::unsubscribe`].
#[derive(Debug, Clone)]
pub enum UnsubscribeOutcome {
    /// Last listener removed; the upstream subscription was torn down.
    /// Carries the removed listener's endpoint.
    Removed(ClientEndpoint),
    /// One of several listeners removed. Carries its endpoint.
    StillActive(ClientEndpoint),
    NotFound,
    /// The only listener was registered under a different id.
    RequestIdMismatch,
}

enum Claim {
    Joined(watch::Receiver<SetupState>),
    Owner {
        generation: u64,
        ready: watch::Sender<SetupState>,
    },
}

const ABANDONED_SETUP: &str = "Subscription setup was abandoned";

/// Owner side of a pending setup.
///
/// Publishes the setup outcome to joiners. If the owning future panics or is
/// dropped before resolving, the pending slot is removed and joiners are told
/// the setup was abandoned, so the next subscriber starts a fresh setup.
struct SetupGuard<'a> {
    shared: &'a Shared,
    key: &'a SubscriptionKey,
    generation: u64,
    ready: Option<watch::Sender<SetupState>>,
}

impl SetupGuard<'_> {
    fn resolve(&mut self, outcome: Result<(), String>) {
        let Some(ready) = self.ready.take() else {
            return;
        };
        if outcome.is_err() {
            let mut slots = self.shared.slots();
            if SubscriptionRegistry::owns(&slots, self.key, self.generation) {
                slots.remove(self.key);
            }
        }
        let _ = ready.send(Some(outcome));
    }
}

impl Drop for SetupGuard<'_> {
    fn drop(&mut self) {
        if self.ready.is_some() {
            warn!("Subscription setup for {} did not finish, clearing it", self.key);
            self.resolve(Err(ABANDONED_SETUP.to_string()));
        }
    }
}

/// Registry of upstream subscriptions, owned by one broker.
#[derive(Clone)]
pub struct SubscriptionRegistry {
    shared: Arc<Shared>,
}

impl SubscriptionRegistry {
    pub fn new(outbox: Outbox) -> Self {
        Self {
            shared: Arc::new(Shared {
                slots: Mutex::new(HashMap::new()),
                next_generation: AtomicU64::new(1),
                outbox,
            }),
        }
    }

    /// Attach `listener` to `key`, running `setup` if no subscription exists yet.
    ///
    /// `setup` receives the notifier the upstream source must call on change
    /// and returns the teardown for that source. When another call is already
    /// setting up the same key, this call joins it and shares its outcome.
    pub async fn subscribe<F, Fut>(
        &self,
        key: SubscriptionKey,
        listener: Listener,
        setup: F,
    ) -> Result<SubscribeOutcome, HandlerError>
    where
        F: FnOnce(ChangeNotifier) -> Fut,
        Fut: Future<Output = Result<Teardown, HandlerError>>,
    {
        let claim = {
            let mut slots = self.shared.slots();
            match slots.get_mut(&key) {
                Some(Slot::Active(entry)) => {
                    entry.listeners.push(listener);
                    return Ok(SubscribeOutcome { created: false });
                }
                Some(Slot::Pending {
                    listeners, ready, ..
                }) => {
                    listeners.push(listener);
                    Claim::Joined(ready.clone())
                }
                None => {
                    let generation = self.shared.next_generation.fetch_add(1, Ordering::Relaxed);
                    let (tx, rx) = watch::channel(None);
                    slots.insert(
                        key.clone(),
                        Slot::Pending {
                            generation,
                            listeners: vec![listener],
                            ready: rx,
                        },
                    );
                    Claim::Owner {
                        generation,
                        ready: tx,
                    }
                }
            }
        };

        match claim {
            Claim::Joined(ready) => {
                debug!("Joining in-flight subscription setup for {}", key);
                Self::await_setup(ready).await?;
                Ok(SubscribeOutcome { created: false })
            }
            Claim::Owner { generation, ready } => {
                let mut guard = SetupGuard {
                    shared: &self.shared,
                    key: &key,
                    generation,
                    ready: Some(ready),
                };
                let notifier = ChangeNotifier {
                    key: key.clone(),
                    shared: Arc::downgrade(&self.shared),
                };
                match setup(notifier).await {
                    Ok(teardown) => {
                        self.activate(&key, generation, teardown);
                        guard.resolve(Ok(()));
                        Ok(SubscribeOutcome { created: true })
                    }
                    Err(e) => {
                        guard.resolve(Err(e.message.clone()));
                        Err(e)
                    }
                }
            }
        }
    }

    async fn await_setup(mut ready: watch::Receiver<SetupState>) -> Result<(), HandlerError> {
        match ready.wait_for(Option::is_some).await {
            Ok(state) => match &*state {
                Some(Err(reason)) => Err(HandlerError::new(reason.clone())),
                _ => Ok(()),
            },
            Err(_) => Err(HandlerError::new(ABANDONED_SETUP)),
        }
    }

    fn owns(slots: &HashMap<SubscriptionKey, Slot>, key: &SubscriptionKey, generation: u64) -> bool {
        matches!(
            slots.get(key),
            Some(Slot::Pending { generation: g, .. }) if *g == generation
        )
    }

    /// Promote a finished pending slot, or tear down at once if nobody is left.
    fn activate(&self, key: &SubscriptionKey, generation: u64, teardown: Teardown) {
        let orphaned = {
            let mut slots = self.shared.slots();
            if Self::owns(&slots, key, generation) {
                match slots.remove(key) {
                    Some(Slot::Pending { listeners, .. }) if !listeners.is_empty() => {
                        slots.insert(
                            key.clone(),
                            Slot::Active(Entry {
                                teardown,
                                listeners,
                            }),
                        );
                        None
                    }
                    _ => Some(teardown),
                }
            } else {
                Some(teardown)
            }
        };

        if let Some(teardown) = orphaned {
            debug!("All listeners left {} during setup, tearing down", key);
            teardown();
        }
    }

    /// Detach the listener registered under `request_id` from `key`.
    pub fn unsubscribe(&self, key: &SubscriptionKey, request_id: &RequestId) -> UnsubscribeOutcome {
        let mut slots = self.shared.slots();
        let Some(slot) = slots.get_mut(key) else {
            return UnsubscribeOutcome::NotFound;
        };
        let is_active = matches!(slot, Slot::Active(_));
        let listeners = slot.listeners_mut();

        if listeners.len() == 1 {
            if listeners[0].request_id != *request_id {
                return UnsubscribeOutcome::RequestIdMismatch;
            }
            let listener = listeners.remove(0);
            if is_active {
                // A pending slot keeps its (now empty) place until its setup
                // finishes; the owner then tears the new subscription down.
                let removed = slots.remove(key);
                drop(slots);
                if let Some(Slot::Active(entry)) = removed {
                    debug!("Last listener left {}, tearing down", key);
                    (entry.teardown)();
                }
            }
            return UnsubscribeOutcome::Removed(listener.endpoint);
        }

        match listeners.iter().position(|l| l.request_id == *request_id) {
            Some(index) => UnsubscribeOutcome::StillActive(listeners.remove(index).endpoint),
            None => UnsubscribeOutcome::NotFound,
        }
    }

    /// Remove every listener owned by `endpoint`, tearing down emptied entries.
    ///
    /// Returns the number of listeners removed.
    pub fn detach(&self, endpoint: &ClientEndpoint) -> usize {
        let mut removed = 0;
        let mut teardowns = Vec::new();
        {
            let mut slots = self.shared.slots();
            let mut emptied = Vec::new();
            for (key, slot) in slots.iter_mut() {
                let listeners = slot.listeners_mut();
                let before = listeners.len();
                listeners.retain(|l| !same_endpoint(&l.endpoint, endpoint));
                removed += before - listeners.len();
                if matches!(slot, Slot::Active(entry) if entry.listeners.is_empty()) {
                    emptied.push(key.clone());
                }
            }
            for key in emptied {
                if let Some(Slot::Active(entry)) = slots.remove(&key) {
                    teardowns.push(entry.teardown);
                }
            }
        }

        for teardown in teardowns {
            teardown();
        }
        removed
    }

    /// Tear down every upstream subscription and forget all listeners.
    ///
    /// In-flight setups finish normally and tear themselves down on completion.
    /// Returns the number of active subscriptions torn down.
    pub fn close(&self) -> usize {
        let drained: Vec<Slot> = self.shared.slots().drain().map(|(_, slot)| slot).collect();
        let mut closed = 0;
        for slot in drained {
            if let Slot::Active(entry) = slot {
                (entry.teardown)();
                closed += 1;
            }
        }
        closed
    }

    /// Number of keys with an active upstream subscription.
    pub fn len(&self) -> usize {
        self.shared
            .slots()
            .values()
            .filter(|slot| matches!(slot, Slot::Active(_)))
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// True when `key` has an active upstream subscription.
    pub fn contains(&self, key: &SubscriptionKey) -> bool {
        matches!(self.shared.slots().get(key), Some(Slot::Active(_)))
    }

    /// True while the upstream setup for `key` is still running.
    pub fn is_pending(&self, key: &SubscriptionKey) -> bool {
        matches!(self.shared.slots().get(key), Some(Slot::Pending { .. }))
    }

    /// Listeners currently attached to `key`, pending or active.
    pub fn listener_count(&self, key: &SubscriptionKey) -> usize {
        self.shared
            .slots()
            .get(key)
            .map(|slot| slot.listeners().len())
            .unwrap_or(0)
    }
}

impl fmt::Debug for SubscriptionRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubscriptionRegistry")
            .field("active", &self.len())
            .finish_non_exhaustive()
    }
}

/// Fan-out callback handed to the upstream source of one subscription key.
///
/// Holds only a weak reference to the registry, so an upstream source that
/// outlives its broker just stops delivering.
#[derive(Clone)]
pub struct ChangeNotifier {
    key: SubscriptionKey,
    shared: Weak<Shared>,
}

impl ChangeNotifier {
    pub fn key(&self) -> &SubscriptionKey {
        &self.key
    }

    /// Push `value` to every current listener of this key.
    ///
    /// Returns the number of successful deliveries. Zero when the entry is
    /// pending, removed, or the broker is gone.
    pub fn notify(&self, value: Value) -> usize {
        let Some(shared) = self.shared.upgrade() else {
            return 0;
        };
        let listeners = match shared.slots().get(&self.key) {
            Some(Slot::Active(entry)) => entry.listeners.clone(),
            _ => {
                debug!("Dropping update for inactive subscription {}", self.key);
                return 0;
            }
        };

        listeners
            .iter()
            .filter(|listener| {
                let update = Response::SubscribeUpdate {
                    value: value.clone(),
                    subscription_request_id: listener.request_id.clone(),
                };
                shared.outbox.post(&listener.endpoint, &update)
            })
            .count()
    }
}

impl fmt::Debug for ChangeNotifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChangeNotifier").field("key", &self.key).finish()
    }
}
