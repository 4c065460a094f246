//! Shared JSON document served through the broker handlers.
//!
//! Invoke requests read values out of the document. A path whose final
//! segment is `"set"` resolves to a callable that replaces the value at the
//! parent path with its first argument. Subscriptions register a watcher that
//! is notified whenever a write touches the watched path, an ancestor of it,
//! or a descendant of it.

use crate::error::{HostError, Result};
use async_trait::async_trait;
use ferry_core::{
    ChangeNotifier, HandlerError, InvokeHandler, PropertyKey, PropertyPath, Resolved,
    SubscriptionHandler, Teardown,
};
use serde_json::Value;
use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use tracing::debug;

const SET_METHOD: &str = "set";

struct Watcher {
    path: PropertyPath,
    notifier: ChangeNotifier,
}

struct StoreInner {
    document: RwLock<Value>,
    watchers: Mutex<HashMap<u64, Watcher>>,
    next_watcher: AtomicU64,
}

impl StoreInner {
    fn watchers(&self) -> MutexGuard<'_, HashMap<u64, Watcher>> {
        self.watchers.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// JSON document implementing both broker handler roles. Cheap to clone.
#[derive(Clone)]
pub struct DocumentStore {
    inner: Arc<StoreInner>,
}

impl DocumentStore {
    pub fn new(document: Value) -> Self {
        Self {
            inner: Arc::new(StoreInner {
                document: RwLock::new(document),
                watchers: Mutex::new(HashMap::new()),
                next_watcher: AtomicU64::new(0),
            }),
        }
    }

    /// Load the document from a JSON file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path.as_ref())?;
        let document = serde_json::from_str(&text)?;
        debug!("Loaded document from {}", path.as_ref().display());
        Ok(Self::new(document))
    }

    /// Copy of the value at `path`, if present.
    pub fn get(&self, path: &PropertyPath) -> Option<Value> {
        let document = self.inner.document.read().unwrap_or_else(PoisonError::into_inner);
        lookup(&document, path).cloned()
    }

    /// Copy of the whole document.
    pub fn snapshot(&self) -> Value {
        self.inner
            .document
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Replace the value at `path` and notify overlapping watchers.
    ///
    /// Returns the number of update deliveries made.
    pub fn set(&self, path: &PropertyPath, value: Value) -> Result<usize> {
        {
            let mut document = self.inner.document.write().unwrap_or_else(PoisonError::into_inner);
            assign(&mut document, path, value)?;
        }

        let pending: Vec<(ChangeNotifier, Value)> = {
            let document = self.inner.document.read().unwrap_or_else(PoisonError::into_inner);
            self.inner
                .watchers()
                .values()
                .filter(|w| w.path.is_prefix_of(path) || path.is_prefix_of(&w.path))
                .map(|w| {
                    let current = lookup(&document, &w.path).cloned().unwrap_or(Value::Null);
                    (w.notifier.clone(), current)
                })
                .collect()
        };

        Ok(pending
            .into_iter()
            .map(|(notifier, value)| notifier.notify(value))
            .sum())
    }

    /// Number of registered watchers.
    pub fn watcher_count(&self) -> usize {
        self.inner.watchers().len()
    }
}

fn lookup<'a>(value: &'a Value, path: &PropertyPath) -> Option<&'a Value> {
    path.segments()
        .iter()
        .try_fold(value, |current, key| child(current, key))
}

fn child<'a>(value: &'a Value, key: &PropertyKey) -> Option<&'a Value> {
    match (value, key) {
        (Value::Object(map), PropertyKey::Name(name)) => map.get(name),
        (Value::Object(map), PropertyKey::Index(index)) => map.get(&index.to_string()),
        (Value::Array(items), PropertyKey::Index(index)) => items.get(usize::try_from(*index).ok()?),
        (Value::Array(items), PropertyKey::Name(name)) => items.get(name.parse::<usize>().ok()?),
        _ => None,
    }
}

fn child_mut<'a>(value: &'a mut Value, key: &PropertyKey) -> Option<&'a mut Value> {
    match (value, key) {
        (Value::Object(map), PropertyKey::Name(name)) => map.get_mut(name),
        (Value::Object(map), PropertyKey::Index(index)) => map.get_mut(&index.to_string()),
        (Value::Array(items), PropertyKey::Index(index)) => {
            items.get_mut(usize::try_from(*index).ok()?)
        }
        (Value::Array(items), PropertyKey::Name(name)) => items.get_mut(name.parse::<usize>().ok()?),
        _ => None,
    }
}

/// Write `value` at `path`. Object members are created; array slots may be
/// replaced or appended at the end. The container itself must exist.
fn assign(document: &mut Value, path: &PropertyPath, value: Value) -> Result<()> {
    let Some((last, parents)) = path.segments().split_last() else {
        *document = value;
        return Ok(());
    };

    let missing = || HostError::Document {
        message: format!("No value at {}", path),
    };
    let container = parents
        .iter()
        .try_fold(document, |current, key| child_mut(current, key))
        .ok_or_else(missing)?;

    match (container, last) {
        (Value::Object(map), key) => {
            map.insert(key.to_string(), value);
            Ok(())
        }
        (Value::Array(items), key) => {
            let index = match key {
                PropertyKey::Index(index) => usize::try_from(*index).ok(),
                PropertyKey::Name(name) => name.parse::<usize>().ok(),
            }
            .ok_or_else(missing)?;
            if index < items.len() {
                items[index] = value;
            } else if index == items.len() {
                items.push(value);
            } else {
                return Err(missing());
            }
            Ok(())
        }
        _ => Err(missing()),
    }
}

#[async_trait]
impl InvokeHandler for DocumentStore {
    async fn resolve(&self, path: &PropertyPath) -> std::result::Result<Resolved, HandlerError> {
        if let (Some(PropertyKey::Name(name)), Some(target)) = (path.last(), path.parent()) {
            if name == SET_METHOD {
                let store = self.clone();
                return Ok(Resolved::callable(move |args| {
                    let value = args.into_iter().next().unwrap_or(Value::Null);
                    store
                        .set(&target, value)
                        .map(|delivered| {
                            debug!("Set {} ({} update(s) delivered)", target, delivered);
                            Value::Null
                        })
                        .map_err(|e| HandlerError::new(e.to_string()))
                }));
            }
        }

        self.get(path)
            .map(Resolved::Value)
            .ok_or_else(|| HandlerError::new(format!("No value at {}", path)))
    }
}

#[async_trait]
impl SubscriptionHandler for DocumentStore {
    async fn subscribe(
        &self,
        path: &PropertyPath,
        on_change: ChangeNotifier,
    ) -> std::result::Result<Teardown, HandlerError> {
        let id = self.inner.next_watcher.fetch_add(1, Ordering::Relaxed);
        self.inner.watchers().insert(
            id,
            Watcher {
                path: path.clone(),
                notifier: on_change,
            },
        );
        debug!("Watching {} (watcher {})", path, id);

        let inner = Arc::downgrade(&self.inner);
        Ok(Box::new(move || {
            if let Some(inner) = inner.upgrade() {
                inner.watchers().remove(&id);
            }
        }))
    }
}

impl std::fmt::Debug for DocumentStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DocumentStore")
            .field("watchers", &self.watcher_count())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ferry_core::Invocable;
    use serde_json::json;

    fn path(value: Value) -> PropertyPath {
        serde_json::from_value(value).unwrap()
    }

    fn store() -> DocumentStore {
        DocumentStore::new(json!({
            "settings": {"theme": "light", "volume": 3},
            "tabs": [{"title": "home"}, {"title": "docs"}],
            "7": "seven"
        }))
    }

    async fn resolve_value(store: &DocumentStore, p: Value) -> std::result::Result<Value, HandlerError> {
        match store.resolve(&path(p)).await? {
            Resolved::Value(value) => Ok(value),
            Resolved::Invocable(_) => panic!("expected a plain value"),
        }
    }

    #[tokio::test]
    async fn test_resolve_values() {
        let store = store();

        assert_eq!(resolve_value(&store, json!(["settings", "theme"])).await.unwrap(), "light");
        assert_eq!(resolve_value(&store, json!(["tabs", 1, "title"])).await.unwrap(), "docs");
        assert_eq!(resolve_value(&store, json!(["tabs", "0", "title"])).await.unwrap(), "home");
        assert_eq!(resolve_value(&store, json!([7])).await.unwrap(), "seven");
        assert_eq!(resolve_value(&store, json!([])).await.unwrap(), store.snapshot());
    }

    #[tokio::test]
    async fn test_missing_value_is_handler_error() {
        let store = store();
        let err = resolve_value(&store, json!(["settings", "nope"])).await.unwrap_err();
        assert!(err.message.contains("No value at"));

        assert!(resolve_value(&store, json!(["tabs", 9])).await.is_err());
    }

    #[tokio::test]
    async fn test_set_method_writes_parent() {
        let store = store();
        let setter = match store.resolve(&path(json!(["settings", "theme", "set"]))).await.unwrap() {
            Resolved::Invocable(callable) => callable,
            Resolved::Value(_) => panic!("expected a callable"),
        };

        setter.invoke(vec![json!("dark")]).await.unwrap();

        assert_eq!(store.get(&path(json!(["settings", "theme"]))), Some(json!("dark")));
    }

    #[test]
    fn test_assign_rules() {
        let store = store();

        store.set(&path(json!(["settings", "font"])), json!("mono")).unwrap();
        store.set(&path(json!(["tabs", 2])), json!({"title": "new"})).unwrap();
        assert_eq!(store.get(&path(json!(["tabs", 2, "title"]))), Some(json!("new")));

        assert!(store.set(&path(json!(["tabs", 9])), json!(null)).is_err());
        assert!(store.set(&path(json!(["missing", "deep"])), json!(1)).is_err());
        assert!(store.set(&path(json!(["settings", "theme", "x"])), json!(1)).is_err());

        store.set(&PropertyPath::default(), json!({"fresh": true})).unwrap();
        assert_eq!(store.snapshot(), json!({"fresh": true}));
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        std::io::Write::write_all(&mut file, br#"{"name": "ferry"}"#).unwrap();

        let store = DocumentStore::load(file.path()).unwrap();
        assert_eq!(store.get(&path(json!(["name"]))), Some(json!("ferry")));

        std::io::Write::write_all(&mut file, b"garbage").unwrap();
        assert!(matches!(
            DocumentStore::load(file.path()),
            Err(HostError::Json(_))
        ));
    }
}
