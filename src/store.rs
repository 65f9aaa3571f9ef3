use crate::error::{Result, RussoundError};
use crate::path::{lookup, lookup_or_create, merge_into_tree, prune_from_tree};
use crate::protocol::{MessageKind, WireMessage};
use parking_lot::{Mutex, RwLock};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::Arc;

/// Callback invoked for every notification on a watched branch
pub type WatchCallback = Arc<dyn Fn(&WireMessage) + Send + Sync>;

/// Local mirror of device state, fed by notifications
///
/// The tree only grows from notifications; [`StateStore::prune`] is the one
/// way entries leave it.
pub(crate) struct StateStore {
    tree: RwLock<Value>,
    watchers: Mutex<HashMap<String, WatchCallback>>,
}

impl StateStore {
    pub fn new() -> Self {
        Self {
            tree: RwLock::new(Value::Object(Map::new())),
            watchers: Mutex::new(HashMap::new()),
        }
    }

    /// Merge a notification into the tree and run the branch's watcher
    ///
    /// Returns `false` for anything that is not a complete notification.
    pub fn apply_notification(&self, msg: &WireMessage) -> bool {
        if msg.kind != MessageKind::Notification {
            return false;
        }
        let (Some(branch), Some(leaf)) = (msg.branch.as_deref(), msg.leaf.as_deref()) else {
            return false;
        };

        merge_into_tree(&mut self.tree.write(), branch, leaf, msg.value.as_deref());

        // Clone out so the callback runs without holding the lock
        let watcher = self.watchers.lock().get(branch).cloned();
        if let Some(watcher) = watcher {
            watcher(msg);
        }
        true
    }

    /// Register the callback for `path`, replacing any previous one
    pub fn watch(&self, path: impl Into<String>, callback: WatchCallback) {
        self.watchers.lock().insert(path.into(), callback);
    }

    /// Remove the callback for `path`
    pub fn unwatch(&self, path: &str) -> bool {
        self.watchers.lock().remove(path).is_some()
    }

    pub fn is_watched(&self, path: &str) -> bool {
        self.watchers.lock().contains_key(path)
    }

    pub fn watched_paths(&self) -> Vec<String> {
        self.watchers.lock().keys().cloned().collect()
    }

    /// Copy of the subtree cached for `path`
    pub fn get_cached(&self, path: &str) -> Option<Value> {
        lookup(&self.tree.read(), path).cloned()
    }

    /// Cached value of `key` under `path`, or `default` when absent or empty
    pub fn get_cached_variable(&self, path: &str, key: &str, default: &str) -> String {
        self.get_cached_variable_strict(path, key)
            .ok()
            .flatten()
            .unwrap_or_else(|| default.to_string())
    }

    /// Cached value of `key` under `path`
    ///
    /// `Ok(None)` means the device reported the variable as empty; a variable
    /// that was never pushed fails with [`RussoundError::UncachedVariable`].
    pub fn get_cached_variable_strict(&self, path: &str, key: &str) -> Result<Option<String>> {
        let tree = self.tree.read();
        let value = lookup(&tree, path)
            .and_then(|node| node.get(key))
            .ok_or_else(|| RussoundError::UncachedVariable {
                path: path.to_string(),
                key: key.to_string(),
            })?;
        Ok(match value {
            Value::Null => None,
            Value::String(s) => Some(s.clone()),
            other => Some(other.to_string()),
        })
    }

    /// Store a value the client derived itself rather than received
    pub fn insert_local(&self, path: &str, key: &str, value: Value) {
        lookup_or_create(&mut self.tree.write(), path).insert(key.to_string(), value);
    }

    /// Drop everything cached under `path`
    pub fn prune(&self, path: &str) -> Option<Value> {
        prune_from_tree(&mut self.tree.write(), path)
    }

    /// Copy of the whole tree
    pub fn snapshot(&self) -> Value {
        self.tree.read().clone()
    }
}
