//! Thread-safe object cache and its read-only lister view.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::key::ResourceKey;

/// Cached objects by key.
#[derive(Debug)]
pub struct Store<T> {
    items: RwLock<HashMap<ResourceKey, Arc<T>>>,
}

impl<T> Default for Store<T> {
    fn default() -> Self {
        Self {
            items: RwLock::new(HashMap::new()),
        }
    }
}

impl<T> Store<T> {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace, returning the previous object.
    pub fn insert(&self, key: ResourceKey, obj: Arc<T>) -> Option<Arc<T>> {
        self.items.write().insert(key, obj)
    }

    /// Remove, returning the removed object.
    pub fn remove(&self, key: &ResourceKey) -> Option<Arc<T>> {
        self.items.write().remove(key)
    }

    /// Look up by key.
    pub fn get(&self, key: &ResourceKey) -> Option<Arc<T>> {
        self.items.read().get(key).cloned()
    }

    /// Snapshot of every object, ordered by key.
    pub fn list(&self) -> Vec<(ResourceKey, Arc<T>)> {
        let mut entries: Vec<_> = self
            .items
            .read()
            .iter()
            .map(|(key, obj)| (key.clone(), Arc::clone(obj)))
            .collect();
        entries.sort_by(|a, b| a.0.cmp(&b.0));
        entries
    }

    /// Every cached key, sorted.
    pub fn list_keys(&self) -> Vec<ResourceKey> {
        let mut keys: Vec<_> = self.items.read().keys().cloned().collect();
        keys.sort();
        keys
    }

    /// Number of cached objects.
    pub fn len(&self) -> usize {
        self.items.read().len()
    }

    /// True if nothing is cached.
    pub fn is_empty(&self) -> bool {
        self.items.read().is_empty()
    }
}

/// Read-only view of a [`Store`].
#[derive(Debug)]
pub struct Lister<T> {
    store: Arc<Store<T>>,
}

impl<T> Clone for Lister<T> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
        }
    }
}

impl<T> Lister<T> {
    /// Create a lister over `store`.
    pub fn new(store: Arc<Store<T>>) -> Self {
        Self { store }
    }

    /// Look up by namespace and name; an empty namespace means cluster-scoped.
    pub fn get(&self, namespace: &str, name: &str) -> Option<Arc<T>> {
        self.store.get(&ResourceKey::namespaced(namespace, name))
    }

    /// Look up by key.
    pub fn get_by_key(&self, key: &ResourceKey) -> Option<Arc<T>> {
        self.store.get(key)
    }

    /// Every cached object, ordered by key.
    pub fn list(&self) -> Vec<Arc<T>> {
        self.store.list().into_iter().map(|(_, obj)| obj).collect()
    }

    /// Cached objects in one namespace, ordered by name.
    pub fn list_namespace(&self, namespace: &str) -> Vec<Arc<T>> {
        self.store
            .list()
            .into_iter()
            .filter(|(key, _)| key.namespace() == Some(namespace))
            .map(|(_, obj)| obj)
            .collect()
    }
}
