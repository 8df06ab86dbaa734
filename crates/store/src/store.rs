//! Store trait and implementations.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use chrono::Utc;
use itertools::Itertools;
use kron_core::{Error, ObjectKey, Resource, Result, Uid};
use tokio::sync::{RwLock, broadcast};
use tracing::{debug, trace};

use crate::watch::{WatchEvent, WatchStream};

/// Default number of undelivered watch events buffered per store.
pub const DEFAULT_WATCH_CAPACITY: usize = 1024;

/// Key-addressed object store with change notification.
///
/// Implementations must make `create` atomic (a second create of the same key
/// fails with [`Error::AlreadyExists`]) and `update` a compare-and-swap on
/// `metadata.resource_version` (a stale write fails with [`Error::Conflict`]).
#[async_trait]
pub trait ObjectStore<K: Resource>: Send + Sync {
    /// Fetch an object.
    async fn get(&self, key: &ObjectKey) -> Result<K>;

    /// Fetch every object.
    async fn list(&self) -> Result<Vec<K>>;

    /// Create an object. The store assigns uid, resource version and creation time.
    async fn create(&self, obj: K) -> Result<K>;

    /// Replace an object whose resource version matches the stored one.
    async fn update(&self, obj: K) -> Result<K>;

    /// Delete an object, returning its last state.
    async fn delete(&self, key: &ObjectKey) -> Result<K>;

    /// Subscribe to changes made after this call.
    fn watch(&self) -> WatchStream<K>;
}

/// In-memory store.
pub struct InMemoryStore<K> {
    objects: RwLock<HashMap<ObjectKey, K>>,
    events: broadcast::Sender<WatchEvent<K>>,
    resource_version: AtomicU64,
}

impl<K: Resource> InMemoryStore<K> {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::with_watch_capacity(DEFAULT_WATCH_CAPACITY)
    }

    /// Create an empty store buffering up to `capacity` undelivered events per watcher.
    pub fn with_watch_capacity(capacity: usize) -> Self {
        let (events, _) = broadcast::channel(capacity.max(1));
        Self {
            objects: RwLock::new(HashMap::new()),
            events,
            resource_version: AtomicU64::new(0),
        }
    }

    /// Number of stored objects.
    pub async fn len(&self) -> usize {
        self.objects.read().await.len()
    }

    /// Whether the store is empty.
    pub async fn is_empty(&self) -> bool {
        self.objects.read().await.is_empty()
    }

    fn next_resource_version(&self) -> u64 {
        self.resource_version
            .fetch_add(1, Ordering::AcqRel)
            .saturating_add(1)
    }

    fn notify(&self, event: WatchEvent<K>) {
        // No watchers is not an error
        if self.events.send(event).is_err() {
            trace!(kind = K::KIND, "No watchers for store event");
        }
    }
}

impl<K: Resource> Default for InMemoryStore<K> {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl<K: Resource> ObjectStore<K> for InMemoryStore<K> {
    async fn get(&self, key: &ObjectKey) -> Result<K> {
        self.objects
            .read()
            .await
            .get(key)
            .cloned()
            .ok_or_else(|| Error::not_found(K::KIND, key.clone()))
    }

    async fn list(&self) -> Result<Vec<K>> {
        let objects = self.objects.read().await;
        Ok(objects
            .iter()
            .sorted_by(|(a, _), (b, _)| a.cmp(b))
            .map(|(_, obj)| obj.clone())
            .collect_vec())
    }

    async fn create(&self, mut obj: K) -> Result<K> {
        let key = obj.key();
        let mut objects = self.objects.write().await;
        if objects.contains_key(&key) {
            return Err(Error::already_exists(K::KIND, key));
        }

        let meta = obj.meta_mut();
        meta.uid = Some(Uid::new());
        meta.resource_version = self.next_resource_version();
        meta.generation = 1;
        meta.creation_timestamp.get_or_insert_with(Utc::now);
        meta.deletion_timestamp = None;

        debug!(kind = K::KIND, key = %key, "Created object");
        objects.insert(key, obj.clone());
        self.notify(WatchEvent::Added(obj.clone()));
        Ok(obj)
    }

    async fn update(&self, mut obj: K) -> Result<K> {
        let key = obj.key();
        let mut objects = self.objects.write().await;
        let Some(stored) = objects.get(&key) else {
            return Err(Error::not_found(K::KIND, key));
        };

        let stored_meta = stored.meta();
        if stored_meta.resource_version != obj.meta().resource_version {
            return Err(Error::conflict(
                key,
                format!(
                    "resource version {} is stale, stored is {}",
                    obj.meta().resource_version,
                    stored_meta.resource_version
                ),
            ));
        }

        let uid = stored_meta.uid;
        let created = stored_meta.creation_timestamp;
        let generation = stored_meta.generation;

        let meta = obj.meta_mut();
        meta.uid = uid;
        meta.creation_timestamp = created;
        meta.generation = generation;
        meta.resource_version = self.next_resource_version();

        debug!(kind = K::KIND, key = %key, "Updated object");
        objects.insert(key, obj.clone());
        self.notify(WatchEvent::Modified(obj.clone()));
        Ok(obj)
    }

    async fn delete(&self, key: &ObjectKey) -> Result<K> {
        let removed = self.objects.write().await.remove(key);
        match removed {
            Some(obj) => {
                debug!(kind = K::KIND, key = %key, "Deleted object");
                self.notify(WatchEvent::Deleted(obj.clone()));
                Ok(obj)
            }
            None => Err(Error::not_found(K::KIND, key.clone())),
        }
    }

    fn watch(&self) -> WatchStream<K> {
        WatchStream::new(self.events.subscribe())
    }
}

/// A wrapper that adds tracing to a store.
pub struct TracingStore<S> {
    inner: S,
}

impl<S> TracingStore<S> {
    /// Create a new tracing store.
    pub const fn new(inner: S) -> Self {
        Self { inner }
    }
}

#[async_trait]
impl<K: Resource, S: ObjectStore<K>> ObjectStore<K> for TracingStore<S> {
    async fn get(&self, key: &ObjectKey) -> Result<K> {
        tracing::debug!(kind = K::KIND, key = %key, "Getting object");
        self.inner.get(key).await
    }

    async fn list(&self) -> Result<Vec<K>> {
        tracing::debug!(kind = K::KIND, "Listing objects");
        self.inner.list().await
    }

    async fn create(&self, obj: K) -> Result<K> {
        tracing::debug!(kind = K::KIND, key = %obj.key(), "Creating object");
        let result = self.inner.create(obj).await;
        if let Err(ref e) = result {
            tracing::debug!(kind = K::KIND, error = %e, "Create failed");
        }
        result
    }

    async fn update(&self, obj: K) -> Result<K> {
        tracing::debug!(
            kind = K::KIND,
            key = %obj.key(),
            resource_version = obj.meta().resource_version,
            "Updating object"
        );
        self.inner.update(obj).await
    }

    async fn delete(&self, key: &ObjectKey) -> Result<K> {
        tracing::debug!(kind = K::KIND, key = %key, "Deleting object");
        self.inner.delete(key).await
    }

    fn watch(&self) -> WatchStream<K> {
        self.inner.watch()
    }
}
