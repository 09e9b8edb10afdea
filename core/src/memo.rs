//! Single-flight memoization.
//!
//! [`Memo`] maps a key to a lazily-built value, running at most one builder
//! per key; callers that arrive while a build is in flight wait for it and
//! observe the same outcome. Entries stay until they are evicted, so a
//! successful build is shared by every later lookup.

use std::collections::HashMap;
use std::future::Future;
use std::hash::Hash;
use std::sync::Arc;

use tokio::sync::{Mutex, OnceCell};

use crate::error::Result;

type Entry<V> = Arc<OnceCell<Result<V>>>;
type Map<K, V> = Arc<Mutex<HashMap<K, Entry<V>>>>;

/// Removes one entry from the owning [`Memo`]. Handed to the builder so
/// that background observers (session teardown, delayed failure cleanup)
/// can drop the entry without holding a pointer back into it.
pub struct Eviction<K, V> {
    key: K,
    cache: Map<K, V>,
}

impl<K, V> Clone for Eviction<K, V>
where
    K: Clone,
{
    fn clone(&self) -> Self {
        Self {
            key: self.key.clone(),
            cache: Arc::clone(&self.cache),
        }
    }
}

impl<K, V> Eviction<K, V>
where
    K: Eq + Hash,
{
    /// Drop the entry. The next lookup for the key runs a fresh build.
    pub async fn evict(&self) {
        self.cache.lock().await.remove(&self.key);
    }
}

/// Concurrency-safe single-flight memoizer.
///
/// The map lock is held only for entry lookup and removal, never across a
/// build; the builder itself runs behind the entry's once-cell, which is
/// what serializes first-touch callers.
pub struct Memo<K, V, F> {
    builder: F,
    cache: Map<K, V>,
}

impl<K, V, F, Fut> Memo<K, V, F>
where
    K: Eq + Hash + Clone,
    V: Clone,
    F: Fn(K, Eviction<K, V>) -> Fut,
    Fut: Future<Output = Result<V>>,
{
    pub fn new(builder: F) -> Self {
        Self {
            builder,
            cache: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Return the value for `key`, building it if absent. Concurrent calls
    /// for the same key share one build and one outcome; a stored failure
    /// is returned as-is until the entry is evicted.
    pub async fn get(&self, key: K) -> Result<V> {
        let entry = {
            let mut cache = self.cache.lock().await;
            cache.entry(key.clone()).or_default().clone()
        };
        let eviction = Eviction {
            key: key.clone(),
            cache: Arc::clone(&self.cache),
        };
        entry
            .get_or_init(|| (self.builder)(key, eviction))
            .await
            .clone()
    }

    /// Remove the entry for `key`, if any.
    pub async fn remove(&self, key: &K) {
        self.cache.lock().await.remove(key);
    }

    /// Number of live entries, including in-flight builds.
    pub async fn len(&self) -> usize {
        self.cache.lock().await.len()
    }
}
