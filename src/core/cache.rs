use std::collections::HashMap;
use std::hash::Hash;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::debug;

/// Shared read-through cache for values that are expensive to load, such as
/// parsed NAV series. Writers must call [`Cache::invalidate`] after changing
/// the backing data.
#[derive(Clone)]
pub struct Cache<K, V>
where
    K: Eq + Hash + Send + Sync + 'static,
    V: Send + Sync + 'static,
{
    inner: Arc<Mutex<HashMap<K, Arc<V>>>>,
}

impl<K, V> Cache<K, V>
where
    K: Eq + Hash + Send + Sync + std::fmt::Debug,
    V: Send + Sync,
{
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub async fn get(&self, key: &K) -> Option<Arc<V>> {
        let cache = self.inner.lock().await;
        let value = cache.get(key).cloned();
        if value.is_some() {
            debug!("Cache HIT for key: {:?}", key);
        } else {
            debug!("Cache MISS for key: {:?}", key);
        }
        value
    }

    pub async fn put(&self, key: K, value: V) -> Arc<V> {
        let value = Arc::new(value);
        let mut cache = self.inner.lock().await;
        debug!("Cache PUT for key: {:?}", key);
        cache.insert(key, Arc::clone(&value));
        value
    }

    pub async fn invalidate(&self, key: &K) {
        let mut cache = self.inner.lock().await;
        if cache.remove(key).is_some() {
            debug!("Cache INVALIDATE for key: {:?}", key);
        }
    }
}

impl<K, V> Default for Cache<K, V>
where
    K: Eq + Hash + Send + Sync + std::fmt::Debug,
    V: Send + Sync,
{
    fn default() -> Self {
        Self::new()
    }
}
